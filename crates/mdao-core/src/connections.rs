//! Connection graph and execution ordering.

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Split an absolute name `path.to.comp.var` into `("path.to.comp", "var")`.
pub fn split_name(abs_name: &str) -> Option<(&str, &str)> {
    abs_name.rsplit_once('.')
}

/// Input -> source output map. Each input has at most one source.
#[derive(Debug, Clone, Default)]
pub struct ConnectionGraph {
    sources: IndexMap<String, String>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect absolute output `src` to absolute input `tgt`.
    pub fn connect(&mut self, src: impl Into<String>, tgt: impl Into<String>) -> Result<()> {
        let (src, tgt) = (src.into(), tgt.into());
        if let Some(existing) = self.sources.get(&tgt) {
            return Err(Error::Configuration(format!(
                "input '{}' is already connected to '{}'; cannot also connect '{}'",
                tgt, existing, src
            )));
        }
        self.sources.insert(tgt, src);
        Ok(())
    }

    pub fn source_of(&self, tgt: &str) -> Option<&str> {
        self.sources.get(tgt).map(String::as_str)
    }

    pub fn targets_of<'a>(&'a self, src: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.sources
            .iter()
            .filter(move |(_, s)| s.as_str() == src)
            .map(|(t, _)| t.as_str())
    }

    pub fn is_connected(&self, tgt: &str) -> bool {
        self.sources.contains_key(tgt)
    }

    /// `(source, target)` pairs in connection order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources.iter().map(|(t, s)| (s.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Result of ordering the components of a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    /// Component indices in execution order.
    pub order: Vec<usize>,
    /// Strongly connected groups of more than one component (or a component
    /// feeding itself). Their data cannot be made consistent by a single
    /// transfer pass.
    pub coupled: Vec<Vec<usize>>,
}

impl ExecutionOrder {
    pub fn is_coupled(&self) -> bool {
        !self.coupled.is_empty()
    }
}

/// Order `n` components given data-flow edges `from -> to`.
///
/// Acyclic parts follow a topological order that keeps declaration order
/// wherever the edges allow it. Each cycle is kept together in declaration
/// order. A cycle made only of explicit components is rejected: it has no
/// residual for a nonlinear solver to drive.
pub fn execution_order(
    names: &[&str],
    explicit: &[bool],
    edges: &[(usize, usize)],
) -> Result<ExecutionOrder> {
    let n = names.len();
    let mut adj = vec![Vec::new(); n];
    let mut self_loop = vec![false; n];
    for &(from, to) in edges {
        if from == to {
            self_loop[from] = true;
        } else if !adj[from].contains(&to) {
            adj[from].push(to);
        }
    }

    let sccs = tarjan(&adj);
    let mut comp_of = vec![0; n];
    for (k, scc) in sccs.iter().enumerate() {
        for &v in scc {
            comp_of[v] = k;
        }
    }

    let mut coupled = Vec::new();
    for scc in &sccs {
        if scc.len() > 1 || self_loop[scc[0]] {
            if scc.iter().all(|&v| explicit[v]) {
                let members: Vec<&str> = scc.iter().map(|&v| names[v]).collect();
                return Err(Error::Configuration(format!(
                    "explicit components {:?} form a cycle",
                    members
                )));
            }
            let mut members = scc.clone();
            members.sort_unstable();
            coupled.push(members);
        }
    }

    // Kahn's algorithm over the condensation, always taking the ready group
    // that contains the lowest declaration index.
    let m = sccs.len();
    let mut indegree = vec![0usize; m];
    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); m];
    for (from, targets) in adj.iter().enumerate() {
        for &to in targets {
            let (a, b) = (comp_of[from], comp_of[to]);
            if a != b && !succ[a].contains(&b) {
                succ[a].push(b);
                indegree[b] += 1;
            }
        }
    }
    let key: Vec<usize> = sccs
        .iter()
        .map(|scc| scc.iter().copied().min().unwrap_or(0))
        .collect();

    let mut ready: Vec<usize> = (0..m).filter(|&c| indegree[c] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(pos) = (0..ready.len()).min_by_key(|&p| key[ready[p]]) {
        let c = ready.swap_remove(pos);
        let mut members = sccs[c].clone();
        members.sort_unstable();
        order.extend(members);
        for &s in &succ[c] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.push(s);
            }
        }
    }

    coupled.sort();
    Ok(ExecutionOrder { order, coupled })
}

/// Strongly connected components (Tarjan), iterative.
fn tarjan(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut index = vec![usize::MAX; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut sccs = Vec::new();
    let mut next = 0;

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        let mut work = vec![(root, 0usize)];
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(top) = work.last_mut() {
            let v = top.0;
            if top.1 < adj[v].len() {
                let w = adj[v][top.1];
                top.1 += 1;
                if index[w] == usize::MAX {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }
    }
    sccs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_once() {
        let mut graph = ConnectionGraph::new();
        graph.connect("ivc.a", "comp1.a").unwrap();
        graph.connect("ivc.a", "comp2.a").unwrap();
        assert_eq!(graph.source_of("comp1.a"), Some("ivc.a"));
        assert_eq!(graph.targets_of("ivc.a").count(), 2);
        let err = graph.connect("other.a", "comp1.a").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("sub.comp.x"), Some(("sub.comp", "x")));
        assert_eq!(split_name("x"), None);
    }

    #[test]
    fn test_order_follows_data_flow() {
        // declared: consumer, producer, ivc
        let names = ["consumer", "producer", "ivc"];
        let edges = [(2, 1), (1, 0)];
        let order = execution_order(&names, &[true, true, true], &edges).unwrap();
        assert_eq!(order.order, vec![2, 1, 0]);
        assert!(!order.is_coupled());
    }

    #[test]
    fn test_order_keeps_declaration_order_when_free() {
        let names = ["a", "b", "c"];
        let order = execution_order(&names, &[true, false, true], &[]).unwrap();
        assert_eq!(order.order, vec![0, 1, 2]);
    }

    #[test]
    fn test_implicit_cycle_is_coupled() {
        let names = ["ivc", "d1", "d2"];
        let edges = [(0, 1), (1, 2), (2, 1)];
        let order = execution_order(&names, &[true, false, true], &edges).unwrap();
        assert_eq!(order.order, vec![0, 1, 2]);
        assert_eq!(order.coupled, vec![vec![1, 2]]);
    }

    #[test]
    fn test_explicit_cycle_rejected() {
        let names = ["d1", "d2"];
        let edges = [(0, 1), (1, 0)];
        let err = execution_order(&names, &[true, true], &edges).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("cycle")));
    }

    #[test]
    fn test_implicit_self_loop_is_coupled() {
        let order = execution_order(&["lin"], &[false], &[(0, 0)]).unwrap();
        assert_eq!(order.coupled, vec![vec![0]]);
    }
}
