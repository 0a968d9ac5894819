//! Model assembly and data transfer.
//!
//! A [`Group`] is a tree of named subsystems. [`Model::build`] flattens it
//! into component instances with dotted paths, feeds every unconnected
//! input from an automatically created independent output, orders the
//! instances along the data flow and precomputes the transfer links.
//!
//! The global unknown vector is the concatenation of all outputs in
//! execution order; [`Model::apply_jacobian`] is the product with the
//! Jacobian `dR/du` of the whole model.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use indexmap::IndexMap;
use nalgebra::DMatrix;

use mdao_core::{
    execution_order, split_name, Component, ComponentInstance, ConnectionGraph, Declarations,
    ExplicitComponent, Mode, Vector,
};

use crate::error::{Error, Result};

/// Path of the component holding automatically created independent outputs.
pub const AUTO_IVC: &str = "_auto_ivc";

/// A member of a [`Group`].
#[derive(Debug)]
pub enum Subsystem {
    Component(Component),
    Group(Group),
}

/// Hierarchical model description.
#[derive(Debug, Default)]
pub struct Group {
    subsystems: Vec<(String, Subsystem)>,
    /// `(source output, target input)` relative to this group.
    connections: Vec<(String, String)>,
    promotes: Vec<(String, Vec<String>)>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subsystem(&mut self, name: impl Into<String>, component: Component) -> &mut Self {
        self.subsystems
            .push((name.into(), Subsystem::Component(component)));
        self
    }

    pub fn add_group(&mut self, name: impl Into<String>, group: Group) -> &mut Self {
        self.subsystems.push((name.into(), Subsystem::Group(group)));
        self
    }

    /// Connect output `src` to input `tgt`. Both are named relative to this
    /// group; `tgt` may be a promoted name shared by several inputs.
    pub fn connect(&mut self, src: impl Into<String>, tgt: impl Into<String>) -> &mut Self {
        self.connections.push((src.into(), tgt.into()));
        self
    }

    /// Expose inputs of `subsystem` under their own names in this group.
    pub fn promotes_inputs(&mut self, subsystem: impl Into<String>, names: &[&str]) -> &mut Self {
        self.promotes.push((
            subsystem.into(),
            names.iter().map(|n| n.to_string()).collect(),
        ));
        self
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }
}

/// Which outputs [`Model::list_outputs`] reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFilter {
    #[default]
    All,
    Explicit,
    Implicit,
}

/// Independent outputs feeding otherwise unconnected inputs.
struct AutoIvc {
    outputs: Vec<(String, Vec<f64>)>,
}

impl ExplicitComponent for AutoIvc {
    fn setup(&mut self, decl: &mut Declarations) -> mdao_core::Result<()> {
        for (name, val) in &self.outputs {
            decl.add_output(name, val.clone());
        }
        Ok(())
    }

    fn compute(&mut self, _inputs: &mut Vector, _outputs: &mut Vector) -> mdao_core::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Flat {
    instances: Vec<ComponentInstance>,
    /// visible input name -> absolute input names
    inputs: IndexMap<String, Vec<String>>,
    /// visible output name -> absolute output name
    outputs: IndexMap<String, String>,
    connections: ConnectionGraph,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn config(msg: String) -> Error {
    mdao_core::Error::Configuration(msg).into()
}

fn not_found(name: &str) -> Error {
    mdao_core::Error::VariableNotFound(name.to_string()).into()
}

fn flatten(group: Group, prefix: &str) -> Result<Flat> {
    let mut flat = Flat::default();
    let mut seen = HashSet::new();

    for (name, sub) in group.subsystems {
        if name.is_empty() || name.contains('.') {
            return Err(config(format!("invalid subsystem name '{}'", name)));
        }
        if !seen.insert(name.clone()) {
            return Err(config(format!(
                "duplicate subsystem '{}'",
                join(prefix, &name)
            )));
        }
        let path = join(prefix, &name);

        let (inputs, outputs): (Vec<(String, String)>, Vec<(String, String)>) = match sub {
            Subsystem::Component(component) => {
                let inst = ComponentInstance::new(path.as_str(), component)?;
                let decl = inst.declarations();
                let inputs = decl
                    .inputs()
                    .iter()
                    .map(|m| (m.name.clone(), join(&path, &m.name)))
                    .collect();
                let outputs = decl
                    .outputs()
                    .iter()
                    .map(|m| (m.name.clone(), join(&path, &m.name)))
                    .collect();
                flat.instances.push(inst);
                (inputs, outputs)
            }
            Subsystem::Group(child) => {
                let child = flatten(child, &path)?;
                flat.instances.extend(child.instances);
                for (src, tgt) in child.connections.iter() {
                    flat.connections.connect(src, tgt)?;
                }
                let inputs = child
                    .inputs
                    .into_iter()
                    .flat_map(|(vis, abs)| abs.into_iter().map(move |a| (vis.clone(), a)))
                    .collect();
                (inputs, child.outputs.into_iter().collect())
            }
        };

        let promoted: Vec<&String> = group
            .promotes
            .iter()
            .filter(|(sub, _)| *sub == name)
            .flat_map(|(_, names)| names)
            .collect();
        for p in &promoted {
            if !inputs.iter().any(|(vis, _)| vis == *p) {
                return Err(config(format!(
                    "'{}': cannot promote '{}': no such input",
                    path, p
                )));
            }
        }
        for (vis, abs) in inputs {
            let visible = if promoted.contains(&&vis) {
                vis
            } else {
                join(&name, &vis)
            };
            flat.inputs.entry(visible).or_default().push(abs);
        }
        for (vis, abs) in outputs {
            flat.outputs.insert(join(&name, &vis), abs);
        }
    }

    for (sub, _) in &group.promotes {
        if !seen.contains(sub) {
            return Err(config(format!(
                "cannot promote inputs of unknown subsystem '{}'",
                join(prefix, sub)
            )));
        }
    }

    for (src, tgt) in group.connections {
        let src_abs = flat.outputs.get(&src).cloned().ok_or_else(|| {
            config(format!(
                "connect: '{}' is not an output of '{}'",
                src,
                if prefix.is_empty() { "<model>" } else { prefix }
            ))
        })?;
        let targets = flat.inputs.get(&tgt).cloned().ok_or_else(|| {
            config(format!(
                "connect: '{}' is not an input of '{}'",
                tgt,
                if prefix.is_empty() { "<model>" } else { prefix }
            ))
        })?;
        for t in targets {
            flat.connections.connect(src_abs.as_str(), t)?;
        }
    }
    Ok(flat)
}

#[derive(Debug, Clone)]
struct Link {
    /// Range in the target instance's inputs.
    tgt: Range<usize>,
    src_inst: usize,
    /// Range in the source instance's outputs.
    src: Range<usize>,
}

/// A flattened, ordered model ready to run.
#[derive(Debug)]
pub struct Model {
    instances: Vec<ComponentInstance>,
    index: HashMap<String, usize>,
    connections: ConnectionGraph,
    links: Vec<Vec<Link>>,
    /// Global output index feeding each input entry, per instance.
    input_sources: Vec<Vec<usize>>,
    offsets: Vec<usize>,
    size: usize,
    coupled: bool,
    promoted: IndexMap<String, Vec<String>>,
    /// Completed `run_linearize` calls.
    linearizations: u64,
}

impl Model {
    /// Flatten `root`, create the auto-IVC and fix the execution order.
    pub fn build(root: Group) -> Result<Self> {
        let mut flat = flatten(root, "")?;
        let mut index = path_index(&flat.instances)?;

        let mut ivc_outputs = Vec::new();
        let mut ivc_links = Vec::new();
        for abs_inputs in flat.inputs.values() {
            let unconnected: Vec<&String> = abs_inputs
                .iter()
                .filter(|a| !flat.connections.is_connected(a))
                .collect();
            let Some(first) = unconnected.first() else {
                continue;
            };
            let (path, var) = split_name(first).ok_or_else(|| not_found(first))?;
            let val = index
                .get(path)
                .and_then(|&i| flat.instances[i].input_meta(var))
                .map(|m| m.val.clone())
                .ok_or_else(|| not_found(first))?;
            let name = format!("v{}", ivc_outputs.len());
            ivc_links.push((join(AUTO_IVC, &name), unconnected.into_iter().cloned().collect::<Vec<_>>()));
            ivc_outputs.push((name, val));
        }
        if !ivc_outputs.is_empty() {
            log::debug!("auto-ivc feeds {} unconnected inputs", ivc_outputs.len());
            let ivc = ComponentInstance::new(
                AUTO_IVC,
                Component::explicit(AutoIvc {
                    outputs: ivc_outputs,
                }),
            )?;
            flat.instances.insert(0, ivc);
            for (src, targets) in ivc_links {
                for tgt in targets {
                    flat.connections.connect(src.as_str(), tgt)?;
                }
            }
            index = path_index(&flat.instances)?;
        }

        let mut edges = Vec::new();
        for (src, tgt) in flat.connections.iter() {
            edges.push((owner_index(&index, src)?, owner_index(&index, tgt)?));
        }
        let names: Vec<&str> = flat.instances.iter().map(|i| i.path()).collect();
        let explicit: Vec<bool> = flat.instances.iter().map(|i| i.is_explicit()).collect();
        let order = execution_order(&names, &explicit, &edges)?;
        for group in &order.coupled {
            let members: Vec<&str> = group.iter().map(|&i| names[i]).collect();
            log::debug!("coupled components: {:?}", members);
        }

        let mut slots: Vec<Option<ComponentInstance>> =
            flat.instances.into_iter().map(Some).collect();
        let instances: Vec<ComponentInstance> = order
            .order
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();
        let index = path_index(&instances)?;

        let mut offsets = Vec::with_capacity(instances.len());
        let mut size = 0;
        for inst in &instances {
            offsets.push(size);
            size += inst.num_outputs();
        }

        let mut links = Vec::with_capacity(instances.len());
        let mut input_sources = Vec::with_capacity(instances.len());
        for inst in &instances {
            let mut inst_links = Vec::new();
            let mut sources = vec![0; inst.num_inputs()];
            for (var, tgt) in inst.inputs().layout().iter() {
                let abs = join(inst.path(), var);
                let src_name = flat
                    .connections
                    .source_of(&abs)
                    .ok_or_else(|| config(format!("input '{}' has no source", abs)))?;
                let (src_path, src_var) = split_name(src_name).ok_or_else(|| not_found(src_name))?;
                let src_inst = *index.get(src_path).ok_or_else(|| not_found(src_name))?;
                let src = instances[src_inst]
                    .outputs()
                    .layout()
                    .range(src_var)
                    .ok_or_else(|| not_found(src_name))?;
                if src.len() != tgt.len() {
                    return Err(config(format!(
                        "cannot connect '{}' (size {}) to '{}' (size {})",
                        src_name,
                        src.len(),
                        abs,
                        tgt.len()
                    )));
                }
                for (k, s) in tgt.clone().zip(src.clone()) {
                    sources[k] = offsets[src_inst] + s;
                }
                inst_links.push(Link { tgt, src_inst, src });
            }
            links.push(inst_links);
            input_sources.push(sources);
        }

        log::debug!(
            "model built: {} components, {} unknowns, {} connections",
            instances.len(),
            size,
            flat.connections.len()
        );
        Ok(Self {
            instances,
            index,
            connections: flat.connections,
            links,
            input_sources,
            offsets,
            size,
            coupled: order.is_coupled(),
            promoted: flat.inputs,
            linearizations: 0,
        })
    }

    pub fn instances(&self) -> &[ComponentInstance] {
        &self.instances
    }

    pub fn instance(&self, path: &str) -> Option<&ComponentInstance> {
        self.index.get(path).map(|&i| &self.instances[i])
    }

    pub fn instance_mut(&mut self, path: &str) -> Option<&mut ComponentInstance> {
        self.index.get(path).map(|&i| &mut self.instances[i])
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of unknowns (all outputs).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Range of instance `i`'s outputs in the global vector.
    pub fn block(&self, i: usize) -> Range<usize> {
        self.offsets[i]..self.offsets[i] + self.instances[i].num_outputs()
    }

    /// Whether some components form a cycle through their connections.
    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    pub fn connections(&self) -> &ConnectionGraph {
        &self.connections
    }

    /// Component paths in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.path()).collect()
    }

    /// Promoted input names with the absolute inputs they stand for.
    pub fn promoted_inputs(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.promoted.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy upstream outputs into the inputs of instance `i`.
    pub fn transfer_to(&mut self, i: usize) -> Result<()> {
        for k in 0..self.links[i].len() {
            let Link { tgt, src_inst, src } = self.links[i][k].clone();
            let values = self.instances[src_inst].outputs().as_slice()[src].to_vec();
            self.instances[i].inputs_mut().as_mut_slice()?[tgt].copy_from_slice(&values);
        }
        Ok(())
    }

    pub fn transfer_all(&mut self) -> Result<()> {
        for i in 0..self.instances.len() {
            self.transfer_to(i)?;
        }
        Ok(())
    }

    /// Evaluate every residual at the current outputs.
    pub fn run_apply_nonlinear(&mut self) -> Result<()> {
        for i in 0..self.instances.len() {
            self.transfer_to(i)?;
            self.instances[i].run_apply_nonlinear()?;
        }
        Ok(())
    }

    /// One pass in execution order: explicit components compute and
    /// implicit components with their own solver solve. Residuals of the
    /// remaining implicit components are left untouched.
    pub fn run_solve_once(&mut self) -> Result<()> {
        for i in 0..self.instances.len() {
            self.transfer_to(i)?;
            self.instances[i].run_solve_nonlinear()?;
        }
        Ok(())
    }

    /// Evaluate residuals, then let components seed their outputs.
    ///
    /// Returns whether any component provided a guess.
    pub fn run_guess(&mut self) -> Result<bool> {
        if !self
            .instances
            .iter()
            .any(|inst| inst.capabilities().guess_nonlinear)
        {
            return Ok(false);
        }
        self.run_apply_nonlinear()?;
        let mut guessed = false;
        for i in 0..self.instances.len() {
            self.transfer_to(i)?;
            guessed |= self.instances[i].run_guess_nonlinear()?;
        }
        Ok(guessed)
    }

    /// Rebuild every component's partials at the current point.
    pub fn run_linearize(&mut self) -> Result<()> {
        for i in 0..self.instances.len() {
            self.transfer_to(i)?;
            self.instances[i].run_linearize()?;
        }
        self.linearizations += 1;
        Ok(())
    }

    /// Counter identifying the current linearization point. It changes on
    /// every successful [`run_linearize`](Self::run_linearize).
    pub fn linearization(&self) -> u64 {
        self.linearizations
    }

    /// Euclidean norm of all residuals.
    pub fn residual_norm(&self) -> f64 {
        self.instances
            .iter()
            .flat_map(|i| i.residuals().as_slice())
            .map(|r| r * r)
            .sum::<f64>()
            .sqrt()
    }

    pub fn outputs_vec(&self) -> Vec<f64> {
        self.instances
            .iter()
            .flat_map(|i| i.outputs().as_slice().iter().copied())
            .collect()
    }

    pub fn residuals_vec(&self) -> Vec<f64> {
        self.instances
            .iter()
            .flat_map(|i| i.residuals().as_slice().iter().copied())
            .collect()
    }

    pub fn set_outputs_vec(&mut self, values: &[f64]) -> Result<()> {
        self.check_len(values.len())?;
        for i in 0..self.instances.len() {
            let block = self.block(i);
            self.instances[i].outputs_mut().set_all(&values[block])?;
        }
        Ok(())
    }

    /// Lower and upper bounds of every unknown; unbounded entries are infinite.
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lower = Vec::with_capacity(self.size);
        let mut upper = Vec::with_capacity(self.size);
        for inst in &self.instances {
            for meta in inst.declarations().outputs() {
                let n = meta.size();
                lower.extend(std::iter::repeat(meta.lower.unwrap_or(f64::NEG_INFINITY)).take(n));
                upper.extend(std::iter::repeat(meta.upper.unwrap_or(f64::INFINITY)).take(n));
            }
        }
        (lower, upper)
    }

    /// Jacobian-vector product of the whole model.
    ///
    /// Forward: `y = J x`. Reverse: `y = Jᵀ x`.
    pub fn apply_jacobian(&mut self, x: &[f64], y: &mut [f64], mode: Mode) -> Result<()> {
        self.check_len(x.len())?;
        self.check_len(y.len())?;
        if mode == Mode::Rev {
            y.fill(0.0);
        }
        for i in 0..self.instances.len() {
            let block = self.block(i);
            let inst = &mut self.instances[i];
            let sources = &self.input_sources[i];
            match mode {
                Mode::Fwd => {
                    let d_in: Vec<f64> = sources.iter().map(|&s| x[s]).collect();
                    let v = inst.vectors_mut();
                    v.d_outputs.set_all(&x[block.clone()])?;
                    v.d_inputs.set_all(&d_in)?;
                    inst.run_apply_linear(Mode::Fwd)?;
                    y[block].copy_from_slice(inst.vectors().d_residuals.as_slice());
                }
                Mode::Rev => {
                    inst.vectors_mut().d_residuals.set_all(&x[block.clone()])?;
                    inst.run_apply_linear(Mode::Rev)?;
                    let v = inst.vectors();
                    for (yk, d) in y[block].iter_mut().zip(v.d_outputs.as_slice()) {
                        *yk += d;
                    }
                    for (&s, d) in sources.iter().zip(v.d_inputs.as_slice()) {
                        y[s] += d;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply the inverse of instance `i`'s diagonal block.
    pub fn solve_block(&mut self, i: usize, rhs: &[f64], mode: Mode) -> Result<Vec<f64>> {
        let inst = &mut self.instances[i];
        match mode {
            Mode::Fwd => {
                inst.vectors_mut().d_residuals.set_all(rhs)?;
                inst.run_solve_linear(Mode::Fwd)?;
                Ok(inst.vectors().d_outputs.as_slice().to_vec())
            }
            Mode::Rev => {
                inst.vectors_mut().d_outputs.set_all(rhs)?;
                inst.run_solve_linear(Mode::Rev)?;
                Ok(inst.vectors().d_residuals.as_slice().to_vec())
            }
        }
    }

    /// Dense `dR/du` from stored partials, or `None` when some component
    /// only provides matrix-free products. Valid after [`run_linearize`](Self::run_linearize).
    pub fn assemble_jacobian(&self) -> Option<DMatrix<f64>> {
        if !self.instances.iter().all(|i| i.has_assembled_jacobian()) {
            return None;
        }
        let mut jac = DMatrix::zeros(self.size, self.size);
        for (i, inst) in self.instances.iter().enumerate() {
            let local = inst.jacobian();
            let off = self.offsets[i];
            let n_out = inst.num_outputs();
            for r in 0..n_out {
                for c in 0..n_out {
                    jac[(off + r, off + c)] += local[(r, c)];
                }
                for (k, &s) in self.input_sources[i].iter().enumerate() {
                    jac[(off + r, s)] += local[(r, n_out + k)];
                }
            }
        }
        Some(jac)
    }

    /// Global range of the output providing `name`: an absolute output,
    /// an absolute input or a promoted input.
    pub fn global_range(&self, name: &str) -> Result<Range<usize>> {
        let (i, r) = self.source_of(name)?;
        Ok(self.offsets[i] + r.start..self.offsets[i] + r.end)
    }

    fn source_of(&self, name: &str) -> Result<(usize, Range<usize>)> {
        if let Some(found) = self.find_output(name) {
            return Ok(found);
        }
        let abs = self
            .promoted
            .get(name)
            .and_then(|targets| targets.first())
            .map(String::as_str)
            .unwrap_or(name);
        let src = self.connections.source_of(abs).ok_or_else(|| not_found(name))?;
        self.find_output(src).ok_or_else(|| not_found(name))
    }

    fn find_output(&self, abs: &str) -> Option<(usize, Range<usize>)> {
        let (path, var) = split_name(abs)?;
        let &i = self.index.get(path)?;
        let range = self.instances[i].outputs().layout().range(var)?;
        Some((i, range))
    }

    fn find_input(&self, abs: &str) -> Option<(usize, Range<usize>)> {
        let (path, var) = split_name(abs)?;
        let &i = self.index.get(path)?;
        let range = self.instances[i].inputs().layout().range(var)?;
        Some((i, range))
    }

    /// Current value of an output, an absolute input, or a promoted input
    /// (read from its source).
    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        if let Some((i, r)) = self.find_output(name) {
            return Ok(self.instances[i].outputs().as_slice()[r].to_vec());
        }
        if let Some((i, r)) = self.find_input(name) {
            return Ok(self.instances[i].inputs().as_slice()[r].to_vec());
        }
        let (i, r) = self.source_of(name)?;
        Ok(self.instances[i].outputs().as_slice()[r].to_vec())
    }

    /// Set an output or an input. Inputs fed by the auto-IVC also set
    /// their independent source so the value survives the next transfer.
    pub fn set_val(&mut self, name: &str, values: &[f64]) -> Result<()> {
        if self.find_output(name).is_some() {
            return self.set_output(name, values);
        }
        let targets: Vec<String> = match self.promoted.get(name) {
            Some(targets) => targets.clone(),
            None if self.find_input(name).is_some() => vec![name.to_string()],
            None => return Err(not_found(name)),
        };
        for abs in &targets {
            if let Some(src) = self.connections.source_of(abs) {
                if src.starts_with(AUTO_IVC) {
                    let src = src.to_string();
                    self.set_output(&src, values)?;
                }
            }
            let (path, var) = split_name(abs).ok_or_else(|| not_found(abs))?;
            let i = *self.index.get(path).ok_or_else(|| not_found(abs))?;
            self.instances[i].inputs_mut().set(var, values)?;
        }
        Ok(())
    }

    fn set_output(&mut self, abs: &str, values: &[f64]) -> Result<()> {
        let (path, var) = split_name(abs).ok_or_else(|| not_found(abs))?;
        let i = *self.index.get(path).ok_or_else(|| not_found(abs))?;
        self.instances[i].outputs_mut().set(var, values)?;
        Ok(())
    }

    /// `(absolute name, value)` of every input in execution order.
    pub fn list_inputs(&self) -> Vec<(String, Vec<f64>)> {
        self.instances
            .iter()
            .flat_map(|inst| inst.inputs().to_map())
            .collect()
    }

    pub fn list_outputs(&self, filter: OutputFilter) -> Vec<(String, Vec<f64>)> {
        self.instances
            .iter()
            .filter(|inst| match filter {
                OutputFilter::All => true,
                OutputFilter::Explicit => inst.is_explicit(),
                OutputFilter::Implicit => !inst.is_explicit(),
            })
            .flat_map(|inst| inst.outputs().to_map())
            .collect()
    }

    pub fn list_residuals(&self) -> Vec<(String, Vec<f64>)> {
        self.instances
            .iter()
            .flat_map(|inst| inst.residuals().to_map())
            .collect()
    }

    pub fn input_map(&self) -> BTreeMap<String, Vec<f64>> {
        self.list_inputs().into_iter().collect()
    }

    pub fn output_map(&self) -> BTreeMap<String, Vec<f64>> {
        self.list_outputs(OutputFilter::All).into_iter().collect()
    }

    pub fn residual_map(&self) -> BTreeMap<String, Vec<f64>> {
        self.list_residuals().into_iter().collect()
    }

    /// Force every vector of every instance back to writable mode.
    pub fn release_all(&mut self) {
        for inst in &mut self.instances {
            inst.release_all();
        }
    }

    pub fn any_read_only(&self) -> bool {
        self.instances.iter().any(|i| i.any_read_only())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size {
            return Err(Error::DimensionMismatch {
                expected: self.size,
                actual: len,
            });
        }
        Ok(())
    }
}

fn path_index(instances: &[ComponentInstance]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(instances.len());
    for (i, inst) in instances.iter().enumerate() {
        if index.insert(inst.path().to_string(), i).is_some() {
            return Err(config(format!("duplicate component path '{}'", inst.path())));
        }
    }
    Ok(index)
}

fn owner_index(index: &HashMap<String, usize>, abs: &str) -> Result<usize> {
    split_name(abs)
        .and_then(|(path, _)| index.get(path).copied())
        .ok_or_else(|| not_found(abs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::{Partials, Result as CoreResult};

    struct Scale {
        factor: f64,
    }

    impl ExplicitComponent for Scale {
        fn setup(&mut self, decl: &mut Declarations) -> CoreResult<()> {
            decl.add_input("x", 1.0);
            decl.add_output("y", 0.0);
            decl.declare_partials("y", "x").val(self.factor);
            Ok(())
        }

        fn compute(&mut self, i: &mut Vector, o: &mut Vector) -> CoreResult<()> {
            o.set_value("y", self.factor * i.value("x")?)
        }

        fn compute_partials(&mut self, _i: &mut Vector, _p: &mut Partials) -> CoreResult<()> {
            Ok(())
        }
    }

    fn chain() -> Group {
        let mut root = Group::new();
        // declared out of data-flow order on purpose
        root.add_subsystem("second", Component::explicit(Scale { factor: 3.0 }))
            .add_subsystem("first", Component::explicit(Scale { factor: 2.0 }))
            .connect("first.y", "second.x");
        root
    }

    #[test]
    fn test_build_orders_and_creates_auto_ivc() {
        let model = Model::build(chain()).unwrap();
        assert_eq!(model.execution_order(), vec![AUTO_IVC, "first", "second"]);
        assert_eq!(model.size(), 3);
        assert_eq!(model.connections().source_of("first.x"), Some("_auto_ivc.v0"));
        assert!(!model.is_coupled());
    }

    #[test]
    fn test_run_solve_once_transfers_values() {
        let mut model = Model::build(chain()).unwrap();
        model.set_val("first.x", &[1.5]).unwrap();
        model.run_solve_once().unwrap();
        assert_eq!(model.get_val("second.y").unwrap(), vec![9.0]);
        assert_eq!(model.get_val("second.x").unwrap(), vec![3.0]);
        model.run_apply_nonlinear().unwrap();
        assert_eq!(model.residual_norm(), 0.0);
    }

    #[test]
    fn test_assembled_jacobian_matches_products() {
        let mut model = Model::build(chain()).unwrap();
        model.run_solve_once().unwrap();
        model.run_linearize().unwrap();
        let jac = model.assemble_jacobian().unwrap();
        for mode in [Mode::Fwd, Mode::Rev] {
            for k in 0..3 {
                let mut e = vec![0.0; 3];
                e[k] = 1.0;
                let mut y = vec![0.0; 3];
                model.apply_jacobian(&e, &mut y, mode).unwrap();
                for r in 0..3 {
                    let expected = match mode {
                        Mode::Fwd => jac[(r, k)],
                        Mode::Rev => jac[(k, r)],
                    };
                    assert!((y[r] - expected).abs() < 1e-14);
                }
            }
        }
        assert_eq!(jac[(1, 0)], -2.0);
        assert_eq!(jac[(2, 1)], -3.0);
    }

    #[test]
    fn test_promoted_inputs_share_one_source() {
        let mut root = Group::new();
        root.add_subsystem("c1", Component::explicit(Scale { factor: 2.0 }))
            .add_subsystem("c2", Component::explicit(Scale { factor: 5.0 }))
            .promotes_inputs("c1", &["x"])
            .promotes_inputs("c2", &["x"]);
        let mut model = Model::build(root).unwrap();
        assert_eq!(
            model.connections().source_of("c1.x"),
            model.connections().source_of("c2.x")
        );
        model.set_val("x", &[2.0]).unwrap();
        model.run_solve_once().unwrap();
        assert_eq!(model.get_val("c1.y").unwrap(), vec![4.0]);
        assert_eq!(model.get_val("c2.y").unwrap(), vec![10.0]);
        assert_eq!(model.global_range("x").unwrap(), 0..1);
    }

    #[test]
    fn test_nested_group_paths() {
        let mut sub = Group::new();
        sub.add_subsystem("comp", Component::explicit(Scale { factor: 2.0 }));
        let mut root = Group::new();
        root.add_subsystem("src", Component::explicit(Scale { factor: 1.0 }))
            .add_group("sub", sub)
            .connect("src.y", "sub.comp.x");
        let model = Model::build(root).unwrap();
        assert!(model.instance("sub.comp").is_some());
        assert_eq!(model.connections().source_of("sub.comp.x"), Some("src.y"));
    }

    #[test]
    fn test_bad_connections_rejected() {
        let mut root = chain();
        root.connect("first.nope", "second.x");
        assert!(Model::build(root).is_err());

        let mut root = Group::new();
        root.add_subsystem("c1", Component::explicit(Scale { factor: 2.0 }))
            .promotes_inputs("c1", &["z"]);
        let err = Model::build(root).unwrap_err();
        assert!(err.to_string().contains("cannot promote"));
    }

    #[test]
    fn test_explicit_cycle_rejected() {
        let mut root = Group::new();
        root.add_subsystem("a", Component::explicit(Scale { factor: 2.0 }))
            .add_subsystem("b", Component::explicit(Scale { factor: 2.0 }))
            .connect("a.y", "b.x")
            .connect("b.y", "a.x");
        let err = Model::build(root).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_name() {
        let model = Model::build(chain()).unwrap();
        assert!(matches!(
            model.get_val("nope.y"),
            Err(Error::Core(mdao_core::Error::VariableNotFound(_)))
        ));
    }
}
