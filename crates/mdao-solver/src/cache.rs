//! Reuse of previous linear solutions.
//!
//! An iterative solver asked for the same right-hand side twice at the same
//! linearization point can return the earlier answer outright; after the
//! point moves, the earlier answer is still a good starting guess.

use std::collections::HashMap;

use mdao_core::Mode;

/// What the cache knows about a right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Same linearization and identical rhs: the stored solution is exact.
    Exact(Vec<f64>),
    /// A previous solution for this case, usable as an initial guess.
    WarmStart(Vec<f64>),
    Miss,
}

#[derive(Debug, Clone)]
struct Entry {
    rhs: Vec<f64>,
    solution: Vec<f64>,
    fresh: bool,
}

/// Solutions keyed by direction and seed case.
#[derive(Debug, Clone, Default)]
pub struct LinearSolutionCache {
    entries: HashMap<(Mode, usize), Entry>,
    hits: usize,
    warm_starts: usize,
}

impl LinearSolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, mode: Mode, case: usize, rhs: &[f64]) -> CacheLookup {
        match self.entries.get(&(mode, case)) {
            Some(e) if e.fresh && e.rhs == rhs => {
                self.hits += 1;
                CacheLookup::Exact(e.solution.clone())
            }
            Some(e) if e.solution.len() == rhs.len() => {
                self.warm_starts += 1;
                CacheLookup::WarmStart(e.solution.clone())
            }
            _ => CacheLookup::Miss,
        }
    }

    pub fn store(&mut self, mode: Mode, case: usize, rhs: &[f64], solution: &[f64]) {
        self.entries.insert(
            (mode, case),
            Entry {
                rhs: rhs.to_vec(),
                solution: solution.to_vec(),
                fresh: true,
            },
        );
    }

    /// The system matrix changed: stored solutions become warm starts only.
    pub fn invalidate(&mut self) {
        for e in self.entries.values_mut() {
            e.fresh = false;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of exact reuses so far.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Number of lookups answered with a starting guess only.
    pub fn warm_starts(&self) -> usize {
        self.warm_starts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
