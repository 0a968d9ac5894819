//! Total-derivative results.

use indexmap::IndexMap;
use nalgebra::DMatrix;

use mdao_core::Mode;

/// Direction used by `compute_totals`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotalsMode {
    Fwd,
    Rev,
    /// Forward when there are no more seeds than responses, reverse otherwise.
    #[default]
    Auto,
}

impl TotalsMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" => Some(TotalsMode::Auto),
            other => Mode::from_name(other).map(|mode| match mode {
                Mode::Fwd => TotalsMode::Fwd,
                Mode::Rev => TotalsMode::Rev,
            }),
        }
    }

    /// Concrete direction for `n_of` response and `n_wrt` seed entries.
    pub fn resolve(self, n_of: usize, n_wrt: usize) -> Mode {
        match self {
            TotalsMode::Fwd => Mode::Fwd,
            TotalsMode::Rev => Mode::Rev,
            TotalsMode::Auto if n_wrt <= n_of => Mode::Fwd,
            TotalsMode::Auto => Mode::Rev,
        }
    }
}

/// `d(of)/d(wrt)` blocks keyed by `(of, wrt)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    blocks: IndexMap<(String, String), DMatrix<f64>>,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, of: &str, wrt: &str, block: DMatrix<f64>) {
        self.blocks.insert((of.to_string(), wrt.to_string()), block);
    }

    pub(crate) fn block_mut(&mut self, of: &str, wrt: &str) -> Option<&mut DMatrix<f64>> {
        self.blocks.get_mut(&(of.to_string(), wrt.to_string()))
    }

    pub fn get(&self, of: &str, wrt: &str) -> Option<&DMatrix<f64>> {
        self.blocks.get(&(of.to_string(), wrt.to_string()))
    }

    /// First entry of a block, for scalar variables.
    pub fn value(&self, of: &str, wrt: &str) -> Option<f64> {
        self.get(of, wrt).and_then(|m| m.iter().next().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DMatrix<f64>)> {
        self.blocks
            .iter()
            .map(|((of, wrt), m)| (of.as_str(), wrt.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Comparison of a computed total with its finite-difference estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct TotalCheck {
    pub of: String,
    pub wrt: String,
    pub computed: DMatrix<f64>,
    pub approx: DMatrix<f64>,
    /// Frobenius norm of `computed - approx`.
    pub abs_error: f64,
    /// `abs_error` relative to the norm of `computed` (absolute when zero).
    pub rel_error: f64,
}

impl TotalCheck {
    pub fn new(of: &str, wrt: &str, computed: DMatrix<f64>, approx: DMatrix<f64>) -> Self {
        let abs_error = (&computed - &approx).norm();
        let scale = computed.norm();
        let rel_error = if scale > 0.0 { abs_error / scale } else { abs_error };
        Self {
            of: of.to_string(),
            wrt: wrt.to_string(),
            computed,
            approx,
            abs_error,
            rel_error,
        }
    }
}
