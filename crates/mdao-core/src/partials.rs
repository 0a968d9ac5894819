//! Partial-derivative declarations and per-component storage.
//!
//! Components declare `(of, wrt)` blocks during setup, optionally with a
//! sparse `rows`/`cols` pattern and a constant value. [`Partials::resolve`]
//! expands glob patterns against the component's variables and allocates
//! exactly the declared entries; nothing outside a declared pattern can ever
//! be written, so the assembled Jacobian carries no extra nonzeros.

use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::variable::IntoValues;
use crate::vector::VarLayout;

/// How the values of a partial-derivative block are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DerivMethod {
    /// Provided by the component's `linearize`/`compute_partials`.
    #[default]
    Exact,
    /// Complex step of the primal function.
    ComplexStep,
    /// Forward finite difference.
    FiniteDifference,
    /// Forward-mode automatic differentiation of the primal function.
    Automatic,
}

impl DerivMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "exact" => Some(DerivMethod::Exact),
            "cs" | "complex_step" => Some(DerivMethod::ComplexStep),
            "fd" | "finite_difference" => Some(DerivMethod::FiniteDifference),
            "ad" | "jax" | "automatic" => Some(DerivMethod::Automatic),
            _ => None,
        }
    }

    pub fn is_approximated(&self) -> bool {
        !matches!(self, DerivMethod::Exact)
    }
}

/// One `declare_partials` call, before glob expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDecl {
    pub of: String,
    pub wrt: String,
    pub rows: Option<Vec<usize>>,
    pub cols: Option<Vec<usize>>,
    pub val: Option<Vec<f64>>,
    pub method: DerivMethod,
}

impl PartialDecl {
    pub fn new(of: impl Into<String>, wrt: impl Into<String>) -> Self {
        Self {
            of: of.into(),
            wrt: wrt.into(),
            rows: None,
            cols: None,
            val: None,
            method: DerivMethod::Exact,
        }
    }

    /// Restrict the block to the given (row, col) entries.
    pub fn rows_cols(&mut self, rows: Vec<usize>, cols: Vec<usize>) -> &mut Self {
        self.rows = Some(rows);
        self.cols = Some(cols);
        self
    }

    /// Constant value; the block is not cleared between linearizations.
    pub fn val(&mut self, val: impl IntoValues) -> &mut Self {
        self.val = Some(val.into_values());
        self
    }

    pub fn method(&mut self, method: DerivMethod) -> &mut Self {
        self.method = method;
        self
    }
}

/// Shell-style glob supporting `*` and `?`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..])),
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

/// Storage for one resolved `(of, wrt)` block.
#[derive(Debug, Clone, PartialEq)]
pub struct SubJac {
    pub of: String,
    pub wrt: String,
    nrows: usize,
    ncols: usize,
    pattern: Option<(Vec<usize>, Vec<usize>)>,
    values: Vec<f64>,
    constant: bool,
    method: DerivMethod,
    /// Whether `wrt` names an output of the owning component.
    wrt_is_output: bool,
}

impl SubJac {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn is_sparse(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn method(&self) -> DerivMethod {
        self.method
    }

    pub fn wrt_is_output(&self) -> bool {
        self.wrt_is_output
    }

    /// Stored values: row-major dense, or one per declared entry.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// `(row, col, value)` for every stored entry.
    pub fn entries(&self) -> Vec<(usize, usize, f64)> {
        match &self.pattern {
            Some((rows, cols)) => rows
                .iter()
                .zip(cols)
                .zip(&self.values)
                .map(|((&r, &c), &v)| (r, c, v))
                .collect(),
            None => self
                .values
                .iter()
                .enumerate()
                .map(|(k, &v)| (k / self.ncols, k % self.ncols, v))
                .collect(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match &self.pattern {
            Some((rows, cols)) => rows
                .iter()
                .zip(cols)
                .zip(&self.values)
                .filter(|((&r, &c), _)| r == row && c == col)
                .map(|(_, &v)| v)
                .sum(),
            None => self.values[row * self.ncols + col],
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.nrows, self.ncols);
        for (r, c, v) in self.entries() {
            m[(r, c)] += v;
        }
        m
    }

    /// Overwrite the stored values. A single value is broadcast.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() == 1 {
            self.values.fill(values[0]);
            return Ok(());
        }
        if values.len() != self.values.len() {
            return Err(Error::SizeMismatch {
                name: format!("d({})/d({})", self.of, self.wrt),
                expected: self.values.len(),
                actual: values.len(),
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    /// Set one entry. For sparse blocks the entry must be declared.
    pub fn set_entry(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let slot = match &self.pattern {
            Some((rows, cols)) => rows
                .iter()
                .zip(cols)
                .position(|(&r, &c)| r == row && c == col),
            None if row < self.nrows && col < self.ncols => Some(row * self.ncols + col),
            None => None,
        };
        match slot {
            Some(k) => {
                self.values[k] = value;
                Ok(())
            }
            None => Err(Error::UndeclaredPartial {
                system: String::new(),
                of: format!("{}[{}]", self.of, row),
                wrt: format!("{}[{}]", self.wrt, col),
            }),
        }
    }

    /// `y += J x`
    pub fn apply_fwd(&self, x: &[f64], y: &mut [f64]) {
        for (r, c, v) in self.entries() {
            y[r] += v * x[c];
        }
    }

    /// `x += Jᵀ y`
    pub fn apply_rev(&self, y: &[f64], x: &mut [f64]) {
        for (r, c, v) in self.entries() {
            x[c] += v * y[r];
        }
    }

    fn clear(&mut self) {
        if !self.constant {
            self.values.fill(0.0);
        }
    }
}

/// Partial-derivative blocks of one component, keyed by `(of, wrt)`.
#[derive(Debug, Clone, Default)]
pub struct Partials {
    owner: String,
    blocks: IndexMap<(String, String), SubJac>,
}

impl Partials {
    /// Expand declarations against the component's variables.
    ///
    /// `of` is matched against outputs. `wrt` is matched against inputs and,
    /// when `outputs_as_wrt` is set (implicit components), outputs. A later
    /// declaration of the same pair replaces an earlier one.
    pub fn resolve(
        owner: &str,
        decls: &[PartialDecl],
        inputs: &VarLayout,
        outputs: &VarLayout,
        outputs_as_wrt: bool,
    ) -> Result<Self> {
        let mut blocks = IndexMap::new();
        for decl in decls {
            let ofs: Vec<(&str, usize)> = outputs
                .iter()
                .filter(|(name, _)| glob_match(&decl.of, name))
                .map(|(name, r)| (name, r.len()))
                .collect();
            if ofs.is_empty() {
                return Err(Error::Configuration(format!(
                    "'{}': no matches were found for of='{}'",
                    owner, decl.of
                )));
            }

            let mut wrts: Vec<(&str, usize, bool)> = inputs
                .iter()
                .filter(|(name, _)| glob_match(&decl.wrt, name))
                .map(|(name, r)| (name, r.len(), false))
                .collect();
            if outputs_as_wrt {
                wrts.extend(
                    outputs
                        .iter()
                        .filter(|(name, _)| glob_match(&decl.wrt, name))
                        .map(|(name, r)| (name, r.len(), true)),
                );
            }
            if wrts.is_empty() {
                return Err(Error::Configuration(format!(
                    "'{}': no matches were found for wrt='{}'",
                    owner, decl.wrt
                )));
            }

            for &(of, nrows) in &ofs {
                for &(wrt, ncols, wrt_is_output) in &wrts {
                    let sub = build_subjac(owner, decl, of, nrows, wrt, ncols, wrt_is_output)?;
                    blocks.insert((of.to_string(), wrt.to_string()), sub);
                }
            }
        }
        Ok(Self {
            owner: owner.to_string(),
            blocks,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn contains(&self, of: &str, wrt: &str) -> bool {
        self.blocks.contains_key(&key(of, wrt))
    }

    pub fn get(&self, of: &str, wrt: &str) -> Result<&SubJac> {
        self.blocks
            .get(&key(of, wrt))
            .ok_or_else(|| self.undeclared(of, wrt))
    }

    pub fn get_mut(&mut self, of: &str, wrt: &str) -> Result<&mut SubJac> {
        let owner = &self.owner;
        self.blocks
            .get_mut(&key(of, wrt))
            .ok_or_else(|| Error::UndeclaredPartial {
                system: owner.clone(),
                of: of.to_string(),
                wrt: wrt.to_string(),
            })
    }

    /// Set a block. Accepts row-major dense values, one value per declared
    /// sparse entry, or a single broadcast value.
    pub fn set(&mut self, of: &str, wrt: &str, values: &[f64]) -> Result<()> {
        let owner = self.owner.clone();
        self.get_mut(of, wrt)?
            .set_values(values)
            .map_err(|e| e.in_system(&owner))
    }

    pub fn set_scalar(&mut self, of: &str, wrt: &str, value: f64) -> Result<()> {
        self.set(of, wrt, &[value])
    }

    pub fn set_entry(&mut self, of: &str, wrt: &str, row: usize, col: usize, value: f64) -> Result<()> {
        let owner = self.owner.clone();
        self.get_mut(of, wrt)?
            .set_entry(row, col, value)
            .map_err(|e| e.in_system(&owner))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubJac> {
        self.blocks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubJac> {
        self.blocks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Zero every non-constant block ahead of a fresh linearization.
    pub fn reset(&mut self) {
        self.blocks.values_mut().for_each(SubJac::clear);
    }

    /// Dense `d(residual)/d(wrt)` assembled over the given layouts, with
    /// output columns first and input columns after them.
    pub fn to_dense(&self, inputs: &VarLayout, outputs: &VarLayout) -> DMatrix<f64> {
        let n_out = outputs.size();
        let mut m = DMatrix::zeros(n_out, n_out + inputs.size());
        for sub in self.blocks.values() {
            let (Some(rows), Some(cols)) = (
                outputs.range(&sub.of),
                if sub.wrt_is_output {
                    outputs.range(&sub.wrt)
                } else {
                    inputs.range(&sub.wrt).map(|r| r.start + n_out..r.end + n_out)
                },
            ) else {
                continue;
            };
            for (r, c, v) in sub.entries() {
                m[(rows.start + r, cols.start + c)] += v;
            }
        }
        m
    }

    fn undeclared(&self, of: &str, wrt: &str) -> Error {
        Error::UndeclaredPartial {
            system: self.owner.clone(),
            of: of.to_string(),
            wrt: wrt.to_string(),
        }
    }
}

fn key(of: &str, wrt: &str) -> (String, String) {
    (of.to_string(), wrt.to_string())
}

fn build_subjac(
    owner: &str,
    decl: &PartialDecl,
    of: &str,
    nrows: usize,
    wrt: &str,
    ncols: usize,
    wrt_is_output: bool,
) -> Result<SubJac> {
    let pattern = match (&decl.rows, &decl.cols) {
        (Some(rows), Some(cols)) => {
            if rows.len() != cols.len() {
                return Err(Error::Configuration(format!(
                    "'{}': d({})/d({}): rows and cols must have the same length ({} != {})",
                    owner,
                    of,
                    wrt,
                    rows.len(),
                    cols.len()
                )));
            }
            if let Some(&r) = rows.iter().find(|&&r| r >= nrows) {
                return Err(Error::Configuration(format!(
                    "'{}': d({})/d({}): row index {} out of range for {} rows",
                    owner, of, wrt, r, nrows
                )));
            }
            if let Some(&c) = cols.iter().find(|&&c| c >= ncols) {
                return Err(Error::Configuration(format!(
                    "'{}': d({})/d({}): col index {} out of range for {} cols",
                    owner, of, wrt, c, ncols
                )));
            }
            Some((rows.clone(), cols.clone()))
        }
        (None, None) => None,
        _ => {
            return Err(Error::Configuration(format!(
                "'{}': d({})/d({}): rows and cols must be given together",
                owner, of, wrt
            )))
        }
    };

    let nnz = pattern
        .as_ref()
        .map(|(rows, _)| rows.len())
        .unwrap_or(nrows * ncols);
    let mut sub = SubJac {
        of: of.to_string(),
        wrt: wrt.to_string(),
        nrows,
        ncols,
        pattern,
        values: vec![0.0; nnz],
        constant: decl.val.is_some(),
        method: decl.method,
        wrt_is_output,
    };
    if let Some(val) = &decl.val {
        sub.set_values(val).map_err(|_| {
            Error::Configuration(format!(
                "'{}': d({})/d({}): val has {} entries, expected {} or 1",
                owner,
                of,
                wrt,
                val.len(),
                nnz
            ))
        })?;
    }
    Ok(sub)
}
