//! Variable and partial-derivative declarations collected during setup.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::partials::{DerivMethod, PartialDecl};
use crate::vector::VarLayout;

/// Conversion of initial values into a flat array.
pub trait IntoValues {
    fn into_values(self) -> Vec<f64>;
}

impl IntoValues for f64 {
    fn into_values(self) -> Vec<f64> {
        vec![self]
    }
}

impl IntoValues for Vec<f64> {
    fn into_values(self) -> Vec<f64> {
        self
    }
}

impl IntoValues for &[f64] {
    fn into_values(self) -> Vec<f64> {
        self.to_vec()
    }
}

impl<const N: usize> IntoValues for [f64; N] {
    fn into_values(self) -> Vec<f64> {
        self.to_vec()
    }
}

/// Metadata of a single declared variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMeta {
    pub name: String,
    pub val: Vec<f64>,
    pub units: Option<String>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Argument name used by primal functions when it differs from `name`.
    pub primal_name: Option<String>,
    pub desc: String,
}

impl VariableMeta {
    pub fn new(name: impl Into<String>, val: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            val,
            units: None,
            lower: None,
            upper: None,
            primal_name: None,
            desc: String::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.val.len()
    }

    /// Name under which primal functions see this variable.
    pub fn primal(&self) -> &str {
        self.primal_name.as_deref().unwrap_or(&self.name)
    }

    pub fn units(&mut self, units: impl Into<String>) -> &mut Self {
        self.units = Some(units.into());
        self
    }

    pub fn lower(&mut self, lower: f64) -> &mut Self {
        self.lower = Some(lower);
        self
    }

    pub fn upper(&mut self, upper: f64) -> &mut Self {
        self.upper = Some(upper);
        self
    }

    pub fn primal_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.primal_name = Some(name.into());
        self
    }

    pub fn desc(&mut self, desc: impl Into<String>) -> &mut Self {
        self.desc = desc.into();
        self
    }
}

/// Everything a component registers during `setup`.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    inputs: Vec<VariableMeta>,
    outputs: Vec<VariableMeta>,
    partials: Vec<PartialDecl>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: &str, val: impl IntoValues) -> &mut VariableMeta {
        self.inputs.push(VariableMeta::new(name, val.into_values()));
        let last = self.inputs.len() - 1;
        &mut self.inputs[last]
    }

    pub fn add_output(&mut self, name: &str, val: impl IntoValues) -> &mut VariableMeta {
        self.outputs.push(VariableMeta::new(name, val.into_values()));
        let last = self.outputs.len() - 1;
        &mut self.outputs[last]
    }

    /// Declare a partial-derivative block. `of` and `wrt` accept `*`/`?` globs.
    pub fn declare_partials(&mut self, of: &str, wrt: &str) -> &mut PartialDecl {
        self.partials.push(PartialDecl::new(of, wrt));
        let last = self.partials.len() - 1;
        &mut self.partials[last]
    }

    /// Use `method` for every declaration made so far that kept `Exact`.
    pub fn set_default_method(&mut self, method: DerivMethod) {
        self.partials
            .iter_mut()
            .filter(|decl| decl.method == DerivMethod::Exact)
            .for_each(|decl| decl.method = method);
    }

    pub fn inputs(&self) -> &[VariableMeta] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VariableMeta] {
        &self.outputs
    }

    pub fn partials(&self) -> &[PartialDecl] {
        &self.partials
    }

    pub fn input(&self, name: &str) -> Option<&VariableMeta> {
        self.inputs.iter().find(|m| m.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&VariableMeta> {
        self.outputs.iter().find(|m| m.name == name)
    }

    /// Build the input and output layouts. Duplicate or empty variables fail.
    pub fn layouts(&self) -> Result<(Arc<VarLayout>, Arc<VarLayout>)> {
        Ok((build_layout(&self.inputs)?, build_layout(&self.outputs)?))
    }
}

fn build_layout(vars: &[VariableMeta]) -> Result<Arc<VarLayout>> {
    let mut layout = VarLayout::new();
    for var in vars {
        if var.val.is_empty() {
            return Err(Error::Configuration(format!(
                "variable '{}' has no entries",
                var.name
            )));
        }
        layout.push(var.name.clone(), var.size())?;
    }
    Ok(Arc::new(layout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_build_layouts() {
        let mut decl = Declarations::new();
        decl.add_input("a", 1.0);
        decl.add_input("b", [1.0, 2.0]);
        decl.add_output("x", 0.0).lower(-5.0).upper(5.0).units("m");
        let (inputs, outputs) = decl.layouts().unwrap();
        assert_eq!(inputs.size(), 3);
        assert_eq!(outputs.size(), 1);
        let x = decl.output("x").unwrap();
        assert_eq!(x.lower, Some(-5.0));
        assert_eq!(x.units.as_deref(), Some("m"));
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut decl = Declarations::new();
        decl.add_input("a", 1.0);
        decl.add_input("a", 2.0);
        assert!(matches!(decl.layouts(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_primal_name_mapping() {
        let mut decl = Declarations::new();
        decl.add_input("foo:A", vec![0.0; 4]).primal_name("A");
        assert_eq!(decl.input("foo:A").unwrap().primal(), "A");
        decl.add_input("b", 0.0);
        assert_eq!(decl.input("b").unwrap().primal(), "b");
    }
}
