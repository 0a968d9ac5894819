//! Independent variables.

use mdao_core::{Declarations, Error, ExplicitComponent, IntoValues, Result, VariableMeta, Vector};

/// An explicit component with outputs and no inputs.
///
/// Its outputs hold whatever value was set last; the residual is always zero.
#[derive(Debug, Clone, Default)]
pub struct IndepVarComp {
    outputs: Vec<VariableMeta>,
}

impl IndepVarComp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single-output component.
    pub fn with_output(name: &str, val: impl IntoValues) -> Self {
        let mut comp = Self::new();
        comp.add_output(name, val);
        comp
    }

    pub fn add_output(&mut self, name: &str, val: impl IntoValues) -> &mut VariableMeta {
        self.outputs.push(VariableMeta::new(name, val.into_values()));
        let last = self.outputs.len() - 1;
        &mut self.outputs[last]
    }

    pub fn outputs(&self) -> &[VariableMeta] {
        &self.outputs
    }
}

impl ExplicitComponent for IndepVarComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        if self.outputs.is_empty() {
            return Err(Error::Configuration(
                "IndepVarComp must have at least one output".to_string(),
            ));
        }
        for meta in &self.outputs {
            *decl.add_output(&meta.name, meta.val.clone()) = meta.clone();
        }
        Ok(())
    }

    fn compute(&mut self, _inputs: &mut Vector, _outputs: &mut Vector) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_core::{Component, ComponentInstance};

    #[test]
    fn test_outputs_keep_values() {
        let mut ivc = IndepVarComp::new();
        ivc.add_output("a", 1.0).units("m").lower(0.0);
        ivc.add_output("v", [1.0, 2.0, 3.0]);
        let mut inst = ComponentInstance::new("p", Component::explicit(ivc)).unwrap();
        assert_eq!(inst.num_outputs(), 4);
        assert_eq!(inst.output_meta("a").unwrap().units.as_deref(), Some("m"));

        inst.outputs_mut().set_value("a", 5.0).unwrap();
        inst.run_solve_nonlinear().unwrap();
        inst.run_apply_nonlinear().unwrap();
        assert_eq!(inst.outputs().value("a").unwrap(), 5.0);
        assert_eq!(inst.residuals().norm(), 0.0);
    }

    #[test]
    fn test_empty_is_configuration_error() {
        let err = ComponentInstance::new("p", Component::explicit(IndepVarComp::new())).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
