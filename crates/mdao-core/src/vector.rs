//! Named, contiguous variable storage with a scoped read-only mode.
//!
//! A [`Vector`] holds every variable of one role (inputs, outputs or
//! residuals) of a single component in one flat buffer. Variables are
//! addressed by name through a shared [`VarLayout`]. Writes are checked
//! against the current [`AccessMode`]; read-only access is acquired with
//! [`Vector::read_only`], which returns a guard that restores the previous
//! mode when dropped, including on `?` early returns and unwinding.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of a vector within a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarRole {
    Input,
    Output,
    Residual,
}

impl VarRole {
    pub fn name(&self) -> &'static str {
        match self {
            VarRole::Input => "input",
            VarRole::Output => "output",
            VarRole::Residual => "residual",
        }
    }
}

impl fmt::Display for VarRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mutability mode of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Mapping from variable name to its slice of a flat buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarLayout {
    slots: IndexMap<String, Range<usize>>,
    size: usize,
}

impl VarLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a variable of `size` entries. Names must be unique.
    pub fn push(&mut self, name: impl Into<String>, size: usize) -> Result<Range<usize>> {
        let name = name.into();
        if self.slots.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "variable '{}' declared more than once",
                name
            )));
        }
        let range = self.size..self.size + size;
        self.size += size;
        self.slots.insert(name, range.clone());
        Ok(range)
    }

    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.slots.get(name).cloned()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.slots.get_index_of(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Range<usize>)> {
        self.slots.iter().map(|(k, r)| (k.as_str(), r.clone()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of scalar entries.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Flat storage for the variables of one role of one component.
#[derive(Debug, Clone)]
pub struct Vector {
    owner: String,
    role: VarRole,
    layout: Arc<VarLayout>,
    data: Vec<f64>,
    mode: AccessMode,
}

impl Vector {
    /// Allocate a zero-filled vector.
    pub fn zeros(owner: impl Into<String>, role: VarRole, layout: Arc<VarLayout>) -> Self {
        let data = vec![0.0; layout.size()];
        Self {
            owner: owner.into(),
            role,
            layout,
            data,
            mode: AccessMode::ReadWrite,
        }
    }

    /// Allocate a vector holding `data`, which must match the layout size.
    pub fn from_values(
        owner: impl Into<String>,
        role: VarRole,
        layout: Arc<VarLayout>,
        data: Vec<f64>,
    ) -> Result<Self> {
        let owner = owner.into();
        if data.len() != layout.size() {
            return Err(Error::SizeMismatch {
                name: format!("{} {} vector", owner, role),
                expected: layout.size(),
                actual: data.len(),
            });
        }
        Ok(Self {
            owner,
            role,
            layout,
            data,
            mode: AccessMode::ReadWrite,
        })
    }

    /// Path of the system that owns this vector.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn role(&self) -> VarRole {
        self.role
    }

    pub fn layout(&self) -> &Arc<VarLayout> {
        &self.layout
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::ReadOnly
    }

    /// Total number of scalar entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layout.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layout.names()
    }

    /// Read a variable. Always permitted.
    pub fn get(&self, name: &str) -> Result<&[f64]> {
        let range = self.slot(name)?;
        Ok(&self.data[range])
    }

    /// Read the first entry of a variable.
    pub fn value(&self, name: &str) -> Result<f64> {
        let values = self.get(name)?;
        values
            .first()
            .copied()
            .ok_or_else(|| Error::SizeMismatch {
                name: name.to_string(),
                expected: 1,
                actual: 0,
            })
    }

    /// Overwrite a variable. A single value is broadcast to every entry.
    pub fn set(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let target = self.get_mut(name)?;
        copy_broadcast(name, target, values)
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        self.set(name, &[value])
    }

    /// Accumulate into a variable (`+=`). A single value is broadcast.
    pub fn add(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let target = self.get_mut(name)?;
        if values.len() == 1 {
            target.iter_mut().for_each(|t| *t += values[0]);
            return Ok(());
        }
        if values.len() != target.len() {
            return Err(Error::SizeMismatch {
                name: name.to_string(),
                expected: target.len(),
                actual: values.len(),
            });
        }
        target
            .iter_mut()
            .zip(values)
            .for_each(|(t, v)| *t += v);
        Ok(())
    }

    /// Mutable access to a variable, refused in read-only mode.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut [f64]> {
        self.check_writable(name)?;
        let range = self.slot(name)?;
        Ok(&mut self.data[range])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable access to the whole buffer, refused in read-only mode.
    pub fn as_mut_slice(&mut self) -> Result<&mut [f64]> {
        if self.is_read_only() {
            let name = self.layout.names().next().unwrap_or("*").to_string();
            self.check_writable(&name)?;
        }
        Ok(&mut self.data)
    }

    /// Overwrite the whole buffer.
    pub fn set_all(&mut self, values: &[f64]) -> Result<()> {
        let owner_len = self.data.len();
        if values.len() != owner_len {
            return Err(Error::SizeMismatch {
                name: format!("{} {} vector", self.owner, self.role),
                expected: owner_len,
                actual: values.len(),
            });
        }
        self.as_mut_slice()?.copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&mut self, value: f64) -> Result<()> {
        self.as_mut_slice()?.fill(value);
        Ok(())
    }

    pub fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.data)
    }

    /// Euclidean norm of the whole buffer.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Values keyed by absolute name (`owner.name`).
    pub fn to_map(&self) -> BTreeMap<String, Vec<f64>> {
        self.layout
            .iter()
            .map(|(name, range)| (self.absolute_name(name), self.data[range].to_vec()))
            .collect()
    }

    pub fn absolute_name(&self, name: &str) -> String {
        if self.owner.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.owner, name)
        }
    }

    /// Switch the access mode, returning the previous one.
    pub(crate) fn set_mode(&mut self, mode: AccessMode) -> AccessMode {
        std::mem::replace(&mut self.mode, mode)
    }

    /// Make the vector read-only until the returned guard is dropped.
    pub fn read_only(&mut self) -> ReadOnlyGuard<'_> {
        let previous = self.set_mode(AccessMode::ReadOnly);
        ReadOnlyGuard {
            vector: self,
            previous,
        }
    }

    fn slot(&self, name: &str) -> Result<Range<usize>> {
        self.layout
            .range(name)
            .ok_or_else(|| Error::VariableNotFound(self.absolute_name(name)))
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnlyViolation {
                system: self.owner.clone(),
                name: name.to_string(),
                role: self.role,
            });
        }
        Ok(())
    }
}

/// Scoped read-only access to a [`Vector`].
///
/// Dereferences to the vector; the previous mode is restored on drop.
/// Outside this crate a vector cannot leave read-only mode on its own, so a
/// callback holding one has no way to lift the protection:
///
/// ```compile_fail
/// use mdao_core::{AccessMode, Vector};
///
/// fn lift(inputs: &mut Vector) {
///     inputs.set_mode(AccessMode::ReadWrite);
/// }
/// ```
pub struct ReadOnlyGuard<'a> {
    vector: &'a mut Vector,
    previous: AccessMode,
}

impl Deref for ReadOnlyGuard<'_> {
    type Target = Vector;

    fn deref(&self) -> &Vector {
        self.vector
    }
}

impl DerefMut for ReadOnlyGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vector {
        self.vector
    }
}

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        self.vector.mode = self.previous;
    }
}

fn copy_broadcast(name: &str, target: &mut [f64], values: &[f64]) -> Result<()> {
    if values.len() == 1 {
        target.fill(values[0]);
        return Ok(());
    }
    if values.len() != target.len() {
        return Err(Error::SizeMismatch {
            name: name.to_string(),
            expected: target.len(),
            actual: values.len(),
        });
    }
    target.copy_from_slice(values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Arc<VarLayout> {
        let mut layout = VarLayout::new();
        layout.push("a", 1).unwrap();
        layout.push("y", 3).unwrap();
        Arc::new(layout)
    }

    #[test]
    fn test_layout_ranges() {
        let layout = layout();
        assert_eq!(layout.range("a"), Some(0..1));
        assert_eq!(layout.range("y"), Some(1..4));
        assert_eq!(layout.size(), 4);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.index_of("y"), Some(1));
    }

    #[test]
    fn test_layout_duplicate_name() {
        let mut layout = VarLayout::new();
        layout.push("a", 1).unwrap();
        assert!(matches!(layout.push("a", 2), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_set_get_broadcast() {
        let mut v = Vector::zeros("comp", VarRole::Output, layout());
        v.set("y", &[2.0]).unwrap();
        assert_eq!(v.get("y").unwrap(), &[2.0, 2.0, 2.0]);
        v.set("y", &[1.0, 2.0, 3.0]).unwrap();
        v.add("y", &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(v.get("y").unwrap(), &[2.0, 3.0, 4.0]);
        assert_eq!(v.value("y").unwrap(), 2.0);
    }

    #[test]
    fn test_size_mismatch() {
        let mut v = Vector::zeros("comp", VarRole::Output, layout());
        let err = v.set("y", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_unknown_variable() {
        let v = Vector::zeros("comp", VarRole::Input, layout());
        assert_eq!(
            v.get("zz").unwrap_err(),
            Error::VariableNotFound("comp.zz".into())
        );
    }

    #[test]
    fn test_read_only_guard_blocks_writes() {
        let mut v = Vector::zeros("bad", VarRole::Input, layout());
        {
            let mut guard = v.read_only();
            assert!(guard.is_read_only());
            assert_eq!(guard.get("a").unwrap(), &[0.0]);
            let err = guard.set_value("a", 1.0).unwrap_err();
            assert_eq!(
                err.to_string(),
                "'bad': Attempt to set value of 'a' in input vector when it is read only."
            );
            assert!(guard.as_mut_slice().is_err());
            assert!(guard.add("y", &[1.0]).is_err());
        }
        assert!(!v.is_read_only());
        v.set_value("a", 111.0).unwrap();
        assert_eq!(v.value("a").unwrap(), 111.0);
    }

    #[test]
    fn test_read_only_guard_resets_on_error_path() {
        fn failing_callback(v: &mut Vector) -> Result<()> {
            let mut guard = v.read_only();
            guard.set_value("a", 0.0)?;
            Ok(())
        }

        let mut v = Vector::zeros("bad", VarRole::Output, layout());
        assert!(failing_callback(&mut v).is_err());
        assert_eq!(v.mode(), AccessMode::ReadWrite);
        assert!(v.set_value("a", 5.0).is_ok());
    }

    #[test]
    fn test_nested_guards_restore_previous_mode() {
        let mut v = Vector::zeros("c", VarRole::Residual, layout());
        {
            let mut outer = v.read_only();
            {
                let inner = outer.read_only();
                assert!(inner.is_read_only());
            }
            assert!(outer.is_read_only());
        }
        assert!(!v.is_read_only());
    }

    #[test]
    fn test_inner_guard_cannot_lift_read_only() {
        let mut v = Vector::zeros("c", VarRole::Input, layout());
        {
            let mut outer = v.read_only();
            drop(outer.read_only());
            assert_eq!(outer.mode(), AccessMode::ReadOnly);
            assert!(outer.set_value("a", 2.0).is_err());
            assert_eq!(outer.value("a").unwrap(), 0.0);
        }
        assert_eq!(v.mode(), AccessMode::ReadWrite);
    }

    #[test]
    fn test_to_map_uses_absolute_names() {
        let mut v = Vector::zeros("comp", VarRole::Output, layout());
        v.set_value("a", 3.0).unwrap();
        let map = v.to_map();
        assert_eq!(map["comp.a"], vec![3.0]);
        assert_eq!(map["comp.y"], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_values_checks_size() {
        assert!(Vector::from_values("c", VarRole::Input, layout(), vec![0.0; 3]).is_err());
        let v = Vector::from_values("c", VarRole::Input, layout(), vec![1.0; 4]).unwrap();
        assert!((v.norm() - 2.0).abs() < 1e-15);
    }
}
