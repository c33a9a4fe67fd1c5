use std::collections::BTreeMap;

use crate::Error;

use super::{ValueReference, VariableDescriptor, VariableType};

/// The ordered set of variables of a model, indexed by name and by `(VariableType, vr)`.
///
/// Value references are only unique within a type partition, so lookup by value reference always
/// requires the [`VariableType`].
#[derive(Debug, Clone, Default)]
pub struct ModelVariables {
    variables: Vec<VariableDescriptor>,
    by_name: BTreeMap<String, usize>,
    by_vr: BTreeMap<(VariableType, ValueReference), Vec<usize>>,
}

impl ModelVariables {
    /// Build the set, rejecting duplicate names with [`Error::Argument`].
    pub fn new(variables: Vec<VariableDescriptor>) -> Result<Self, Error> {
        let mut by_name = BTreeMap::new();
        let mut by_vr: BTreeMap<_, Vec<usize>> = BTreeMap::new();

        for (index, var) in variables.iter().enumerate() {
            if by_name.insert(var.name.clone(), index).is_some() {
                return Err(Error::Argument(format!(
                    "Duplicate variable name `{}`",
                    var.name
                )));
            }
            // Aliases share a value reference within a partition.
            by_vr
                .entry((var.variable_type(), var.value_reference))
                .or_default()
                .push(index);
        }

        Ok(Self {
            variables,
            by_name,
            by_vr,
        })
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter()
    }

    pub fn by_name(&self, name: &str) -> Result<&VariableDescriptor, Error> {
        self.by_name
            .get(name)
            .map(|&index| &self.variables[index])
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    /// First variable declared with `vr` in the `variable_type` partition.
    pub fn by_value_reference(
        &self,
        vr: ValueReference,
        variable_type: VariableType,
    ) -> Result<&VariableDescriptor, Error> {
        self.aliases(vr, variable_type)
            .next()
            .ok_or_else(|| Error::NotFound(format!("{variable_type} variable with vr={vr}")))
    }

    /// All variables sharing `vr` in the `variable_type` partition, in declaration order.
    pub fn aliases(
        &self,
        vr: ValueReference,
        variable_type: VariableType,
    ) -> impl Iterator<Item = &VariableDescriptor> {
        self.by_vr
            .get(&(variable_type, vr))
            .into_iter()
            .flatten()
            .map(move |&index| &self.variables[index])
    }

    pub fn value_reference(&self, name: &str) -> Result<ValueReference, Error> {
        self.by_name(name).map(|var| var.value_reference)
    }

    /// Value references for `names`, failing on the first unknown name.
    pub fn value_references<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<ValueReference>, Error> {
        names
            .iter()
            .map(|name| self.value_reference(name.as_ref()))
            .collect()
    }

    /// Variables of a given type, in declaration order.
    pub fn of_type(&self, variable_type: VariableType) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables
            .iter()
            .filter(move |var| var.variable_type() == variable_type)
    }
}

impl<'a> IntoIterator for &'a ModelVariables {
    type Item = &'a VariableDescriptor;
    type IntoIter = std::slice::Iter<'a, VariableDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.variables.iter()
    }
}
