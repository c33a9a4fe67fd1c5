//! The model description consumed by the runtime.
//!
//! Producing a [`ModelDescriptor`] (typically by parsing `modelDescription.xml`) is up to the
//! caller; it is immutable once built.

use crate::{
    variable::{ModelVariables, VariableDescriptor},
    Error, InterfaceType,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultExperiment {
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub tolerance: Option<f64>,
    pub step_size: Option<f64>,
}

/// Capability flags shared by the Model Exchange and Co-Simulation interfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    /// Short class name according to C-syntax, also the base name of the shared library.
    pub model_identifier: String,
    pub needs_execution_tool: bool,
    pub can_be_instantiated_only_once_per_process: bool,
    pub can_not_use_memory_management_functions: bool,
    pub can_get_and_set_fmu_state: bool,
    pub can_serialize_fmu_state: bool,
    pub provides_directional_derivative: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelExchange {
    pub capabilities: Capabilities,
    /// The FMU does not need `fmi2CompletedIntegratorStep` to be called.
    pub completed_integrator_step_not_needed: bool,
}

impl ModelExchange {
    pub fn new(model_identifier: impl Into<String>) -> Self {
        Self {
            capabilities: Capabilities {
                model_identifier: model_identifier.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoSimulation {
    pub capabilities: Capabilities,
    pub can_handle_variable_communication_step_size: bool,
    pub can_interpolate_inputs: bool,
    pub max_output_derivative_order: u32,
    pub can_run_asynchronuously: bool,
}

impl CoSimulation {
    pub fn new(model_identifier: impl Into<String>) -> Self {
        Self {
            capabilities: Capabilities {
                model_identifier: model_identifier.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub fmi_version: String,
    pub model_name: String,
    pub guid: String,
    pub description: Option<String>,
    pub generation_tool: Option<String>,
    pub number_of_event_indicators: usize,
    pub number_of_continuous_states: usize,
    pub default_experiment: Option<DefaultExperiment>,
    pub log_categories: Vec<String>,
    pub model_exchange: Option<ModelExchange>,
    pub co_simulation: Option<CoSimulation>,
    pub model_variables: ModelVariables,
}

impl ModelDescriptor {
    /// A FMI 2.0 model description without any interface. Fails on duplicate variable names.
    pub fn new(
        model_name: impl Into<String>,
        guid: impl Into<String>,
        variables: Vec<VariableDescriptor>,
    ) -> Result<Self, Error> {
        Ok(Self {
            fmi_version: fmi_sys::fmi2::fmi2Version.to_owned(),
            model_name: model_name.into(),
            guid: guid.into(),
            description: None,
            generation_tool: None,
            number_of_event_indicators: 0,
            number_of_continuous_states: 0,
            default_experiment: None,
            log_categories: Vec::new(),
            model_exchange: None,
            co_simulation: None,
            model_variables: ModelVariables::new(variables)?,
        })
    }

    pub fn with_co_simulation(mut self, co_simulation: CoSimulation) -> Self {
        self.co_simulation = Some(co_simulation);
        self
    }

    pub fn with_model_exchange(mut self, model_exchange: ModelExchange) -> Self {
        self.model_exchange = Some(model_exchange);
        self
    }

    pub fn with_default_experiment(mut self, default_experiment: DefaultExperiment) -> Self {
        self.default_experiment = Some(default_experiment);
        self
    }

    pub fn with_continuous_states(mut self, number_of_continuous_states: usize) -> Self {
        self.number_of_continuous_states = number_of_continuous_states;
        self
    }

    pub fn with_event_indicators(mut self, number_of_event_indicators: usize) -> Self {
        self.number_of_event_indicators = number_of_event_indicators;
        self
    }

    pub fn with_log_categories<S: Into<String>>(
        mut self,
        categories: impl IntoIterator<Item = S>,
    ) -> Self {
        self.log_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports(&self, interface: InterfaceType) -> bool {
        self.capabilities(interface).is_some()
    }

    /// Capability flags of `interface`, or `None` if the model does not implement it.
    pub fn capabilities(&self, interface: InterfaceType) -> Option<&Capabilities> {
        match interface {
            InterfaceType::ModelExchange => self.model_exchange.as_ref().map(|me| &me.capabilities),
            InterfaceType::CoSimulation => self.co_simulation.as_ref().map(|cs| &cs.capabilities),
        }
    }

    pub fn model_identifier(&self, interface: InterfaceType) -> Option<&str> {
        self.capabilities(interface)
            .map(|caps| caps.model_identifier.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let md = ModelDescriptor::new("BouncingBall", "{8c4e810f}", vec![])
            .unwrap()
            .with_model_exchange(ModelExchange::new("bouncing_ball"));
        assert_eq!(md.fmi_version, "2.0");
        assert!(md.supports(InterfaceType::ModelExchange));
        assert!(!md.supports(InterfaceType::CoSimulation));
        assert_eq!(
            md.model_identifier(InterfaceType::ModelExchange),
            Some("bouncing_ball")
        );
    }
}
