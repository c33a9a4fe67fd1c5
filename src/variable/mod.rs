//! Typed variable descriptors and the read/write contract that maps them onto native calls.
//!
//! A [`VariableDescriptor`] carries one of five [`TypedAttributes`] variants. Reads and writes
//! never reach a component directly: they take an explicit [`VariableAccessor`], so this layer
//! stays independent of the lifecycle.

use crate::{Error, ReadResult, Status};

pub mod accessor;
mod model_variables;

pub use accessor::VariableAccessor;
pub use model_variables::ModelVariables;

/// Numeric handle of a variable. Only unique within one [`VariableType`] partition.
pub type ValueReference = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableType {
    Integer,
    Real,
    String,
    Boolean,
    Enumeration,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VariableType::Integer => "Integer",
            VariableType::Real => "Real",
            VariableType::String => "String",
            VariableType::Boolean => "Boolean",
            VariableType::Enumeration => "Enumeration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Causality {
    Parameter,
    CalculatedParameter,
    Input,
    Output,
    #[default]
    Local,
    Independent,
}

/// Enumeration that defines the time dependency of the variable, in other words it defines the
/// time instants when a variable can change its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Variability {
    /// The value of the variable never changes.
    Constant,
    /// The value of the variable is fixed after initialization.
    Fixed,
    /// The value is constant between external events (ModelExchange) and between communication
    /// points (CoSimulation).
    Tunable,
    /// The value only changes at events (ModelExchange) or communication points (CoSimulation).
    Discrete,
    /// Only a variable of type Real can be continuous.
    #[default]
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initial {
    Exact,
    Approx,
    Calculated,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealAttributes {
    /// Value before initialization, if initial=exact or approx.
    pub start: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub nominal: Option<f64>,
    pub unit: Option<String>,
    /// If present, this variable is the derivative of the variable with this index.
    pub derivative: Option<u32>,
    /// If true, the state can be reinitialized at an event by the FMU.
    pub reinit: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegerAttributes {
    pub start: Option<i32>,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BooleanAttributes {
    pub start: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringAttributes {
    pub start: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumerationAttributes {
    pub start: Option<i32>,
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub quantity: Option<String>,
}

/// Type-specific payload of a [`VariableDescriptor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedAttributes {
    Integer(IntegerAttributes),
    Real(RealAttributes),
    String(StringAttributes),
    Boolean(BooleanAttributes),
    Enumeration(EnumerationAttributes),
}

impl TypedAttributes {
    pub fn variable_type(&self) -> VariableType {
        match self {
            TypedAttributes::Integer(_) => VariableType::Integer,
            TypedAttributes::Real(_) => VariableType::Real,
            TypedAttributes::String(_) => VariableType::String,
            TypedAttributes::Boolean(_) => VariableType::Boolean,
            TypedAttributes::Enumeration(_) => VariableType::Enumeration,
        }
    }
}

/// A dynamically typed variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Real(f64),
    String(String),
    Boolean(bool),
    Enumeration(i32),
}

impl Value {
    pub fn variable_type(&self) -> VariableType {
        match self {
            Value::Integer(_) => VariableType::Integer,
            Value::Real(_) => VariableType::Real,
            Value::String(_) => VariableType::String,
            Value::Boolean(_) => VariableType::Boolean,
            Value::Enumeration(_) => VariableType::Enumeration,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) | Value::Enumeration(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Immutable metadata for one exposed variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDescriptor {
    /// The full, unique name of the variable.
    pub name: String,
    pub value_reference: ValueReference,
    pub description: Option<String>,
    pub causality: Causality,
    pub variability: Variability,
    pub initial: Option<Initial>,
    /// Name of a type defined in `TypeDefinitions` providing defaults.
    pub declared_type: Option<String>,
    pub attributes: TypedAttributes,
}

impl VariableDescriptor {
    pub fn new(
        name: impl Into<String>,
        value_reference: ValueReference,
        attributes: TypedAttributes,
    ) -> Self {
        Self {
            name: name.into(),
            value_reference,
            description: None,
            causality: Causality::default(),
            variability: Variability::default(),
            initial: None,
            declared_type: None,
            attributes,
        }
    }

    pub fn with_causality(mut self, causality: Causality) -> Self {
        self.causality = causality;
        self
    }

    pub fn with_variability(mut self, variability: Variability) -> Self {
        self.variability = variability;
        self
    }

    pub fn with_initial(mut self, initial: Initial) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    #[inline]
    pub fn variable_type(&self) -> VariableType {
        self.attributes.variable_type()
    }

    fn mismatch(&self, requested: VariableType) -> Error {
        Error::TypeMismatch {
            requested,
            actual: self.variable_type(),
        }
    }

    pub fn start_value(&self) -> Option<Value> {
        match &self.attributes {
            TypedAttributes::Integer(a) => a.start.map(Value::Integer),
            TypedAttributes::Real(a) => a.start.map(Value::Real),
            TypedAttributes::String(a) => a.start.clone().map(Value::String),
            TypedAttributes::Boolean(a) => a.start.map(Value::Boolean),
            TypedAttributes::Enumeration(a) => a.start.map(Value::Enumeration),
        }
    }

    /// Read the current value through `accessor`, dispatching on the variable type.
    pub fn read(&self, accessor: &mut impl VariableAccessor) -> Result<ReadResult<Value>, Error> {
        let vr = self.value_reference;
        Ok(match self.variable_type() {
            VariableType::Integer => accessor.read_integer(vr)?.map(Value::Integer),
            VariableType::Real => accessor.read_real(vr)?.map(Value::Real),
            VariableType::String => accessor.read_string(vr)?.map(Value::String),
            VariableType::Boolean => accessor.read_boolean(vr)?.map(Value::Boolean),
            VariableType::Enumeration => accessor.read_integer(vr)?.map(Value::Enumeration),
        })
    }

    /// Write `value` through `accessor`. The value must carry the same type as the variable.
    pub fn write(
        &self,
        accessor: &mut impl VariableAccessor,
        value: &Value,
    ) -> Result<Status, Error> {
        let vr = self.value_reference;
        match (self.variable_type(), value) {
            (VariableType::Integer, Value::Integer(v))
            | (VariableType::Enumeration, Value::Enumeration(v)) => {
                accessor.write_integer(vr, *v)
            }
            (VariableType::Real, Value::Real(v)) => accessor.write_real(vr, *v),
            (VariableType::String, Value::String(v)) => accessor.write_string(vr, v),
            (VariableType::Boolean, Value::Boolean(v)) => accessor.write_boolean(vr, *v),
            (actual, value) => Err(Error::TypeMismatch {
                requested: value.variable_type(),
                actual,
            }),
        }
    }
}

macro_rules! typed_variable {
    ($variant:ident, $attrs:ty, $read:ty, $write:ty, $reader:ident, $writer:ident) => {
        paste::paste! {
            #[doc = concat!("View of a [`VariableDescriptor`] known to be of type ", stringify!($variant), ".")]
            #[derive(Debug, Clone, Copy)]
            pub struct [<$variant Variable>]<'a> {
                descriptor: &'a VariableDescriptor,
                attributes: &'a $attrs,
            }

            impl<'a> [<$variant Variable>]<'a> {
                pub fn descriptor(&self) -> &'a VariableDescriptor {
                    self.descriptor
                }

                pub fn attributes(&self) -> &'a $attrs {
                    self.attributes
                }

                pub fn name(&self) -> &'a str {
                    &self.descriptor.name
                }

                pub fn value_reference(&self) -> ValueReference {
                    self.descriptor.value_reference
                }

                pub fn read(
                    &self,
                    accessor: &mut impl VariableAccessor,
                ) -> Result<ReadResult<$read>, Error> {
                    accessor.$reader(self.value_reference())
                }

                pub fn write(
                    &self,
                    accessor: &mut impl VariableAccessor,
                    value: $write,
                ) -> Result<Status, Error> {
                    accessor.$writer(self.value_reference(), value)
                }
            }

            impl VariableDescriptor {
                #[doc = concat!("This variable as a [`", stringify!($variant), "Variable`], or [`Error::TypeMismatch`].")]
                pub fn [<as_ $variant:lower _variable>](&self) -> Result<[<$variant Variable>]<'_>, Error> {
                    match &self.attributes {
                        TypedAttributes::$variant(attributes) => Ok([<$variant Variable>] {
                            descriptor: self,
                            attributes,
                        }),
                        _ => Err(self.mismatch(VariableType::$variant)),
                    }
                }
            }
        }
    };
}

typed_variable!(Integer, IntegerAttributes, i32, i32, read_integer, write_integer);
typed_variable!(Real, RealAttributes, f64, f64, read_real, write_real);
typed_variable!(String, StringAttributes, String, &str, read_string, write_string);
typed_variable!(Boolean, BooleanAttributes, bool, bool, read_boolean, write_boolean);
typed_variable!(Enumeration, EnumerationAttributes, i32, i32, read_integer, write_integer);

impl RealVariable<'_> {
    pub fn start(&self) -> Option<f64> {
        self.attributes.start
    }
}

impl IntegerVariable<'_> {
    pub fn start(&self) -> Option<i32> {
        self.attributes.start
    }
}

impl BooleanVariable<'_> {
    pub fn start(&self) -> Option<bool> {
        self.attributes.start
    }
}

impl StringVariable<'_> {
    pub fn start(&self) -> Option<&str> {
        self.attributes.start.as_deref()
    }
}

impl EnumerationVariable<'_> {
    pub fn start(&self) -> Option<i32> {
        self.attributes.start
    }
}

fn field(
    f: &mut std::fmt::Formatter<'_>,
    key: &str,
    value: Option<impl std::fmt::Display>,
) -> std::fmt::Result {
    match value {
        Some(value) => write!(f, ", {key}={value}"),
        None => Ok(()),
    }
}

impl std::fmt::Display for VariableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Variable(name={}, valueReference={}",
            self.variable_type(),
            self.name,
            self.value_reference
        )?;
        match &self.attributes {
            TypedAttributes::Real(a) => {
                field(f, "start", a.start)?;
                field(f, "min", a.min)?;
                field(f, "max", a.max)?;
                field(f, "nominal", a.nominal)?;
                field(f, "unit", a.unit.as_deref())?;
                field(f, "derivative", a.derivative)?;
                field(f, "reinit", a.reinit.then_some(true))?;
            }
            TypedAttributes::Integer(a) => {
                field(f, "start", a.start)?;
                field(f, "min", a.min)?;
                field(f, "max", a.max)?;
            }
            TypedAttributes::Enumeration(a) => {
                field(f, "start", a.start)?;
                field(f, "min", a.min)?;
                field(f, "max", a.max)?;
                field(f, "quantity", a.quantity.as_deref())?;
            }
            TypedAttributes::Boolean(a) => field(f, "start", a.start)?,
            TypedAttributes::String(a) => field(f, "start", a.start.as_deref())?,
        }
        field(f, "description", self.description.as_deref())?;
        write!(
            f,
            ", causality={:?}, variability={:?}",
            self.causality, self.variability
        )?;
        field(f, "initial", self.initial.map(|i| format!("{i:?}")))?;
        field(f, "declaredType", self.declared_type.as_deref())?;
        write!(f, ")")
    }
}
