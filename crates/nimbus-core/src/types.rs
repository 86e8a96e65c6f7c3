//! Declared port types for published services.
//!
//! Declaring a type does two things: it is advertised in the service
//! schema so non-SDK clients can call the endpoint, and it controls how the
//! value crosses the wire. Undeclared ports default to [`PortType::Object`],
//! the SDK's own tagged encoding, which handles rich values at the cost of
//! interop with other callers.

use serde::{Deserialize, Serialize};

/// How one input or output port is typed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// 64-bit integer, sent as a JSON literal.
    Integer,
    /// Boolean, sent as a JSON literal.
    Boolean,
    /// Double-precision number, sent as a JSON literal.
    Number,
    /// Raw text: bypasses the tagged codec entirely and travels verbatim.
    Text,
    /// Any supported value through the tagged codec.
    Object,
}

impl PortType {
    /// The schema descriptor advertised for this port.
    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            PortType::Integer => TypeDescriptor::new("integer", Some("int64")),
            PortType::Boolean => TypeDescriptor::new("Boolean", None),
            PortType::Number => TypeDescriptor::new("number", Some("double")),
            PortType::Text => TypeDescriptor::new("string", None),
            PortType::Object => TypeDescriptor::new("string", Some("string")),
        }
    }
}

/// Wire form of a port type in the publish schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl TypeDescriptor {
    fn new(kind: &str, format: Option<&str>) -> TypeDescriptor {
        TypeDescriptor {
            kind: kind.to_string(),
            format: format.map(str::to_string),
        }
    }
}

/// Shape of a service's result.
#[derive(Debug, Clone)]
pub enum ReturnSpec {
    /// One value under the `result` output column.
    Single(PortType),
    /// A fixed-arity tuple packed by position into `result0..resultN`.
    Tuple(Vec<PortType>),
    /// Named output columns.
    Named(Vec<(String, PortType)>),
}

impl ReturnSpec {
    /// Output-schema entries, in column order.
    pub fn schema(&self) -> Vec<(String, TypeDescriptor)> {
        match self {
            ReturnSpec::Single(ty) => vec![("result".to_string(), ty.descriptor())],
            ReturnSpec::Tuple(types) => types
                .iter()
                .enumerate()
                .map(|(i, ty)| (format!("result{i}"), ty.descriptor()))
                .collect(),
            ReturnSpec::Named(columns) => columns
                .iter()
                .map(|(name, ty)| (name.clone(), ty.descriptor()))
                .collect(),
        }
    }
}

impl Default for ReturnSpec {
    fn default() -> ReturnSpec {
        ReturnSpec::Single(PortType::Object)
    }
}
