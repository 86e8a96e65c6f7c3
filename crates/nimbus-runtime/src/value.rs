use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bincode::{Decode, Encode};

use crate::class::{ClassObj, Instance};
use crate::function::{BoundMethod, BuiltinFunction, Function};
use crate::modules::Module;

/// A runtime value.
///
/// Scalars are stored inline; containers, functions, and classes are
/// reference counted so that a value can appear in several places (and so
/// that container identity is observable, which the invocation codec relies
/// on for cycle detection).
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Extended-range integer, kept separate from [`Value::Int`] so the two
    /// travel under distinct wire tags.
    Long(i128),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Map(Rc<RefCell<ValueMap>>),
    Array(Rc<NdArray>),
    Function(Rc<Function>),
    Builtin(Rc<BuiltinFunction>),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<ClassObj>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
}

/// Discriminant of a [`Value`], used for codec dispatch and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Long,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Map,
    Array,
    Function,
    Builtin,
    BoundMethod,
    Class,
    Instance,
    Module,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Map(_) => ValueKind::Map,
            Value::Array(_) => ValueKind::Array,
            Value::Function(_) => ValueKind::Function,
            Value::Builtin(_) => ValueKind::Builtin,
            Value::BoundMethod(_) => ValueKind::BoundMethod,
            Value::Class(_) => ValueKind::Class,
            Value::Instance(_) => ValueKind::Instance,
            Value::Module(_) => ValueKind::Module,
        }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(Rc::from(b.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn map(entries: ValueMap) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    /// Identity of a container value, used to detect a container reached
    /// twice within one encode call. Non-container values have no identity
    /// worth tracking and return `None`.
    pub fn container_address(&self) -> Option<usize> {
        match self {
            Value::List(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Tuple(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Map(rc) => Some(Rc::as_ptr(rc) as usize),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Long(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            _ => true,
        }
    }

    /// Convert to the embeddable [`Literal`] subset. Functions, classes,
    /// modules, and instances have no literal form and yield `None`.
    pub fn to_literal(&self) -> Option<Literal> {
        match self {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Int(i) => Some(Literal::Int(*i)),
            Value::Long(i) => Some(Literal::Long(*i)),
            Value::Float(f) => Some(Literal::Float(*f)),
            Value::Str(s) => Some(Literal::Str(s.to_string())),
            Value::Bytes(b) => Some(Literal::Bytes(b.to_vec())),
            Value::List(l) => {
                let items: Option<Vec<_>> = l.borrow().iter().map(Value::to_literal).collect();
                Some(Literal::List(items?))
            }
            Value::Tuple(t) => {
                let items: Option<Vec<_>> = t.iter().map(Value::to_literal).collect();
                Some(Literal::Tuple(items?))
            }
            Value::Map(m) => {
                let mut pairs = Vec::new();
                for (k, v) in m.borrow().entries() {
                    pairs.push((k.to_literal()?, v.to_literal()?));
                }
                Some(Literal::Map(pairs))
            }
            Value::Array(a) => Some(Literal::Array {
                shape: a.shape.clone(),
                dtype: a.dtype.clone(),
                data: a.data.clone(),
            }),
            _ => None,
        }
    }

    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Long(i) => Value::Long(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::string(s.clone()),
            Literal::Bytes(b) => Value::bytes(b.clone()),
            Literal::List(items) => Value::list(items.iter().map(Value::from_literal).collect()),
            Literal::Tuple(items) => Value::tuple(items.iter().map(Value::from_literal).collect()),
            Literal::Map(pairs) => {
                let mut map = ValueMap::new();
                for (k, v) in pairs {
                    map.insert(Value::from_literal(k), Value::from_literal(v));
                }
                Value::map(map)
            }
            Literal::Array { shape, dtype, data } => Value::Array(Rc::new(NdArray {
                shape: shape.clone(),
                dtype: dtype.clone(),
                data: data.clone(),
            })),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => *a.borrow() == *b.borrow(),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(i) => write!(f, "{i}L"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "b<{} bytes>", b.len()),
            Value::List(l) => f.debug_list().entries(l.borrow().iter()).finish(),
            Value::Tuple(t) => {
                write!(f, "(")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::Map(m) => {
                let m = m.borrow();
                f.debug_map()
                    .entries(m.entries().iter().map(|(k, v)| (k, v)))
                    .finish()
            }
            Value::Array(a) => write!(f, "array<{} {:?}>", a.dtype, a.shape),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name),
            Value::BoundMethod(m) => write!(f, "<bound method {}>", m.function.name),
            Value::Class(c) => write!(f, "<class {}.{}>", c.module, c.name),
            Value::Instance(i) => write!(f, "<{} instance>", i.class.name),
            Value::Module(m) => write!(f, "<module {}>", m.name),
        }
    }
}

/// Insertion-ordered mapping with arbitrary value keys.
///
/// Lookup is linear; invocation payloads are small and key types are open
/// ended, so a hashed map buys nothing here.
#[derive(Debug, Default, Clone)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> ValueMap {
        ValueMap::default()
    }

    /// Insert or replace the entry for `key`, preserving first-insert order.
    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &ValueMap) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> ValueMap {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Dense numeric array: shape, element type name, and raw element bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub data: Vec<u8>,
}

/// The embeddable subset of [`Value`]: constant-pool entries, parameter
/// defaults, captured cells, and literal global bindings all use this form,
/// so everything a serialized function carries is plain data.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Long(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Map(Vec<(Literal, Literal)>),
    Array {
        shape: Vec<u64>,
        dtype: String,
        data: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_round_trip_preserves_structure() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::string("two"),
            Value::tuple(vec![Value::Bool(true), Value::Null]),
        ]);
        let literal = value.to_literal().unwrap();
        assert_eq!(Value::from_literal(&literal), value);
    }

    #[test]
    fn functions_have_no_literal_form() {
        use crate::{CodeBuilder, FunctionBuilder};
        let code = CodeBuilder::new().finish();
        let func = FunctionBuilder::new("f", code).build();
        assert!(Value::Function(func).to_literal().is_none());
    }

    #[test]
    fn map_insert_replaces_and_keeps_order() {
        let mut map = ValueMap::new();
        map.insert(Value::Int(1), Value::string("a"));
        map.insert(Value::Int(2), Value::string("b"));
        map.insert(Value::Int(1), Value::string("c"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.entries()[0].1, Value::string("c"));
        assert_eq!(map.get(&Value::Int(2)), Some(&Value::string("b")));
    }

    #[test]
    fn map_equality_ignores_order() {
        let a: ValueMap = [(Value::Int(1), Value::Int(10)), (Value::Int(2), Value::Int(20))]
            .into_iter()
            .collect();
        let b: ValueMap = [(Value::Int(2), Value::Int(20)), (Value::Int(1), Value::Int(10))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn container_identity_is_shared_through_clones() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        assert_eq!(list.container_address(), alias.container_address());
        assert_ne!(
            list.container_address(),
            Value::list(vec![Value::Int(1)]).container_address()
        );
    }

    #[test]
    fn kind_names_render_snake_case() {
        assert_eq!(ValueKind::BoundMethod.to_string(), "bound_method");
        assert_eq!(Value::Null.kind().to_string(), "null");
    }
}
