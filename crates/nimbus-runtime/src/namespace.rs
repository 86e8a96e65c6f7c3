use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::function::BuiltinFunction;
use crate::interp::RuntimeError;
use crate::value::Value;

/// A shared, mutable name-to-value table: the "module globals" of every
/// function defined in it.
///
/// Cloning a `Namespace` clones the handle, not the table, so a function
/// and the namespace it was defined in always observe the same bindings.
/// Lookups happen when a name is used, which is what lets mutually
/// recursive functions be bound one after the other.
///
/// Language built-ins (`len`, `str`, `abs`) are not bindings; they are a
/// fallback consulted only when a name has no binding, so they never show
/// up as dependencies of a published function. Reconstructing two closures
/// into the same namespace concurrently is unsupported; callers serialize
/// such use themselves.
#[derive(Clone, Default)]
pub struct Namespace {
    bindings: Rc<RefCell<HashMap<String, Value>>>,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.bindings.borrow_mut().insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    /// Currently bound names, unordered.
    pub fn names(&self) -> Vec<String> {
        self.bindings.borrow().keys().cloned().collect()
    }

    /// Whether two handles refer to the same table.
    pub fn same_table(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.bindings, &other.bindings)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_tuple("Namespace").field(&names).finish()
    }
}

/// Look up a language built-in by name.
pub fn builtin(name: &str) -> Option<Value> {
    let (name, func): (&'static str, fn(&[Value]) -> Result<Value, RuntimeError>) = match name {
        "len" => ("len", builtin_len),
        "str" => ("str", builtin_str),
        "abs" => ("abs", builtin_abs),
        _ => return None,
    };
    Some(Value::Builtin(Rc::new(BuiltinFunction { name, func })))
}

fn arity(name: &'static str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::Arity {
            callee: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn builtin_len(args: &[Value]) -> Result<Value, RuntimeError> {
    arity("len", args, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Map(m) => m.borrow().len(),
        other => {
            return Err(RuntimeError::Unsupported {
                operation: "len",
                kind: other.kind(),
            })
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_str(args: &[Value]) -> Result<Value, RuntimeError> {
    arity("str", args, 1)?;
    let text = match &args[0] {
        Value::Str(s) => s.to_string(),
        other => format!("{other:?}"),
    };
    Ok(Value::string(text))
}

fn builtin_abs(args: &[Value]) -> Result<Value, RuntimeError> {
    arity("abs", args, 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Long(i) => Ok(Value::Long(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RuntimeError::Unsupported {
            operation: "abs",
            kind: other.kind(),
        }),
    }
}
