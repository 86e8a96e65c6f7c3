use std::fmt;
use std::rc::Rc;

use crate::code::Code;
use crate::interp::RuntimeError;
use crate::namespace::Namespace;
use crate::value::Value;

/// A callable built from a [`Code`] object and a defining namespace.
///
/// Global reads inside the body resolve against `globals` at execution
/// time. `defaults` fill the trailing parameters when a call passes fewer
/// arguments; `captured` holds non-global cell values referenced by
/// `LoadCapture`.
pub struct Function {
    pub name: String,
    /// Name of the module the function was defined in. Dependency capture
    /// uses it to decide which classes travel with the function.
    pub module: String,
    pub code: Rc<Code>,
    pub defaults: Vec<Value>,
    pub captured: Vec<Value>,
    pub globals: Namespace,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("params", &self.code.params)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Function`] values.
pub struct FunctionBuilder {
    name: String,
    module: String,
    code: Code,
    defaults: Vec<Value>,
    captured: Vec<Value>,
    globals: Option<Namespace>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, code: Code) -> FunctionBuilder {
        FunctionBuilder {
            name: name.into(),
            module: "main".to_string(),
            code,
            defaults: Vec::new(),
            captured: Vec::new(),
            globals: None,
        }
    }

    /// Name of the defining module. Defaults to `main`.
    pub fn in_module(mut self, module: impl Into<String>) -> FunctionBuilder {
        self.module = module.into();
        self
    }

    /// Default values for the trailing parameters.
    pub fn defaults(mut self, defaults: Vec<Value>) -> FunctionBuilder {
        self.defaults = defaults;
        self
    }

    /// Captured cell values, indexed by `LoadCapture` operands.
    pub fn captured(mut self, captured: Vec<Value>) -> FunctionBuilder {
        self.captured = captured;
        self
    }

    /// Namespace the function resolves globals in. A fresh empty namespace
    /// is used when not provided.
    pub fn globals(mut self, namespace: &Namespace) -> FunctionBuilder {
        self.globals = Some(namespace.clone());
        self
    }

    pub fn build(self) -> Rc<Function> {
        Rc::new(Function {
            name: self.name,
            module: self.module,
            code: Rc::new(self.code),
            defaults: self.defaults,
            captured: self.captured,
            globals: self.globals.unwrap_or_default(),
        })
    }

    /// Build the function in `namespace` and bind it there under its name.
    pub fn bind(self, namespace: &Namespace) -> Rc<Function> {
        let function = self.globals(namespace).build();
        namespace.set(&function.name, Value::Function(function.clone()));
        function
    }
}

/// A natively implemented callable exposed to evaluated code.
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: fn(&[Value]) -> Result<Value, RuntimeError>,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

/// A function member paired with the instance it was read from.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<Function>,
}
