use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::namespace::Namespace;
use crate::value::Value;

/// An importable unit: a name and a namespace of attribute bindings.
pub struct Module {
    pub name: String,
    pub bindings: Namespace,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            bindings: Namespace::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.bindings.get(name)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module {}>", self.name)
    }
}

thread_local! {
    static MODULES: RefCell<HashMap<String, Rc<Module>>> = RefCell::new(builtin_modules());
}

/// Make a module importable by name. Registering a name twice replaces the
/// previous module; values are thread-local, like the rest of the runtime.
pub fn register_module(module: Module) -> Rc<Module> {
    let module = Rc::new(module);
    MODULES.with(|m| {
        m.borrow_mut()
            .insert(module.name.clone(), module.clone())
    });
    module
}

/// Resolve a registered module by name.
pub fn import(name: &str) -> Option<Rc<Module>> {
    MODULES.with(|m| m.borrow().get(name).cloned())
}

fn builtin_modules() -> HashMap<String, Rc<Module>> {
    let mut modules = HashMap::new();

    let platform = Module::new("platform");
    platform
        .bindings
        .set("version", Value::string(env!("CARGO_PKG_VERSION")));
    platform.bindings.set("name", Value::string("nimbus"));
    modules.insert("platform".to_string(), Rc::new(platform));

    let math = Module::new("math");
    math.bindings.set("pi", Value::Float(std::f64::consts::PI));
    math.bindings.set("e", Value::Float(std::f64::consts::E));
    modules.insert("math".to_string(), Rc::new(math));

    modules
}
