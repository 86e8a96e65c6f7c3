use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// A class object: a name, its defining module, base classes, and a member
/// table. Member lookup walks the class first, then each base depth-first
/// in declaration order.
pub struct ClassObj {
    pub name: String,
    pub module: String,
    pub bases: Vec<Rc<ClassObj>>,
    pub members: BTreeMap<String, Value>,
}

impl ClassObj {
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(member) = self.members.get(name) {
            return Some(member.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }
}

impl fmt::Debug for ClassObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}.{}>", self.module, self.name)
    }
}

/// An instance of a [`ClassObj`]. Attribute reads check instance fields
/// before class members; function members come back bound to the instance.
pub struct Instance {
    pub class: Rc<ClassObj>,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<ClassObj>) -> Instance {
        Instance {
            class,
            fields: RefCell::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} instance>", self.class.name)
    }
}
