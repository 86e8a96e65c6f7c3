use std::rc::Rc;

use crate::class::Instance;
use crate::code::{read_u16, read_u8, Code, Op};
use crate::function::{BoundMethod, Function};
use crate::namespace::{builtin, Namespace};
use crate::value::{Value, ValueKind, ValueMap};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A global name had no binding and is not a built-in at the moment it
    /// was read. Reported at call time, never at construction time.
    #[error("name '{0}' is not defined")]
    UndefinedName(String),
    #[error("{kind} value has no attribute '{attribute}'")]
    MissingAttribute { kind: ValueKind, attribute: String },
    #[error("{callee} expected {expected} arguments, got {got}")]
    Arity {
        callee: String,
        expected: String,
        got: usize,
    },
    #[error("{0} value is not callable")]
    NotCallable(ValueKind),
    #[error("unsupported operands for {op}: {lhs} and {rhs}")]
    BadOperands {
        op: &'static str,
        lhs: ValueKind,
        rhs: ValueKind,
    },
    #[error("{operation} is not supported for {kind} values")]
    Unsupported {
        operation: &'static str,
        kind: ValueKind,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("key not found in mapping")]
    MissingKey,
    #[error("invalid instruction stream at offset {offset}: {detail}")]
    InvalidInstruction { offset: usize, detail: String },
}

/// Call any callable value with positional arguments.
///
/// Functions run their instruction stream against their defining
/// namespace; classes construct an instance (invoking an `init` member when
/// one exists); bound methods prepend their receiver. Everything else is a
/// call-time error.
pub fn call_value(callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match callee {
        Value::Function(function) => call_function(function, args),
        Value::Builtin(builtin) => (builtin.func)(&args),
        Value::BoundMethod(method) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(method.receiver.clone());
            full.extend(args);
            call_function(&method.function, full)
        }
        Value::Class(class) => {
            let instance = Value::Instance(Rc::new(Instance::new(class.clone())));
            if let Some(Value::Function(init)) = class.lookup("init") {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(instance.clone());
                full.extend(args);
                call_function(&init, full)?;
            } else if !args.is_empty() {
                return Err(RuntimeError::Arity {
                    callee: class.name.clone(),
                    expected: "0".to_string(),
                    got: args.len(),
                });
            }
            Ok(instance)
        }
        other => Err(RuntimeError::NotCallable(other.kind())),
    }
}

fn call_function(function: &Rc<Function>, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let code = &function.code;
    let params = code.params.len();

    if args.len() > params {
        return Err(RuntimeError::Arity {
            callee: function.name.clone(),
            expected: params.to_string(),
            got: args.len(),
        });
    }
    if args.len() < params {
        let missing = params - args.len();
        if missing > function.defaults.len() {
            let required = params - function.defaults.len();
            return Err(RuntimeError::Arity {
                callee: function.name.clone(),
                expected: format!("at least {required}"),
                got: args.len(),
            });
        }
        let start = function.defaults.len() - missing;
        args.extend(function.defaults[start..].iter().cloned());
    }

    let mut locals = args;
    locals.resize(code.num_locals as usize, Value::Null);

    Frame {
        code,
        globals: &function.globals,
        captured: &function.captured,
        locals,
        stack: Vec::new(),
    }
    .run()
}

struct Frame<'a> {
    code: &'a Code,
    globals: &'a Namespace,
    captured: &'a [Value],
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame<'_> {
    fn run(mut self) -> Result<Value, RuntimeError> {
        let ins = &self.code.instructions;
        let mut ip = 0;

        while ip < ins.len() {
            let offset = ip;
            let op = Op::from_byte(ins[ip]).ok_or_else(|| RuntimeError::InvalidInstruction {
                offset,
                detail: format!("unknown opcode {}", ins[ip]),
            })?;
            ip += 1;

            match op {
                Op::Const => {
                    let index = read_u16(ins, ip) as usize;
                    ip += 2;
                    let literal =
                        self.code
                            .constants
                            .get(index)
                            .ok_or_else(|| RuntimeError::InvalidInstruction {
                                offset,
                                detail: format!("constant index {index} out of range"),
                            })?;
                    self.stack.push(Value::from_literal(literal));
                }
                Op::LoadLocal => {
                    let slot = read_u8(ins, ip) as usize;
                    ip += 1;
                    self.stack.push(self.locals[slot].clone());
                }
                Op::StoreLocal => {
                    let slot = read_u8(ins, ip) as usize;
                    ip += 1;
                    let value = self.pop(offset)?;
                    self.locals[slot] = value;
                }
                Op::LoadGlobal => {
                    let name = self.name_at(ip, offset)?;
                    ip += 2;
                    let value = self
                        .globals
                        .get(name)
                        .or_else(|| builtin(name))
                        .ok_or_else(|| RuntimeError::UndefinedName(name.to_string()))?;
                    self.stack.push(value);
                }
                Op::LoadCapture => {
                    let index = read_u8(ins, ip) as usize;
                    ip += 1;
                    let cell =
                        self.captured
                            .get(index)
                            .ok_or_else(|| RuntimeError::InvalidInstruction {
                                offset,
                                detail: format!("capture index {index} out of range"),
                            })?;
                    self.stack.push(cell.clone());
                }
                Op::LoadAttr => {
                    let name = self.name_at(ip, offset)?.to_string();
                    ip += 2;
                    let object = self.pop(offset)?;
                    self.stack.push(load_attr(&object, &name)?);
                }
                Op::StoreAttr => {
                    let name = self.name_at(ip, offset)?.to_string();
                    ip += 2;
                    let value = self.pop(offset)?;
                    let object = self.pop(offset)?;
                    match &object {
                        Value::Instance(instance) => {
                            instance.fields.borrow_mut().insert(name, value);
                        }
                        other => {
                            return Err(RuntimeError::Unsupported {
                                operation: "attribute assignment",
                                kind: other.kind(),
                            })
                        }
                    }
                }
                Op::Call => {
                    let argc = read_u8(ins, ip) as usize;
                    ip += 1;
                    let args = self.take(argc, offset)?;
                    let callee = self.pop(offset)?;
                    self.stack.push(call_value(&callee, args)?);
                }
                Op::MakeList => {
                    let count = read_u16(ins, ip) as usize;
                    ip += 2;
                    let items = self.take(count, offset)?;
                    self.stack.push(Value::list(items));
                }
                Op::MakeTuple => {
                    let count = read_u16(ins, ip) as usize;
                    ip += 2;
                    let items = self.take(count, offset)?;
                    self.stack.push(Value::tuple(items));
                }
                Op::MakeMap => {
                    let pairs = read_u16(ins, ip) as usize;
                    ip += 2;
                    let mut flat = self.take(pairs * 2, offset)?;
                    let mut map = ValueMap::new();
                    for _ in 0..pairs {
                        let key = flat.remove(0);
                        let value = flat.remove(0);
                        map.insert(key, value);
                    }
                    self.stack.push(Value::map(map));
                }
                Op::Index => {
                    let index = self.pop(offset)?;
                    let object = self.pop(offset)?;
                    self.stack.push(index_value(&object, &index)?);
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    let rhs = self.pop(offset)?;
                    let lhs = self.pop(offset)?;
                    self.stack.push(binary_op(op, &lhs, &rhs)?);
                }
                Op::Neg => {
                    let value = self.pop(offset)?;
                    self.stack.push(match value {
                        Value::Int(i) => Value::Int(-i),
                        Value::Long(i) => Value::Long(-i),
                        Value::Float(f) => Value::Float(-f),
                        other => {
                            return Err(RuntimeError::Unsupported {
                                operation: "negation",
                                kind: other.kind(),
                            })
                        }
                    });
                }
                Op::Not => {
                    let value = self.pop(offset)?;
                    self.stack.push(Value::Bool(!value.is_truthy()));
                }
                Op::Eq | Op::Ne => {
                    let rhs = self.pop(offset)?;
                    let lhs = self.pop(offset)?;
                    let equal = lhs == rhs;
                    self.stack
                        .push(Value::Bool(if op == Op::Eq { equal } else { !equal }));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let rhs = self.pop(offset)?;
                    let lhs = self.pop(offset)?;
                    self.stack.push(Value::Bool(compare(op, &lhs, &rhs)?));
                }
                Op::Jump => {
                    ip = read_u16(ins, ip) as usize;
                }
                Op::JumpIfFalse => {
                    let target = read_u16(ins, ip) as usize;
                    ip += 2;
                    if !self.pop(offset)?.is_truthy() {
                        ip = target;
                    }
                }
                Op::Pop => {
                    self.pop(offset)?;
                }
                Op::Return => {
                    return self.pop(offset);
                }
            }
        }

        // Falling off the end returns null, like an empty body.
        Ok(Value::Null)
    }

    fn pop(&mut self, offset: usize) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::InvalidInstruction {
                offset,
                detail: "stack underflow".to_string(),
            })
    }

    /// Pop the top `count` values, preserving push order.
    fn take(&mut self, count: usize, offset: usize) -> Result<Vec<Value>, RuntimeError> {
        if self.stack.len() < count {
            return Err(RuntimeError::InvalidInstruction {
                offset,
                detail: "stack underflow".to_string(),
            });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn name_at(&self, ip: usize, offset: usize) -> Result<&str, RuntimeError> {
        let index = read_u16(&self.code.instructions, ip) as usize;
        self.code
            .names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| RuntimeError::InvalidInstruction {
                offset,
                detail: format!("name index {index} out of range"),
            })
    }
}

fn load_attr(object: &Value, name: &str) -> Result<Value, RuntimeError> {
    let missing = || RuntimeError::MissingAttribute {
        kind: object.kind(),
        attribute: name.to_string(),
    };

    match object {
        Value::Module(module) => module.attr(name).ok_or_else(missing),
        Value::Class(class) => class.lookup(name).ok_or_else(missing),
        Value::Instance(instance) => {
            if let Some(field) = instance.fields.borrow().get(name) {
                return Ok(field.clone());
            }
            match instance.class.lookup(name) {
                Some(Value::Function(function)) => {
                    Ok(Value::BoundMethod(Rc::new(BoundMethod {
                        receiver: object.clone(),
                        function,
                    })))
                }
                Some(member) => Ok(member),
                None => Err(missing()),
            }
        }
        _ => Err(missing()),
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (object, index) {
        (Value::List(items), Value::Int(i)) => {
            let items = items.borrow();
            lookup_position(&items, *i)
        }
        (Value::Tuple(items), Value::Int(i)) => lookup_position(items, *i),
        (Value::Map(map), key) => map.borrow().get(key).cloned().ok_or(RuntimeError::MissingKey),
        (object, index) => Err(RuntimeError::BadOperands {
            op: "index",
            lhs: object.kind(),
            rhs: index.kind(),
        }),
    }
}

fn lookup_position(items: &[Value], index: i64) -> Result<Value, RuntimeError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or(RuntimeError::IndexOutOfRange {
            index,
            len: items.len(),
        })
}

fn binary_op(op: Op, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    let name = match op {
        Op::Add => "+",
        Op::Sub => "-",
        Op::Mul => "*",
        _ => "/",
    };

    if op == Op::Add {
        match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                return Ok(Value::string(format!("{a}{b}")));
            }
            (Value::List(a), Value::List(b)) => {
                let mut joined = a.borrow().clone();
                joined.extend(b.borrow().iter().cloned());
                return Ok(Value::list(joined));
            }
            _ => {}
        }
    }

    let mismatch = || RuntimeError::BadOperands {
        op: name,
        lhs: lhs.kind(),
        rhs: rhs.kind(),
    };

    if op == Op::Div {
        let (a, b) = (as_float(lhs).ok_or_else(mismatch)?, as_float(rhs).ok_or_else(mismatch)?);
        if b == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        return Ok(Value::Float(a / b));
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            Op::Add => a + b,
            Op::Sub => a - b,
            _ => a * b,
        })),
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(match op {
            Op::Add => a + b,
            Op::Sub => a - b,
            _ => a * b,
        })),
        _ => {
            let (a, b) = (as_float(lhs).ok_or_else(mismatch)?, as_float(rhs).ok_or_else(mismatch)?);
            Ok(Value::Float(match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                _ => a * b,
            }))
        }
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Long(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn compare(op: Op, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => {
            let (a, b) = match (as_float(lhs), as_float(rhs)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(RuntimeError::BadOperands {
                        op: "comparison",
                        lhs: lhs.kind(),
                        rhs: rhs.kind(),
                    })
                }
            };
            a.partial_cmp(&b).unwrap_or(Ordering::Greater)
        }
    };

    Ok(match op {
        Op::Lt => ordering == Ordering::Less,
        Op::Le => ordering != Ordering::Greater,
        Op::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}
