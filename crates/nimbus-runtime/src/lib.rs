//! Executable function substrate for the Nimbus Studio SDK.
//!
//! Published functions are not native Rust functions: they are code objects
//! of a small stack-based instruction set, paired with a defining namespace.
//! Keeping the representation data makes two things possible that opaque
//! native functions cannot offer:
//!
//! - the publish pipeline can read a function's instruction stream to find
//!   the module-global names it actually uses, and
//! - a remote process can rebuild a working callable from the serialized
//!   representation alone.
//!
//! Global names inside a function are resolved when the function runs, not
//! when it is built. Two mutually recursive functions can therefore be bound
//! into a shared [`Namespace`] one after the other; by the time either is
//! called, both names exist.
//!
//! Values, namespaces, and modules are reference counted and deliberately
//! single-threaded. One evaluation runs at a time; callers that want
//! parallelism run independent namespaces on independent threads.

mod class;
mod code;
mod function;
mod interp;
mod modules;
mod namespace;
mod value;

pub use class::{ClassObj, Instance};
pub use code::{disassemble, make, operand_widths, read_u16, read_u8, Code, CodeBuilder, Op};
pub use function::{BoundMethod, BuiltinFunction, Function, FunctionBuilder};
pub use interp::{call_value, RuntimeError};
pub use modules::{import, register_module, Module};
pub use namespace::{builtin, Namespace};
pub use value::{Literal, NdArray, Value, ValueKind, ValueMap};

/// Identifier of the instruction-set revision carried in publish bundles.
pub const LANGUAGE_ID: &str = "nimbus-vm-1";
