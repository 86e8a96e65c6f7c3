#![deny(missing_docs)]

//! # Nimbus Studio SDK
//!
//! This crate lets you publish executable functions to the Nimbus Studio
//! platform and call them as web services.
//!
//! Features:
//! - Automatic dependency capture from a function's instruction stream
//! - Portable closure serialization and remote reconstruction
//! - Self-describing typed argument encoding
//! - Single and batched remote invocation
//!
//! ## Components overview
//!
//! The SDK is composed of three crates:
//! - `core`: dependency capture, the closure blob, the value codec, and
//!   the publish/invoke flows. Start here.
//! - `runtime`: the executable-function substrate (code objects,
//!   namespaces, modules, the evaluator). The remote execution side runs
//!   on this crate alone plus the blob.
//! - `client`: the thin HTTP layer for the platform's REST API.
//!
//! ## Example
//! ```no_run
//! use nimbus::runtime::{CodeBuilder, FunctionBuilder, Namespace, Op, Value};
//! use nimbus::{publish, PortType, ReturnSpec, ServiceDefinition};
//!
//! let ns = Namespace::new();
//! let mut b = CodeBuilder::new().params(["a", "b"]);
//! b.load_local(0);
//! b.load_local(1);
//! b.emit(Op::Add, &[]);
//! b.ret();
//! let add = FunctionBuilder::new("add", b.finish()).bind(&ns);
//!
//! let client = nimbus::client::Client::new(
//!     "https://studio.example.com/api",
//!     nimbus::client::Credentials::new("workspace-id", "token"),
//! )
//! .unwrap();
//!
//! let service = publish(
//!     &client,
//!     ServiceDefinition::new(add)
//!         .with_input_type("a", PortType::Integer)
//!         .with_input_type("b", PortType::Integer)
//!         .returning(ReturnSpec::Single(PortType::Integer)),
//! )
//! .unwrap();
//!
//! let sum = service.call(&[Value::Int(2), Value::Int(3)]).unwrap();
//! assert_eq!(sum, Value::Int(5));
//! ```

pub use nimbus_core::*;

/// The thin HTTP layer for the platform's REST API.
#[doc(inline)]
pub use nimbus_client as client;

/// The executable-function substrate the published closures run on.
#[doc(inline)]
pub use nimbus_runtime as runtime;
