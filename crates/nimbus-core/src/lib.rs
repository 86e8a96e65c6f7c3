//! Core of the Nimbus Studio SDK: publishing executable functions to the
//! platform and invoking them remotely.
//!
//! Publishing starts from a [`nimbus_runtime::Function`] and walks its
//! instruction stream to capture every function, class, and module it
//! depends on ([`closure`]). The captured graph is serialized into an
//! opaque blob, embedded into a generated source bundle ([`publish`],
//! [`bootstrap`]), and uploaded. At execution time the remote process
//! rebuilds the callables from the blob alone ([`closure::ClosureGraph::reconstruct`]).
//!
//! Per-call arguments and results travel through a self-describing tagged
//! encoding ([`codec`]) carried inside the platform's tabular invocation
//! documents ([`service`], [`schemas`]).

pub mod bootstrap;
pub mod closure;
pub mod codec;
pub mod publish;
pub mod schemas;
pub mod service;
pub mod types;

pub use closure::{deserialize_function, serialize_function, ClosureError, ReconstructionError};
pub use codec::{CodecError, ValueCodec};
pub use publish::{publish, PublishError, ServiceDefinition};
pub use service::{PublishedService, ServiceError, ServiceSignature};
pub use types::{PortType, ReturnSpec};
