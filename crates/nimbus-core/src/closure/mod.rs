//! Closure capture and reconstruction.
//!
//! Publishing a function means shipping everything it transitively needs:
//! other functions it calls, classes it instantiates, modules it reads,
//! and plain data globals. Capture runs breadth-first from the published
//! function, using [`walker`] to find the global names each function
//! actually reads and classifying each one in the function's defining
//! namespace. The result is an ordered [`ClosureGraph`] whose first node is
//! always the published function; that ordering is what lets the
//! reconstruction side know which rebuilt object to hand back.
//!
//! Reconstruction binds nodes into a caller-supplied namespace in stored
//! order. Because globals resolve at call time, a function never needs its
//! dependencies to exist at bind time; mutually recursive functions simply
//! get bound one after the other. Alias bindings (two names for one
//! function) are applied after the node loop, so they may point forward.
//!
//! The wire form is an opaque blob: a magic/version header, a SHA-256
//! digest of the payload, and the bincode-encoded graph. The digest turns
//! corruption and truncation into a clean error instead of a confusing
//! decode failure.

pub mod walker;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use bincode::{Decode, Encode};
use nimbus_runtime::{
    import, ClassObj, Code, Function, FunctionBuilder, Literal, Namespace, Value,
};
use sha2::{Digest as _, Sha256};
use tracing::debug;

const BLOB_MAGIC: &[u8; 4] = b"NMCG";
const BLOB_VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;

/// A dependency that cannot travel with a published function.
#[derive(Debug, thiserror::Error)]
pub enum ClosureError {
    /// The named dependency has no portable representation. Covers foreign
    /// classes, builtins read through bindings, instances, and anything
    /// else outside the literal subset.
    #[error("unsupported closure dependency '{name}': {kind}")]
    UnsupportedDependency { name: String, kind: String },
    #[error("invalid instruction stream in '{function}': {source}")]
    InvalidCode {
        function: String,
        source: walker::WalkError,
    },
    #[error("failed to encode closure graph: {0}")]
    Encode(String),
}

/// The blob cannot be turned back into callables: version skew, corruption,
/// or a graph that references something the runtime does not have.
#[derive(Debug, thiserror::Error)]
pub enum ReconstructionError {
    #[error("closure blob is not in the expected format")]
    BadMagic,
    #[error("unsupported closure blob version {0}")]
    UnsupportedVersion(u8),
    #[error("closure blob digest mismatch (corrupt or truncated blob)")]
    DigestMismatch,
    #[error("failed to decode closure graph: {0}")]
    Decode(String),
    #[error("closure graph contains no nodes")]
    EmptyGraph,
    #[error("module '{0}' is not registered with the runtime")]
    ModuleNotFound(String),
    #[error("base class '{base}' of '{class}' is missing from the namespace")]
    MissingBaseClass { class: String, base: String },
    #[error("alias target '{0}' is missing from the namespace")]
    MissingAliasTarget(String),
}

/// One entry of a serialized closure graph.
#[derive(Debug, Clone, Encode, Decode)]
pub enum Node {
    Function(FunctionNode),
    Module(ModuleNode),
    Class(ClassNode),
}

/// A serialized function: its code, defaults, captured cells, the literal
/// global bindings it needs at reconstruction time, and the alias bindings
/// discovered while walking it.
#[derive(Debug, Clone, Encode, Decode)]
pub struct FunctionNode {
    pub name: String,
    pub module: String,
    pub code: Code,
    pub defaults: Vec<Literal>,
    pub captured: Vec<Literal>,
    pub globals: Vec<(String, Literal)>,
    /// (alias name, canonical node name): a second name bound to a function
    /// that is already a node, recorded instead of re-serializing the body.
    pub aliases: Vec<(String, String)>,
}

/// A module dependency: the binding name in the namespace and the
/// importable name to resolve at reconstruction time. No payload beyond
/// the names.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ModuleNode {
    pub binding: String,
    pub target: String,
}

/// A class defined in the published function's own module, flattened to
/// (name, bases, members). Base classes are emitted as earlier nodes and
/// referenced here by name.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ClassNode {
    pub name: String,
    pub module: String,
    pub bases: Vec<String>,
    pub members: Vec<(String, Member)>,
}

/// A recursively serialized class member.
#[derive(Debug, Clone, Encode, Decode)]
pub enum Member {
    Function(FunctionNode),
    Value(Literal),
}

/// An ordered, portable dependency closure. Discovery order is
/// breadth-first from the published function, which is always node zero.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ClosureGraph {
    pub nodes: Vec<Node>,
}

/// Capture the dependency closure of `function`.
pub fn capture(function: &Rc<Function>) -> Result<ClosureGraph, ClosureError> {
    capture_with(function, &[])
}

/// Capture the dependency closure of `function`, seeding the traversal
/// with explicitly declared extra dependencies. Declared entries must be
/// functions, classes, or modules; they travel even when the instruction
/// stream never mentions them.
pub fn capture_with(
    function: &Rc<Function>,
    declared: &[(String, Value)],
) -> Result<ClosureGraph, ClosureError> {
    let mut capture = Capture {
        origin_module: function.module.clone(),
        queue: VecDeque::new(),
        visited: HashSet::new(),
        canonical: HashMap::new(),
        emitted_classes: HashSet::new(),
        nodes: Vec::new(),
    };

    let mut seed_aliases = Vec::new();
    capture.reference(
        &mut seed_aliases,
        function.name.clone(),
        Value::Function(function.clone()),
    );
    for (name, value) in declared {
        match value {
            Value::Function(_) | Value::Class(_) | Value::Module(_) => {
                capture.reference(&mut seed_aliases, name.clone(), value.clone());
            }
            other => {
                return Err(ClosureError::UnsupportedDependency {
                    name: name.clone(),
                    kind: format!("declared dependencies must be functions, classes, or modules, not {}", other.kind()),
                })
            }
        }
    }

    while let Some((name, value)) = capture.queue.pop_front() {
        match value {
            Value::Function(f) => {
                let node = capture.function_node(&name, &f)?;
                capture.nodes.push(Node::Function(node));
            }
            Value::Module(m) => {
                capture.nodes.push(Node::Module(ModuleNode {
                    binding: name,
                    target: m.name.clone(),
                }));
            }
            Value::Class(c) => capture.emit_class(&name, &c)?,
            _ => unreachable!("only functions, modules, and classes are enqueued"),
        }
    }

    let mut nodes = capture.nodes;
    if !seed_aliases.is_empty() {
        if let Some(Node::Function(entry)) = nodes.first_mut() {
            entry.aliases.extend(seed_aliases);
        }
    }

    debug!(function = %function.name, nodes = nodes.len(), "captured closure graph");
    Ok(ClosureGraph { nodes })
}

struct Capture {
    origin_module: String,
    queue: VecDeque<(String, Value)>,
    /// (binding name, object identity) pairs already handled; guarantees
    /// termination on cyclic graphs.
    visited: HashSet<(String, usize)>,
    /// Object identity of an already-queued dependency to the first name it
    /// was queued under; second names become aliases.
    canonical: HashMap<usize, String>,
    emitted_classes: HashSet<usize>,
    nodes: Vec<Node>,
}

fn identity(value: &Value) -> usize {
    match value {
        Value::Function(f) => Rc::as_ptr(f) as usize,
        Value::Class(c) => Rc::as_ptr(c) as usize,
        Value::Module(m) => Rc::as_ptr(m) as usize,
        _ => 0,
    }
}

impl Capture {
    /// Record a discovered dependency: enqueue it when unseen, alias it when
    /// its object is already queued under another name, skip it otherwise.
    fn reference(&mut self, aliases: &mut Vec<(String, String)>, name: String, value: Value) {
        let ptr = identity(&value);
        if !self.visited.insert((name.clone(), ptr)) {
            return;
        }
        if let Some(canonical) = self.canonical.get(&ptr) {
            aliases.push((name, canonical.clone()));
            return;
        }
        self.canonical.insert(ptr, name.clone());
        self.queue.push_back((name, value));
    }

    fn function_node(
        &mut self,
        binding: &str,
        function: &Rc<Function>,
    ) -> Result<FunctionNode, ClosureError> {
        let code = (*function.code).clone();
        let reads = walker::global_reads(&code).map_err(|source| ClosureError::InvalidCode {
            function: binding.to_string(),
            source,
        })?;

        let mut globals = Vec::new();
        let mut aliases = Vec::new();

        for name in reads {
            // Unbound names stay unbound: they may be built-ins, or bindings
            // the function only uses on paths that never run remotely.
            // Resolution happens at call time either way.
            let Some(value) = function.globals.get(&name) else {
                continue;
            };

            match &value {
                Value::Function(_) | Value::Module(_) => {
                    self.reference(&mut aliases, name, value.clone());
                }
                Value::Class(class) => {
                    if class.module != self.origin_module {
                        return Err(ClosureError::UnsupportedDependency {
                            name,
                            kind: format!(
                                "class defined outside the originating module (in '{}')",
                                class.module
                            ),
                        });
                    }
                    self.reference(&mut aliases, name, value.clone());
                }
                other => match other.to_literal() {
                    Some(literal) => globals.push((name, literal)),
                    None => {
                        return Err(ClosureError::UnsupportedDependency {
                            name,
                            kind: format!("{} values are not embeddable", other.kind()),
                        })
                    }
                },
            }
        }

        Ok(FunctionNode {
            name: binding.to_string(),
            module: function.module.clone(),
            code,
            defaults: embeddable(binding, &function.defaults)?,
            captured: embeddable(binding, &function.captured)?,
            globals,
            aliases,
        })
    }

    /// Emit a class node, emitting any not-yet-emitted base classes first so
    /// that reconstruction can resolve bases in stored order.
    fn emit_class(&mut self, binding: &str, class: &Rc<ClassObj>) -> Result<(), ClosureError> {
        let ptr = Rc::as_ptr(class) as usize;
        if !self.emitted_classes.insert(ptr) {
            return Ok(());
        }

        for base in &class.bases {
            if base.module != self.origin_module {
                return Err(ClosureError::UnsupportedDependency {
                    name: base.name.clone(),
                    kind: format!(
                        "base class defined outside the originating module (in '{}')",
                        base.module
                    ),
                });
            }
            let base_ptr = Rc::as_ptr(base) as usize;
            let base_name = base.name.clone();
            self.visited.insert((base_name.clone(), base_ptr));
            self.canonical
                .entry(base_ptr)
                .or_insert_with(|| base_name.clone());
            self.emit_class(&base_name, base)?;
        }

        let mut members = Vec::new();
        for (name, value) in &class.members {
            match value {
                Value::Function(f) => {
                    members.push((name.clone(), Member::Function(self.function_node(name, f)?)));
                }
                other => match other.to_literal() {
                    Some(literal) => members.push((name.clone(), Member::Value(literal))),
                    None => {
                        return Err(ClosureError::UnsupportedDependency {
                            name: format!("{}.{}", class.name, name),
                            kind: format!("{} members are not embeddable", other.kind()),
                        })
                    }
                },
            }
        }

        self.nodes.push(Node::Class(ClassNode {
            name: binding.to_string(),
            module: class.module.clone(),
            bases: class.bases.iter().map(|b| b.name.clone()).collect(),
            members,
        }));
        Ok(())
    }
}

fn embeddable(owner: &str, values: &[Value]) -> Result<Vec<Literal>, ClosureError> {
    values
        .iter()
        .map(|value| {
            value
                .to_literal()
                .ok_or_else(|| ClosureError::UnsupportedDependency {
                    name: owner.to_string(),
                    kind: format!("{} values are not embeddable", value.kind()),
                })
        })
        .collect()
}

impl ClosureGraph {
    /// Serialize to the opaque blob format.
    pub fn to_blob(&self) -> Result<Vec<u8>, ClosureError> {
        let payload = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ClosureError::Encode(e.to_string()))?;
        let mut blob = Vec::with_capacity(5 + DIGEST_LEN + payload.len());
        blob.extend_from_slice(BLOB_MAGIC);
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&Sha256::digest(&payload));
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    /// Parse a blob produced by [`ClosureGraph::to_blob`], verifying the
    /// header and payload digest before decoding anything.
    pub fn from_blob(blob: &[u8]) -> Result<ClosureGraph, ReconstructionError> {
        if blob.len() < 5 + DIGEST_LEN || &blob[..4] != BLOB_MAGIC {
            return Err(ReconstructionError::BadMagic);
        }
        if blob[4] != BLOB_VERSION {
            return Err(ReconstructionError::UnsupportedVersion(blob[4]));
        }
        let digest = &blob[5..5 + DIGEST_LEN];
        let payload = &blob[5 + DIGEST_LEN..];
        if Sha256::digest(payload).as_slice() != digest {
            return Err(ReconstructionError::DigestMismatch);
        }

        let (graph, read) = bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| ReconstructionError::Decode(e.to_string()))?;
        if read != payload.len() {
            return Err(ReconstructionError::Decode(
                "trailing bytes after graph".to_string(),
            ));
        }
        Ok(graph)
    }

    /// Rebuild callables into `namespace` and return the object built from
    /// the first node: the published function.
    ///
    /// The namespace is mutated in place; reconstructing two graphs into
    /// the same namespace concurrently is unsupported.
    pub fn reconstruct(&self, namespace: &Namespace) -> Result<Value, ReconstructionError> {
        let mut first = None;
        let mut aliases: Vec<(String, String)> = Vec::new();

        for node in &self.nodes {
            let (name, value) = match node {
                Node::Function(f) => {
                    aliases.extend(f.aliases.iter().cloned());
                    (f.name.clone(), build_function(f, namespace))
                }
                Node::Module(m) => {
                    let module = import(&m.target)
                        .ok_or_else(|| ReconstructionError::ModuleNotFound(m.target.clone()))?;
                    (m.binding.clone(), Value::Module(module))
                }
                Node::Class(c) => (c.name.clone(), build_class(c, namespace, &mut aliases)?),
            };
            namespace.set(&name, value.clone());
            if first.is_none() {
                first = Some(value);
            }
        }

        for (alias, canonical) in aliases {
            let target = namespace
                .get(&canonical)
                .ok_or(ReconstructionError::MissingAliasTarget(canonical))?;
            namespace.set(&alias, target);
        }

        debug!(nodes = self.nodes.len(), "reconstructed closure graph");
        first.ok_or(ReconstructionError::EmptyGraph)
    }
}

fn build_function(node: &FunctionNode, namespace: &Namespace) -> Value {
    for (name, literal) in &node.globals {
        namespace.set(name, Value::from_literal(literal));
    }
    let function = FunctionBuilder::new(node.name.clone(), node.code.clone())
        .in_module(node.module.clone())
        .defaults(node.defaults.iter().map(Value::from_literal).collect())
        .captured(node.captured.iter().map(Value::from_literal).collect())
        .globals(namespace)
        .build();
    Value::Function(function)
}

fn build_class(
    node: &ClassNode,
    namespace: &Namespace,
    aliases: &mut Vec<(String, String)>,
) -> Result<Value, ReconstructionError> {
    let mut members = BTreeMap::new();

    // Function members first, then plain values.
    for (name, member) in &node.members {
        if let Member::Function(f) = member {
            aliases.extend(f.aliases.iter().cloned());
            members.insert(name.clone(), build_function(f, namespace));
        }
    }
    for (name, member) in &node.members {
        if let Member::Value(literal) = member {
            members.insert(name.clone(), Value::from_literal(literal));
        }
    }

    let mut bases = Vec::new();
    for base in &node.bases {
        match namespace.get(base) {
            Some(Value::Class(class)) => bases.push(class),
            _ => {
                return Err(ReconstructionError::MissingBaseClass {
                    class: node.name.clone(),
                    base: base.clone(),
                })
            }
        }
    }

    Ok(Value::Class(Rc::new(ClassObj {
        name: node.name.clone(),
        module: node.module.clone(),
        bases,
        members,
    })))
}

/// Capture `function` and serialize the graph in one step.
pub fn serialize_function(function: &Rc<Function>) -> Result<Vec<u8>, ClosureError> {
    capture(function)?.to_blob()
}

/// Parse a blob and rebuild the published function into `namespace`.
pub fn deserialize_function(
    blob: &[u8],
    namespace: &Namespace,
) -> Result<Value, ReconstructionError> {
    ClosureGraph::from_blob(blob)?.reconstruct(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_runtime::{call_value, CodeBuilder, Op};

    fn constant_fn(ns: &Namespace, name: &str, value: i64) -> Rc<Function> {
        let mut b = CodeBuilder::new();
        b.load_const(Literal::Int(value));
        b.ret();
        FunctionBuilder::new(name, b.finish()).bind(ns)
    }

    fn pair_fn(ns: &Namespace, name: &str, first: i64, other: &str) -> Rc<Function> {
        let mut b = CodeBuilder::new();
        b.load_const(Literal::Int(first));
        b.load_global(other);
        b.emit(Op::MakeTuple, &[2]);
        b.ret();
        FunctionBuilder::new(name, b.finish()).bind(ns)
    }

    fn untuple(value: Value) -> Vec<Value> {
        match value {
            Value::Tuple(items) => items.to_vec(),
            other => panic!("expected a tuple, got {other:?}"),
        }
    }

    #[test]
    fn dependency_free_function_round_trips() {
        let ns = Namespace::new();
        let mut b = CodeBuilder::new().params(["a", "b"]);
        b.load_local(0);
        b.load_local(1);
        b.emit(Op::Add, &[]);
        b.ret();
        let f = FunctionBuilder::new("add", b.finish()).bind(&ns);

        let blob = serialize_function(&f).unwrap();
        let fresh = Namespace::new();
        let rebuilt = deserialize_function(&blob, &fresh).unwrap();

        for (a, b) in [(1i64, 2i64), (10, -3), (0, 0)] {
            let args = vec![Value::Int(a), Value::Int(b)];
            assert_eq!(
                call_value(&rebuilt, args.clone()).unwrap(),
                call_value(&Value::Function(f.clone()), args).unwrap()
            );
        }
    }

    #[test]
    fn published_function_is_always_the_first_node() {
        let ns = Namespace::new();
        constant_fn(&ns, "helper", 1);
        let mut b = CodeBuilder::new();
        b.load_global("helper");
        b.call(0);
        b.ret();
        let f = FunctionBuilder::new("entry", b.finish()).bind(&ns);

        let graph = capture(&f).unwrap();
        match &graph.nodes[0] {
            Node::Function(node) => assert_eq!(node.name, "entry"),
            other => panic!("expected a function node first, got {other:?}"),
        }
    }

    #[test]
    fn mutually_recursive_functions_survive_round_trip() {
        let ns = Namespace::new();
        let f = pair_fn(&ns, "ping", 42, "pong");
        pair_fn(&ns, "pong", 100, "ping");

        let blob = serialize_function(&f).unwrap();
        let fresh = Namespace::new();
        let rebuilt = deserialize_function(&blob, &fresh).unwrap();

        let first = untuple(call_value(&rebuilt, vec![]).unwrap());
        assert_eq!(first[0], Value::Int(42));

        let second = untuple(call_value(&first[1], vec![]).unwrap());
        assert_eq!(second[0], Value::Int(100));

        // And back again: both names stay mutually callable.
        let third = untuple(call_value(&second[1], vec![]).unwrap());
        assert_eq!(third[0], Value::Int(42));
    }

    #[test]
    fn aliases_reuse_the_queued_node() {
        let ns = Namespace::new();
        let f = constant_fn(&ns, "base_fn", 21);
        ns.set("alias", Value::Function(f));

        let mut b = CodeBuilder::new();
        b.load_global("base_fn");
        b.call(0);
        b.load_global("alias");
        b.call(0);
        b.emit(Op::Add, &[]);
        b.ret();
        let h = FunctionBuilder::new("uses_both", b.finish()).bind(&ns);

        let graph = capture(&h).unwrap();
        let functions = graph
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Function(_)))
            .count();
        assert_eq!(functions, 2);

        let fresh = Namespace::new();
        let rebuilt = graph.reconstruct(&fresh).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::Int(42));
        assert_eq!(fresh.get("alias").unwrap(), fresh.get("base_fn").unwrap());
    }

    #[test]
    fn module_attribute_reads_reproduce_after_reimport() {
        let ns = Namespace::new();
        ns.set("platform", Value::Module(import("platform").unwrap()));

        let mut b = CodeBuilder::new();
        b.load_global("platform");
        b.load_attr("version");
        b.ret();
        let f = FunctionBuilder::new("runtime_version", b.finish()).bind(&ns);

        let expected = call_value(&Value::Function(f.clone()), vec![]).unwrap();

        let blob = serialize_function(&f).unwrap();
        let fresh = Namespace::new();
        let rebuilt = deserialize_function(&blob, &fresh).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), expected);
    }

    #[test]
    fn unregistered_module_fails_reconstruction() {
        let graph = ClosureGraph {
            nodes: vec![Node::Module(ModuleNode {
                binding: "gone".to_string(),
                target: "never_registered".to_string(),
            })],
        };
        let err = graph.reconstruct(&Namespace::new()).unwrap_err();
        assert!(matches!(err, ReconstructionError::ModuleNotFound(name) if name == "never_registered"));
    }

    #[test]
    fn plain_data_globals_are_embedded() {
        let ns = Namespace::new();
        ns.set("threshold", Value::Int(200));

        let mut b = CodeBuilder::new();
        b.load_global("threshold");
        b.ret();
        let f = FunctionBuilder::new("reads_global", b.finish()).bind(&ns);

        let blob = serialize_function(&f).unwrap();
        let fresh = Namespace::new();
        let rebuilt = deserialize_function(&blob, &fresh).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::Int(200));
        assert_eq!(fresh.get("threshold"), Some(Value::Int(200)));
    }

    #[test]
    fn captured_cells_travel_with_the_function() {
        let mut b = CodeBuilder::new();
        b.load_capture(0);
        b.ret();
        let f = FunctionBuilder::new("cell", b.finish())
            .captured(vec![Value::string("held")])
            .build();

        let blob = serialize_function(&f).unwrap();
        let rebuilt = deserialize_function(&blob, &Namespace::new()).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::string("held"));
    }

    #[test]
    fn class_from_another_module_is_unsupported() {
        let ns = Namespace::new();
        let foreign = Rc::new(ClassObj {
            name: "Widget".to_string(),
            module: "vendor".to_string(),
            bases: Vec::new(),
            members: BTreeMap::new(),
        });
        ns.set("Widget", Value::Class(foreign));

        let mut b = CodeBuilder::new();
        b.load_global("Widget");
        b.call(0);
        b.ret();
        let f = FunctionBuilder::new("make_widget", b.finish()).bind(&ns);

        let err = serialize_function(&f).unwrap_err();
        assert!(matches!(
            err,
            ClosureError::UnsupportedDependency { name, .. } if name == "Widget"
        ));
    }

    #[test]
    fn unembeddable_globals_are_unsupported() {
        let ns = Namespace::new();
        let instance = {
            let class = Rc::new(ClassObj {
                name: "Held".to_string(),
                module: "main".to_string(),
                bases: Vec::new(),
                members: BTreeMap::new(),
            });
            Value::Instance(Rc::new(nimbus_runtime::Instance::new(class)))
        };
        ns.set("held", instance);

        let mut b = CodeBuilder::new();
        b.load_global("held");
        b.ret();
        let f = FunctionBuilder::new("reads_held", b.finish()).bind(&ns);

        let err = serialize_function(&f).unwrap_err();
        assert!(matches!(err, ClosureError::UnsupportedDependency { name, .. } if name == "held"));
    }

    #[test]
    fn classes_rebuild_with_bases_and_methods() {
        let ns = Namespace::new();

        let mut base_members = BTreeMap::new();
        base_members.insert("tag".to_string(), Value::Int(7));
        let base = Rc::new(ClassObj {
            name: "Base".to_string(),
            module: "main".to_string(),
            bases: Vec::new(),
            members: base_members,
        });

        let mut m = CodeBuilder::new().params(["self"]);
        m.load_local(0);
        m.load_attr("tag");
        m.ret();
        let get_tag = FunctionBuilder::new("get_tag", m.finish())
            .globals(&ns)
            .build();

        let mut derived_members = BTreeMap::new();
        derived_members.insert("get_tag".to_string(), Value::Function(get_tag));
        let derived = Rc::new(ClassObj {
            name: "Derived".to_string(),
            module: "main".to_string(),
            bases: vec![base.clone()],
            members: derived_members,
        });

        ns.set("Base", Value::Class(base));
        ns.set("Derived", Value::Class(derived));

        let mut b = CodeBuilder::new();
        b.load_global("Derived");
        b.call(0);
        b.load_attr("get_tag");
        b.call(0);
        b.ret();
        let f = FunctionBuilder::new("tag_of_new", b.finish()).bind(&ns);

        assert_eq!(
            call_value(&Value::Function(f.clone()), vec![]).unwrap(),
            Value::Int(7)
        );

        let graph = capture(&f).unwrap();
        let class_names: Vec<_> = graph
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Class(c) => Some(c.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(class_names, vec!["Base", "Derived"]);

        let blob = graph.to_blob().unwrap();
        let fresh = Namespace::new();
        let rebuilt = deserialize_function(&blob, &fresh).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::Int(7));
    }

    #[test]
    fn missing_base_class_fails_reconstruction() {
        let graph = ClosureGraph {
            nodes: vec![Node::Class(ClassNode {
                name: "Orphan".to_string(),
                module: "main".to_string(),
                bases: vec!["Gone".to_string()],
                members: Vec::new(),
            })],
        };
        let err = graph.reconstruct(&Namespace::new()).unwrap_err();
        assert!(matches!(
            err,
            ReconstructionError::MissingBaseClass { class, base }
                if class == "Orphan" && base == "Gone"
        ));
    }

    #[test]
    fn shared_dependency_is_serialized_once() {
        let ns = Namespace::new();
        constant_fn(&ns, "shared", 3);

        for name in ["left", "right"] {
            let mut b = CodeBuilder::new();
            b.load_global("shared");
            b.call(0);
            b.ret();
            FunctionBuilder::new(name, b.finish()).bind(&ns);
        }

        let mut b = CodeBuilder::new();
        b.load_global("left");
        b.call(0);
        b.load_global("right");
        b.call(0);
        b.emit(Op::Add, &[]);
        b.ret();
        let entry = FunctionBuilder::new("entry", b.finish()).bind(&ns);

        let graph = capture(&entry).unwrap();
        assert_eq!(graph.nodes.len(), 4);

        let rebuilt = graph.reconstruct(&Namespace::new()).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::Int(6));
    }

    #[test]
    fn declared_dependencies_travel_without_instruction_reads() {
        let ns = Namespace::new();
        let helper = constant_fn(&ns, "helper", 5);
        let entry = constant_fn(&ns, "entry", 1);

        let graph =
            capture_with(&entry, &[("helper".to_string(), Value::Function(helper))]).unwrap();
        assert_eq!(graph.nodes.len(), 2);

        let fresh = Namespace::new();
        graph.reconstruct(&fresh).unwrap();
        let helper = fresh.get("helper").expect("declared dependency bound");
        assert_eq!(call_value(&helper, vec![]).unwrap(), Value::Int(5));
    }

    #[test]
    fn unembeddable_defaults_are_unsupported() {
        let ns = Namespace::new();
        let other = constant_fn(&ns, "other", 0);
        let mut b = CodeBuilder::new().params(["x"]);
        b.load_local(0);
        b.ret();
        let f = FunctionBuilder::new("has_fn_default", b.finish())
            .defaults(vec![Value::Function(other)])
            .bind(&ns);

        assert!(matches!(
            serialize_function(&f),
            Err(ClosureError::UnsupportedDependency { .. })
        ));
    }

    #[test]
    fn corrupted_blobs_are_rejected() {
        let ns = Namespace::new();
        let f = constant_fn(&ns, "f", 1);
        let blob = serialize_function(&f).unwrap();

        let mut flipped = blob.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert!(matches!(
            ClosureGraph::from_blob(&flipped),
            Err(ReconstructionError::DigestMismatch)
        ));

        let mut wrong_version = blob.clone();
        wrong_version[4] = 99;
        assert!(matches!(
            ClosureGraph::from_blob(&wrong_version),
            Err(ReconstructionError::UnsupportedVersion(99))
        ));

        assert!(matches!(
            ClosureGraph::from_blob(b"junk"),
            Err(ReconstructionError::BadMagic)
        ));
    }

    #[test]
    fn empty_graph_fails_reconstruction() {
        let blob = ClosureGraph { nodes: Vec::new() }.to_blob().unwrap();
        assert!(matches!(
            deserialize_function(&blob, &Namespace::new()),
            Err(ReconstructionError::EmptyGraph)
        ));
    }

    #[test]
    fn blob_is_stable_for_identical_input() {
        let ns = Namespace::new();
        let f = constant_fn(&ns, "f", 9);
        assert_eq!(serialize_function(&f).unwrap(), serialize_function(&f).unwrap());
    }
}
