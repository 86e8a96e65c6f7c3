//! Generated source text for the execution bundle.
//!
//! The platform stores a `SourceCode` string with every published service.
//! For this SDK that text is a small bootstrap document: a runtime header
//! line, the service name, and the closure blob as one base64 line. The
//! remote process parses the text back, checks the runtime identifier, and
//! reconstructs the published function from the embedded blob.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_runtime::{Namespace, Value, LANGUAGE_ID};

use crate::closure::{deserialize_function, ReconstructionError};

const CLOSURE_PREFIX: &str = "closure = ";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("bootstrap text is missing the runtime header")]
    MissingHeader,
    #[error("bootstrap text targets runtime '{0}', expected '{LANGUAGE_ID}'")]
    WrongRuntime(String),
    #[error("bootstrap text has no closure line")]
    MissingClosure,
    #[error("closure line is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

/// Render the bootstrap text for a service.
pub fn emit(service_name: &str, blob: &[u8]) -> String {
    let mut source = String::new();
    source.push_str(&format!("#!{LANGUAGE_ID}\n"));
    source.push_str(&format!("# service: {service_name}\n"));
    source.push_str(CLOSURE_PREFIX);
    source.push_str(&BASE64.encode(blob));
    source.push('\n');
    source
}

/// Extract the closure blob embedded in bootstrap text.
pub fn extract_blob(source: &str) -> Result<Vec<u8>, BootstrapError> {
    let mut lines = source.lines();
    let header = lines.next().ok_or(BootstrapError::MissingHeader)?;
    let runtime = header
        .strip_prefix("#!")
        .ok_or(BootstrapError::MissingHeader)?;
    if runtime != LANGUAGE_ID {
        return Err(BootstrapError::WrongRuntime(runtime.to_string()));
    }

    let encoded = lines
        .find_map(|line| line.strip_prefix(CLOSURE_PREFIX))
        .ok_or(BootstrapError::MissingClosure)?;
    Ok(BASE64.decode(encoded.trim())?)
}

/// Parse bootstrap text and rebuild the published function into
/// `namespace`. This is the entry point the remote execution side uses.
pub fn load(source: &str, namespace: &Namespace) -> Result<Value, BootstrapError> {
    let blob = extract_blob(source)?;
    Ok(deserialize_function(&blob, namespace)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_runtime::{call_value, CodeBuilder, FunctionBuilder, Literal};

    #[test]
    fn emit_and_extract_round_trip() {
        let blob = vec![1u8, 2, 3, 250];
        let source = emit("my_service", &blob);
        assert!(source.starts_with("#!nimbus-vm-1\n"));
        assert_eq!(extract_blob(&source).unwrap(), blob);
    }

    #[test]
    fn load_rebuilds_a_callable() {
        let ns = Namespace::new();
        let mut b = CodeBuilder::new();
        b.load_const(Literal::Int(31));
        b.ret();
        let f = FunctionBuilder::new("f", b.finish()).bind(&ns);
        let blob = crate::closure::serialize_function(&f).unwrap();

        let source = emit("f", &blob);
        let rebuilt = load(&source, &Namespace::new()).unwrap();
        assert_eq!(call_value(&rebuilt, vec![]).unwrap(), Value::Int(31));
    }

    #[test]
    fn foreign_runtime_header_is_rejected() {
        let source = "#!python-2.7-64\nclosure = AAAA\n";
        assert!(matches!(
            extract_blob(source),
            Err(BootstrapError::WrongRuntime(r)) if r == "python-2.7-64"
        ));
        assert!(matches!(
            extract_blob("no header"),
            Err(BootstrapError::MissingHeader)
        ));
        assert!(matches!(
            extract_blob("#!nimbus-vm-1\n# nothing else\n"),
            Err(BootstrapError::MissingClosure)
        ));
    }
}
