//! Assembling and uploading an execution bundle.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_client::{Client, ClientError};
use nimbus_runtime::{Function, Value, LANGUAGE_ID};
use sha2::{Digest as _, Sha256};
use tracing::info;

use crate::bootstrap;
use crate::closure::{self, ClosureError};
use crate::schemas::{CodeBundle, EndpointResponse, WebServiceRequest, WebServiceResponse};
use crate::service::{PublishedService, ServiceSignature};
use crate::types::{PortType, ReturnSpec};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Closure(#[from] ClosureError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to archive attachments: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("failed to read attachment '{name}': {source}")]
    Attachment {
        name: String,
        source: std::io::Error,
    },
    #[error("declared type for '{0}' does not match any parameter")]
    UnknownParameter(String),
    #[error("unexpected response from the platform: {0}")]
    Response(String),
}

/// A file shipped alongside the published function, unpacked into the
/// service's working directory on the remote side.
#[derive(Debug, Clone)]
struct Attachment {
    dest_name: String,
    source: AttachmentSource,
}

#[derive(Debug, Clone)]
enum AttachmentSource {
    Memory(Vec<u8>),
    Disk(PathBuf),
}

/// Everything needed to publish one function: the function itself plus the
/// service metadata the decorators of old-style SDKs would carry.
///
/// ```no_run
/// # use std::rc::Rc;
/// # use nimbus_core::{publish, PortType, ReturnSpec, ServiceDefinition};
/// # use nimbus_runtime::{CodeBuilder, FunctionBuilder, Namespace};
/// # let ns = Namespace::new();
/// # let f = FunctionBuilder::new("ratio", CodeBuilder::new().params(["a", "b"]).finish()).bind(&ns);
/// # let client = nimbus_client::Client::new(
/// #     "https://studio.example.com/api",
/// #     nimbus_client::Credentials::new("ws", "token"),
/// # ).unwrap();
/// let service = publish(
///     &client,
///     ServiceDefinition::new(f)
///         .with_input_type("a", PortType::Number)
///         .with_input_type("b", PortType::Number)
///         .returning(ReturnSpec::Single(PortType::Number)),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct ServiceDefinition {
    function: Rc<Function>,
    name: Option<String>,
    service_id: Option<String>,
    input_name: String,
    output_name: String,
    input_types: BTreeMap<String, PortType>,
    returns: ReturnSpec,
    attachments: Vec<Attachment>,
    declared: Vec<(String, Value)>,
}

impl ServiceDefinition {
    pub fn new(function: Rc<Function>) -> ServiceDefinition {
        ServiceDefinition {
            function,
            name: None,
            service_id: None,
            input_name: "input1".to_string(),
            output_name: "output1".to_string(),
            input_types: BTreeMap::new(),
            returns: ReturnSpec::default(),
            attachments: Vec::new(),
            declared: Vec::new(),
        }
    }

    /// Friendly service name; defaults to the function name.
    pub fn with_name(mut self, name: impl Into<String>) -> ServiceDefinition {
        self.name = Some(name.into());
        self
    }

    /// Stable service id, for republishing to the same endpoint.
    pub fn with_service_id(mut self, id: impl Into<String>) -> ServiceDefinition {
        self.service_id = Some(id.into());
        self
    }

    /// Name of the input port the service expects. Defaults to `input1`.
    pub fn with_input_name(mut self, name: impl Into<String>) -> ServiceDefinition {
        self.input_name = name.into();
        self
    }

    /// Name of the output port to read results from. Defaults to `output1`.
    pub fn with_output_name(mut self, name: impl Into<String>) -> ServiceDefinition {
        self.output_name = name.into();
        self
    }

    /// Declare the wire type of one parameter. Undeclared parameters use
    /// the tagged object encoding.
    pub fn with_input_type(mut self, param: impl Into<String>, ty: PortType) -> ServiceDefinition {
        self.input_types.insert(param.into(), ty);
        self
    }

    /// Declare the result shape. Defaults to a single object-encoded value.
    pub fn returning(mut self, returns: ReturnSpec) -> ServiceDefinition {
        self.returns = returns;
        self
    }

    /// Attach in-memory file contents under `dest_name`.
    pub fn attach(mut self, dest_name: impl Into<String>, contents: Vec<u8>) -> ServiceDefinition {
        self.attachments.push(Attachment {
            dest_name: dest_name.into(),
            source: AttachmentSource::Memory(contents),
        });
        self
    }

    /// Attach a file read from disk at publish time, stored under its file
    /// name.
    pub fn attach_file(self, path: impl Into<PathBuf>) -> ServiceDefinition {
        let path = path.into();
        let dest = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.attach_file_as(path, dest)
    }

    /// Attach a file read from disk at publish time, stored under
    /// `dest_name`.
    pub fn attach_file_as(
        mut self,
        path: impl Into<PathBuf>,
        dest_name: impl Into<String>,
    ) -> ServiceDefinition {
        self.attachments.push(Attachment {
            dest_name: dest_name.into(),
            source: AttachmentSource::Disk(path.into()),
        });
        self
    }

    /// Declare an extra dependency that must travel with the function even
    /// though its instruction stream never reads it.
    pub fn with_dependency(mut self, name: impl Into<String>, value: Value) -> ServiceDefinition {
        self.declared.push((name.into(), value));
        self
    }

    /// Declared or default wire type of one parameter.
    pub fn arg_type(&self, param: &str) -> PortType {
        self.input_types
            .get(param)
            .copied()
            .unwrap_or(PortType::Object)
    }

    pub fn service_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.function.name)
    }

    /// The calling-side signature of the service being defined.
    pub fn signature(&self) -> ServiceSignature {
        ServiceSignature {
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            args: self
                .function
                .code
                .params
                .iter()
                .map(|p| (p.clone(), self.arg_type(p)))
                .collect(),
            returns: self.returns.clone(),
        }
    }

    /// Assemble the execution bundle: schemas, bootstrap source, and the
    /// optional attachment archive.
    pub fn code_bundle(&self) -> Result<CodeBundle, PublishError> {
        for declared in self.input_types.keys() {
            if !self.function.code.params.iter().any(|p| p == declared) {
                return Err(PublishError::UnknownParameter(declared.clone()));
            }
        }

        let graph = closure::capture_with(&self.function, &self.declared)?;
        let blob = graph.to_blob()?;
        let source_code = bootstrap::emit(self.service_name(), &blob);

        let input_schema = self
            .function
            .code
            .params
            .iter()
            .map(|p| (p.clone(), self.arg_type(p).descriptor()))
            .collect();
        let output_schema = self.returns.schema().into_iter().collect();

        let zip_contents = if self.attachments.is_empty() {
            None
        } else {
            Some(BASE64.encode(archive(&self.attachments)?))
        };

        Ok(CodeBundle {
            input_schema,
            output_schema,
            language: LANGUAGE_ID.to_string(),
            source_code,
            zip_contents,
        })
    }
}

fn archive(attachments: &[Attachment]) -> Result<Vec<u8>, PublishError> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    for attachment in attachments {
        let contents = match &attachment.source {
            AttachmentSource::Memory(bytes) => bytes.clone(),
            AttachmentSource::Disk(path) => {
                std::fs::read(path).map_err(|source| PublishError::Attachment {
                    name: attachment.dest_name.clone(),
                    source,
                })?
            }
        };
        writer.start_file(attachment.dest_name.as_str(), options)?;
        writer.write_all(&contents).map_err(|source| PublishError::Attachment {
            name: attachment.dest_name.clone(),
            source,
        })?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Publish a function as a web service and return a callable handle.
///
/// The bundle is PUT to the workspace's webservice collection, then the
/// default endpoint is fetched for the invocation URL and API key. Neither
/// step is retried; a failed publish surfaces the platform's error as-is.
pub fn publish(
    client: &Client,
    definition: ServiceDefinition,
) -> Result<PublishedService, PublishError> {
    let bundle = definition.code_bundle()?;
    let service_id = definition
        .service_id
        .clone()
        .unwrap_or_else(|| derive_service_id(definition.service_name(), &bundle.source_code));

    let request = WebServiceRequest {
        name: definition.service_name().to_string(),
        kind: "Code".to_string(),
        code_bundle: bundle,
    };

    let body = serde_json::to_value(&request)
        .map_err(|e| PublishError::Response(format!("failed to serialize request: {e}")))?;
    let response = client.put_webservice(&service_id, &body)?;
    let response: WebServiceResponse = serde_json::from_value(response)
        .map_err(|e| PublishError::Response(format!("webservice response: {e}")))?;

    let endpoint = client.get_webservice_endpoint(&service_id, &response.default_endpoint_name)?;
    let endpoint: EndpointResponse = serde_json::from_value(endpoint)
        .map_err(|e| PublishError::Response(format!("endpoint response: {e}")))?;

    let url = format!("{}/execute?api-version=2.0", endpoint.api_location);
    let help_url = format!("{}/score", endpoint.help_location);
    info!(service = %definition.service_name(), %service_id, %url, "published service");

    Ok(PublishedService::published(
        url,
        endpoint.primary_key,
        Some(help_url),
        Some(service_id),
        definition.signature(),
    ))
}

/// Service ids are content-derived when not declared: identical bundles
/// republish to the same endpoint, edited ones get a fresh endpoint.
fn derive_service_id(name: &str, source_code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(source_code.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
