//! HTTP plumbing for the Nimbus Studio web service API.
//!
//! This crate is deliberately thin: endpoint URLs, bearer authentication,
//! JSON bodies, and the mapping from error responses to typed errors.
//! Nothing here retries, times out, or interprets payloads; callers wrap
//! calls with their own policy and the core crate owns the schemas.

use reqwest::blocking::{Client as HttpClient, Response};
use serde::Deserialize;
use serde_json::Value as Document;
use tracing::debug;
use url::Url;

/// Workspace identity and authorization token, passed by the caller.
/// Acquiring or refreshing tokens is out of scope.
#[derive(Debug, Clone)]
pub struct Credentials {
    workspace_id: String,
    token: String,
}

impl Credentials {
    pub fn new(workspace_id: impl Into<String>, token: impl Into<String>) -> Credentials {
        Credentials {
            workspace_id: workspace_id.into(),
            token: token.into(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    /// Transport-level failure from the underlying HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The platform rejected the credentials.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// The published function raised inside the remote execution framework.
    #[error("remote execution failed: {message}")]
    Execution { message: String },
    /// Any other non-2xx response, carried verbatim for diagnosis.
    #[error("remote call failed with HTTP {status}: {body}")]
    Remote { status: u16, body: String },
}

/// Blocking client for one workspace.
#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    endpoint: Url,
    credentials: Credentials,
}

impl Client {
    /// Create a client against a management endpoint,
    /// e.g. `https://studio.example.com/api`.
    pub fn new(endpoint: impl AsRef<str>, credentials: Credentials) -> Result<Client, ClientError> {
        let endpoint = endpoint
            .as_ref()
            .parse::<Url>()
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        Ok(Client {
            http: HttpClient::new(),
            endpoint,
            credentials,
        })
    }

    pub fn workspace_id(&self) -> &str {
        self.credentials.workspace_id()
    }

    /// URL of one webservice resource in this workspace.
    pub fn webservice_url(&self, service_id: &str) -> String {
        format!(
            "{}/workspaces/{}/webservices/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.credentials.workspace_id(),
            service_id
        )
    }

    /// Create or replace a webservice definition.
    pub fn put_webservice(
        &self,
        service_id: &str,
        body: &Document,
    ) -> Result<Document, ClientError> {
        let url = self.webservice_url(service_id);
        debug!(%url, "uploading webservice definition");
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.credentials.token)
            .json(body)
            .send()?;
        read_json(response)
    }

    /// Fetch one named endpoint of a webservice.
    pub fn get_webservice_endpoint(
        &self,
        service_id: &str,
        endpoint_name: &str,
    ) -> Result<Document, ClientError> {
        let url = format!(
            "{}/endpoints/{}",
            self.webservice_url(service_id),
            endpoint_name
        );
        debug!(%url, "fetching webservice endpoint");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.credentials.token)
            .send()?;
        read_json(response)
    }
}

/// POST an invocation body to an execution URL with its API key. Execution
/// URLs are absolute and carry their own key, so this does not need a
/// workspace [`Client`].
pub fn execute_request(
    http: &HttpClient,
    url: &str,
    api_key: &str,
    body: &Document,
) -> Result<Document, ClientError> {
    let response = http.post(url).bearer_auth(api_key).json(body).send()?;
    read_json(response)
}

fn read_json(response: Response) -> Result<Document, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json()?);
    }
    let body = response.text().unwrap_or_default();
    Err(classify_error(status.as_u16(), &body))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Map a non-2xx response to a typed error.
///
/// Bodies are expected to be the platform's error envelope
/// `{"error": {"code", "message", "details": [{"message"}]}}`. The two
/// distinguished codes get their own variants; everything else (including
/// unparseable bodies) is reported with the raw text so nothing is lost.
pub fn classify_error(status: u16, body: &str) -> ClientError {
    let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();

    if let Some(envelope) = envelope {
        let detail = envelope
            .error
            .details
            .first()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(envelope.error.message);

        match envelope.error.code.as_str() {
            "Unauthorized" => return ClientError::Unauthorized { message: detail },
            "ModuleExecutionError" => return ClientError::Execution { message: detail },
            _ => {}
        }
    }

    if status == 401 {
        return ClientError::Unauthorized {
            message: body.to_string(),
        };
    }

    ClientError::Remote {
        status,
        body: body.to_string(),
    }
}
