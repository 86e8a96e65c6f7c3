//! Wire documents exchanged with the platform.
//!
//! Field names follow the service API's PascalCase convention; everything
//! here is plain serde data with no behavior.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TypeDescriptor;

/// The uploaded execution bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBundle {
    #[serde(rename = "InputSchema")]
    pub input_schema: BTreeMap<String, TypeDescriptor>,
    #[serde(rename = "OutputSchema")]
    pub output_schema: BTreeMap<String, TypeDescriptor>,
    /// Runtime identifier the remote side must provide.
    #[serde(rename = "Language")]
    pub language: String,
    /// Generated bootstrap text embedding the closure blob.
    #[serde(rename = "SourceCode")]
    pub source_code: String,
    /// Optional base64 zip archive of attached files.
    #[serde(rename = "ZipContents", skip_serializing_if = "Option::is_none")]
    pub zip_contents: Option<String>,
}

/// Body of the webservice PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServiceRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "CodeBundle")]
    pub code_bundle: CodeBundle,
}

/// Response of the webservice PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServiceResponse {
    #[serde(rename = "DefaultEndpointName")]
    pub default_endpoint_name: String,
}

/// Response of the endpoint GET.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointResponse {
    #[serde(rename = "ApiLocation")]
    pub api_location: String,
    #[serde(rename = "PrimaryKey")]
    pub primary_key: String,
    #[serde(rename = "HelpLocation")]
    pub help_location: String,
}

/// Invocation request: one input port with one row per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(rename = "Inputs")]
    pub inputs: BTreeMap<String, InputPort>,
    #[serde(rename = "GlobalParameters")]
    pub global_parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPort {
    #[serde(rename = "ColumnNames")]
    pub column_names: Vec<String>,
    #[serde(rename = "Values")]
    pub values: Vec<Vec<String>>,
}

/// Invocation response: named output ports, each a small table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "Results")]
    pub results: BTreeMap<String, OutputPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPort {
    pub value: OutputTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputTable {
    #[serde(rename = "ColumnNames", default)]
    pub column_names: Option<Vec<String>>,
    #[serde(rename = "ColumnTypes", default)]
    pub column_types: Option<Vec<String>>,
    #[serde(rename = "Values")]
    pub values: Vec<Vec<String>>,
}
