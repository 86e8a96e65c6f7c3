//! Calling a published service.
//!
//! A [`PublishedService`] is the client-side handle returned by
//! [`crate::publish`], or built directly with
//! [`PublishedService::connect`] for a service that already exists. Calls
//! are synchronous and blocking, one HTTP request per call (or per batch);
//! retry and timeout policy belongs to the caller.

use std::collections::BTreeMap;

use nimbus_runtime::{Value, ValueKind, ValueMap};
use serde_json::Value as Document;
use tracing::debug;

use crate::codec::{CodecError, ValueCodec};
use crate::schemas::{InputPort, InvocationRequest, InvocationResponse, OutputTable};
use crate::types::{PortType, ReturnSpec};
use nimbus_client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("service takes {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("argument '{name}' is declared {declared:?} but got a {got} value")]
    ArgumentType {
        name: String,
        declared: PortType,
        got: ValueKind,
    },
    #[error("malformed service response: {0}")]
    Response(String),
}

/// Calling-side description of a service: port names, parameter types in
/// declaration order, and the result shape. Declared types take precedence
/// over encoding inference on both directions of the wire.
#[derive(Debug, Clone)]
pub struct ServiceSignature {
    pub input_name: String,
    pub output_name: String,
    pub args: Vec<(String, PortType)>,
    pub returns: ReturnSpec,
}

/// Handle to an operationalized service endpoint.
pub struct PublishedService {
    url: String,
    api_key: String,
    help_url: Option<String>,
    service_id: Option<String>,
    signature: ServiceSignature,
    http: reqwest::blocking::Client,
}

impl PublishedService {
    pub(crate) fn published(
        url: String,
        api_key: String,
        help_url: Option<String>,
        service_id: Option<String>,
        signature: ServiceSignature,
    ) -> PublishedService {
        PublishedService {
            url,
            api_key,
            help_url,
            service_id,
            signature,
            http: reqwest::blocking::Client::new(),
        }
    }

    /// Attach to an already-published service without republishing it.
    pub fn connect(
        url: impl Into<String>,
        api_key: impl Into<String>,
        signature: ServiceSignature,
    ) -> PublishedService {
        PublishedService::published(url.into(), api_key.into(), None, None, signature)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn help_url(&self) -> Option<&str> {
        self.help_url.as_deref()
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    /// Invoke the service once and decode the single result.
    pub fn call(&self, args: &[Value]) -> Result<Value, ServiceError> {
        let rows = vec![self.encode_row(args)?];
        let response = self.invoke(rows)?;
        let table = self.output_table(&response)?;
        let row = table
            .values
            .first()
            .ok_or_else(|| ServiceError::Response("response carries no rows".to_string()))?;
        self.decode_row(table, row)
    }

    /// Map the service over multiple argument tuples with a single request,
    /// returning exactly one decoded result per input tuple, in input
    /// order.
    pub fn map(&self, batches: &[Vec<Value>]) -> Result<Vec<Value>, ServiceError> {
        let rows = batches
            .iter()
            .map(|args| self.encode_row(args))
            .collect::<Result<Vec<_>, _>>()?;
        let response = self.invoke(rows)?;
        let table = self.output_table(&response)?;

        if table.values.len() != batches.len() {
            return Err(ServiceError::Response(format!(
                "expected {} result rows, got {}",
                batches.len(),
                table.values.len()
            )));
        }

        table
            .values
            .iter()
            .map(|row| self.decode_row(table, row))
            .collect()
    }

    /// The request document for a set of call rows. Exposed for inspection;
    /// [`PublishedService::call`] and [`PublishedService::map`] build their
    /// bodies here.
    pub fn request_body(&self, rows: Vec<Vec<String>>) -> InvocationRequest {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            self.signature.input_name.clone(),
            InputPort {
                column_names: self.signature.args.iter().map(|(n, _)| n.clone()).collect(),
                values: rows,
            },
        );
        InvocationRequest {
            inputs,
            global_parameters: serde_json::Map::new(),
        }
    }

    fn invoke(&self, rows: Vec<Vec<String>>) -> Result<InvocationResponse, ServiceError> {
        let request = self.request_body(rows);
        let body = serde_json::to_value(&request)
            .map_err(|e| ServiceError::Response(format!("failed to serialize request: {e}")))?;
        debug!(url = %self.url, "invoking published service");
        let response = nimbus_client::execute_request(&self.http, &self.url, &self.api_key, &body)?;
        serde_json::from_value(response)
            .map_err(|e| ServiceError::Response(format!("unexpected response shape: {e}")))
    }

    fn output_table<'a>(
        &self,
        response: &'a InvocationResponse,
    ) -> Result<&'a OutputTable, ServiceError> {
        response
            .results
            .get(&self.signature.output_name)
            .map(|port| &port.value)
            .ok_or_else(|| {
                ServiceError::Response(format!(
                    "response has no '{}' output",
                    self.signature.output_name
                ))
            })
    }

    /// Encode one argument tuple into a request row, one cell per declared
    /// parameter.
    pub fn encode_row(&self, args: &[Value]) -> Result<Vec<String>, ServiceError> {
        if args.len() != self.signature.args.len() {
            return Err(ServiceError::Arity {
                expected: self.signature.args.len(),
                got: args.len(),
            });
        }
        args.iter()
            .zip(&self.signature.args)
            .map(|(value, (name, ty))| encode_cell(name, value, *ty))
            .collect()
    }

    fn decode_row(&self, table: &OutputTable, row: &[String]) -> Result<Value, ServiceError> {
        match &self.signature.returns {
            ReturnSpec::Single(ty) => {
                let cell = row.first().ok_or_else(|| {
                    ServiceError::Response("result row is empty".to_string())
                })?;
                decode_cell(cell, *ty)
            }
            ReturnSpec::Tuple(types) => {
                if row.len() != types.len() {
                    return Err(ServiceError::Response(format!(
                        "expected {} result columns, got {}",
                        types.len(),
                        row.len()
                    )));
                }
                let items = row
                    .iter()
                    .zip(types)
                    .map(|(cell, ty)| decode_cell(cell, *ty))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::tuple(items))
            }
            ReturnSpec::Named(columns) => {
                let declared: BTreeMap<&str, PortType> = columns
                    .iter()
                    .map(|(name, ty)| (name.as_str(), *ty))
                    .collect();
                let names: Vec<String> = match &table.column_names {
                    Some(names) => names.clone(),
                    None => columns.iter().map(|(name, _)| name.clone()).collect(),
                };
                if row.len() != names.len() {
                    return Err(ServiceError::Response(format!(
                        "expected {} result columns, got {}",
                        names.len(),
                        row.len()
                    )));
                }

                let mut map = ValueMap::new();
                for (i, (name, cell)) in names.iter().zip(row).enumerate() {
                    let value = match declared.get(name.as_str()) {
                        Some(ty) => decode_cell(cell, *ty)?,
                        None => infer_cell(cell, column_type(table, i)),
                    };
                    map.insert(Value::string(name.clone()), value);
                }
                Ok(Value::map(map))
            }
        }
    }
}

fn column_type(table: &OutputTable, index: usize) -> Option<&str> {
    table
        .column_types
        .as_ref()
        .and_then(|types| types.get(index))
        .map(String::as_str)
}

fn encode_cell(name: &str, value: &Value, ty: PortType) -> Result<String, ServiceError> {
    let mismatch = || ServiceError::ArgumentType {
        name: name.to_string(),
        declared: ty,
        got: value.kind(),
    };

    match ty {
        PortType::Object => Ok(ValueCodec::global().encode(value)?),
        PortType::Text => match value {
            Value::Str(s) => Ok(s.to_string()),
            _ => Err(mismatch()),
        },
        PortType::Integer => match value {
            Value::Int(i) => Ok(i.to_string()),
            _ => Err(mismatch()),
        },
        PortType::Boolean => match value {
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            _ => Err(mismatch()),
        },
        PortType::Number => match value {
            Value::Float(f) => Ok(f.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            _ => Err(mismatch()),
        },
    }
}

fn decode_cell(cell: &str, ty: PortType) -> Result<Value, ServiceError> {
    match ty {
        PortType::Object => Ok(ValueCodec::global().decode(cell)?),
        PortType::Text => Ok(Value::string(cell)),
        PortType::Integer => cell
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ServiceError::Response(format!("'{cell}' is not an integer"))),
        PortType::Boolean => match cell {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ServiceError::Response(format!("'{cell}' is not a boolean"))),
        },
        PortType::Number => cell
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ServiceError::Response(format!("'{cell}' is not a number"))),
    }
}

/// Best-effort decode for a column with no declared type: string-typed
/// columns pass through verbatim, anything else is read as a JSON literal.
fn infer_cell(cell: &str, column_type: Option<&str>) -> Value {
    if let Some(ty) = column_type {
        if ty.eq_ignore_ascii_case("string") {
            return Value::string(cell);
        }
    }
    match serde_json::from_str::<Document>(cell) {
        Ok(document) => json_to_value(&document),
        Err(_) => Value::string(cell),
    }
}

fn json_to_value(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Document::String(s) => Value::string(s.clone()),
        Document::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        Document::Object(fields) => Value::map(
            fields
                .iter()
                .map(|(k, v)| (Value::string(k.clone()), json_to_value(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signature(args: Vec<(&str, PortType)>, returns: ReturnSpec) -> ServiceSignature {
        ServiceSignature {
            input_name: "input1".to_string(),
            output_name: "output1".to_string(),
            args: args
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
            returns,
        }
    }

    fn service(args: Vec<(&str, PortType)>, returns: ReturnSpec) -> PublishedService {
        PublishedService::connect("https://example.invalid/execute", "key", signature(args, returns))
    }

    #[test]
    fn declared_types_control_cell_encoding() {
        let svc = service(
            vec![
                ("count", PortType::Integer),
                ("label", PortType::Text),
                ("payload", PortType::Object),
            ],
            ReturnSpec::default(),
        );
        let row = svc
            .encode_row(&[
                Value::Int(3),
                Value::string("raw text"),
                Value::list(vec![Value::Int(1)]),
            ])
            .unwrap();
        assert_eq!(row[0], "3");
        // Raw-string declaration bypasses the tagged codec entirely.
        assert_eq!(row[1], "raw text");
        assert!(row[2].contains("\"type\""));
    }

    #[test]
    fn declared_type_mismatch_is_reported() {
        let svc = service(vec![("count", PortType::Integer)], ReturnSpec::default());
        let err = svc.encode_row(&[Value::string("three")]).unwrap_err();
        assert!(matches!(err, ServiceError::ArgumentType { name, .. } if name == "count"));
    }

    #[test]
    fn arity_is_checked_before_any_encoding() {
        let svc = service(vec![("a", PortType::Integer)], ReturnSpec::default());
        let err = svc.encode_row(&[]).unwrap_err();
        assert!(matches!(err, ServiceError::Arity { expected: 1, got: 0 }));
    }

    #[test]
    fn batched_rows_share_one_request() {
        let svc = service(
            vec![("a", PortType::Integer), ("b", PortType::Integer)],
            ReturnSpec::default(),
        );
        let rows = vec![
            svc.encode_row(&[Value::Int(1), Value::Int(2)]).unwrap(),
            svc.encode_row(&[Value::Int(3), Value::Int(4)]).unwrap(),
            svc.encode_row(&[Value::Int(5), Value::Int(6)]).unwrap(),
        ];
        let body = serde_json::to_value(svc.request_body(rows)).unwrap();
        assert_eq!(
            body,
            json!({
                "Inputs": {
                    "input1": {
                        "ColumnNames": ["a", "b"],
                        "Values": [["1", "2"], ["3", "4"], ["5", "6"]]
                    }
                },
                "GlobalParameters": {}
            })
        );
    }

    #[test]
    fn single_results_decode_with_the_declared_return_type() {
        let svc = service(vec![], ReturnSpec::Single(PortType::Number));
        let table = OutputTable {
            column_names: None,
            column_types: None,
            values: vec![vec!["3.5".to_string()]],
        };
        let out = svc.decode_row(&table, &table.values[0]).unwrap();
        assert_eq!(out, Value::Float(3.5));
    }

    #[test]
    fn object_results_round_trip_through_the_codec() {
        let svc = service(vec![], ReturnSpec::default());
        let encoded = ValueCodec::global()
            .encode(&Value::list(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        let table = OutputTable {
            column_names: None,
            column_types: None,
            values: vec![vec![encoded]],
        };
        let out = svc.decode_row(&table, &table.values[0]).unwrap();
        assert_eq!(out, Value::list(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn tuple_returns_decode_by_position() {
        let svc = service(
            vec![],
            ReturnSpec::Tuple(vec![PortType::Integer, PortType::Text]),
        );
        let table = OutputTable {
            column_names: None,
            column_types: None,
            values: vec![vec!["7".to_string(), "seven".to_string()]],
        };
        let out = svc.decode_row(&table, &table.values[0]).unwrap();
        assert_eq!(
            out,
            Value::tuple(vec![Value::Int(7), Value::string("seven")])
        );
    }

    #[test]
    fn named_returns_use_response_columns_and_inference() {
        let svc = service(
            vec![],
            ReturnSpec::Named(vec![("score".to_string(), PortType::Number)]),
        );
        let table = OutputTable {
            column_names: Some(vec!["score".to_string(), "label".to_string()]),
            column_types: Some(vec!["Double".to_string(), "String".to_string()]),
            values: vec![vec!["0.75".to_string(), "spam".to_string()]],
        };
        let out = svc.decode_row(&table, &table.values[0]).unwrap();
        let Value::Map(map) = out else { panic!("expected a map") };
        let map = map.borrow();
        assert_eq!(map.get(&Value::string("score")), Some(&Value::Float(0.75)));
        assert_eq!(map.get(&Value::string("label")), Some(&Value::string("spam")));
    }

    #[test]
    fn missing_output_port_is_a_response_error() {
        let svc = service(vec![], ReturnSpec::default());
        let response: InvocationResponse = serde_json::from_value(json!({
            "Results": {"other": {"value": {"Values": [["1"]]}}}
        }))
        .unwrap();
        assert!(matches!(
            svc.output_table(&response),
            Err(ServiceError::Response(_))
        ));
    }
}
