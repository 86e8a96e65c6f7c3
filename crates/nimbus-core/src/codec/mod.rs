//! Tagged value codec for invocation payloads.
//!
//! Arguments cross the wire as JSON documents of the form
//! `{"type": <tag>, "value": <payload>}`. The tag picks the decode rule, so
//! a document is self-describing and a value survives the trip without the
//! remote side knowing the schema in advance. Payloads are deliberately
//! simple: numbers are stringified, byte sequences are base64 text,
//! containers hold recursively encoded elements, and mappings are encoded
//! as ordered key/value pairs so keys are not limited to strings.
//!
//! Function arguments come from the remote caller and are untrusted, which
//! is why this codec is separate from (and far more restrictive than) the
//! closure blob used for the published function itself.

mod ndarray;

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_runtime::{Value, ValueKind, ValueMap};
use serde_json::{json, Value as Document};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value's kind has no registered encoder, or a document carries a
    /// tag with no registered decoder. Never silently defaulted.
    #[error("unsupported type for invocation: {0}")]
    UnsupportedType(String),
    /// A container was reached twice within one encode call.
    #[error("circular reference detected in {0} value")]
    CircularReference(ValueKind),
    /// The document does not match the tagged-value grammar.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type EncodeFn = fn(&Value, &mut EncodeSession<'_>) -> Result<Document, CodecError>;
pub type DecodeFn = fn(&Document, &ValueCodec) -> Result<Value, CodecError>;

/// Registry of encode/decode pairs, keyed by runtime kind on the way out
/// and by wire tag on the way in.
///
/// Build one with [`ValueCodec::standard`], extend it with
/// [`ValueCodec::register`], and freeze it with [`ValueCodec::install`]
/// before the first call; after that [`ValueCodec::global`] hands out a
/// shared read-only reference that is safe to use from any thread.
pub struct ValueCodec {
    encoders: HashMap<ValueKind, EncodeFn>,
    decoders: HashMap<String, DecodeFn>,
}

static GLOBAL: OnceLock<ValueCodec> = OnceLock::new();

impl ValueCodec {
    /// An empty registry with no kinds at all.
    pub fn empty() -> ValueCodec {
        ValueCodec {
            encoders: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    /// The registry with every kind this crate ships, including the
    /// numeric-array extension.
    pub fn standard() -> ValueCodec {
        let mut codec = ValueCodec::empty();
        codec.register(ValueKind::Bool, "bool", encode_bool, decode_bool);
        codec.register(ValueKind::Int, "int", encode_int, decode_int);
        codec.register(ValueKind::Long, "long", encode_long, decode_long);
        codec.register(ValueKind::Float, "float", encode_float, decode_float);
        codec.register(ValueKind::Str, "unicode", encode_str, decode_str);
        codec.register(ValueKind::Bytes, "bytes", encode_bytes, decode_bytes);
        codec.register(ValueKind::Null, "null", encode_null, decode_null);
        codec.register(ValueKind::List, "list", encode_list, decode_list);
        codec.register(ValueKind::Tuple, "tuple", encode_tuple, decode_tuple);
        codec.register(ValueKind::Map, "dict", encode_map, decode_map);
        ndarray::register(&mut codec);
        codec
    }

    /// Register an encode/decode pair for a kind and its wire tag.
    /// Registering an existing kind or tag replaces it.
    pub fn register(
        &mut self,
        kind: ValueKind,
        tag: impl Into<String>,
        encode: EncodeFn,
        decode: DecodeFn,
    ) {
        self.encoders.insert(kind, encode);
        self.decoders.insert(tag.into(), decode);
    }

    /// Install `codec` as the process-wide registry. Fails when one is
    /// already installed (including implicitly by [`ValueCodec::global`]).
    pub fn install(codec: ValueCodec) -> Result<(), ValueCodec> {
        GLOBAL.set(codec)
    }

    /// The process-wide registry, installing [`ValueCodec::standard`] on
    /// first use.
    pub fn global() -> &'static ValueCodec {
        GLOBAL.get_or_init(ValueCodec::standard)
    }

    /// Encode a value into a wire document string.
    pub fn encode(&self, value: &Value) -> Result<String, CodecError> {
        let mut session = EncodeSession {
            codec: self,
            memo: HashSet::new(),
        };
        let document = session.encode(value)?;
        Ok(document.to_string())
    }

    /// Decode a wire document string produced by [`ValueCodec::encode`].
    pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
        let document: Document = serde_json::from_str(text)
            .map_err(|e| CodecError::Malformed(format!("not a JSON document: {e}")))?;
        if !document.is_object() {
            return Err(CodecError::Malformed(format!(
                "expected a tagged object, got {}",
                json_kind(&document)
            )));
        }
        self.decode_value(&document)
    }

    /// Dispatch one parsed `{"type", "value"}` object through the registry.
    pub fn decode_value(&self, document: &Document) -> Result<Value, CodecError> {
        let object = document
            .as_object()
            .ok_or_else(|| CodecError::Malformed("entry is not a tagged object".to_string()))?;
        let tag = object
            .get("type")
            .and_then(Document::as_str)
            .ok_or_else(|| CodecError::Malformed("missing type tag".to_string()))?;
        let decode = self
            .decoders
            .get(tag)
            .ok_or_else(|| CodecError::UnsupportedType(tag.to_string()))?;
        decode(document, self)
    }
}

/// State for one top-level encode call: the registry plus the identity memo
/// guarding against containers reached twice. The memo dies with the call.
pub struct EncodeSession<'a> {
    codec: &'a ValueCodec,
    memo: HashSet<usize>,
}

impl EncodeSession<'_> {
    /// Encode one value into a `{"type", "value"}` object.
    pub fn encode(&mut self, value: &Value) -> Result<Document, CodecError> {
        if let Some(address) = value.container_address() {
            if !self.memo.insert(address) {
                return Err(CodecError::CircularReference(value.kind()));
            }
        }
        let encode = self
            .codec
            .encoders
            .get(&value.kind())
            .ok_or_else(|| CodecError::UnsupportedType(value.kind().to_string()))?;
        encode(value, self)
    }
}

fn json_kind(document: &Document) -> &'static str {
    match document {
        Document::Null => "null",
        Document::Bool(_) => "a boolean",
        Document::Number(_) => "a number",
        Document::String(_) => "a string",
        Document::Array(_) => "an array",
        Document::Object(_) => "an object",
    }
}

fn payload<'a>(document: &'a Document) -> Result<&'a Document, CodecError> {
    document
        .get("value")
        .ok_or_else(|| CodecError::Malformed("missing value payload".to_string()))
}

fn payload_str<'a>(document: &'a Document, tag: &str) -> Result<&'a str, CodecError> {
    payload(document)?
        .as_str()
        .ok_or_else(|| CodecError::Malformed(format!("{tag} payload is not a string")))
}

fn payload_array<'a>(document: &'a Document, tag: &str) -> Result<&'a [Document], CodecError> {
    payload(document)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| CodecError::Malformed(format!("{tag} payload is not an array")))
}

fn encode_bool(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Bool(b) = value else { unreachable!() };
    Ok(json!({"type": "bool", "value": if *b { "true" } else { "false" }}))
}

fn decode_bool(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    match payload_str(document, "bool")? {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        other => Err(CodecError::Malformed(format!(
            "bool payload must be 'true' or 'false', got '{other}'"
        ))),
    }
}

fn encode_int(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Int(i) = value else { unreachable!() };
    Ok(json!({"type": "int", "value": i.to_string()}))
}

fn decode_int(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    let text = payload_str(document, "int")?;
    text.parse::<i64>()
        .map(Value::Int)
        .map_err(|_| CodecError::Malformed(format!("int payload '{text}' is not an integer")))
}

fn encode_long(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Long(i) = value else { unreachable!() };
    Ok(json!({"type": "long", "value": i.to_string()}))
}

fn decode_long(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    let text = payload_str(document, "long")?;
    text.parse::<i128>()
        .map(Value::Long)
        .map_err(|_| CodecError::Malformed(format!("long payload '{text}' is not an integer")))
}

fn encode_float(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Float(f) = value else { unreachable!() };
    Ok(json!({"type": "float", "value": f.to_string()}))
}

fn decode_float(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    let text = payload_str(document, "float")?;
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| CodecError::Malformed(format!("float payload '{text}' is not a number")))
}

fn encode_str(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Str(s) = value else { unreachable!() };
    Ok(json!({"type": "unicode", "value": &**s}))
}

fn decode_str(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    Ok(Value::string(payload_str(document, "unicode")?))
}

fn encode_bytes(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Bytes(b) = value else { unreachable!() };
    Ok(json!({"type": "bytes", "value": BASE64.encode(&**b)}))
}

fn decode_bytes(document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    let text = payload_str(document, "bytes")?;
    BASE64
        .decode(text)
        .map(Value::bytes)
        .map_err(|e| CodecError::Malformed(format!("bytes payload is not base64: {e}")))
}

fn encode_null(_value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    Ok(json!({"type": "null", "value": "null"}))
}

fn decode_null(_document: &Document, _codec: &ValueCodec) -> Result<Value, CodecError> {
    Ok(Value::Null)
}

fn encode_list(value: &Value, session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::List(items) = value else { unreachable!() };
    let items = items.borrow();
    let encoded = items
        .iter()
        .map(|item| session.encode(item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({"type": "list", "value": encoded}))
}

fn decode_list(document: &Document, codec: &ValueCodec) -> Result<Value, CodecError> {
    let items = payload_array(document, "list")?
        .iter()
        .map(|item| codec.decode_value(item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(items))
}

fn encode_tuple(value: &Value, session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Tuple(items) = value else { unreachable!() };
    let encoded = items
        .iter()
        .map(|item| session.encode(item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({"type": "tuple", "value": encoded}))
}

fn decode_tuple(document: &Document, codec: &ValueCodec) -> Result<Value, CodecError> {
    let items = payload_array(document, "tuple")?
        .iter()
        .map(|item| codec.decode_value(item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::tuple(items))
}

fn encode_map(value: &Value, session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Map(map) = value else { unreachable!() };
    let map = map.borrow();
    let mut pairs = Vec::with_capacity(map.len());
    for (key, entry) in map.entries() {
        pairs.push(Document::Array(vec![
            session.encode(key)?,
            session.encode(entry)?,
        ]));
    }
    Ok(json!({"type": "dict", "value": pairs}))
}

fn decode_map(document: &Document, codec: &ValueCodec) -> Result<Value, CodecError> {
    let mut map = ValueMap::new();
    for pair in payload_array(document, "dict")? {
        let pair = pair
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| CodecError::Malformed("dict entry is not a pair".to_string()))?;
        map.insert(codec.decode_value(&pair[0])?, codec.decode_value(&pair[1])?);
    }
    Ok(Value::map(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_runtime::NdArray;
    use std::rc::Rc;

    fn round_trip(value: Value) -> Value {
        let codec = ValueCodec::standard();
        codec.decode(&codec.encode(&value).unwrap()).unwrap()
    }

    #[test]
    fn scalar_wire_forms_are_exact() {
        let codec = ValueCodec::standard();
        let encoded = codec.encode(&Value::Int(42)).unwrap();
        assert_eq!(
            serde_json::from_str::<Document>(&encoded).unwrap(),
            json!({"type": "int", "value": "42"})
        );
        let encoded = codec.encode(&Value::Bool(true)).unwrap();
        assert_eq!(
            serde_json::from_str::<Document>(&encoded).unwrap(),
            json!({"type": "bool", "value": "true"})
        );
    }

    #[test]
    fn every_scalar_kind_round_trips() {
        for value in [
            Value::Null,
            Value::Bool(false),
            Value::Int(-7),
            Value::Long(170141183460469231731687303715884105727),
            Value::Float(100.0),
            Value::Float(0.25),
            Value::string("abc"),
            Value::bytes(vec![0u8, 1, 254, 255]),
        ] {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn containers_round_trip_preserving_order() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(round_trip(list.clone()), list);

        let tuple = Value::tuple(vec![Value::string("a"), Value::Null]);
        assert_eq!(round_trip(tuple.clone()), tuple);

        let map = Value::map(
            [(Value::Int(2), Value::Int(3))]
                .into_iter()
                .collect(),
        );
        assert_eq!(round_trip(map.clone()), map);
    }

    #[test]
    fn mapping_keys_are_not_limited_to_strings() {
        let map = Value::map(
            [
                (Value::tuple(vec![Value::Int(1)]), Value::string("tuple key")),
                (Value::Bool(true), Value::string("bool key")),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(round_trip(map.clone()), map);
    }

    #[test]
    fn self_referencing_list_fails_fast() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        let err = ValueCodec::standard().encode(&list).unwrap_err();
        assert!(matches!(err, CodecError::CircularReference(ValueKind::List)));
    }

    #[test]
    fn shared_container_in_one_call_is_rejected() {
        let inner = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        let err = ValueCodec::standard().encode(&outer).unwrap_err();
        assert!(matches!(err, CodecError::CircularReference(_)));
    }

    #[test]
    fn memo_is_scoped_to_one_call() {
        let codec = ValueCodec::standard();
        let list = Value::list(vec![Value::Int(1)]);
        codec.encode(&list).unwrap();
        codec.encode(&list).unwrap();
    }

    #[test]
    fn unknown_tag_is_a_hard_failure() {
        let err = ValueCodec::standard()
            .decode(r#"{"type":"bogus","value":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType(tag) if tag == "bogus"));
    }

    #[test]
    fn unencodable_kinds_are_rejected() {
        use nimbus_runtime::{CodeBuilder, FunctionBuilder};
        let func = FunctionBuilder::new("f", CodeBuilder::new().finish()).build();
        let err = ValueCodec::standard()
            .encode(&Value::Function(func))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType(kind) if kind == "function"));
    }

    #[test]
    fn top_level_document_must_be_tagged() {
        let codec = ValueCodec::standard();
        assert!(matches!(
            codec.decode("[1,2]").unwrap_err(),
            CodecError::Malformed(_)
        ));
        assert!(matches!(
            codec.decode(r#"{"value":"42"}"#).unwrap_err(),
            CodecError::Malformed(_)
        ));
        assert!(matches!(
            codec.decode("not json").unwrap_err(),
            CodecError::Malformed(_)
        ));
    }

    #[test]
    fn numeric_array_round_trips() {
        let array = Value::Array(Rc::new(NdArray {
            shape: vec![2, 2],
            dtype: "float64".to_string(),
            data: vec![0u8; 32],
        }));
        assert_eq!(round_trip(array.clone()), array);
    }

    #[test]
    fn registry_accepts_new_tags() {
        fn encode_marker(_: &Value, _: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
            unreachable!()
        }
        fn decode_version(document: &Document, _: &ValueCodec) -> Result<Value, CodecError> {
            Ok(Value::string(payload_str(document, "version")?))
        }

        let mut codec = ValueCodec::standard();
        codec.register(ValueKind::Instance, "version", encode_marker, decode_version);
        let value = codec.decode(r#"{"type":"version","value":"1.2.3"}"#).unwrap();
        assert_eq!(value, Value::string("1.2.3"));
    }
}
