//! Numeric-array extension kind.
//!
//! Arrays travel as a three-element payload: the shape (a tuple of
//! integers), the element type name, and the raw element bytes. Each
//! component is itself a tagged document, so a decoder that knows the core
//! kinds can read the envelope even before this kind is registered.

use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nimbus_runtime::{NdArray, Value, ValueKind};
use serde_json::{json, Value as Document};

use super::{payload_array, CodecError, EncodeSession, ValueCodec};

pub(super) fn register(codec: &mut ValueCodec) {
    codec.register(ValueKind::Array, "ndarray", encode_ndarray, decode_ndarray);
}

fn encode_ndarray(value: &Value, _session: &mut EncodeSession<'_>) -> Result<Document, CodecError> {
    let Value::Array(array) = value else { unreachable!() };

    // Components are encoded directly rather than through the session: they
    // are synthesized here, not part of the caller's object graph, so they
    // must not occupy memo slots.
    let shape: Vec<Document> = array
        .shape
        .iter()
        .map(|dim| json!({"type": "int", "value": dim.to_string()}))
        .collect();

    Ok(json!({
        "type": "ndarray",
        "value": [
            {"type": "tuple", "value": shape},
            {"type": "unicode", "value": array.dtype.clone()},
            {"type": "bytes", "value": BASE64.encode(&array.data)},
        ]
    }))
}

fn decode_ndarray(document: &Document, codec: &ValueCodec) -> Result<Value, CodecError> {
    let parts = payload_array(document, "ndarray")?;
    if parts.len() != 3 {
        return Err(CodecError::Malformed(
            "ndarray payload must have shape, dtype, and data".to_string(),
        ));
    }

    let shape = match codec.decode_value(&parts[0])? {
        Value::Tuple(dims) => dims
            .iter()
            .map(|dim| match dim {
                Value::Int(i) if *i >= 0 => Ok(*i as u64),
                _ => Err(CodecError::Malformed(
                    "ndarray shape entries must be non-negative integers".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(CodecError::Malformed(
                "ndarray shape must be a tuple".to_string(),
            ))
        }
    };

    let dtype = match codec.decode_value(&parts[1])? {
        Value::Str(s) => s.to_string(),
        _ => {
            return Err(CodecError::Malformed(
                "ndarray dtype must be text".to_string(),
            ))
        }
    };

    let data = match codec.decode_value(&parts[2])? {
        Value::Bytes(b) => b.to_vec(),
        _ => {
            return Err(CodecError::Malformed(
                "ndarray data must be a byte sequence".to_string(),
            ))
        }
    };

    Ok(Value::Array(Rc::new(NdArray { shape, dtype, data })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_payload_is_malformed() {
        let codec = ValueCodec::standard();
        let err = codec
            .decode(r#"{"type":"ndarray","value":[{"type":"unicode","value":"f64"}]}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn two_arrays_in_one_document_do_not_collide() {
        let array = Value::Array(Rc::new(NdArray {
            shape: vec![3],
            dtype: "int32".to_string(),
            data: vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0],
        }));
        let list = Value::list(vec![array.clone(), array.clone()]);
        let codec = ValueCodec::standard();
        let decoded = codec.decode(&codec.encode(&list).unwrap()).unwrap();
        assert_eq!(decoded, list);
    }
}
