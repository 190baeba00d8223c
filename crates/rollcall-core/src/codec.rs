//! Text form of face descriptors.
//!
//! Descriptors are stored as a JSON array of numbers, the shape the browser
//! client writes. Older records used a bare comma-separated list; `decode`
//! still reads those.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed embedding: {0}")]
    MalformedEmbedding(String),
}

/// Serialize an embedding as a JSON array.
///
/// Floats are written in their shortest form that parses back to the same
/// value. Non-finite values have no JSON form and come out as `null`, which
/// `decode` rejects.
pub fn encode(embedding: &Embedding) -> String {
    serde_json::Value::from(embedding.values().to_vec()).to_string()
}

/// Parse a descriptor from its JSON-array or comma-separated text form.
pub fn decode(text: &str) -> Result<Embedding, CodecError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CodecError::MalformedEmbedding("empty descriptor text".into()));
    }

    let values = if text.starts_with('[') {
        serde_json::from_str::<Vec<f64>>(text)
            .map_err(|e| CodecError::MalformedEmbedding(e.to_string()))?
    } else {
        decode_comma_separated(text)?
    };

    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(CodecError::MalformedEmbedding(format!(
            "non-finite value at position {pos}"
        )));
    }

    Ok(Embedding::new(values))
}

fn decode_comma_separated(text: &str) -> Result<Vec<f64>, CodecError> {
    text.split(',')
        .enumerate()
        .map(|(pos, token)| {
            let token = token.trim();
            if token.is_empty() {
                return Err(CodecError::MalformedEmbedding(format!(
                    "empty value at position {pos}"
                )));
            }
            token.parse::<f64>().map_err(|e| {
                CodecError::MalformedEmbedding(format!("value {token:?} at position {pos}: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_EMBEDDING_DIM;
    use proptest::prelude::*;

    fn finite_descriptor() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(
            any::<f64>().prop_filter("finite", |v| v.is_finite()),
            0..=DEFAULT_EMBEDDING_DIM,
        )
    }

    proptest! {
        /// Every finite descriptor decodes back to exactly the values it was encoded from.
        #[test]
        fn roundtrip_finite_descriptors(values in finite_descriptor()) {
            let original = Embedding::new(values);
            let decoded = decode(&encode(&original));
            prop_assert_eq!(decoded, Ok(original));
        }
    }

    #[test]
    fn test_roundtrip_awkward_values() {
        let original = Embedding::new(vec![
            0.1,
            -0.0,
            1.0 / 3.0,
            f64::MIN_POSITIVE,
            f64::MAX,
            -1e-300,
            123456789.0,
            f64::from(0.1f32),
        ]);
        assert_eq!(decode(&encode(&original)).unwrap(), original);
    }

    #[test]
    fn test_encode_is_json_array() {
        let e = Embedding::new(vec![0.5, -1.0, 0.25]);
        let text = encode(&e);
        let parsed: Vec<f64> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, vec![0.5, -1.0, 0.25]);
        assert!(text.starts_with('[') && text.ends_with(']'));
    }

    #[test]
    fn test_decode_comma_separated() {
        let e = decode("0.1, -0.2,0.3 ").unwrap();
        assert_eq!(e.values(), &[0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_decode_tolerates_whitespace() {
        let e = decode("  [ 1.5 ,\n 2 ]\n").unwrap();
        assert_eq!(e.values(), &[1.5, 2.0]);
    }

    #[test]
    fn test_decode_empty_array() {
        assert!(decode("[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for text in [
            "",
            "   ",
            "[1, 2",
            "[1, \"two\"]",
            "[1, null]",
            "[[1, 2]]",
            "{\"0\": 1}",
            "1,,2",
            "1,abc",
            "NaN,1",
            "1,inf",
        ] {
            let err = decode(text).unwrap_err();
            assert!(
                matches!(err, CodecError::MalformedEmbedding(_)),
                "{text:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_non_finite_encodes_to_undecodable_text() {
        let e = Embedding::new(vec![1.0, f64::NAN]);
        let text = encode(&e);
        assert_eq!(text, "[1.0,null]");
        assert!(decode(&text).is_err());
    }
}
