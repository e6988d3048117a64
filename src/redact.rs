//! Removal of embedding-vector fields from search results.
//!
//! A field is treated as a vector when its name says so or when its value
//! looks like one (a long, purely numeric array). Only nested objects are
//! descended into; objects inside arrays are left untouched.

use serde_json::{Map, Value};

/// Numeric arrays must be strictly longer than this to count as vectors.
pub const MIN_VECTOR_LEN: usize = 50;

/// Numeric arrays must be strictly shorter than this to count as vectors.
pub const MAX_VECTOR_LEN: usize = 10_000;

const NAME_SUFFIXES: [&str; 4] = ["Vector", "_vector", "Embedding", "_embedding"];

/// Whether `key`/`value` looks like an embedding vector field
pub fn is_vector_field(key: &str, value: &Value) -> bool {
    let lower = key.to_lowercase();
    if lower.contains("vector") || lower.contains("embedding") {
        return true;
    }

    if NAME_SUFFIXES.iter().any(|suffix| key.ends_with(suffix)) {
        return true;
    }

    match value {
        Value::Array(items) => {
            items.len() > MIN_VECTOR_LEN
                && items.len() < MAX_VECTOR_LEN
                && items.iter().all(Value::is_number)
        }
        _ => false,
    }
}

/// Return a copy of `value` with vector fields removed at every object level.
///
/// Non-object input is returned unchanged.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_object(map)),
        other => other.clone(),
    }
}

fn redact_object(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(key, value)| !is_vector_field(key, value))
        .map(|(key, value)| {
            let value = match value {
                Value::Object(nested) => Value::Object(redact_object(nested)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Redact each record of a batch independently
pub fn redact_batch(values: &[Value]) -> Vec<Value> {
    values.iter().map(redact).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn floats(n: usize) -> Value {
        Value::Array((0..n).map(|i| json!(i as f64 * 0.01)).collect())
    }

    #[test]
    fn test_name_patterns() {
        for key in [
            "vector",
            "contentVector",
            "TEXT_VECTOR",
            "myEmbeddingField",
            "title_embedding",
            "descriptionVector",
        ] {
            assert!(is_vector_field(key, &json!("scalar")), "{key}");
        }
        assert!(!is_vector_field("title", &json!("x")));
        assert!(!is_vector_field("vec", &json!([1, 2, 3])));
    }

    #[test]
    fn test_shape_boundaries() {
        assert!(!is_vector_field("values", &floats(50)));
        assert!(is_vector_field("values", &floats(51)));
        assert!(is_vector_field("values", &floats(9_999)));
        assert!(!is_vector_field("values", &floats(10_000)));
    }

    #[test]
    fn test_shape_requires_all_numeric() {
        let mut items = vec![json!(1); 50];
        items.push(json!("x"));
        assert!(!is_vector_field("values", &Value::Array(items)));

        let ints = Value::Array(vec![json!(7); 60]);
        assert!(is_vector_field("prices", &ints));
    }

    #[test]
    fn test_text_vector_scenario() {
        let input = json!({
            "score": 1.2,
            "document": {
                "title": "x",
                "text_vector": floats(50),
                "tags": ["a", "b"]
            }
        });
        let expected = json!({
            "score": 1.2,
            "document": {"title": "x", "tags": ["a", "b"]}
        });
        assert_eq!(redact(&input), expected);
    }

    #[test]
    fn test_idempotent() {
        let input = json!({
            "a": {"b": {"embedding": [1, 2], "c": floats(80), "d": 1}},
            "list": [{"contentVector": [0.1]}],
            "n": null
        });
        let once = redact(&input);
        assert_eq!(redact(&once), once);
    }

    #[test]
    fn test_arrays_of_objects_preserved() {
        let input = json!({
            "chunks": [
                {"text": "a", "contentVector": floats(60)},
                {"text": "b", "contentVector": floats(60)}
            ]
        });
        assert_eq!(redact(&input), input);
    }

    #[test]
    fn test_non_object_unchanged() {
        assert_eq!(redact(&json!(3)), json!(3));
        assert_eq!(redact(&json!("vector")), json!("vector"));
        assert_eq!(redact(&floats(100)), floats(100));
    }

    #[test]
    fn test_batch_redacts_independently() {
        let batch = vec![
            json!({"id": "1", "embedding": [0.1]}),
            json!({"id": "2", "other": floats(10)}),
            json!("not an object"),
        ];
        let out = redact_batch(&batch);
        assert_eq!(out[0], json!({"id": "1"}));
        assert_eq!(out[1], batch[1]);
        assert_eq!(out[2], batch[2]);
    }
}
