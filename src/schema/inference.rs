//! Best-effort schema inference over a sample of existing records.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{record_to_json, Record, ValueKind};
use crate::stores::{RecordSource, StoreError};
use crate::utils::validate::validate_sample_size;

/// A field present in at least this fraction of sampled records is required.
pub const REQUIRED_PRESENCE_THRESHOLD: f64 = 0.8;

/// Sample size used by the inference tool when none is given.
pub const DEFAULT_INFERENCE_SAMPLE_SIZE: usize = 10;

/// Sample size used when validating a record before a write.
pub const DEFAULT_VALIDATION_SAMPLE_SIZE: usize = 20;

/// Number of raw records echoed back with an inferred schema.
pub const MAX_EXAMPLES: usize = 3;

/// Statistics for one field across the sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldProfile {
    /// Number of sampled records containing the field
    pub frequency: usize,

    /// `frequency / records read`, in [0, 1]
    pub presence: f64,

    /// Kinds seen for this field; never empty
    pub observed_types: BTreeSet<ValueKind>,

    /// `presence >= REQUIRED_PRESENCE_THRESHOLD`
    pub required: bool,
}

impl FieldProfile {
    /// Whether a value of `kind` has been observed for this field
    pub fn accepts(&self, kind: ValueKind) -> bool {
        self.observed_types.contains(&kind)
    }
}

/// Aggregate of all field profiles for a non-empty sample
#[derive(Debug, Clone, PartialEq)]
pub struct InferredSchema {
    sample_size: usize,
    fields: BTreeMap<String, FieldProfile>,
    examples: Vec<Record>,
}

impl InferredSchema {
    /// Build a schema from already-read records. Returns `None` when there are none.
    pub fn from_records(records: &[Record]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
        let mut kinds: BTreeMap<&str, BTreeSet<ValueKind>> = BTreeMap::new();

        for record in records {
            for (name, value) in record {
                *frequency.entry(name.as_str()).or_insert(0) += 1;
                kinds.entry(name.as_str()).or_default().insert(value.kind());
            }
        }

        let total = records.len() as f64;
        let fields = frequency
            .into_iter()
            .map(|(name, frequency)| {
                let presence = frequency as f64 / total;
                let profile = FieldProfile {
                    frequency,
                    presence,
                    observed_types: kinds.remove(name).unwrap_or_default(),
                    required: presence >= REQUIRED_PRESENCE_THRESHOLD,
                };
                (name.to_string(), profile)
            })
            .collect();

        Some(Self {
            sample_size: records.len(),
            fields,
            examples: records.iter().take(MAX_EXAMPLES).cloned().collect(),
        })
    }

    /// Number of records actually read
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// All field profiles
    pub fn fields(&self) -> &BTreeMap<String, FieldProfile> {
        &self.fields
    }

    /// Profile of one field
    pub fn field(&self, name: &str) -> Option<&FieldProfile> {
        self.fields.get(name)
    }

    /// Fields with `required == true`
    pub fn common_properties(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fields with `required == false`
    pub fn optional_properties(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, p)| !p.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fields observed with more than one kind
    pub fn type_variations(&self) -> BTreeMap<&str, Vec<ValueKind>> {
        self.fields
            .iter()
            .filter(|(_, p)| p.observed_types.len() > 1)
            .map(|(name, p)| (name.as_str(), p.observed_types.iter().copied().collect()))
            .collect()
    }

    /// Up to [`MAX_EXAMPLES`] sampled records, verbatim
    pub fn examples(&self) -> &[Record] {
        &self.examples
    }
}

/// Outcome of inference: either an explicit empty-table marker or a schema.
///
/// Validation against [`SchemaInference::Empty`] always passes, while an
/// inferred schema with no fields would flag every candidate field as new.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaInference {
    /// The table had no records to sample
    Empty,
    /// A schema inferred from at least one record
    Inferred(InferredSchema),
}

impl SchemaInference {
    /// Infer from already-read records
    pub fn from_records(records: &[Record]) -> Self {
        match InferredSchema::from_records(records) {
            Some(schema) => SchemaInference::Inferred(schema),
            None => SchemaInference::Empty,
        }
    }

    /// True for the empty-table marker
    pub fn is_empty(&self) -> bool {
        matches!(self, SchemaInference::Empty)
    }

    /// The inferred schema, if any
    pub fn schema(&self) -> Option<&InferredSchema> {
        match self {
            SchemaInference::Empty => None,
            SchemaInference::Inferred(schema) => Some(schema),
        }
    }

    /// JSON view returned by the inference tool
    pub fn to_json(&self) -> Value {
        match self {
            SchemaInference::Empty => json!({
                "isEmpty": true,
                "message": "Table is empty - no schema to infer",
                "suggestedSchema": {}
            }),
            SchemaInference::Inferred(schema) => json!({
                "isEmpty": false,
                "sampleSize": schema.sample_size(),
                "schema": schema.fields(),
                "commonProperties": schema.common_properties(),
                "optionalProperties": schema.optional_properties(),
                "typeVariations": schema.type_variations(),
                "examples": schema.examples().iter().map(record_to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

impl Serialize for SchemaInference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_json() {
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in &map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Sample up to `sample_size` records from `source` and infer their schema.
///
/// Zero records yields [`SchemaInference::Empty`]. A read failure propagates
/// unchanged and no partial schema is produced.
pub async fn infer_schema<S>(source: &S, sample_size: usize) -> Result<SchemaInference, StoreError>
where
    S: RecordSource + ?Sized,
{
    let sample_size =
        validate_sample_size(sample_size).map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

    let mut records = source.read_sample(sample_size).await?;
    records.truncate(sample_size);

    tracing::debug!(records = records.len(), sample_size, "Sampled records for schema inference");
    Ok(SchemaInference::from_records(&records))
}
