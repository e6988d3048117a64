//! Advisory validation of a candidate record against an inferred schema.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::models::{Record, ValueKind};
use crate::schema::{InferredSchema, SchemaInference};

/// What to do with a write whose validation report fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnViolation {
    /// Attach the report and write anyway
    #[default]
    Warn,
    /// Refuse the write
    Reject,
}

impl std::str::FromStr for OnViolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warn" => Ok(OnViolation::Warn),
            "reject" => Ok(OnViolation::Reject),
            other => Err(format!("unknown violation policy '{}', expected 'warn' or 'reject'", other)),
        }
    }
}

/// One deviation of a candidate record from the schema
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    /// A required field is absent from the candidate
    MissingRequired { field: String, presence: f64 },
    /// The candidate's value kind was never observed for this field
    TypeMismatch {
        field: String,
        expected: Vec<ValueKind>,
        actual: ValueKind,
    },
    /// The candidate introduces a field the sample never had
    NewField { field: String },
}

impl ValidationIssue {
    /// Field the issue refers to
    pub fn field(&self) -> &str {
        match self {
            ValidationIssue::MissingRequired { field, .. }
            | ValidationIssue::TypeMismatch { field, .. }
            | ValidationIssue::NewField { field } => field,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ValidationIssue::MissingRequired { .. } => "missing_required",
            ValidationIssue::TypeMismatch { .. } => "type_mismatch",
            ValidationIssue::NewField { .. } => "new_field",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingRequired { field, presence } => write!(
                f,
                "expected field missing: '{}' (present in {}% of existing records)",
                field,
                (presence * 100.0).round() as u32
            ),
            ValidationIssue::TypeMismatch {
                field,
                expected,
                actual,
            } => {
                let expected: Vec<&str> = expected.iter().map(|k| k.as_str()).collect();
                write!(
                    f,
                    "type mismatch for '{}': expected {}, got {}",
                    field,
                    expected.join(" or "),
                    actual
                )
            }
            ValidationIssue::NewField { field } => {
                write!(f, "new property: '{}' (not present in existing records)", field)
            }
        }
    }
}

impl Serialize for ValidationIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("field", self.field())?;
        match self {
            ValidationIssue::MissingRequired { presence, .. } => {
                map.serialize_entry("presence", presence)?;
            }
            ValidationIssue::TypeMismatch {
                expected, actual, ..
            } => {
                map.serialize_entry("expected", expected)?;
                map.serialize_entry("actual", actual)?;
            }
            ValidationIssue::NewField { .. } => {}
        }
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}

/// Property counts of the schema a record was checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    pub total_properties: usize,
    pub required_properties: usize,
    pub optional_properties: usize,
}

impl From<&InferredSchema> for SchemaInfo {
    fn from(schema: &InferredSchema) -> Self {
        let required = schema.common_properties().len();
        Self {
            total_properties: schema.fields().len(),
            required_properties: required,
            optional_properties: schema.fields().len() - required,
        }
    }
}

/// Result of validating one candidate record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    conforms_to_schema: bool,
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_info: Option<SchemaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl ValidationReport {
    fn new(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            conforms_to_schema: errors.is_empty(),
            errors,
            warnings,
            schema_info: None,
            note: None,
        }
    }

    /// Passing report for a table with nothing to conform to
    pub fn empty_table() -> Self {
        let mut report = Self::new(Vec::new(), Vec::new());
        report.note = Some("Table is empty; no schema to validate against".to_string());
        report
    }

    /// Passing report used when the schema could not be inferred
    pub fn skipped(reason: impl Into<String>) -> Self {
        let mut report = Self::new(Vec::new(), Vec::new());
        report.note = Some(format!("Validation skipped: {}", reason.into()));
        report
    }

    /// True when there are no errors. Warnings never fail validation.
    pub fn passed(&self) -> bool {
        self.conforms_to_schema
    }

    pub fn errors(&self) -> &[ValidationIssue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn schema_info(&self) -> Option<&SchemaInfo> {
        self.schema_info.as_ref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Error messages joined for a single-line rejection
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Check `candidate` against an inference result.
pub fn validate(inference: &SchemaInference, candidate: &Record) -> ValidationReport {
    let schema = match inference {
        SchemaInference::Empty => return ValidationReport::empty_table(),
        SchemaInference::Inferred(schema) => schema,
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (name, profile) in schema.fields() {
        if profile.required && !candidate.contains_key(name) {
            warnings.push(ValidationIssue::MissingRequired {
                field: name.clone(),
                presence: profile.presence,
            });
        }
    }

    for (name, value) in candidate {
        match schema.field(name) {
            Some(profile) => {
                let actual = value.kind();
                if !profile.accepts(actual) {
                    errors.push(ValidationIssue::TypeMismatch {
                        field: name.clone(),
                        expected: profile.observed_types.iter().copied().collect(),
                        actual,
                    });
                }
            }
            None => warnings.push(ValidationIssue::NewField {
                field: name.clone(),
            }),
        }
    }

    let mut report = ValidationReport::new(errors, warnings);
    report.schema_info = Some(SchemaInfo::from(schema));
    report
}
