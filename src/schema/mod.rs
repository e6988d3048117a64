//! Schema inference and record validation for schema-less tables.
//!
//! Inference samples existing records through a [`crate::stores::RecordSource`]
//! and builds a per-field profile (frequency, presence ratio, observed kinds).
//! Validation compares a candidate record against that profile and reports
//! missing required fields and new fields as warnings, type mismatches as
//! errors. [`SchemaGuard`] ties the two together for the write path.

mod guard;
mod inference;
mod validation;

pub use guard::{SchemaGuard, SchemaViolation};
pub use inference::{
    infer_schema, FieldProfile, InferredSchema, SchemaInference, DEFAULT_INFERENCE_SAMPLE_SIZE,
    DEFAULT_VALIDATION_SAMPLE_SIZE, MAX_EXAMPLES, REQUIRED_PRESENCE_THRESHOLD,
};
pub use validation::{validate, OnViolation, SchemaInfo, ValidationIssue, ValidationReport};
