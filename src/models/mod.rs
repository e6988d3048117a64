//! Core data models for table records and tool responses.

mod record;
mod response;

pub use record::{record_from_json, record_to_json, FieldValue, Record, ValueKind};
pub use response::ToolResponse;
