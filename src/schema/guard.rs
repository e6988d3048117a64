//! Pre-write schema check shared by the table tools.

use crate::models::Record;
use crate::schema::{
    infer_schema, validate, OnViolation, SchemaInference, ValidationReport,
    DEFAULT_VALIDATION_SAMPLE_SIZE,
};
use crate::stores::{StoreError, TableSample, TableStore};
use crate::utils::{CacheResult, SchemaCache};

/// A write refused under [`OnViolation::Reject`]
#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    /// The candidate failed validation
    #[error("Write rejected by schema validation: {}", .0.error_summary())]
    Rejected(ValidationReport),

    /// The table could not be sampled, so the candidate could not be checked
    #[error("Write rejected: schema inference failed: {0}")]
    Unverified(String),
}

impl SchemaViolation {
    /// The failing report, when validation ran
    pub fn into_report(self) -> Option<ValidationReport> {
        match self {
            SchemaViolation::Rejected(report) => Some(report),
            SchemaViolation::Unverified(_) => None,
        }
    }
}

/// Infers, caches and validates against table schemas before writes.
#[derive(Debug)]
pub struct SchemaGuard {
    cache: SchemaCache,
    validation_sample_size: usize,
    on_violation: OnViolation,
}

impl Default for SchemaGuard {
    fn default() -> Self {
        Self::new(
            DEFAULT_VALIDATION_SAMPLE_SIZE,
            OnViolation::default(),
            SchemaCache::disabled(),
        )
    }
}

impl SchemaGuard {
    pub fn new(validation_sample_size: usize, on_violation: OnViolation, cache: SchemaCache) -> Self {
        Self {
            cache,
            validation_sample_size,
            on_violation,
        }
    }

    pub fn on_violation(&self) -> OnViolation {
        self.on_violation
    }

    pub fn validation_sample_size(&self) -> usize {
        self.validation_sample_size
    }

    /// Infer the schema of `table`, consulting the cache first.
    ///
    /// A sample that overlaps an [`SchemaGuard::invalidate`] of the same
    /// table is returned to the caller but not cached.
    pub async fn infer(
        &self,
        store: &dyn TableStore,
        table: &str,
        sample_size: usize,
    ) -> Result<SchemaInference, StoreError> {
        if let CacheResult::Hit(inference) = self.cache.get(table, sample_size) {
            return Ok(inference);
        }

        let generation = self.cache.generation(table);
        let inference = infer_schema(&TableSample::new(store, table), sample_size).await?;
        self.cache
            .insert(table, sample_size, generation, inference.clone());
        Ok(inference)
    }

    /// Validate `candidate` against the current schema of `table`.
    ///
    /// Under `warn` this never fails; an unreadable table yields a skipped,
    /// passing report. Under `reject` it fails when the report has errors or
    /// when the table could not be sampled.
    pub async fn check(
        &self,
        store: &dyn TableStore,
        table: &str,
        candidate: &Record,
    ) -> Result<ValidationReport, SchemaViolation> {
        let inference = self.infer(store, table, self.validation_sample_size).await;
        self.check_against(table, inference.as_ref(), candidate)
    }

    /// Like [`SchemaGuard::check`] with an inference result obtained up front,
    /// so a batch can share one sample.
    pub fn check_against(
        &self,
        table: &str,
        inference: Result<&SchemaInference, &StoreError>,
        candidate: &Record,
    ) -> Result<ValidationReport, SchemaViolation> {
        let report = match inference {
            Ok(inference) => validate(inference, candidate),
            Err(e) if self.on_violation == OnViolation::Reject => {
                tracing::warn!(table, error = %e, "Schema inference failed, refusing write");
                return Err(SchemaViolation::Unverified(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(table, error = %e, "Schema inference failed, skipping validation");
                ValidationReport::skipped(format!("schema inference failed: {}", e))
            }
        };

        if !report.passed() {
            tracing::debug!(
                table,
                errors = report.errors().len(),
                policy = ?self.on_violation,
                "Candidate does not conform to inferred schema"
            );
            if self.on_violation == OnViolation::Reject {
                return Err(SchemaViolation::Rejected(report));
            }
        }

        Ok(report)
    }

    /// Forget any cached schema for `table` after it was mutated
    pub fn invalidate(&self, table: &str) {
        self.cache.invalidate(table);
    }
}
