//! Structured observability hooks for the batch lifecycle.
//!
//! Every emitter logs a single `tracing` event with a stable `event` field
//! (`batch.started`, `unit.finished`, `archive.written`, ...). Output format
//! and filtering are decided by the subscriber, see [`crate::telemetry`].

use std::path::Path;

use tracing::{info, warn};

use crate::report::BuildOutcome;

/// Span tagged with the batch id.
pub fn batch_span(batch_id: &str) -> tracing::Span {
    tracing::info_span!("udf.batch", batch_id = %batch_id)
}

pub fn emit_batch_started(batch_id: &str, definitions: usize, workers: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        definitions = definitions,
        workers = workers,
    );
}

pub fn emit_definition_rejected(index: usize, class_name: &str, reason: &str) {
    warn!(
        event = "definition.rejected",
        index = index,
        class_name = %class_name,
        reason = %reason,
    );
}

pub fn emit_unit_finished(index: usize, outcome: &BuildOutcome, duration_ms: u64) {
    match outcome {
        BuildOutcome::Compiled(unit) => info!(
            event = "unit.finished",
            index = index,
            class_name = %unit.class_name,
            dialect = %unit.dialect,
            entries = unit.entries.len(),
            duration_ms = duration_ms,
            success = true,
        ),
        BuildOutcome::Failed(failure) => warn!(
            event = "unit.finished",
            index = index,
            class_name = %failure.class_name,
            kind = %failure.kind,
            reason = %failure.reason,
            duration_ms = duration_ms,
            success = false,
        ),
    }
}

pub fn emit_archive_written(path: &Path, classes: usize, size_bytes: u64, digest: &str) {
    info!(
        event = "archive.written",
        path = %path.display(),
        classes = classes,
        size_bytes = size_bytes,
        digest = %digest,
    );
}

/// Nothing compiled; the previous archive (if any) stays in place.
pub fn emit_archive_skipped(path: &Path) {
    warn!(event = "archive.skipped", path = %path.display());
}

pub fn emit_batch_cancelled(batch_id: &str, reason: &str, in_flight: usize) {
    warn!(
        event = "batch.cancelled",
        batch_id = %batch_id,
        reason = %reason,
        in_flight = in_flight,
    );
}

pub fn emit_batch_finished(batch_id: &str, success: usize, failed: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        success = success,
        failed = failed,
        duration_ms = duration_ms,
    );
}
