//! Per-unit outcomes and the batch report.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::JarArtifact;
use crate::dialect::CompiledUnit;
use crate::error::{CompileFailure, FailureKind};

/// Why a unit ended up in the failed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub class_name: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl UnitFailure {
    pub fn new(class_name: impl Into<String>, failure: CompileFailure) -> Self {
        Self {
            class_name: class_name.into(),
            kind: failure.kind,
            reason: failure.reason,
        }
    }
}

/// Terminal state of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Compiled(CompiledUnit),
    Failed(UnitFailure),
}

impl BuildOutcome {
    pub fn class_name(&self) -> &str {
        match self {
            BuildOutcome::Compiled(unit) => &unit.class_name,
            BuildOutcome::Failed(failure) => &failure.class_name,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, BuildOutcome::Compiled(_))
    }
}

/// Outcome of one unit together with its submission position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitResult {
    pub index: usize,
    pub outcome: BuildOutcome,
    pub duration_ms: u64,
}

/// The two-bucket report handed back to the management layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub success: Vec<String>,
    pub failed: Vec<String>,
}

impl BuildReport {
    pub fn total(&self) -> usize {
        self.success.len() + self.failed.len()
    }
}

/// Everything a successful batch invocation returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    pub batch_id: String,
    pub report: BuildReport,
    /// Kind and reason for each entry of `report.failed`, same order.
    pub failures: Vec<UnitFailure>,
    /// `None` when nothing compiled and no archive was written.
    pub archive: Option<JarArtifact>,
    /// The configured archive location, written or not.
    pub output_path: PathBuf,
    pub duration_ms: u64,
}

impl BuildOutput {
    /// Human-readable one-paragraph summary for the management layer.
    pub fn summary(&self) -> String {
        let location = match &self.archive {
            Some(_) => format!("udf jar written to {}", self.output_path.display()),
            None => format!(
                "no class compiled, udf jar at {} left unchanged",
                self.output_path.display()
            ),
        };
        format!(
            "{location};\nsucceeded ({}): [{}]\nfailed ({}): [{}]",
            self.report.success.len(),
            self.report.success.join(", "),
            self.report.failed.len(),
            self.report.failed.join(", ")
        )
    }
}

/// Fold per-unit results into the report and failure details.
///
/// `results` may be in any order; both lists come out in submission order.
pub fn aggregate(mut results: Vec<UnitResult>) -> (BuildReport, Vec<UnitFailure>, Vec<CompiledUnit>) {
    results.sort_by_key(|r| r.index);

    let mut report = BuildReport::default();
    let mut failures = Vec::new();
    let mut compiled = Vec::new();
    for result in results {
        match result.outcome {
            BuildOutcome::Compiled(unit) => {
                report.success.push(unit.class_name.clone());
                compiled.push(unit);
            }
            BuildOutcome::Failed(failure) => {
                report.failed.push(failure.class_name.clone());
                failures.push(failure);
            }
        }
    }
    (report, failures, compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Dialect;
    use crate::dialect::ArchiveEntry;

    fn compiled(index: usize, class_name: &str) -> UnitResult {
        UnitResult {
            index,
            outcome: BuildOutcome::Compiled(CompiledUnit {
                class_name: class_name.to_string(),
                dialect: Dialect::Java,
                entries: vec![ArchiveEntry::new(
                    format!("{}.class", class_name.replace('.', "/")),
                    b"x".to_vec(),
                )],
            }),
            duration_ms: 1,
        }
    }

    fn failed(index: usize, class_name: &str, kind: FailureKind) -> UnitResult {
        UnitResult {
            index,
            outcome: BuildOutcome::Failed(UnitFailure::new(
                class_name,
                CompileFailure::new(kind, "boom"),
            )),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_aggregate_restores_submission_order() {
        let results = vec![
            compiled(3, "D"),
            failed(1, "B", FailureKind::CompileError),
            compiled(0, "A"),
            failed(2, "C", FailureKind::Timeout),
        ];
        let (report, failures, units) = aggregate(results);
        assert_eq!(report.success, vec!["A", "D"]);
        assert_eq!(report.failed, vec!["B", "C"]);
        assert_eq!(report.total(), 4);
        assert_eq!(failures[1].kind, FailureKind::Timeout);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].class_name, "A");
    }

    #[test]
    fn test_aggregate_empty() {
        let (report, failures, units) = aggregate(Vec::new());
        assert_eq!(report, BuildReport::default());
        assert!(failures.is_empty());
        assert!(units.is_empty());
    }

    #[test]
    fn test_report_serializes_two_buckets() {
        let report = BuildReport {
            success: vec!["A".into()],
            failed: vec!["B".into()],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"success": ["A"], "failed": ["B"]}));
    }

    #[test]
    fn test_summary_mentions_path_and_counts() {
        let output = BuildOutput {
            batch_id: "b1".into(),
            report: BuildReport {
                success: vec!["A".into(), "C".into()],
                failed: vec!["B".into()],
            },
            failures: Vec::new(),
            archive: None,
            output_path: PathBuf::from("/tmp/udf/udf.jar"),
            duration_ms: 5,
        };
        let summary = output.summary();
        assert!(summary.contains("/tmp/udf/udf.jar"));
        assert!(summary.contains("left unchanged"));
        assert!(summary.contains("succeeded (2): [A, C]"));
        assert!(summary.contains("failed (1): [B]"));
    }
}
