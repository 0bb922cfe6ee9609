//! Batch orchestration: normalize → compile in isolation → assemble → report.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use crate::archive::{reject_entry_conflicts, ArchiveAssembler};
use crate::config::BuildConfig;
use crate::definition::{normalize, FunctionDefinition, Normalized};
use crate::dialect::CompilerRegistry;
use crate::error::{BuildError, BuildResult};
use crate::executor::{CancelSignal, IsolatedExecutor};
use crate::obs;
use crate::report::{aggregate, BuildOutcome, BuildOutput, UnitFailure, UnitResult};

/// Entry point of the pipeline.
///
/// Cheap to clone; clones share the compiler registry and the archive lock,
/// so concurrent `build` calls may run from any number of tasks.
#[derive(Debug, Clone)]
pub struct UdfJarBuilder {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: BuildConfig,
    executor: IsolatedExecutor,
    assembler: ArchiveAssembler,
}

impl UdfJarBuilder {
    /// Builder with the built-in compiler for every dialect.
    pub fn new(config: BuildConfig) -> BuildResult<Self> {
        let registry = CompilerRegistry::from_config(&config);
        Self::with_registry(config, registry)
    }

    /// Builder with a caller-supplied set of compiler strategies.
    pub fn with_registry(config: BuildConfig, registry: CompilerRegistry) -> BuildResult<Self> {
        config.validate()?;
        let executor = IsolatedExecutor::new(
            Arc::new(registry),
            config.workspace_root.clone(),
            config.max_workers,
            config.unit_timeout(),
        )
        .with_batch_timeout(config.batch_timeout());
        let assembler = ArchiveAssembler::new(config.output_path.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                executor,
                assembler,
            }),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.inner.config
    }

    pub fn output_path(&self) -> &Path {
        self.inner.assembler.output_path()
    }

    /// Build a batch with no external cancellation.
    pub async fn build(&self, definitions: &[FunctionDefinition]) -> BuildResult<BuildOutput> {
        self.build_with_cancel(definitions, CancelSignal::never())
            .await
    }

    /// Build a batch, aborting with [`BuildError::Cancelled`] if `cancel`
    /// fires before every unit has finished.
    pub async fn build_with_cancel(
        &self,
        definitions: &[FunctionDefinition],
        cancel: CancelSignal,
    ) -> BuildResult<BuildOutput> {
        let batch_id = Uuid::new_v4().to_string();
        let span = obs::batch_span(&batch_id);
        self.run_batch(batch_id, definitions, cancel)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        batch_id: String,
        definitions: &[FunctionDefinition],
        cancel: CancelSignal,
    ) -> BuildResult<BuildOutput> {
        let start = Instant::now();
        obs::emit_batch_started(&batch_id, definitions.len(), self.inner.executor.max_workers());

        let mut results: Vec<UnitResult> = Vec::with_capacity(definitions.len());
        let mut ready = Vec::new();
        for normalized in normalize(definitions) {
            match normalized {
                Normalized::Ready(unit) => ready.push(unit),
                Normalized::Rejected {
                    index,
                    class_name,
                    failure,
                } => {
                    obs::emit_definition_rejected(index, &class_name, &failure.reason);
                    results.push(UnitResult {
                        index,
                        outcome: BuildOutcome::Failed(UnitFailure::new(class_name, failure)),
                        duration_ms: 0,
                    });
                }
            }
        }

        let in_flight = ready.len();
        let compiled = match self.inner.executor.run(ready, cancel).await {
            Ok(compiled) => compiled,
            Err(err) => {
                if let BuildError::Cancelled { reason } = &err {
                    obs::emit_batch_cancelled(&batch_id, reason, in_flight);
                }
                return Err(err);
            }
        };
        results.extend(compiled);
        reject_entry_conflicts(&mut results);

        let (report, failures, units) = aggregate(results);
        let archive = self.inner.assembler.assemble(units).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_batch_finished(
            &batch_id,
            report.success.len(),
            report.failed.len(),
            duration_ms,
        );

        Ok(BuildOutput {
            batch_id,
            report,
            failures,
            archive,
            output_path: self.inner.assembler.output_path().to_path_buf(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::ToolchainConfig;
    use crate::definition::{CompilationUnit, Dialect};
    use crate::dialect::{ArchiveEntry, CompiledUnit, DialectCompiler};
    use crate::error::{CompileFailure, FailureKind};
    use crate::workspace::UnitWorkspace;

    /// Emits the unit's class plus a package-level `Helper.class` whose
    /// bytes are the unit's source text.
    struct HelperEmitter;

    #[async_trait]
    impl DialectCompiler for HelperEmitter {
        fn dialect(&self) -> Dialect {
            Dialect::Java
        }

        async fn compile(
            &self,
            unit: &CompilationUnit,
            _workspace: &UnitWorkspace,
        ) -> Result<CompiledUnit, CompileFailure> {
            Ok(CompiledUnit {
                class_name: unit.class_name.clone(),
                dialect: Dialect::Java,
                entries: vec![
                    ArchiveEntry::new(
                        format!("{}.class", unit.class_name.replace('.', "/")),
                        unit.class_name.as_bytes().to_vec(),
                    ),
                    ArchiveEntry::new("p/Helper.class", unit.code.as_bytes().to_vec()),
                ],
            })
        }
    }

    fn config(dir: &Path) -> BuildConfig {
        BuildConfig {
            output_path: dir.join("out").join("udf.jar"),
            workspace_root: dir.join("work"),
            max_workers: 2,
            unit_timeout_ms: 5_000,
            batch_timeout_ms: None,
            java: ToolchainConfig::new("/nonexistent/javac"),
            scala: ToolchainConfig::new("/nonexistent/scalac"),
            python: None,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_workers = 0;
        assert!(matches!(
            UdfJarBuilder::new(cfg),
            Err(BuildError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let builder = UdfJarBuilder::new(config(dir.path())).unwrap();

        let output = builder.build(&[]).await.unwrap();
        assert_eq!(output.report.total(), 0);
        assert!(output.archive.is_none());
        assert!(!builder.output_path().exists());
    }

    #[tokio::test]
    async fn test_rejected_and_compiled_units_share_one_report() {
        let dir = tempfile::tempdir().unwrap();
        let builder = UdfJarBuilder::new(config(dir.path())).unwrap();

        let defs = vec![
            FunctionDefinition::new("bad name", Dialect::Python, "def x(): pass"),
            FunctionDefinition::new("udfs.lower", Dialect::Python, "def lower(s):\n    return s.lower()\n"),
            FunctionDefinition::new("udfs.Upper", Dialect::Java, "public class Upper {}"),
        ];
        let output = builder.build(&defs).await.unwrap();

        assert_eq!(output.report.success, vec!["udfs.lower"]);
        assert_eq!(output.report.failed, vec!["bad name", "udfs.Upper"]);
        assert_eq!(output.failures[0].kind, FailureKind::InvalidDefinition);
        assert_eq!(output.failures[1].kind, FailureKind::CompileError);
        let archive = output.archive.unwrap();
        assert_eq!(archive.classes, vec!["udfs.lower"]);
        assert_eq!(archive.path, builder.output_path());
    }

    #[tokio::test]
    async fn test_clones_share_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let builder = UdfJarBuilder::new(config(dir.path())).unwrap();
        let clone = builder.clone();
        assert_eq!(clone.output_path(), builder.output_path());
        assert_eq!(clone.config().max_workers, 2);
    }

    #[tokio::test]
    async fn test_clashing_helper_class_fails_later_unit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompilerRegistry::new().with(Arc::new(HelperEmitter));
        let builder = UdfJarBuilder::with_registry(config(dir.path()), registry).unwrap();

        let defs = vec![
            FunctionDefinition::new("p.A", Dialect::Java, "helper v1"),
            FunctionDefinition::new("p.B", Dialect::Java, "helper v2"),
            FunctionDefinition::new("p.C", Dialect::Java, "helper v1"),
        ];
        let output = builder.build(&defs).await.unwrap();

        assert_eq!(output.report.success, vec!["p.A", "p.C"]);
        assert_eq!(output.report.failed, vec!["p.B"]);
        assert_eq!(output.failures[0].kind, FailureKind::CompileError);
        assert!(output.failures[0].reason.contains("p/Helper.class"));

        let archive = output.archive.unwrap();
        assert_eq!(archive.classes, vec!["p.A", "p.C"]);
        let names = archive.entry_names().unwrap();
        assert!(!names.contains(&"p/B.class".to_string()));
    }
}
