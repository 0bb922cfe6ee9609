//! UDF Build - compile user-defined functions into one deployable JAR
//!
//! Provides a batch pipeline that:
//! - Normalizes function definitions into compilation units
//! - Dispatches each unit to its dialect's compiler in an isolated workspace
//! - Packs every successful unit into a single atomically replaced archive
//! - Reports which classes succeeded and which failed, in submission order

pub mod archive;
pub mod config;
pub mod definition;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use archive::{ArchiveAssembler, JarArtifact, CLASS_INDEX_PATH, MANIFEST_PATH};
pub use config::{BuildConfig, ToolchainConfig};
pub use definition::{normalize, CompilationUnit, Dialect, FunctionDefinition, Normalized};
pub use dialect::{ArchiveEntry, CompiledUnit, CompilerRegistry, DialectCompiler};
pub use error::{BuildError, BuildResult, CompileFailure, ConfigError, FailureKind};
pub use executor::{CancelHandle, CancelSignal, IsolatedExecutor};
pub use pipeline::UdfJarBuilder;
pub use report::{BuildOutcome, BuildOutput, BuildReport, UnitFailure, UnitResult};
pub use telemetry::init_tracing;
pub use workspace::UnitWorkspace;
