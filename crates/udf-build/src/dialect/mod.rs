//! Dialect compiler dispatch.
//!
//! Every supported dialect is a [`DialectCompiler`] registered in a
//! [`CompilerRegistry`]. Dispatch is a lookup by [`Dialect`]; supporting a
//! new dialect means registering one more strategy.
//!
//! # Modules
//!
//! - [`jvm`]    — `JvmCompiler` for Java and Scala via an external toolchain
//! - [`python`] — `PythonCompiler`, validates and wraps scripts
//! - [`sql`]    — `SqlFunctionCompiler`, lowers expressions to a Java class
//! - [`scan`]   — delimiter/comment/literal scanner shared by the above

pub mod jvm;
pub mod python;
mod scan;
pub mod sql;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BuildConfig;
use crate::definition::{CompilationUnit, Dialect};
use crate::error::{CompileFailure, FailureKind};
use crate::workspace::UnitWorkspace;

pub use jvm::{JvmCompiler, JvmLanguage};
pub use python::PythonCompiler;
pub use sql::SqlFunctionCompiler;

/// A file destined for the archive, addressed by its path inside the JAR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    pub class_name: String,
    pub dialect: Dialect,
    pub entries: Vec<ArchiveEntry>,
}

impl CompiledUnit {
    pub fn size_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.bytes.len()).sum()
    }
}

/// One compilation strategy.
#[async_trait]
pub trait DialectCompiler: Send + Sync {
    /// The dialect this strategy handles.
    fn dialect(&self) -> Dialect;

    /// Compile `unit` inside `workspace`.
    async fn compile(
        &self,
        unit: &CompilationUnit,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure>;
}

/// Dialect → strategy table.
#[derive(Clone, Default)]
pub struct CompilerRegistry {
    compilers: HashMap<Dialect, Arc<dyn DialectCompiler>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategy for every dialect.
    pub fn from_config(config: &BuildConfig) -> Self {
        let java = Arc::new(JvmCompiler::new(JvmLanguage::Java, config.java.clone()));
        let scala = Arc::new(JvmCompiler::new(JvmLanguage::Scala, config.scala.clone()));
        let python = Arc::new(PythonCompiler::new(config.python.clone()));
        let sql = Arc::new(SqlFunctionCompiler::new(java.clone()));

        Self::new().with(java).with(scala).with(python).with(sql)
    }

    /// Add a strategy, replacing and returning any previous one for the same dialect.
    pub fn register(
        &mut self,
        compiler: Arc<dyn DialectCompiler>,
    ) -> Option<Arc<dyn DialectCompiler>> {
        self.compilers.insert(compiler.dialect(), compiler)
    }

    pub fn with(mut self, compiler: Arc<dyn DialectCompiler>) -> Self {
        self.register(compiler);
        self
    }

    pub fn get(&self, dialect: Dialect) -> Option<&Arc<dyn DialectCompiler>> {
        self.compilers.get(&dialect)
    }

    /// Registered dialects, sorted.
    pub fn dialects(&self) -> Vec<Dialect> {
        let mut dialects: Vec<_> = self.compilers.keys().copied().collect();
        dialects.sort();
        dialects
    }

    /// Select the strategy for `unit.dialect` and run it.
    pub async fn dispatch(
        &self,
        unit: &CompilationUnit,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure> {
        let compiler = self.get(unit.dialect).ok_or_else(|| {
            CompileFailure::new(
                FailureKind::UnsupportedDialect,
                format!("no compiler registered for dialect '{}'", unit.dialect),
            )
        })?;

        let compiled = compiler.compile(unit, workspace).await?;
        if compiled.entries.is_empty() {
            return Err(CompileFailure::compile(format!(
                "{} compiler produced no output for {}",
                unit.dialect, unit.class_name
            )));
        }
        Ok(compiled)
    }
}

impl fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("dialects", &self.dialects())
            .finish()
    }
}
