//! Per-unit scratch directories.
//!
//! A [`UnitWorkspace`] owns a temporary directory for exactly one unit.
//! Dropping it removes the directory, so cleanup happens on every exit path
//! of the unit's task, including timeout and abort.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::definition::CompilationUnit;
use crate::error::CompileFailure;

#[derive(Debug)]
pub struct UnitWorkspace {
    dir: TempDir,
}

impl UnitWorkspace {
    /// Allocate a fresh directory under `root` for `unit`.
    pub fn allocate(root: &Path, unit: &CompilationUnit) -> Result<Self, CompileFailure> {
        std::fs::create_dir_all(root).map_err(|e| {
            CompileFailure::workspace(format!(
                "cannot create workspace root {}: {e}",
                root.display()
            ))
        })?;
        let prefix = format!("udf-{:04}-{}-", unit.index, unit.simple_name());
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .map_err(|e| {
                CompileFailure::workspace(format!(
                    "cannot allocate workspace for {}: {e}",
                    unit.class_name
                ))
            })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting any failure. Dropping the
    /// workspace instead removes it silently.
    pub fn release(self) -> Result<(), CompileFailure> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            CompileFailure::workspace(format!("cannot release {}: {e}", path.display()))
        })
    }

    /// Directory holding generated or copied sources.
    pub fn src_dir(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    /// Directory the JVM toolchains write class files into.
    pub fn classes_dir(&self) -> PathBuf {
        self.dir.path().join("classes")
    }

    /// Write `contents` to `relative` inside the workspace, creating parents.
    pub fn write_file(&self, relative: &Path, contents: &str) -> Result<PathBuf, CompileFailure> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CompileFailure::workspace(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(&path, contents).map_err(|e| {
            CompileFailure::workspace(format!("cannot write {}: {e}", path.display()))
        })?;
        Ok(path)
    }
}
