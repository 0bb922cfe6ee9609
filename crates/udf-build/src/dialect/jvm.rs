//! Java and Scala compilation through an external toolchain.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use super::scan::{scan, Syntax};
use super::{ArchiveEntry, CompiledUnit, DialectCompiler};
use crate::config::ToolchainConfig;
use crate::definition::{CompilationUnit, Dialect};
use crate::error::CompileFailure;
use crate::workspace::UnitWorkspace;

/// Longest diagnostic kept from toolchain output.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JvmLanguage {
    Java,
    Scala,
}

impl JvmLanguage {
    fn dialect(&self) -> Dialect {
        match self {
            JvmLanguage::Java => Dialect::Java,
            JvmLanguage::Scala => Dialect::Scala,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            JvmLanguage::Java => "java",
            JvmLanguage::Scala => "scala",
        }
    }

    /// Keywords that may introduce the UDF's top-level type.
    fn declaration_keywords(&self) -> &'static str {
        match self {
            JvmLanguage::Java => "class",
            JvmLanguage::Scala => "class|object",
        }
    }
}

/// Compiles a single JVM source file with `javac` or `scalac`.
#[derive(Debug, Clone)]
pub struct JvmCompiler {
    language: JvmLanguage,
    toolchain: ToolchainConfig,
}

impl JvmCompiler {
    pub fn new(language: JvmLanguage, toolchain: ToolchainConfig) -> Self {
        Self {
            language,
            toolchain,
        }
    }

    pub fn language(&self) -> JvmLanguage {
        self.language
    }

    /// Compile `source` as the body of `unit`.
    ///
    /// Used directly by strategies that generate JVM source from another
    /// dialect.
    pub async fn compile_source(
        &self,
        unit: &CompilationUnit,
        source: &str,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure> {
        self.precheck(unit, source)?;

        let relative_source = source_path(unit, self.language.extension());
        workspace.write_file(&relative_source, source)?;
        let classes = workspace.classes_dir();
        std::fs::create_dir_all(&classes).map_err(|e| {
            CompileFailure::workspace(format!("cannot create {}: {e}", classes.display()))
        })?;

        self.run_toolchain(workspace.path(), &relative_source).await?;

        let entries = collect_class_files(&classes)
            .map_err(|e| CompileFailure::workspace(format!("cannot read class output: {e}")))?;
        let expected = format!("{}.class", unit.class_name.replace('.', "/"));
        if !entries.iter().any(|e| e.path == expected) {
            return Err(CompileFailure::compile(format!(
                "{} produced no {expected}",
                self.toolchain.program
            )));
        }

        Ok(CompiledUnit {
            class_name: unit.class_name.clone(),
            dialect: unit.dialect,
            entries,
        })
    }

    /// Structural checks that need no toolchain.
    fn precheck(&self, unit: &CompilationUnit, source: &str) -> Result<(), CompileFailure> {
        let code = scan(source, Syntax::CLike).map_err(CompileFailure::compile)?;

        let declaration = Regex::new(&format!(
            r"\b({})\s+{}\b",
            self.language.declaration_keywords(),
            regex::escape(unit.simple_name())
        ))
        .map_err(|e| CompileFailure::compile(e.to_string()))?;
        if !declaration.is_match(&code) {
            return Err(CompileFailure::compile(format!(
                "source does not declare {} {}",
                self.language.declaration_keywords().replace('|', " or "),
                unit.simple_name()
            )));
        }

        let package_re = Regex::new(r"(?m)^\s*package\s+([A-Za-z_$][A-Za-z0-9_$.]*)")
            .map_err(|e| CompileFailure::compile(e.to_string()))?;
        let declared = package_re
            .captures(&code)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        if declared != unit.package() {
            return Err(CompileFailure::compile(format!(
                "source declares package {} but class name {} expects {}",
                declared.unwrap_or("<default>"),
                unit.class_name,
                unit.package().unwrap_or("<default>")
            )));
        }
        Ok(())
    }

    async fn run_toolchain(&self, cwd: &Path, source: &Path) -> Result<(), CompileFailure> {
        let start = Instant::now();
        let output = Command::new(&self.toolchain.program)
            .args(&self.toolchain.args)
            .arg("-d")
            .arg("classes")
            .arg(source)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CompileFailure::compile(format!(
                    "failed to launch {}: {e}",
                    self.toolchain.program
                ))
            })?
            .wait_with_output()
            .await
            .map_err(|e| CompileFailure::workspace(format!("toolchain I/O failed: {e}")))?;

        debug!(
            program = %self.toolchain.program,
            source = %source.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            status = %output.status,
            "toolchain finished"
        );

        if output.status.success() {
            return Ok(());
        }
        Err(CompileFailure::compile(diagnostic(
            &self.toolchain.program,
            &output,
        )))
    }
}

#[async_trait]
impl DialectCompiler for JvmCompiler {
    fn dialect(&self) -> Dialect {
        self.language.dialect()
    }

    async fn compile(
        &self,
        unit: &CompilationUnit,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure> {
        self.compile_source(unit, &unit.code, workspace).await
    }
}

/// `src/com/acme/Upper.java` for `com.acme.Upper`.
fn source_path(unit: &CompilationUnit, extension: &str) -> PathBuf {
    let mut path = PathBuf::from("src");
    if let Some(pkg) = unit.package() {
        path.extend(pkg.split('.'));
    }
    path.push(format!("{}.{extension}", unit.simple_name()));
    path
}

/// Every `.class` file under `root`, keyed by its `/`-separated relative path.
fn collect_class_files(root: &Path) -> std::io::Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for item in std::fs::read_dir(&dir)? {
            let path = item?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "class") {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push(ArchiveEntry::new(name, std::fs::read(&path)?));
            }
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Reason text for a failed toolchain run: stderr, else stdout, else the
/// exit status. Capped at [`MAX_DIAGNOSTIC_BYTES`].
pub(crate) fn diagnostic(program: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|t| !t.is_empty());
    match text {
        Some(text) => truncate(text, MAX_DIAGNOSTIC_BYTES),
        None => format!("{program} exited with {}", output.status),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Shell stand-in for `javac`/`scalac` used across this crate's tests.
///
/// Writes `<classes>/<path>.class` for the given source, fails when the
/// source contains `COMPILE_FAIL`, and hangs when it contains `HANG`.
#[cfg(test)]
pub(crate) fn fake_toolchain(dir: &Path) -> ToolchainConfig {
    let script = dir.join("fake-jvmc.sh");
    std::fs::write(
        &script,
        r#"#!/bin/sh
out="$2"
src="$3"
if grep -q 'COMPILE_FAIL' "$src"; then
  echo "$src:1: error: cannot find symbol" >&2
  exit 1
fi
if grep -q 'HANG' "$src"; then
  sleep 30
fi
rel="${src#src/}"
cls="$out/${rel%.*}.class"
mkdir -p "$(dirname "$cls")"
printf 'CAFEBABE %s\n' "$rel" > "$cls"
"#,
    )
    .expect("write fake toolchain");
    ToolchainConfig::new("sh").with_args([script.to_string_lossy().to_string()])
}
