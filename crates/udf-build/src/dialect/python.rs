//! Python UDFs: validated in-process, optionally byte-compiled, then wrapped
//! as a module inside the archive.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::jvm::diagnostic;
use super::scan::{scan, Syntax};
use super::{ArchiveEntry, CompiledUnit, DialectCompiler};
use crate::config::ToolchainConfig;
use crate::definition::{CompilationUnit, Dialect};
use crate::error::CompileFailure;
use crate::workspace::UnitWorkspace;

/// Archive directory holding wrapped Python modules.
pub const PYTHON_ENTRY_ROOT: &str = "udf/py";

#[derive(Debug, Clone, Default)]
pub struct PythonCompiler {
    interpreter: Option<ToolchainConfig>,
}

impl PythonCompiler {
    pub fn new(interpreter: Option<ToolchainConfig>) -> Self {
        Self { interpreter }
    }

    async fn byte_compile(
        &self,
        interpreter: &ToolchainConfig,
        workspace: &UnitWorkspace,
        module: &std::path::Path,
    ) -> Result<(), CompileFailure> {
        let output = Command::new(&interpreter.program)
            .args(&interpreter.args)
            .args(["-m", "py_compile"])
            .arg(module)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CompileFailure::compile(format!("failed to launch {}: {e}", interpreter.program))
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CompileFailure::compile(diagnostic(
                &interpreter.program,
                &output,
            )))
        }
    }
}

#[async_trait]
impl DialectCompiler for PythonCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Python
    }

    async fn compile(
        &self,
        unit: &CompilationUnit,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure> {
        validate(&unit.code, unit.simple_name())?;

        let wrapped = wrap(unit);
        let path = entry_path(&unit.class_name);
        if let Some(interpreter) = &self.interpreter {
            let module = workspace.write_file(&PathBuf::from(&path), &wrapped)?;
            self.byte_compile(interpreter, workspace, &module).await?;
        }

        Ok(CompiledUnit {
            class_name: unit.class_name.clone(),
            dialect: Dialect::Python,
            entries: vec![ArchiveEntry::new(path, wrapped.into_bytes())],
        })
    }
}

/// `udf/py/my_udfs/lower.py` for `my_udfs.lower`.
pub fn entry_path(class_name: &str) -> String {
    format!("{PYTHON_ENTRY_ROOT}/{}.py", class_name.replace('.', "/"))
}

/// Structural validation of a Python module that must bind `name` at top level.
pub fn validate(source: &str, name: &str) -> Result<(), CompileFailure> {
    let code = scan(source, Syntax::Python).map_err(CompileFailure::compile)?;
    check_indentation(&code)?;

    let binding = Regex::new(&format!(
        r"(?m)^(?:(?:async\s+)?def|class)\s+{name}\b|^{name}\s*=[^=]",
        name = regex::escape(name)
    ))
    .map_err(|e| CompileFailure::compile(e.to_string()))?;
    if !binding.is_match(&code) {
        return Err(CompileFailure::compile(format!(
            "module does not define '{name}' at top level"
        )));
    }
    Ok(())
}

fn check_indentation(code: &str) -> Result<(), CompileFailure> {
    let mut uses_tabs = false;
    let mut uses_spaces = false;
    let mut seen_code = false;

    for (n, line) in code.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if !seen_code && !indent.is_empty() {
            return Err(CompileFailure::compile(format!(
                "line {}: unexpected indent",
                n + 1
            )));
        }
        seen_code = true;
        uses_tabs |= indent.contains('\t');
        uses_spaces |= indent.contains(' ');
        if uses_tabs && uses_spaces {
            return Err(CompileFailure::compile(format!(
                "line {}: inconsistent use of tabs and spaces in indentation",
                n + 1
            )));
        }
    }
    Ok(())
}

fn wrap(unit: &CompilationUnit) -> String {
    let mut module = format!(
        "# udf {} (task: {})\n{}",
        unit.class_name,
        unit.task_name,
        unit.code.trim_end()
    );
    if !unit.code.contains("__all__") {
        module.push_str(&format!("\n\n__all__ = [\"{}\"]", unit.simple_name()));
    }
    module.push('\n');
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn unit(class_name: &str, code: &str) -> CompilationUnit {
        CompilationUnit {
            index: 0,
            task_name: "py-task".to_string(),
            class_name: class_name.to_string(),
            dialect: Dialect::Python,
            code: code.to_string(),
        }
    }

    const LOWER: &str = "from pyflink.table.udf import udf\n\n@udf(result_type='STRING')\ndef lower(s):\n    return s.lower() if s else s\n";

    #[test]
    fn test_validate_accepts_decorated_def() {
        validate(LOWER, "lower").unwrap();
    }

    #[test]
    fn test_validate_accepts_assignment_binding() {
        let src = "from pyflink.table.udf import udf\nlower = udf(lambda s: s.lower(), result_type='STRING')\n";
        validate(src, "lower").unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_binding() {
        let err = validate("def other(s):\n    return s\n", "lower").unwrap_err();
        assert_eq!(err.kind, FailureKind::CompileError);
        assert!(err.reason.contains("lower"));
    }

    #[test]
    fn test_validate_rejects_nested_only_binding() {
        let src = "def outer():\n    def lower(s):\n        return s\n    return lower\n";
        assert!(validate(src, "lower").is_err());
    }

    #[test]
    fn test_validate_rejects_mixed_indentation() {
        let src = "def lower(s):\n    x = s\n\treturn x\n";
        let err = validate(src, "lower").unwrap_err();
        assert!(err.reason.contains("tabs and spaces"));
    }

    #[test]
    fn test_validate_rejects_unbalanced() {
        let err = validate("def lower(s:\n    return s\n", "lower").unwrap_err();
        assert!(err.reason.contains("never closed"));
    }

    #[test]
    fn test_validate_rejects_leading_indent() {
        let err = validate("  def lower(s):\n    return s\n", "lower").unwrap_err();
        assert!(err.reason.contains("unexpected indent"));
    }

    #[test]
    fn test_equality_is_not_a_binding() {
        assert!(validate("lower == 1\n", "lower").is_err());
    }

    #[tokio::test]
    async fn test_compile_wraps_module() {
        let root = tempfile::tempdir().unwrap();
        let u = unit("my_udfs.lower", LOWER);
        let ws = UnitWorkspace::allocate(root.path(), &u).unwrap();

        let compiled = PythonCompiler::default().compile(&u, &ws).await.unwrap();
        assert_eq!(compiled.entries.len(), 1);
        let entry = &compiled.entries[0];
        assert_eq!(entry.path, "udf/py/my_udfs/lower.py");
        let text = String::from_utf8(entry.bytes.clone()).unwrap();
        assert!(text.starts_with("# udf my_udfs.lower (task: py-task)\n"));
        assert!(text.contains("def lower(s):"));
        assert!(text.trim_end().ends_with("__all__ = [\"lower\"]"));
    }

    #[tokio::test]
    async fn test_interpreter_failure_is_compile_error() {
        let root = tempfile::tempdir().unwrap();
        let u = unit("my_udfs.lower", LOWER);
        let ws = UnitWorkspace::allocate(root.path(), &u).unwrap();

        let compiler = PythonCompiler::new(Some(
            ToolchainConfig::new("sh").with_args(["-c", "echo 'SyntaxError: bad' >&2; exit 1", "py"]),
        ));
        let err = compiler.compile(&u, &ws).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::CompileError);
        assert!(err.reason.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_silent_interpreter_failure_reports_stdout_or_status() {
        let root = tempfile::tempdir().unwrap();
        let u = unit("my_udfs.lower", LOWER);
        let ws = UnitWorkspace::allocate(root.path(), &u).unwrap();

        let noisy = PythonCompiler::new(Some(
            ToolchainConfig::new("sh").with_args(["-c", "echo 'bad indent'; exit 1", "py"]),
        ));
        let err = noisy.compile(&u, &ws).await.unwrap_err();
        assert_eq!(err.reason, "bad indent");

        let silent = PythonCompiler::new(Some(
            ToolchainConfig::new("sh").with_args(["-c", "exit 3", "py"]),
        ));
        let err = silent.compile(&u, &ws).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::CompileError);
        assert!(err.reason.starts_with("sh exited with"), "reason: {}", err.reason);
        assert!(err.reason.contains('3'));
    }
}
