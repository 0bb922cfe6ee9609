//! Function definitions and the normalizer that turns them into
//! compilation units.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CompileFailure, FailureKind};

/// Source dialects a UDF can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Java,
    Scala,
    Python,
    /// Declarative `FUNCTION (...) RETURNS ... AS <expr>` definitions.
    Sql,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Java => "java",
            Dialect::Scala => "scala",
            Dialect::Python => "python",
            Dialect::Sql => "sql",
        }
    }

    pub fn all() -> [Dialect; 4] {
        [Dialect::Java, Dialect::Scala, Dialect::Python, Dialect::Sql]
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(Dialect::Java),
            "scala" => Ok(Dialect::Scala),
            "python" => Ok(Dialect::Python),
            "sql" | "flinksql" => Ok(Dialect::Sql),
            other => Err(format!("unsupported dialect '{other}'")),
        }
    }
}

/// A user-authored function as handed over by the management layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    /// Name of the task the definition was read from.
    #[serde(default)]
    pub name: String,
    pub code: String,
    pub class_name: String,
    /// Raw dialect tag as stored with the task.
    pub dialect: String,
}

impl FunctionDefinition {
    pub fn new(
        class_name: impl Into<String>,
        dialect: impl fmt::Display,
        code: impl Into<String>,
    ) -> Self {
        let class_name = class_name.into();
        Self {
            name: class_name.clone(),
            code: code.into(),
            class_name,
            dialect: dialect.to_string(),
        }
    }
}

/// A definition that passed normalization, with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub index: usize,
    pub task_name: String,
    pub class_name: String,
    pub dialect: Dialect,
    pub code: String,
}

impl CompilationUnit {
    /// Last segment of the class name.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.class_name)
    }

    /// Everything before the last segment, if the class is in a package.
    pub fn package(&self) -> Option<&str> {
        self.class_name.rsplit_once('.').map(|(pkg, _)| pkg)
    }
}

/// Result of normalizing one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Ready(CompilationUnit),
    Rejected {
        index: usize,
        class_name: String,
        failure: CompileFailure,
    },
}

impl Normalized {
    pub fn index(&self) -> usize {
        match self {
            Normalized::Ready(unit) => unit.index,
            Normalized::Rejected { index, .. } => *index,
        }
    }
}

const JAVA_RESERVED: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally",
    "float", "for", "goto", "if", "implements", "import", "instanceof", "int", "interface",
    "long", "native", "new", "package", "private", "protected", "public", "return", "short",
    "static", "strictfp", "super", "switch", "synchronized", "this", "throw", "throws",
    "transient", "try", "void", "volatile", "while", "true", "false", "null", "_",
];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static regex"))
}

pub(crate) fn simple_name(class_name: &str) -> &str {
    class_name.rsplit('.').next().unwrap_or(class_name)
}

/// Check that `name` is a dotted JVM class name such as `com.acme.Upper`.
pub fn validate_class_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("class name is empty".to_string());
    }
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(format!("class name '{name}' has an empty segment"));
        }
        if !identifier_re().is_match(segment) {
            return Err(format!(
                "class name '{name}': '{segment}' is not a valid identifier"
            ));
        }
        if JAVA_RESERVED.contains(&segment) {
            return Err(format!(
                "class name '{name}': '{segment}' is a reserved word"
            ));
        }
    }
    Ok(())
}

/// Validate and canonicalize a batch of definitions.
///
/// Output has one entry per input, in input order. Rejected definitions
/// carry an `InvalidDefinition` failure and are never compiled.
pub fn normalize(definitions: &[FunctionDefinition]) -> Vec<Normalized> {
    let mut seen = HashSet::new();
    definitions
        .iter()
        .enumerate()
        .map(|(index, def)| {
            let class_name = def.class_name.trim().to_string();
            match check(def, &class_name, &mut seen) {
                Ok(dialect) => Normalized::Ready(CompilationUnit {
                    index,
                    task_name: def.name.clone(),
                    class_name,
                    dialect,
                    code: def.code.clone(),
                }),
                Err(reason) => Normalized::Rejected {
                    index,
                    class_name,
                    failure: CompileFailure::new(FailureKind::InvalidDefinition, reason),
                },
            }
        })
        .collect()
}

fn check(
    def: &FunctionDefinition,
    class_name: &str,
    seen: &mut HashSet<String>,
) -> Result<Dialect, String> {
    if def.code.trim().is_empty() {
        return Err(format!("'{class_name}' has empty source"));
    }
    validate_class_name(class_name)?;
    let dialect = def.dialect.parse::<Dialect>()?;
    if !seen.insert(class_name.to_string()) {
        return Err(format!("'{class_name}' is defined more than once in the batch"));
    }
    Ok(dialect)
}
