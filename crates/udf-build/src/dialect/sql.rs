//! Declarative SQL functions.
//!
//! A definition of the form
//!
//! ```text
//! FUNCTION (price DOUBLE, qty INT) RETURNS DOUBLE AS price * qty
//! ```
//!
//! is lowered into a Java `ScalarFunction` with a single null-propagating
//! `eval` method, which is then compiled by the Java strategy.

use std::sync::Arc;

use async_trait::async_trait;

use super::jvm::JvmCompiler;
use super::{CompiledUnit, DialectCompiler};
use crate::definition::{validate_class_name, CompilationUnit, Dialect};
use crate::error::CompileFailure;
use crate::workspace::UnitWorkspace;

#[derive(Debug, Clone)]
pub struct SqlFunctionCompiler {
    java: Arc<JvmCompiler>,
}

impl SqlFunctionCompiler {
    pub fn new(java: Arc<JvmCompiler>) -> Self {
        Self { java }
    }
}

#[async_trait]
impl DialectCompiler for SqlFunctionCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Sql
    }

    async fn compile(
        &self,
        unit: &CompilationUnit,
        workspace: &UnitWorkspace,
    ) -> Result<CompiledUnit, CompileFailure> {
        let function = parse(&unit.code).map_err(CompileFailure::compile)?;
        let source = function.to_java(unit);
        let mut compiled = self.java.compile_source(unit, &source, workspace).await?;
        compiled.dialect = Dialect::Sql;
        Ok(compiled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Int,
    BigInt,
    Double,
    Float,
    Boolean,
    String,
}

impl SqlType {
    fn parse(name: &str) -> Result<Self, String> {
        match name.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(SqlType::Int),
            "BIGINT" => Ok(SqlType::BigInt),
            "DOUBLE" => Ok(SqlType::Double),
            "FLOAT" => Ok(SqlType::Float),
            "BOOLEAN" => Ok(SqlType::Boolean),
            "STRING" | "VARCHAR" => Ok(SqlType::String),
            other => Err(format!("unsupported SQL type {other}")),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Float => "FLOAT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::String => "STRING",
        }
    }

    /// Position in Java's binary numeric promotion order, `None` if not numeric.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            SqlType::Int => Some(0),
            SqlType::BigInt => Some(1),
            SqlType::Float => Some(2),
            SqlType::Double => Some(3),
            SqlType::Boolean | SqlType::String => None,
        }
    }

    fn primitive(&self) -> Option<&'static str> {
        match self {
            SqlType::Int => Some("int"),
            SqlType::BigInt => Some("long"),
            SqlType::Float => Some("float"),
            SqlType::Double => Some("double"),
            SqlType::Boolean | SqlType::String => None,
        }
    }

    fn java_type(&self) -> &'static str {
        match self {
            SqlType::Int => "Integer",
            SqlType::BigInt => "Long",
            SqlType::Double => "Double",
            SqlType::Float => "Float",
            SqlType::Boolean => "Boolean",
            SqlType::String => "String",
        }
    }
}

/// Parsed `FUNCTION ... RETURNS ... AS ...` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFunction {
    pub params: Vec<(String, SqlType)>,
    pub returns: SqlType,
    /// Static type of the body before conversion to `returns`.
    pub body_type: SqlType,
    /// The body lowered to a Java expression of the declared return type.
    pub java_expr: String,
}

impl SqlFunction {
    pub fn to_java(&self, unit: &CompilationUnit) -> String {
        let mut out = String::new();
        if let Some(pkg) = unit.package() {
            out.push_str(&format!("package {pkg};\n\n"));
        }
        out.push_str("import org.apache.flink.table.functions.ScalarFunction;\n\n");
        out.push_str(&format!(
            "public class {} extends ScalarFunction {{\n",
            unit.simple_name()
        ));
        let params = self
            .params
            .iter()
            .map(|(name, ty)| format!("{} {name}", ty.java_type()))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "    public {} eval({params}) {{\n",
            self.returns.java_type()
        ));
        if !self.params.is_empty() {
            let null_check = self
                .params
                .iter()
                .map(|(name, _)| format!("{name} == null"))
                .collect::<Vec<_>>()
                .join(" || ");
            out.push_str(&format!("        if ({null_check}) {{\n            return null;\n        }}\n"));
        }
        out.push_str(&format!("        return {};\n", self.java_expr));
        out.push_str("    }\n}\n");
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => "%",
                }));
                i += 1;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            ';' if chars[i + 1..].iter().all(|c| c.is_whitespace()) => break,
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let number: String = chars[start..i].iter().collect();
                if number.matches('.').count() > 1 || number.ends_with('.') {
                    return Err(format!("malformed number {number}"));
                }
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// A lowered sub-expression and its static type.
///
/// `boxed` marks a bare parameter reference, which Java still holds as a
/// wrapper object and cannot narrow with a primitive cast directly.
#[derive(Debug, Clone)]
struct Expr {
    code: String,
    ty: SqlType,
    boxed: bool,
}

impl Expr {
    fn value(code: String, ty: SqlType) -> Self {
        Self {
            code,
            ty,
            boxed: false,
        }
    }

    /// Java text of this expression converted to `target`.
    fn convert_to(&self, target: SqlType) -> Result<String, String> {
        if self.ty == target {
            return Ok(self.code.clone());
        }
        if target == SqlType::String {
            return Ok(format!("String.valueOf({})", self.code));
        }
        match (self.ty.primitive(), target.primitive()) {
            (Some(source), Some(cast)) => {
                let operand = if self.boxed {
                    format!("{}.{source}Value()", self.code)
                } else {
                    format!("({})", self.code)
                };
                Ok(format!("({cast}) {operand}"))
            }
            _ => Err(format!(
                "cannot return a {} expression as {}",
                self.ty.name(),
                target.name()
            )),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    params: &'a [(String, SqlType)],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-' | '||') term)*
    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ("+" | "-" | "||"))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = if *op == "||" {
                Expr::value(
                    format!("String.valueOf({}) + String.valueOf({})", lhs.code, rhs.code),
                    SqlType::String,
                )
            } else {
                arithmetic(op, lhs, rhs)?
            };
        }
        Ok(lhs)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ("*" | "/" | "%"))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = arithmetic(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if let Some(Token::Op("-")) = self.peek() {
            self.pos += 1;
            let inner = self.unary()?;
            if inner.ty.numeric_rank().is_none() {
                return Err(format!("cannot negate a {} expression", inner.ty.name()));
            }
            // `--x` would be a pre-decrement in Java.
            let code = if inner.code.starts_with('-') {
                format!("-({})", inner.code)
            } else {
                format!("-{}", inner.code)
            };
            return Ok(Expr::value(code, inner.ty));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(n)) => number_literal(n),
            Some(Token::Str(s)) => Ok(Expr::value(java_string_literal(s), SqlType::String)),
            Some(Token::Ident(id)) if id.eq_ignore_ascii_case("true") => {
                Ok(Expr::value("true".into(), SqlType::Boolean))
            }
            Some(Token::Ident(id)) if id.eq_ignore_ascii_case("false") => {
                Ok(Expr::value("false".into(), SqlType::Boolean))
            }
            Some(Token::Ident(id)) => self
                .params
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(id))
                .map(|(name, ty)| Expr {
                    code: name.clone(),
                    ty: *ty,
                    boxed: true,
                })
                .ok_or_else(|| format!("unknown identifier {id}")),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(Expr {
                        code: format!("({})", inner.code),
                        ..inner
                    }),
                    _ => Err("missing ')' in expression".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {other:?} in expression")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Numeric binary operator, typed by Java's binary numeric promotion.
fn arithmetic(op: &str, lhs: Expr, rhs: Expr) -> Result<Expr, String> {
    let ty = match (lhs.ty.numeric_rank(), rhs.ty.numeric_rank()) {
        (Some(l), Some(r)) => {
            if l >= r {
                lhs.ty
            } else {
                rhs.ty
            }
        }
        _ => {
            return Err(format!(
                "operator {op} needs numeric operands, found {} and {} (use || to concatenate)",
                lhs.ty.name(),
                rhs.ty.name()
            ))
        }
    };
    Ok(Expr::value(format!("{} {op} {}", lhs.code, rhs.code), ty))
}

fn number_literal(text: &str) -> Result<Expr, String> {
    if text.contains('.') {
        return Ok(Expr::value(text.to_string(), SqlType::Double));
    }
    let value: i64 = text
        .parse()
        .map_err(|_| format!("integer literal {text} is out of range"))?;
    // Re-rendered from the value: a leading zero would read as octal in Java.
    if i32::try_from(value).is_ok() {
        Ok(Expr::value(value.to_string(), SqlType::Int))
    } else {
        Ok(Expr::value(format!("{value}L"), SqlType::BigInt))
    }
}

fn java_string_literal(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

fn expect_keyword(tokens: &[Token], pos: &mut usize, keyword: &str) -> Result<(), String> {
    match tokens.get(*pos) {
        Some(Token::Ident(id)) if id.eq_ignore_ascii_case(keyword) => {
            *pos += 1;
            Ok(())
        }
        other => Err(format!("expected {keyword}, found {other:?}")),
    }
}

fn expect_ident(tokens: &[Token], pos: &mut usize, what: &str) -> Result<String, String> {
    match tokens.get(*pos) {
        Some(Token::Ident(id)) => {
            *pos += 1;
            Ok(id.clone())
        }
        other => Err(format!("expected {what}, found {other:?}")),
    }
}

/// Parse a declarative function and lower its body to Java.
pub fn parse(text: &str) -> Result<SqlFunction, String> {
    let tokens = tokenize(text)?;
    let mut pos = 0;

    expect_keyword(&tokens, &mut pos, "FUNCTION")?;
    if tokens.get(pos) != Some(&Token::LParen) {
        return Err("expected '(' after FUNCTION".to_string());
    }
    pos += 1;

    let mut params: Vec<(String, SqlType)> = Vec::new();
    if tokens.get(pos) == Some(&Token::RParen) {
        pos += 1;
    } else {
        loop {
            let name = expect_ident(&tokens, &mut pos, "parameter name")?;
            validate_class_name(&name).map_err(|_| format!("invalid parameter name {name}"))?;
            if params.iter().any(|(p, _)| p.eq_ignore_ascii_case(&name)) {
                return Err(format!("duplicate parameter {name}"));
            }
            let ty = SqlType::parse(&expect_ident(&tokens, &mut pos, "parameter type")?)?;
            params.push((name, ty));
            match tokens.get(pos) {
                Some(Token::Comma) => pos += 1,
                Some(Token::RParen) => {
                    pos += 1;
                    break;
                }
                other => return Err(format!("expected ',' or ')', found {other:?}")),
            }
        }
    }

    expect_keyword(&tokens, &mut pos, "RETURNS")?;
    let returns = SqlType::parse(&expect_ident(&tokens, &mut pos, "return type")?)?;
    expect_keyword(&tokens, &mut pos, "AS")?;

    let body = &tokens[pos..];
    if body.is_empty() {
        return Err("function body is empty".to_string());
    }
    let mut parser = Parser {
        tokens: body,
        pos: 0,
        params: &params,
    };
    let body_expr = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected token {extra:?} after expression"));
    }
    let java_expr = body_expr.convert_to(returns)?;

    Ok(SqlFunction {
        params,
        returns,
        body_type: body_expr.ty,
        java_expr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::jvm::{fake_toolchain, JvmLanguage};

    fn unit(class_name: &str, code: &str) -> CompilationUnit {
        CompilationUnit {
            index: 0,
            task_name: "sql-task".to_string(),
            class_name: class_name.to_string(),
            dialect: Dialect::Sql,
            code: code.to_string(),
        }
    }

    #[test]
    fn test_parse_arithmetic() {
        let f = parse("FUNCTION (price DOUBLE, qty INT) RETURNS DOUBLE AS price * (qty + 1);")
            .unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1], ("qty".to_string(), SqlType::Int));
        assert_eq!(f.returns, SqlType::Double);
        assert_eq!(f.java_expr, "price * (qty + 1)");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let f = parse("function (Name string) returns varchar as 'hi ' || NAME").unwrap();
        assert_eq!(f.returns, SqlType::String);
        assert_eq!(
            f.java_expr,
            "String.valueOf(\"hi \") + String.valueOf(Name)"
        );
    }

    #[test]
    fn test_string_literal_escaping() {
        let f = parse("FUNCTION () RETURNS STRING AS 'it''s \"ok\"'").unwrap();
        assert_eq!(f.java_expr, r#""it's \"ok\"""#);
    }

    #[test]
    fn test_nested_negation_is_not_a_decrement() {
        let f = parse("FUNCTION (x INT) RETURNS INT AS - -x").unwrap();
        assert_eq!(f.java_expr, "-(-x)");
        let f = parse("FUNCTION (x INT) RETURNS INT AS 1 - -x").unwrap();
        assert_eq!(f.java_expr, "1 - -x");
        assert!(!f.java_expr.contains("--"));
    }

    #[test]
    fn test_result_is_converted_to_return_type() {
        let f = parse("FUNCTION (qty INT) RETURNS DOUBLE AS qty").unwrap();
        assert_eq!(f.body_type, SqlType::Int);
        assert_eq!(f.java_expr, "(double) qty.intValue()");

        let f = parse("FUNCTION () RETURNS BIGINT AS 1").unwrap();
        assert_eq!(f.java_expr, "(long) (1)");

        let f = parse("FUNCTION (a INT, b INT) RETURNS DOUBLE AS a / b").unwrap();
        assert_eq!(f.java_expr, "(double) (a / b)");

        let f = parse("FUNCTION (price DOUBLE) RETURNS INT AS price").unwrap();
        assert_eq!(f.java_expr, "(int) price.doubleValue()");

        let f = parse("FUNCTION (n BIGINT) RETURNS STRING AS n + 1").unwrap();
        assert_eq!(f.java_expr, "String.valueOf(n + 1)");
    }

    #[test]
    fn test_numeric_promotion_follows_java() {
        let f = parse("FUNCTION (a INT, b BIGINT) RETURNS BIGINT AS a * b").unwrap();
        assert_eq!(f.body_type, SqlType::BigInt);
        assert_eq!(f.java_expr, "a * b");

        let f = parse("FUNCTION (a FLOAT) RETURNS FLOAT AS a * 1.5").unwrap();
        assert_eq!(f.body_type, SqlType::Double);
        assert_eq!(f.java_expr, "(float) (a * 1.5)");

        let f = parse("FUNCTION () RETURNS BIGINT AS 3000000000").unwrap();
        assert_eq!(f.body_type, SqlType::BigInt);
        assert_eq!(f.java_expr, "3000000000L");

        let f = parse("FUNCTION () RETURNS INT AS 010 + 08").unwrap();
        assert_eq!(f.java_expr, "10 + 8");
    }

    #[test]
    fn test_incompatible_types_rejected() {
        let err = parse("FUNCTION (s STRING) RETURNS INT AS s").unwrap_err();
        assert!(err.contains("STRING"), "{err}");
        assert!(parse("FUNCTION (x INT) RETURNS BOOLEAN AS x").is_err());
        assert!(parse("FUNCTION (b BOOLEAN) RETURNS INT AS b").is_err());
        let err = parse("FUNCTION (s STRING) RETURNS STRING AS s + 'x'").unwrap_err();
        assert!(err.contains("||"), "{err}");
        assert!(parse("FUNCTION () RETURNS INT AS -TRUE").is_err());
        assert!(parse("FUNCTION () RETURNS BIGINT AS 99999999999999999999").is_err());
    }

    #[test]
    fn test_to_java_returns_converted_expression() {
        let u = unit("p.Widen", "");
        let f = parse("FUNCTION (qty INT) RETURNS DOUBLE AS qty").unwrap();
        let java = f.to_java(&u);
        assert!(java.contains("public Double eval(Integer qty) {"));
        assert!(java.contains("return (double) qty.intValue();"));
    }

    #[test]
    fn test_unknown_identifier_rejected() {
        let err = parse("FUNCTION (x INT) RETURNS INT AS x + y").unwrap_err();
        assert!(err.contains("unknown identifier y"));
    }

    #[test]
    fn test_unbalanced_parentheses_rejected() {
        assert!(parse("FUNCTION (x INT) RETURNS INT AS (x + 1").is_err());
        assert!(parse("FUNCTION (x INT) RETURNS INT AS x + 1)").is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse("FUNCTION (x DECIMAL) RETURNS INT AS x").unwrap_err();
        assert!(err.contains("DECIMAL"));
    }

    #[test]
    fn test_duplicate_and_reserved_params_rejected() {
        assert!(parse("FUNCTION (x INT, X INT) RETURNS INT AS x").is_err());
        assert!(parse("FUNCTION (class INT) RETURNS INT AS 1").is_err());
    }

    #[test]
    fn test_missing_body_rejected() {
        assert!(parse("FUNCTION (x INT) RETURNS INT AS").is_err());
        assert!(parse("SELECT 1").is_err());
    }

    #[test]
    fn test_to_java_generates_null_propagating_eval() {
        let u = unit("com.acme.Total", "");
        let f = parse("FUNCTION (price DOUBLE, qty INT) RETURNS DOUBLE AS price * qty").unwrap();
        let java = f.to_java(&u);
        assert!(java.starts_with("package com.acme;\n"));
        assert!(java.contains("public class Total extends ScalarFunction {"));
        assert!(java.contains("public Double eval(Double price, Integer qty) {"));
        assert!(java.contains("if (price == null || qty == null) {"));
        assert!(java.contains("return price * qty;"));
    }

    #[tokio::test]
    async fn test_compile_lowers_and_delegates_to_java() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let java = Arc::new(JvmCompiler::new(
            JvmLanguage::Java,
            fake_toolchain(tools.path()),
        ));
        let compiler = SqlFunctionCompiler::new(java);
        let u = unit("com.acme.Total", "FUNCTION (a BIGINT) RETURNS BIGINT AS a * 2");
        let ws = UnitWorkspace::allocate(root.path(), &u).unwrap();

        let compiled = compiler.compile(&u, &ws).await.unwrap();
        assert_eq!(compiled.dialect, Dialect::Sql);
        assert_eq!(compiled.entries[0].path, "com/acme/Total.class");
        assert!(ws.src_dir().join("com/acme/Total.java").exists());
    }
}
