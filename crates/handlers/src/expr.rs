//! Constrained expression language for conditions and script tasks.
//!
//! Expressions are parsed into a small typed AST and evaluated against a
//! read-only view of the execution (variables and prior task outputs). The
//! language is deliberately narrow: path lookups rooted at `variables.` or
//! `results.`, literals, comparison operators, and boolean combinators.
//! Nothing in it can call out, mutate state, or evaluate arbitrary source.
//!
//! ```text
//! variables.retry_count <= 3 && results.check.passed == true
//! ```

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("type error: {0}")]
    Type(String),
}

/// Read-only evaluation context: the two roots an expression may reference.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    pub variables: &'a HashMap<String, Value>,
    pub results: &'a HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Which top-level map a path reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Variables,
    Results,
}

/// One step of a path lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Binary operators, loosest-binding last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path {
        root: PathRoot,
        segments: Vec<Segment>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate the expression to a JSON value.
    ///
    /// Path lookups that miss resolve to `null` rather than failing, so
    /// conditions can reference outputs that may be absent.
    pub fn evaluate(&self, ctx: &ContextView<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),

            Expr::Path { root, segments } => {
                let map = match root {
                    PathRoot::Variables => ctx.variables,
                    PathRoot::Results => ctx.results,
                };
                let Some(Segment::Key(first)) = segments.first() else {
                    return Err(ExprError::Type("path has no segments".to_string()));
                };
                let Some(base) = map.get(first) else {
                    return Ok(Value::Null);
                };
                Ok(walk(base, &segments[1..]))
            }

            Expr::Not(inner) => {
                let value = inner.evaluate(ctx)?;
                Ok(Value::Bool(!truthy(&value)))
            }

            Expr::Binary { op, left, right } => {
                let l = left.evaluate(ctx)?;
                match op {
                    BinaryOp::And => {
                        if !truthy(&l) {
                            return Ok(Value::Bool(false));
                        }
                        let r = right.evaluate(ctx)?;
                        Ok(Value::Bool(truthy(&r)))
                    }
                    BinaryOp::Or => {
                        if truthy(&l) {
                            return Ok(Value::Bool(true));
                        }
                        let r = right.evaluate(ctx)?;
                        Ok(Value::Bool(truthy(&r)))
                    }
                    BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &right.evaluate(ctx)?))),
                    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &right.evaluate(ctx)?))),
                    BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le => {
                        let r = right.evaluate(ctx)?;
                        let (lf, rf) = (numeric(&l), numeric(&r));
                        let (Some(lf), Some(rf)) = (lf, rf) else {
                            return Err(ExprError::Type(format!(
                                "ordering comparison requires numeric operands, got {l} and {r}"
                            )));
                        };
                        Ok(Value::Bool(match op {
                            BinaryOp::Gt => lf > rf,
                            BinaryOp::Lt => lf < rf,
                            BinaryOp::Ge => lf >= rf,
                            BinaryOp::Le => lf <= rf,
                            _ => unreachable!(),
                        }))
                    }
                }
            }
        }
    }

    /// Evaluate and collapse the result to a boolean (JSON truthiness).
    pub fn evaluate_bool(&self, ctx: &ContextView<'_>) -> Result<bool, ExprError> {
        Ok(truthy(&self.evaluate(ctx)?))
    }
}

/// Parse an expression string into its AST.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

/// Parse and evaluate in one step.
pub fn evaluate_str(input: &str, ctx: &ContextView<'_>) -> Result<Value, ExprError> {
    parse(input)?.evaluate(ctx)
}

/// Resolve a bare path expression such as `variables.items`.
///
/// Rejects anything that is not a plain lookup; used where configuration
/// references a collection rather than computing one.
pub fn resolve_path(path: &str, ctx: &ContextView<'_>) -> Result<Value, ExprError> {
    match parse(path)? {
        expr @ Expr::Path { .. } => expr.evaluate(ctx),
        _ => Err(ExprError::Type(format!(
            "expected a variables./results. path, got expression '{path}'"
        ))),
    }
}

/// JSON truthiness: null and empty containers are false, zero is false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn walk(base: &Value, segments: &[Segment]) -> Value {
    let mut current = base;
    for segment in segments {
        match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => match map.get(key) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            (Segment::Index(index), Value::Array(items)) => match items.get(*index) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    // 1 and 1.0 are distinct serde_json numbers; compare numerically.
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    LParen,
    RParen,
    Bang,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |position: usize, message: &str| ExprError::Parse {
        position,
        message: message.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(err(i, "expected '==' (assignment is not supported)"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(err(i, "expected '&&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(err(i, "expected '||'"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(err(start, "unterminated string literal")),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some(&escaped) if matches!(escaped, '\\' | '\'' | '"') => {
                                    s.push(escaped);
                                }
                                _ => return Err(err(i, "unsupported escape sequence")),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err(err(start, "expected digits after '-'"));
                    }
                }
                while matches!(chars.get(i), Some('0'..='9')) {
                    i += 1;
                }
                // A fraction only when a digit follows the dot; otherwise the
                // dot is a path separator (e.g. `variables.items.0.name`).
                if chars.get(i) == Some(&'.') && matches!(chars.get(i + 1), Some('0'..='9')) {
                    i += 1;
                    while matches!(chars.get(i), Some('0'..='9')) {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| err(start, "invalid number literal"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while matches!(chars.get(i), Some(ch) if ch.is_ascii_alphanumeric() || *ch == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(word));
            }
            _ => return Err(err(i, "unexpected character")),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser — recursive descent, precedence: ! > comparison > && > ||
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &str) -> ExprError {
        ExprError::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Le) => BinaryOp::Le,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_operand()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Number(n)) => {
                let number = serde_json::Number::from_f64(n)
                    .ok_or_else(|| self.error("number literal is not finite"))?;
                Ok(Expr::Literal(Value::Number(number)))
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "variables" => self.parse_path(PathRoot::Variables),
                "results" => self.parse_path(PathRoot::Results),
                _ => Err(self.error(
                    "identifiers must be rooted at 'variables.' or 'results.' (or be a literal)",
                )),
            },
            _ => Err(self.error("expected a value, path, or '('")),
        }
    }

    fn parse_path(&mut self, root: PathRoot) -> Result<Expr, ExprError> {
        let mut segments = Vec::new();
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                    segments.push(Segment::Index(n as usize));
                }
                _ => return Err(self.error("expected a field name or index after '.'")),
            }
        }
        if segments.is_empty() {
            return Err(self.error("a path needs at least one segment, e.g. 'variables.count'"));
        }
        Ok(Expr::Path { root, segments })
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(input: &str, variables: Value, results: Value) -> Result<Value, ExprError> {
        let variables: HashMap<String, Value> =
            serde_json::from_value(variables).expect("variables fixture");
        let results: HashMap<String, Value> =
            serde_json::from_value(results).expect("results fixture");
        evaluate_str(
            input,
            &ContextView {
                variables: &variables,
                results: &results,
            },
        )
    }

    #[test]
    fn literal_comparisons() {
        assert_eq!(eval("1 == 1", json!({}), json!({})).unwrap(), json!(true));
        assert_eq!(eval("1 != 2", json!({}), json!({})).unwrap(), json!(true));
        assert_eq!(eval("2 >= 2", json!({}), json!({})).unwrap(), json!(true));
        assert_eq!(eval("3 < 2", json!({}), json!({})).unwrap(), json!(false));
        assert_eq!(
            eval("'abc' == \"abc\"", json!({}), json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn variable_and_result_paths() {
        let variables = json!({ "count": 3, "name": "relay" });
        let results = json!({ "check": { "passed": true, "score": 91 } });

        assert_eq!(
            eval("variables.count >= 3", variables.clone(), results.clone()).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("results.check.passed == true", variables.clone(), results.clone()).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("results.check.score > 100", variables, results).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn missing_paths_resolve_to_null() {
        assert_eq!(
            eval("variables.nope == null", json!({}), json!({})).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("results.ghost.field == 'x'", json!({}), json!({})).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn array_indexing() {
        let variables = json!({ "items": [10, 20, 30] });
        assert_eq!(
            eval("variables.items.1 == 20", variables.clone(), json!({})).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("variables.items.9 == null", variables, json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn index_segments_can_be_followed_by_keys() {
        let variables = json!({ "items": [{ "name": "first" }, { "name": "second" }] });
        assert_eq!(
            eval("variables.items.0.name == 'first'", variables, json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn boolean_combinators_and_negation() {
        let variables = json!({ "a": true, "b": false });
        assert_eq!(
            eval("variables.a && !variables.b", variables.clone(), json!({})).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("variables.b || variables.a", variables.clone(), json!({})).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("(variables.a && variables.b) || false", variables, json!({})).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        // The right side would be a type error if evaluated.
        let variables = json!({ "flag": false, "word": "x" });
        assert_eq!(
            eval(
                "variables.flag && variables.word > 3",
                variables,
                json!({})
            )
            .unwrap(),
            json!(false)
        );
    }

    #[test]
    fn integer_and_float_numbers_compare_equal() {
        let variables = json!({ "n": 1 });
        assert_eq!(
            eval("variables.n == 1.0", variables, json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn unknown_root_is_a_parse_error() {
        assert!(matches!(
            parse("foo.bar == 1"),
            Err(ExprError::Parse { .. })
        ));
    }

    #[test]
    fn bare_root_is_a_parse_error() {
        assert!(parse("variables == 1").is_err());
    }

    #[test]
    fn ordering_on_non_numeric_is_a_type_error() {
        let variables = json!({ "word": "abc" });
        assert!(matches!(
            eval("variables.word > 3", variables, json!({})),
            Err(ExprError::Type(_))
        ));
    }

    #[test]
    fn numeric_strings_coerce_in_ordering() {
        let variables = json!({ "n": "12" });
        assert_eq!(
            eval("variables.n > 5", variables, json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(parse("variables.a =").is_err());
        assert!(parse("variables.a &").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("variables.a == 1 extra").is_err());
    }

    #[test]
    fn resolve_path_rejects_expressions() {
        let variables: HashMap<String, Value> =
            serde_json::from_value(json!({ "items": [1, 2] })).unwrap();
        let results = HashMap::new();
        let ctx = ContextView {
            variables: &variables,
            results: &results,
        };

        assert_eq!(resolve_path("variables.items", &ctx).unwrap(), json!([1, 2]));
        assert!(resolve_path("variables.items == 1", &ctx).is_err());
    }
}
