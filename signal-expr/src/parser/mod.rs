//! Restricted expression parser
//!
//! Expressions reference signals through `${name}` placeholders. Parsing runs
//! in fixed stages:
//!
//! 1. Text without any marker is a plain literal, not an expression
//! 2. Markers must balance and alternate (`${ } ${ }`), nesting is malformed
//! 3. Each distinct placeholder becomes a generated identifier `key<N>`
//! 4. Duration literals such as `365D` become `timedelta_D(365)`
//! 5. A textual filter rejects obviously foreign constructs
//! 6. The text is tokenized and parsed into an [`ast::Expr`]
//! 7. Every name, call and attribute is checked against the [`namespace`]
//!
//! Values are then bound by original placeholder name and the tree is
//! evaluated under the configured [`EvalLimits`].

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod namespace;

use crate::config::EvalLimits;
use crate::types::{ProcessingError, Result};
use crate::units::TIME_UNITS;
use crate::value::Value;
use ast::Expr;
use std::collections::{BTreeSet, HashMap};

/// Opening placeholder marker
pub const MARKER_IN: &str = "${";
/// Closing placeholder marker
pub const MARKER_OUT: &str = "}";
/// Prefix of generated placeholder identifiers
pub const KEY_PREFIX: &str = "key";

/// Substrings rejected before the text is even tokenized
const FORBIDDEN_FRAGMENTS: &[&str] = &["**", "for ", "if ", "__", "[]", "()", "{}"];

/// Parses, validates and evaluates one expression at a time
#[derive(Debug, Clone, Default)]
pub struct Parser {
    expression: String,
    var_map: Vec<(String, String)>,
    locals: HashMap<String, Value>,
    is_valid: bool,
    has_time_units: bool,
    marker_count: usize,
    ast: Option<Expr>,
    result: Option<Value>,
    limits: EvalLimits,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: EvalLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// True when `text` parses as an expression with at least one placeholder
    pub fn is_expression(text: &str) -> bool {
        let mut parser = Parser::new();
        parser.set_expression(text).map(|p| p.is_valid()).unwrap_or(false)
    }

    /// Reset the per-expression state; limits are kept
    pub fn clear_expr(&mut self) -> &mut Self {
        self.expression.clear();
        self.var_map.clear();
        self.locals.clear();
        self.is_valid = false;
        self.has_time_units = false;
        self.marker_count = 0;
        self.ast = None;
        self.result = None;
        self
    }

    /// Parse and validate `expr`
    ///
    /// Text without any placeholder marker is accepted as a plain literal and
    /// leaves [`Parser::is_valid`] false.
    pub fn set_expression(&mut self, expr: &str) -> Result<&mut Self> {
        self.clear_expr();

        if expr.len() > self.limits.max_expression_len {
            return Err(ProcessingError::limit_exceeded(format!(
                "expression is {} bytes long (limit {})",
                expr.len(),
                self.limits.max_expression_len
            )));
        }

        if !expr.contains(MARKER_IN) && !expr.contains(MARKER_OUT) {
            self.expression = expr.to_string();
            return Ok(self);
        }

        self.check_syntax(expr)?;
        let substituted = self.replace_vars(expr)?;
        let (rewritten, has_time_units) = rewrite_durations(&substituted);
        if has_time_units {
            log::debug!("Rewrote duration literals: '{}' -> '{}'", substituted, rewritten);
        }

        validate_pre_compile(&rewritten)?;
        let tokens = lexer::tokenize(&rewritten)?;
        let tree = ast::parse(&tokens, self.limits.max_ast_depth)?;
        self.check_size(&tree)?;
        self.validate_post_compile(&tree)?;

        self.expression = rewritten;
        self.has_time_units = has_time_units;
        self.ast = Some(tree);
        self.is_valid = true;
        Ok(self)
    }

    fn check_syntax(&mut self, expr: &str) -> Result<()> {
        let opens: Vec<usize> = expr.match_indices(MARKER_IN).map(|(i, _)| i).collect();
        let closes: Vec<usize> = expr.match_indices(MARKER_OUT).map(|(i, _)| i).collect();
        let malformed = || {
            ProcessingError::malformed(format!(
                "Invalid expression {}, variable should be '${{varname1}}  ${{varname2}}'",
                expr
            ))
        };

        if opens.len() != closes.len() {
            return Err(malformed());
        }
        for (i, (&open, &close)) in opens.iter().zip(&closes).enumerate() {
            let next_open = opens.get(i + 1).copied().unwrap_or(usize::MAX);
            if !(open < close && close < next_open) {
                return Err(malformed());
            }
        }
        self.marker_count = opens.len();
        Ok(())
    }

    fn replace_vars(&mut self, expr: &str) -> Result<String> {
        let mut out = String::with_capacity(expr.len());
        let mut rest = expr;

        for _ in 0..self.marker_count {
            let (Some(start), Some(len)) = (
                rest.find(MARKER_IN),
                rest.find(MARKER_IN).and_then(|s| rest[s..].find(MARKER_OUT)),
            ) else {
                return Err(ProcessingError::malformed(format!("Invalid expression syntax {}", expr)));
            };
            let name = &rest[start + MARKER_IN.len()..start + len];
            if name.is_empty() {
                return Err(ProcessingError::malformed(format!("empty placeholder in {}", expr)));
            }
            out.push_str(&rest[..start]);
            out.push_str(&self.key_or_insert(name));
            rest = &rest[start + len + MARKER_OUT.len()..];
        }
        out.push_str(rest);

        log::debug!("new_expr = {} with keys {:?}", out, self.var_map);
        Ok(out)
    }

    fn key_or_insert(&mut self, name: &str) -> String {
        if let Some(key) = self.key_of(name) {
            return key.to_string();
        }
        let key = format!("{}{}", KEY_PREFIX, self.var_map.len());
        self.var_map.push((name.to_string(), key.clone()));
        key
    }

    fn is_generated_key(&self, name: &str) -> bool {
        self.var_map.iter().any(|(_, key)| key == name)
    }

    fn check_size(&self, tree: &Expr) -> Result<()> {
        let nodes = tree.node_count();
        if nodes > self.limits.max_ast_nodes {
            return Err(ProcessingError::limit_exceeded(format!(
                "expression has {} nodes (limit {})",
                nodes, self.limits.max_ast_nodes
            )));
        }
        let depth = tree.depth();
        if depth > self.limits.max_ast_depth {
            return Err(ProcessingError::limit_exceeded(format!(
                "expression is {} levels deep (limit {})",
                depth, self.limits.max_ast_depth
            )));
        }
        Ok(())
    }

    fn validate_post_compile(&self, tree: &Expr) -> Result<()> {
        tree.walk(&mut |node| match node {
            Expr::Name(name) => {
                if namespace::constant(name).is_some() || self.is_generated_key(name) {
                    Ok(())
                } else {
                    Err(ProcessingError::undefined_name(name))
                }
            }
            Expr::Call { func, args } => match namespace::function(func) {
                Some(spec) if spec.arity.accepts(args.len()) => Ok(()),
                Some(_) => Err(ProcessingError::undefined_name(format!(
                    "{}() with {} arguments",
                    func,
                    args.len()
                ))),
                None => Err(ProcessingError::undefined_name(func)),
            },
            Expr::Attribute { attr, .. } if !namespace::is_attribute(attr) => {
                Err(ProcessingError::undefined_name(attr))
            }
            _ => Ok(()),
        })
    }

    /// Bind values by original placeholder name; unknown names are ignored
    pub fn substitute_var<K, I>(&mut self, values: I) -> &mut Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (name, value) in values {
            self.bind(name.as_ref(), value);
        }
        self
    }

    /// Bind a single placeholder; returns false when `name` is not referenced
    pub fn bind(&mut self, name: &str, value: Value) -> bool {
        match self.key_of(name).map(str::to_string) {
            Some(key) => {
                self.locals.insert(key, value);
                true
            }
            None => false,
        }
    }

    /// Evaluate the parsed expression with the bound values
    ///
    /// Fails with `InvalidVariable` naming every placeholder still unbound.
    pub fn eval_expr(&mut self) -> Result<&mut Self> {
        let value = {
            let Some(tree) = &self.ast else {
                return Ok(self);
            };
            let missing: BTreeSet<String> = self
                .var_map
                .iter()
                .filter(|(_, key)| !self.locals.contains_key(key))
                .map(|(name, _)| name.clone())
                .collect();
            if !missing.is_empty() {
                return Err(ProcessingError::InvalidVariable { missing });
            }
            let mut evaluator = eval::Evaluator::new(&self.locals, &self.limits);
            let value = evaluator.eval(tree)?;
            log::trace!("Evaluated '{}' in {} steps", self.expression, evaluator.steps());
            value
        };
        self.result = Some(value);
        Ok(self)
    }

    /// Expression text after placeholder and duration rewriting
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True when the last expression had placeholders and parsed
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn has_time_units(&self) -> bool {
        self.has_time_units
    }

    /// Original placeholder names paired with their identifiers, in order of first appearance
    pub fn var_map(&self) -> &[(String, String)] {
        &self.var_map
    }

    /// Original placeholder names, in order of first appearance
    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.var_map.iter().map(|(name, _)| name.as_str())
    }

    /// Identifier generated for a placeholder name
    pub fn key_of(&self, name: &str) -> Option<&str> {
        self.var_map.iter().find(|(n, _)| n == name).map(|(_, key)| key.as_str())
    }

    pub fn locals(&self) -> &HashMap<String, Value> {
        &self.locals
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    pub fn limits(&self) -> &EvalLimits {
        &self.limits
    }
}

fn validate_pre_compile(text: &str) -> Result<()> {
    match FORBIDDEN_FRAGMENTS.iter().find(|f| text.contains(*f)) {
        Some(fragment) => Err(ProcessingError::disallowed(format!(
            "'{}' is not allowed in {}",
            fragment.trim_end(),
            text
        ))),
        None => Ok(()),
    }
}

/// Rewrite `<digits><unit>` literals into duration constructor calls
///
/// The literal must not continue an identifier or a decimal number, and the
/// unit must not run into further identifier characters.
fn rewrite_durations(text: &str) -> (String, bool) {
    // Longest symbols first so `ms` wins over `m`
    let mut symbols: Vec<&str> = TIME_UNITS.iter().map(|u| u.symbol()).collect();
    symbols.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut rewritten = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let starts_literal = c.is_ascii_digit()
            && (i == 0 || !(lexer::is_ident_char(chars[i - 1]) || chars[i - 1] == '.'));
        if !starts_literal {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let digits: String = chars[start..i].iter().collect();

        let unit = symbols.iter().find(|symbol| {
            let end = i + symbol.chars().count();
            end <= chars.len()
                && chars[i..end].iter().copied().eq(symbol.chars())
                && chars.get(end).map_or(true, |&next| !lexer::is_ident_char(next))
        });
        match unit {
            Some(symbol) => {
                out.push_str(&format!("timedelta_{}({})", symbol, digits));
                i += symbol.chars().count();
                rewritten = true;
            }
            None => out.push_str(&digits),
        }
    }

    (out, rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::types::ExpressionErrorKind;
    use approx::assert_relative_eq;

    #[test]
    fn test_plain_literal_is_not_an_error() {
        let mut parser = Parser::new();
        parser.set_expression("time").unwrap();
        assert!(!parser.is_valid());
        assert_eq!(parser.expression(), "time");
        parser.eval_expr().unwrap();
        assert!(parser.result().is_none());
    }

    #[test]
    fn test_invalid_syntax() {
        let mut parser = Parser::new();
        for bad in [
            "${", "${${", "}", "}$", "}}", "${{", "$}", "${time", "time}", "{time}", "${{time}}",
            "sin(${${l}}) + cos(${m}) + ${n}",
        ] {
            let err = parser.set_expression(bad).unwrap_err();
            assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::Malformed), "{}", bad);
        }
    }

    #[test]
    fn test_injection_is_rejected() {
        let mut parser = Parser::new();
        for bad in [
            "for i in range(${t}):\n\tprint(i)",
            "import sys, os\nif sys.platform == ${linux}:\n\t os.system('ls')",
            "${a}.__class__",
            "${a} ** 1000",
        ] {
            let err = parser.set_expression(bad).unwrap_err();
            assert!(
                matches!(
                    err.expression_kind(),
                    Some(ExpressionErrorKind::Disallowed | ExpressionErrorKind::UndefinedName)
                ),
                "{}: {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_undefined_names() {
        let mut parser = Parser::new();
        for bad in ["os(${a})", "${a} + x", "${a}.shape", "sin(${a}, 2)"] {
            let err = parser.set_expression(bad).unwrap_err();
            assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::UndefinedName), "{}", bad);
        }
    }

    #[test]
    fn test_placeholder_keys_in_order() {
        let mut parser = Parser::new();
        parser.set_expression("${b} + ${a} * ${b} - ${c}").unwrap();
        assert!(parser.is_valid());
        assert_eq!(parser.expression(), "key0 + key1 * key0 - key2");
        let names: Vec<&str> = parser.var_names().collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(parser.key_of("a"), Some("key1"));
    }

    #[test]
    fn test_round_trip_matches_direct_arithmetic() {
        let mut parser = Parser::new();
        parser.set_expression("${p} * 2 + ${q} / 4 - ${p} // 3").unwrap();
        parser.substitute_var([("p", Value::Int(7)), ("q", Value::Float(10.0))]);
        parser.eval_expr().unwrap();
        let expected = 7.0 * 2.0 + 10.0 / 4.0 - (7 / 3) as f64;
        assert_relative_eq!(parser.result().unwrap().as_f64().unwrap(), expected);
    }

    #[test]
    fn test_eval_simple() {
        let mut parser = Parser::new();
        parser.set_expression("sin(${x})").unwrap();
        parser.substitute_var([("x", Value::Float(std::f64::consts::PI * 0.5))]);
        parser.eval_expr().unwrap();
        assert_relative_eq!(parser.result().unwrap().as_f64().unwrap(), 1.0);
    }

    #[test]
    fn test_eval_buffers() {
        let mut parser = Parser::new();
        parser.set_expression("sin(${l}) + cos(${m}) + ${n}").unwrap();
        parser.substitute_var([
            ("l", Value::Buffer(Buffer::from_f64(vec![0.0, 1.0, 2.0, 3.0]))),
            ("m", Value::Buffer(Buffer::from_f64(vec![0.0, 10.0, 20.0, 30.0]))),
            ("n", Value::Float(10.0)),
        ]);
        parser.eval_expr().unwrap();
        let result = parser.result().unwrap().as_buffer().unwrap().to_f64_vec();
        for (k, v) in result.iter().enumerate() {
            let k = k as f64;
            assert_relative_eq!(*v, k.sin() + (10.0 * k).cos() + 10.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_missing_locals_are_all_reported() {
        let mut parser = Parser::new();
        parser.set_expression("${a} + ${b} + ${c}").unwrap();
        parser.bind("b", Value::Int(1));
        assert!(!parser.bind("zzz", Value::Int(1)));
        let err = parser.eval_expr().unwrap_err();
        let ProcessingError::InvalidVariable { missing } = err else {
            panic!("expected InvalidVariable, got {:?}", err);
        };
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_duration_literals() {
        let mut parser = Parser::new();
        parser.set_expression("${self}.time + 20000 * 365D").unwrap();
        assert!(parser.has_time_units());
        assert_eq!(parser.expression(), "key0.time + 20000 * timedelta_D(365)");

        parser.set_expression("${a} + 5ms - 2s").unwrap();
        assert_eq!(parser.expression(), "key0 + timedelta_ms(5) - timedelta_s(2)");

        parser.set_expression("${a} + 1.5").unwrap();
        assert!(!parser.has_time_units());
    }

    #[test]
    fn test_duration_rewrite_boundaries() {
        assert_eq!(rewrite_durations("key10 + 3").0, "key10 + 3");
        assert_eq!(rewrite_durations("3hz").0, "3hz");
        assert_eq!(rewrite_durations("2.5s").0, "2.5s");
        assert_eq!(rewrite_durations("(4W)").0, "(timedelta_W(4))");
        assert_eq!(rewrite_durations("7as").0, "timedelta_as(7)");
    }

    #[test]
    fn test_clear_expr_resets_state() {
        let mut parser = Parser::new();
        parser.set_expression("${a} + 1").unwrap();
        parser.bind("a", Value::Int(1));
        parser.eval_expr().unwrap();
        parser.clear_expr();
        assert!(!parser.is_valid());
        assert!(parser.var_map().is_empty());
        assert!(parser.locals().is_empty());
        assert!(parser.result().is_none());

        parser.set_expression("${z} * 2").unwrap();
        assert_eq!(parser.key_of("z"), Some("key0"));
    }

    #[test]
    fn test_limits() {
        let limits = EvalLimits {
            max_expression_len: 32,
            max_ast_nodes: 5,
            max_eval_steps: 3,
            ..EvalLimits::default()
        };
        let mut parser = Parser::with_limits(limits);

        let err = parser.set_expression(&format!("${{a}}{}", " + 1".repeat(20))).unwrap_err();
        assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::LimitExceeded));

        let err = parser.set_expression("${a} + 1 + 2 + 3").unwrap_err();
        assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::LimitExceeded));

        parser.set_expression("${a} + 1 + 2").unwrap();
        parser.bind("a", Value::Int(1));
        let err = parser.eval_expr().unwrap_err();
        assert_eq!(err.expression_kind(), Some(ExpressionErrorKind::LimitExceeded));
    }

    #[test]
    fn test_is_expression() {
        assert!(Parser::is_expression("${ml0004}-${ml0002}"));
        assert!(!Parser::is_expression("${ml0004}-{ml0002}"));
        assert!(!Parser::is_expression("plain-name"));
    }
}
