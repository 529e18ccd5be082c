use std::collections::{BTreeMap, HashMap};
use std::fmt;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Serialize, Serializer};

use crate::error::ExprError;

#[derive(Parser)]
#[grammar = "expr.pest"]
struct ExprParser;

/// A typed literal, also the result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl Literal {
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "boolean",
            Literal::Int(_) => "int",
            Literal::Str(_) => "string",
            Literal::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Str(s) => write!(f, "'{s}'"),
            Literal::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "'{item}'")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Contains,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        /// Set when the source wrapped this node in parentheses; the
        /// renderer keeps the grouping.
        isolated: bool,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Variable(name) => write!(f, "${{{name}}}"),
            Expr::Unary { op: UnaryOp::Not, expr } => write!(f, "!{expr}"),
            Expr::Binary {
                op,
                lhs,
                rhs,
                isolated,
            } => {
                if *isolated {
                    write!(f, "({lhs} {} {rhs})", op.symbol())
                } else {
                    write!(f, "{lhs} {} {rhs}", op.symbol())
                }
            }
        }
    }
}

/// Supplies raw variable values for evaluation.
pub trait VariableSource {
    fn value_of(&self, name: &str) -> Option<String>;
}

impl VariableSource for HashMap<String, String> {
    fn value_of(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl VariableSource for BTreeMap<String, String> {
    fn value_of(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A parsed guard expression, bound to its source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ExprError> {
        let mut pairs =
            ExprParser::parse(Rule::expression, source).map_err(|e| parse_error(source, &e))?;
        let expression = pairs.next().expect("expression rule always present");
        let or_expr = expression
            .into_inner()
            .next()
            .expect("or_expr under expression");
        Ok(Expression {
            source: source.to_owned(),
            root: build_binary_chain(or_expr)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluates against `vars`. Short-circuited arms of `&&`/`||` are never
    /// evaluated, so errors there (unset variables included) are suppressed.
    pub fn evaluate(&self, vars: &dyn VariableSource) -> Result<Literal, ExprError> {
        eval(&self.root, vars)
    }

    /// Evaluates and requires a boolean result.
    pub fn evaluate_bool(&self, vars: &dyn VariableSource) -> Result<bool, ExprError> {
        let result = self.evaluate(vars)?;
        result.as_bool().ok_or_else(|| ExprError::Type {
            message: format!("expected a boolean result, got {} ({})", result, result.kind()),
        })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

fn parse_error(source: &str, e: &pest::error::Error<Rule>) -> ExprError {
    let slice = match e.location {
        pest::error::InputLocation::Pos(p) => {
            let end = (p + 24).min(source.len());
            source
                .get(p..end)
                .or_else(|| source.get(p..))
                .unwrap_or(source)
        }
        pest::error::InputLocation::Span((s, e)) => source.get(s..e).unwrap_or(source),
    };
    ExprError::Parse {
        message: e.variant.message().into_owned(),
        slice: slice.to_owned(),
    }
}

/// Folds `operand (op operand)*` levels into left-associated binaries.
fn build_binary_chain(pair: Pair<Rule>) -> Result<Expr, ExprError> {
    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr | Rule::eq_expr | Rule::contains_expr => {
            let mut inner = pair.into_inner();
            let first = inner.next().expect("leading operand");
            let mut expr = build_binary_chain(first)?;
            while let Some(op_pair) = inner.next() {
                let op = match (op_pair.as_rule(), op_pair.as_str()) {
                    (Rule::or_op, _) => BinaryOp::Or,
                    (Rule::and_op, _) => BinaryOp::And,
                    (Rule::eq_op, "==") => BinaryOp::Eq,
                    (Rule::eq_op, _) => BinaryOp::Ne,
                    (Rule::contains_op, _) => BinaryOp::Contains,
                    (rule, text) => unreachable!("operator {rule:?} {text:?}"),
                };
                let rhs = build_binary_chain(inner.next().expect("trailing operand"))?;
                expr = Expr::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                    isolated: false,
                };
            }
            Ok(expr)
        }
        Rule::unary_expr => {
            let mut inner = pair.into_inner();
            let first = inner.next().expect("unary operand");
            if first.as_rule() == Rule::not_op {
                let child = build_binary_chain(inner.next().expect("negated operand"))?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(child),
                })
            } else {
                build_binary_chain(first)
            }
        }
        Rule::atom => {
            let inner = pair.into_inner().next().expect("atom content");
            build_binary_chain(inner)
        }
        Rule::paren => {
            let inner = pair.into_inner().next().expect("grouped expression");
            let mut expr = build_binary_chain(inner)?;
            if let Expr::Binary { isolated, .. } = &mut expr {
                *isolated = true;
            }
            Ok(expr)
        }
        Rule::literal => Ok(Expr::Literal(build_literal(pair))),
        Rule::variable => {
            let text = pair.as_str();
            Ok(Expr::Variable(text[2..text.len() - 1].to_owned()))
        }
        rule => unreachable!("unexpected rule {rule:?}"),
    }
}

fn build_literal(pair: Pair<Rule>) -> Literal {
    let inner = pair.into_inner().next().expect("literal content");
    match inner.as_rule() {
        Rule::boolean => Literal::Bool(inner.as_str() == "true"),
        Rule::integer => Literal::Int(inner.as_str().parse().expect("checked by grammar")),
        Rule::string => Literal::Str(unquote(inner.as_str())),
        Rule::array => Literal::List(inner.into_inner().map(|s| unquote(s.as_str())).collect()),
        rule => unreachable!("literal rule {rule:?}"),
    }
}

fn unquote(text: &str) -> String {
    text[1..text.len() - 1].to_owned()
}

fn eval(expr: &Expr, vars: &dyn VariableSource) -> Result<Literal, ExprError> {
    match expr {
        Expr::Literal(lit) => Ok(lit.clone()),
        Expr::Variable(name) => {
            let raw = vars
                .value_of(name)
                .ok_or_else(|| ExprError::UnsetVariable { name: name.clone() })?;
            Ok(literal_from_raw(&raw))
        }
        Expr::Unary { op: UnaryOp::Not, expr } => {
            let value = eval(expr, vars)?;
            match value {
                Literal::Bool(b) => Ok(Literal::Bool(!b)),
                other => Err(ExprError::Type {
                    message: format!("! applied to {} ({})", other, other.kind()),
                }),
            }
        }
        Expr::Binary { op, lhs, rhs, .. } => eval_binary(*op, lhs, rhs, vars),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    vars: &dyn VariableSource,
) -> Result<Literal, ExprError> {
    match op {
        BinaryOp::And => {
            let left = require_bool(op, eval(lhs, vars)?)?;
            if !left {
                return Ok(Literal::Bool(false));
            }
            Ok(Literal::Bool(require_bool(op, eval(rhs, vars)?)?))
        }
        BinaryOp::Or => {
            let left = require_bool(op, eval(lhs, vars)?)?;
            if left {
                return Ok(Literal::Bool(true));
            }
            Ok(Literal::Bool(require_bool(op, eval(rhs, vars)?)?))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let left = eval(lhs, vars)?;
            let right = eval(rhs, vars)?;
            if left.kind() != right.kind() {
                return Err(ExprError::Type {
                    message: format!(
                        "cannot compare {} ({}) with {} ({})",
                        left,
                        left.kind(),
                        right,
                        right.kind()
                    ),
                });
            }
            let equal = match (&left, &right) {
                (Literal::List(a), Literal::List(b)) => {
                    a.len() == b.len() && a.iter().all(|x| b.contains(x))
                }
                _ => left == right,
            };
            Ok(Literal::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Contains => {
            let left = eval(lhs, vars)?;
            let right = eval(rhs, vars)?;
            match (&left, &right) {
                (Literal::List(items), Literal::Str(needle)) => {
                    Ok(Literal::Bool(items.contains(needle)))
                }
                _ => Err(ExprError::Type {
                    message: format!(
                        "contains expects a list and a string, got {} ({}) and {} ({})",
                        left,
                        left.kind(),
                        right,
                        right.kind()
                    ),
                }),
            }
        }
    }
}

fn require_bool(op: BinaryOp, value: Literal) -> Result<bool, ExprError> {
    value.as_bool().ok_or_else(|| ExprError::Type {
        message: format!("{} applied to {} ({})", op.symbol(), value, value.kind()),
    })
}

/// Parses a raw variable value the way a literal would parse: booleans and
/// integers by shape, bracketed lists, quoted strings, anything else as a
/// bare string.
fn literal_from_raw(raw: &str) -> Literal {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Literal::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Literal::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Literal::Int(i);
    }
    if trimmed.starts_with('[') {
        if let Ok(mut pairs) = ExprParser::parse(Rule::array, trimmed) {
            if let Some(array) = pairs.next() {
                if array.as_str().len() == trimmed.len() {
                    return Literal::List(
                        array.into_inner().map(|s| unquote(s.as_str())).collect(),
                    );
                }
            }
        }
    }
    if (trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\''))
        || (trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"'))
    {
        return Literal::Str(unquote(trimmed));
    }
    Literal::Str(raw.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval_bool(src: &str, pairs: &[(&str, &str)]) -> Result<bool, ExprError> {
        Expression::parse(src)?.evaluate_bool(&vars(pairs))
    }

    #[test]
    fn precedence_binds_and_over_or() {
        // parsed as (a && b) || c
        assert!(eval_bool("${a} && ${b} || ${c}", &[("a", "false"), ("c", "true")]).unwrap());
    }

    #[test]
    fn eq_binds_over_and() {
        assert!(eval_bool("${x} == 'a' && ${y} == 'b'", &[("x", "a"), ("y", "b")]).unwrap());
    }

    #[test]
    fn contains_binds_over_eq() {
        // parsed as (list contains 'a') == true
        assert!(eval_bool("['a','b'] contains 'a' == true", &[]).unwrap());
    }

    #[test]
    fn chained_contains_is_a_parse_error() {
        let err = Expression::parse("['a'] contains 'a' contains 'b'").unwrap_err();
        assert!(matches!(err, ExprError::Parse { .. }));
    }

    #[test]
    fn stray_operator_sequence_is_a_parse_error() {
        assert!(matches!(
            Expression::parse("${a} !== 'x'").unwrap_err(),
            ExprError::Parse { .. }
        ));
        assert!(matches!(
            Expression::parse("(${a} == 'x'").unwrap_err(),
            ExprError::Parse { .. }
        ));
    }

    #[test]
    fn not_requires_boolean() {
        let err = eval_bool("!${x}", &[("x", "hello")]).unwrap_err();
        assert!(matches!(err, ExprError::Type { .. }));
        assert!(eval_bool("!${x}", &[("x", "false")]).unwrap());
    }

    #[test]
    fn variables_parse_as_literals() {
        assert!(eval_bool("${xs} contains 'b'", &[("xs", "['a','b']")]).unwrap());
        assert!(eval_bool("${n} == 3", &[("n", "3")]).unwrap());
    }

    #[test]
    fn short_circuit_tolerates_unset_dead_arm() {
        let expr = Expression::parse("['a','b','c'] contains ${x} && ${y}").unwrap();
        assert!(expr.evaluate_bool(&vars(&[("x", "b"), ("y", "true")])).unwrap());
        // x does not match, so the unset y is never read
        assert!(!expr.evaluate_bool(&vars(&[("x", "d")])).unwrap());
    }

    #[test]
    fn unset_variable_in_live_arm_fails() {
        let err = eval_bool("${missing} == 'x'", &[]).unwrap_err();
        assert_eq!(
            err,
            ExprError::UnsetVariable {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn equality_requires_matching_types() {
        let err = eval_bool("'3' == 3", &[]).unwrap_err();
        assert!(matches!(err, ExprError::Type { .. }));
        assert!(eval_bool("'x' != 'y'", &[]).unwrap());
    }

    #[test]
    fn render_round_trips_respecting_isolation() {
        for src in [
            "${a} && ${b} || !${c}",
            "(${a} || ${b}) && ['x','y'] contains 'x'",
            "!(${a} == 'v')",
            "${n} != 42 && (${s} == 'a' || ${s} == 'b')",
        ] {
            let parsed = Expression::parse(src).unwrap();
            let rendered = parsed.to_string();
            let reparsed = Expression::parse(&rendered).unwrap();
            assert_eq!(parsed, reparsed, "round-trip of {src:?} via {rendered:?}");
        }
    }

    #[test]
    fn list_literal_equality_is_set_equality() {
        assert!(eval_bool("['a','b'] == ['b','a']", &[]).unwrap());
        assert!(!eval_bool("['a'] == ['a','a']", &[]).unwrap());
    }
}
