use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::error::ValueError;

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Bool,
    List,
    Dynamic,
    Empty,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Int => "int",
            ValueKind::Bool => "boolean",
            ValueKind::List => "list",
            ValueKind::Dynamic => "dynamic",
            ValueKind::Empty => "empty",
        }
    }
}

/// Where a context value came from, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Default,
    Preset,
    External,
    Prompt,
}

/// A lazily produced, memoized string value.
#[derive(Clone)]
pub struct Dynamic {
    inner: Rc<DynamicInner>,
}

struct DynamicInner {
    supplier: Box<dyn Fn() -> String>,
    cell: RefCell<Option<String>>,
}

impl Dynamic {
    pub fn new(supplier: impl Fn() -> String + 'static) -> Self {
        Dynamic {
            inner: Rc::new(DynamicInner {
                supplier: Box::new(supplier),
                cell: RefCell::new(None),
            }),
        }
    }

    /// Resolves the supplier, at most once.
    pub fn resolve(&self) -> String {
        let mut cell = self.inner.cell.borrow_mut();
        if cell.is_none() {
            *cell = Some((self.inner.supplier)());
        }
        cell.clone().unwrap_or_default()
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.cell.borrow() {
            Some(s) => write!(f, "Dynamic({s:?})"),
            None => write!(f, "Dynamic(<unresolved>)"),
        }
    }
}

/// Tagged union of every value the engine traffics in.
///
/// Conversions follow a fixed table: strings and lists convert to each other
/// via comma split and join (`"none"` parses to the empty list), booleans
/// parse from `true`/`false` case-insensitively, anything else fails with a
/// [`ValueError`].
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
    Dynamic(Dynamic),
    Empty(Option<String>),
}

impl Value {
    pub fn empty() -> Value {
        Value::Empty(None)
    }

    pub fn empty_because(reason: impl Into<String>) -> Value {
        Value::Empty(Some(reason.into()))
    }

    pub fn dynamic(supplier: impl Fn() -> String + 'static) -> Value {
        Value::Dynamic(Dynamic::new(supplier))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::List(_) => ValueKind::List,
            Value::Dynamic(_) => ValueKind::Dynamic,
            Value::Empty(_) => ValueKind::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty(_))
    }

    /// The stored value as a string; fails on empty.
    pub fn get(&self) -> Result<String, ValueError> {
        match self {
            Value::Empty(reason) => Err(ValueError::Empty {
                reason: reason.clone(),
            }),
            other => other.as_string(),
        }
    }

    /// Canonical string form; empty values render as the empty string.
    pub fn canonical(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => items.join(","),
            Value::Dynamic(d) => d.resolve(),
            Value::Empty(_) => String::new(),
        }
    }

    pub fn as_string(&self) -> Result<String, ValueError> {
        match self {
            Value::Empty(reason) => Err(ValueError::Empty {
                reason: reason.clone(),
            }),
            other => Ok(other.canonical()),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => Value::parse_bool(s),
            Value::Dynamic(d) => Value::parse_bool(&d.resolve()),
            other => Err(ValueError::Conversion {
                from: other.kind().name(),
                to: "boolean",
            }),
        }
    }

    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::String(s) => Value::parse_int(s),
            Value::Dynamic(d) => Value::parse_int(&d.resolve()),
            other => Err(ValueError::Conversion {
                from: other.kind().name(),
                to: "int",
            }),
        }
    }

    pub fn as_list(&self) -> Result<Vec<String>, ValueError> {
        match self {
            Value::List(items) => Ok(items.clone()),
            Value::String(s) => Ok(split_list(s)),
            Value::Dynamic(d) => Ok(split_list(&d.resolve())),
            other => Err(ValueError::Conversion {
                from: other.kind().name(),
                to: "list",
            }),
        }
    }

    /// Falls back to `default` when this value is empty.
    pub fn or(self, default: Value) -> Value {
        if self.is_empty() {
            default
        } else {
            self
        }
    }

    pub fn or_with(self, default: impl FnOnce() -> Value) -> Value {
        if self.is_empty() {
            default()
        } else {
            self
        }
    }

    /// Applies `f` to the string form and re-wraps the result into the
    /// variant matching the produced text. List values map element-wise.
    pub fn map(self, f: impl Fn(&str) -> String) -> Value {
        match self {
            Value::List(items) => Value::List(items.iter().map(|s| f(s)).collect()),
            Value::Empty(reason) => Value::Empty(reason),
            other => Value::wrap(&f(&other.canonical())),
        }
    }

    /// Wraps raw text into the variant its shape suggests.
    fn wrap(text: &str) -> Value {
        if let Ok(b) = Value::parse_bool(text) {
            Value::Bool(b)
        } else if let Ok(i) = Value::parse_int(text) {
            Value::Int(i)
        } else {
            Value::String(text.to_owned())
        }
    }

    /// `None` parses to the empty value, `"none"` to the empty list.
    pub fn parse_list(text: Option<&str>) -> Value {
        match text {
            None => Value::empty(),
            Some(s) => Value::List(split_list(s)),
        }
    }

    pub fn parse_bool(text: &str) -> Result<bool, ValueError> {
        if text.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if text.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(ValueError::Parse {
                text: text.to_owned(),
                to: "boolean",
            })
        }
    }

    pub fn parse_int(text: &str) -> Result<i64, ValueError> {
        text.trim().parse().map_err(|_| ValueError::Parse {
            text: text.to_owned(),
            to: "int",
        })
    }

    /// Total order across kinds: empties compare equal, same-kind values use
    /// their natural order, mixed kinds fall back to canonical string compare.
    pub fn compare(a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Empty(_), Value::Empty(_)) => Ordering::Equal,
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::List(x), Value::List(y)) => x.cmp(y),
            _ => a.canonical().cmp(&b.canonical()),
        }
    }

    /// Loose equality: `Dynamic` promotes to the other side's kind, lists are
    /// equal when the same length and set-equal, other kinds must match.
    pub fn is_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Dynamic(d), other) | (other, Value::Dynamic(d)) => {
                let s = d.resolve();
                match other {
                    Value::Bool(b) => Value::parse_bool(&s).map(|v| v == *b).unwrap_or(false),
                    Value::Int(i) => Value::parse_int(&s).map(|v| v == *i).unwrap_or(false),
                    Value::List(items) => lists_equal(&split_list(&s), items),
                    Value::String(o) => s == *o,
                    Value::Dynamic(o) => s == o.resolve(),
                    Value::Empty(_) => false,
                }
            }
            (Value::Empty(_), Value::Empty(_)) => true,
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::List(x), Value::List(y)) => lists_equal(x, y),
            _ => false,
        }
    }
}

fn split_list(text: &str) -> Vec<String> {
    if text.eq_ignore_ascii_case("none") {
        Vec::new()
    } else {
        text.split(',').map(|s| s.trim().to_owned()).collect()
    }
}

fn lists_equal(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::is_equal(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dynamic(d) => serializer.serialize_str(&d.resolve()),
            Value::Empty(_) => serializer.serialize_none(),
        }
    }
}
