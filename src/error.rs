use serde::Serialize;
use thiserror::Error;

use argen_script::{ExprError, Position, ValueError};

/// Every failure the engine can surface. All kinds propagate to the
/// top-level driver; the only locally recovered conditions are the
/// dead-arm unset variable (short-circuit, handled inside expression
/// evaluation) and interactive re-prompting on resolution errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed XML, invalid element nesting, missing required attribute.
    #[error("{script}:{line}: {message}")]
    Load {
        script: String,
        line: usize,
        message: String,
    },

    /// Expression parser failure.
    #[error("{}invalid expression: {message}", location_prefix(script.as_deref(), *line))]
    Parse {
        script: Option<String>,
        line: Option<usize>,
        message: String,
    },

    /// Expression or value conversion type mismatch.
    #[error("{}type error: {message}", location_prefix(script.as_deref(), *line))]
    Type {
        script: Option<String>,
        line: Option<usize>,
        message: String,
    },

    /// A live branch referenced a variable with no value.
    #[error("{}variable {name} must be initialized", location_prefix(script.as_deref(), *line))]
    UnsetVariable {
        script: Option<String>,
        line: Option<usize>,
        name: String,
    },

    /// Required input missing, invalid choice, min/max violation.
    #[error("{}cannot resolve input {path}: {message}", location_prefix(script.as_deref(), *line))]
    Resolution {
        script: Option<String>,
        line: Option<usize>,
        path: String,
        message: String,
    },

    /// Unknown method, missing target script, invoke cycle.
    #[error("{}script reference error: {message}", location_prefix(script.as_deref(), *line))]
    ScriptReference {
        script: Option<String>,
        line: Option<usize>,
        message: String,
    },

    /// Unknown engine, empty glob expansion, unknown transformation id.
    #[error("output error: {message}")]
    Output { message: String },

    /// Cooperative cancellation observed between sibling nodes.
    #[error("cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn location_prefix(script: Option<&str>, line: Option<usize>) -> String {
    match (script, line) {
        (Some(s), Some(l)) => format!("{s}:{l}: "),
        (Some(s), None) => format!("{s}: "),
        _ => String::new(),
    }
}

impl EngineError {
    pub fn output(message: impl Into<String>) -> EngineError {
        EngineError::Output {
            message: message.into(),
        }
    }

    /// Attaches a position to a position-free expression error.
    pub fn from_expr(err: ExprError, position: &Position) -> EngineError {
        let script = Some(position.script.clone());
        let line = Some(position.line);
        match err {
            ExprError::Parse { message, slice } => EngineError::Parse {
                script,
                line,
                message: format!("{message} near {slice:?}"),
            },
            ExprError::Type { message } => EngineError::Type {
                script,
                line,
                message,
            },
            ExprError::UnsetVariable { name } => EngineError::UnsetVariable {
                script,
                line,
                name,
            },
        }
    }

    pub fn from_value(err: ValueError, position: &Position) -> EngineError {
        EngineError::Type {
            script: Some(position.script.clone()),
            line: Some(position.line),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Load { .. } => "load",
            EngineError::Parse { .. } => "parse",
            EngineError::Type { .. } => "type",
            EngineError::UnsetVariable { .. } => "unset-variable",
            EngineError::Resolution { .. } => "resolution",
            EngineError::ScriptReference { .. } => "script-reference",
            EngineError::Output { .. } => "output",
            EngineError::Cancelled => "cancelled",
            EngineError::Io(_) => "io",
        }
    }

    /// CLI exit code: 1 for user errors, 2 for internal ones.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Io(_) => 2,
            _ => 1,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let (script, line, path) = match self {
            EngineError::Load { script, line, .. } => (Some(script.clone()), Some(*line), None),
            EngineError::Parse { script, line, .. }
            | EngineError::Type { script, line, .. }
            | EngineError::UnsetVariable { script, line, .. }
            | EngineError::ScriptReference { script, line, .. } => {
                (script.clone(), *line, None)
            }
            EngineError::Resolution {
                script, line, path, ..
            } => (script.clone(), *line, Some(path.clone())),
            _ => (None, None, None),
        };
        Diagnostic {
            kind: self.kind(),
            message: self.to_string(),
            script,
            line,
            path,
        }
    }
}

/// Structured rendering of an [`EngineError`] for external consumers.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
