use thiserror::Error;

/// Errors raised by [`crate::Value`] conversions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// A conversion between value kinds that the conversion table forbids.
    #[error("cannot read {from} value as {to}")]
    Conversion {
        from: &'static str,
        to: &'static str,
    },

    /// The raw text could not be parsed into the requested kind.
    #[error("cannot parse {text:?} as {to}")]
    Parse { text: String, to: &'static str },

    /// `get` on an empty value.
    #[error("no value present{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Empty { reason: Option<String> },
}

/// Errors raised while parsing or evaluating guard expressions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    /// Syntax error; `slice` is the offending region of the source.
    #[error("invalid expression near {slice:?}: {message}")]
    Parse { message: String, slice: String },

    /// An operator was applied to operands of the wrong type.
    #[error("incorrect operand type: {message}")]
    Type { message: String },

    /// A variable required by a live branch has no value.
    #[error("variable {name} must be initialized")]
    UnsetVariable { name: String },
}
