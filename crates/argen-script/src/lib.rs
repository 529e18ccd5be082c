mod ast;
mod error;
mod expr;
mod value;

pub use ast::{
    FileSet, Input, InputKind, Invoke, InvokeKind, Method, Model, ModelContent, ModelKind,
    ModelNode, Node, NodeKind, OptionNode, Position, Preset, PresetKind, Replacement, Script,
    Transformation, DEFAULT_MODEL_ORDER,
};
pub use error::{ExprError, ValueError};
pub use expr::{BinaryOp, Expr, Expression, Literal, UnaryOp, VariableSource};
pub use value::{Dynamic, Value, ValueKind, ValueSource};
