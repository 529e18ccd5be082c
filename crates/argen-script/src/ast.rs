use serde::Serialize;

use crate::expr::Expression;

/// Source location of a node: owning script path and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub script: String,
    pub line: usize,
}

impl Position {
    pub fn new(script: impl Into<String>, line: usize) -> Self {
        Position {
            script: script.into(),
            line,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.script, self.line)
    }
}

/// A loaded archetype script. Immutable for the lifetime of a walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub path: String,
    pub children: Vec<Node>,
}

impl Script {
    /// Looks up a named method block declared at the top level.
    pub fn method(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|node| match &node.kind {
            NodeKind::Method(method) => method.name == name,
            _ => false,
        })
    }
}

/// Envelope shared by every node: position, optional `if` guard, kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    #[serde(skip_serializing)]
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none", rename = "if")]
    pub guard: Option<Expression>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(position: Position, guard: Option<Expression>, kind: NodeKind) -> Self {
        Node {
            position,
            guard,
            kind,
        }
    }

    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Step { children, .. }
            | NodeKind::Inputs { children }
            | NodeKind::Presets { children }
            | NodeKind::Output { children } => children,
            NodeKind::Input(input) => &input.children,
            NodeKind::Option(option) => &option.children,
            NodeKind::Method(method) => &method.children,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeKind {
    /// `<step>` — a named grouping of work, purely structural.
    Step {
        label: Option<String>,
        help: Option<String>,
        children: Vec<Node>,
    },
    /// `<input>` — groups input declarations and nested blocks.
    Inputs { children: Vec<Node> },
    /// A typed input declaration (`<text>`, `<boolean>`, `<enum>`, `<list>`).
    Input(Input),
    /// `<option>` under an enum or list input.
    Option(OptionNode),
    /// `<context>` — a block of preset assignments.
    Presets { children: Vec<Node> },
    /// One preset assignment inside a `<context>` block.
    Preset(Preset),
    /// `<output>` — subtree describing generated files.
    Output { children: Vec<Node> },
    /// `<transformation id="...">` — named path-rewrite rules.
    Transformation(Transformation),
    /// `<file source target>` — verbatim copy.
    CopyFile { source: String, target: String },
    /// `<files>` — glob-selected copies.
    CopyFiles(FileSet),
    /// `<template engine source target>` — single rendered file.
    Template {
        engine: String,
        source: String,
        target: String,
        model: Option<Model>,
    },
    /// `<templates>` — glob-selected rendered files.
    Templates {
        engine: String,
        fileset: FileSet,
        model: Option<Model>,
    },
    /// `<model>` directly under `<output>`.
    Model(Model),
    /// `<source>`/`<exec>` — cross-script reference.
    Invoke(Invoke),
    /// `<method name="...">` — reusable fragment, dispatched by invokes.
    Method(Method),
    /// `<help>` free text.
    Help { text: String },
}

/// A user input declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Input {
    pub name: String,
    pub label: Option<String>,
    pub help: Option<String>,
    pub default: Option<String>,
    pub prompt: Option<String>,
    pub optional: bool,
    pub global: bool,
    pub kind: InputKind,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputKind {
    Boolean,
    Text {
        placeholder: Option<String>,
    },
    Enum,
    List {
        min: Option<usize>,
        max: Option<usize>,
    },
}

impl InputKind {
    pub fn name(&self) -> &'static str {
        match self {
            InputKind::Boolean => "boolean",
            InputKind::Text { .. } => "text",
            InputKind::Enum => "enum",
            InputKind::List { .. } => "list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionNode {
    pub value: String,
    pub label: Option<String>,
    pub children: Vec<Node>,
}

/// Element name a preset was declared with; fixes how its text parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Boolean,
    Text,
    Enum,
    List,
}

impl PresetKind {
    pub fn name(self) -> &'static str {
        match self {
            PresetKind::Boolean => "boolean",
            PresetKind::Text => "text",
            PresetKind::Enum => "enum",
            PresetKind::List => "list",
        }
    }
}

/// A declarative assignment fixing an input's value at a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub path: String,
    pub kind: PresetKind,
    /// Raw text content; boolean presets with no text default to `true`.
    pub text: String,
    /// Present when the text is an expression rather than a literal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expression>,
}

/// A named sequence of regex replacements applied to output paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transformation {
    pub id: String,
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replacement {
    pub regex: String,
    pub replacement: String,
}

/// Glob-selected file set under a directory, shared by `files`/`templates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSet {
    pub directory: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Transformation ids to apply, resolved against the in-scope stack.
    pub transformations: Vec<String>,
}

/// Ordered, keyed data merged across template directives.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Model {
    pub children: Vec<ModelNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelNode {
    #[serde(skip_serializing)]
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none", rename = "if")]
    pub guard: Option<Expression>,
    pub order: i32,
    #[serde(flatten)]
    pub kind: ModelKind,
}

pub const DEFAULT_MODEL_ORDER: i32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum ModelKind {
    Value {
        key: Option<String>,
        content: ModelContent,
    },
    List {
        key: Option<String>,
        children: Vec<ModelNode>,
    },
    Map {
        key: Option<String>,
        children: Vec<ModelNode>,
    },
}

/// Where a model value's text comes from, and whether it is itself a
/// template to render.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ModelContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Engine name; when set the resolved text is rendered before merging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// How an invoke affects the working directory stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeKind {
    /// `<source>` — target runs in the caller's directory.
    Source,
    /// `<exec>` — target runs in its own directory.
    Exec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoke {
    pub kind: InvokeKind,
    pub src: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Method {
    pub name: String,
    pub children: Vec<Node>,
}
