use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::trace;

use argen_script::{
    Expression, FileSet, Input, InputKind, Invoke, InvokeKind, Method, Model, ModelContent,
    ModelKind, ModelNode, Node, NodeKind, OptionNode, Position, Preset, PresetKind, Replacement,
    Script, Transformation, DEFAULT_MODEL_ORDER,
};

use crate::archive::Archive;
use crate::error::EngineError;

/// Loads a script from the archive by archive-relative path.
pub fn load(archive: &dyn Archive, path: &str) -> Result<Script, EngineError> {
    if !archive.exists(path) {
        return Err(EngineError::ScriptReference {
            script: None,
            line: None,
            message: format!("script not found: {path}"),
        });
    }
    let source = archive.read_string(path)?;
    load_str(&source, path)
}

/// Loads a script from in-memory XML. The root element must be
/// `archetype-script`; the closed child-set per parent is enforced while
/// streaming.
pub fn load_str(source: &str, path: &str) -> Result<Script, EngineError> {
    Loader::new(source, path).run()
}

/// Partially built node, one per open element. Model nesting is tracked by
/// this typed stack alone; the element-name stack only feeds diagnostics
/// and the admission check.
enum Open {
    Script {
        children: Vec<Node>,
    },
    Step {
        position: Position,
        guard: Option<Expression>,
        label: Option<String>,
        help: Option<String>,
        children: Vec<Node>,
    },
    Inputs {
        position: Position,
        guard: Option<Expression>,
        children: Vec<Node>,
    },
    Input {
        position: Position,
        guard: Option<Expression>,
        input: Input,
    },
    Option {
        position: Position,
        guard: Option<Expression>,
        value: String,
        label: Option<String>,
        children: Vec<Node>,
    },
    Presets {
        position: Position,
        guard: Option<Expression>,
        children: Vec<Node>,
    },
    Preset {
        position: Position,
        guard: Option<Expression>,
        path: String,
        kind: PresetKind,
        text: String,
    },
    Output {
        position: Position,
        guard: Option<Expression>,
        children: Vec<Node>,
    },
    Transformation {
        position: Position,
        guard: Option<Expression>,
        id: String,
        replacements: Vec<Replacement>,
    },
    /// `<replace regex replacement>`; attaches to the enclosing
    /// transformation on close.
    ReplacePending(String, String),
    CopyFile {
        position: Position,
        guard: Option<Expression>,
        source: String,
        target: String,
    },
    FileSetBlock {
        position: Position,
        guard: Option<Expression>,
        templates_engine: Option<String>,
        directory: String,
        includes: Vec<String>,
        excludes: Vec<String>,
        transformations: Vec<String>,
        model: Option<Model>,
    },
    Template {
        position: Position,
        guard: Option<Expression>,
        engine: String,
        source: String,
        target: String,
        model: Option<Model>,
    },
    Model {
        children: Vec<ModelNode>,
    },
    ModelList {
        position: Position,
        guard: Option<Expression>,
        key: Option<String>,
        order: i32,
        children: Vec<ModelNode>,
    },
    ModelMap {
        position: Position,
        guard: Option<Expression>,
        key: Option<String>,
        order: i32,
        children: Vec<ModelNode>,
    },
    ModelValue {
        position: Position,
        guard: Option<Expression>,
        key: Option<String>,
        order: i32,
        content: ModelContent,
        text: String,
    },
    Invoke {
        position: Position,
        guard: Option<Expression>,
        invoke: Invoke,
    },
    Method {
        position: Position,
        name: String,
        children: Vec<Node>,
    },
    Help {
        text: String,
    },
    Directory {
        text: String,
    },
    Includes,
    Excludes,
    Pattern {
        include: bool,
        text: String,
    },
}

impl Open {
    fn context_name(&self) -> &'static str {
        match self {
            Open::Script { .. } => "archetype-script",
            Open::Step { .. } => "step",
            Open::Inputs { .. } => "input",
            Open::Input { .. } => "typed input",
            Open::Option { .. } => "option",
            Open::Presets { .. } => "context",
            Open::Preset { .. } => "preset",
            Open::Output { .. } => "output",
            Open::Transformation { .. } => "transformation",
            Open::ReplacePending(..) => "replace",
            Open::CopyFile { .. } => "file",
            Open::FileSetBlock { .. } => "files",
            Open::Template { .. } => "template",
            Open::Model { .. } => "model",
            Open::ModelList { .. } => "list",
            Open::ModelMap { .. } => "map",
            Open::ModelValue { .. } => "value",
            Open::Invoke { .. } => "invoke",
            Open::Method { .. } => "method",
            Open::Help { .. } => "help",
            Open::Directory { .. } => "directory",
            Open::Includes => "includes",
            Open::Excludes => "excludes",
            Open::Pattern { .. } => "pattern",
        }
    }
}

struct Loader<'a> {
    source: &'a str,
    path: String,
    stack: Vec<Open>,
    names: Vec<String>,
    finished: Option<Vec<Node>>,
}

impl<'a> Loader<'a> {
    fn new(source: &'a str, path: &str) -> Loader<'a> {
        Loader {
            source,
            path: path.to_owned(),
            stack: Vec::new(),
            names: Vec::new(),
            finished: None,
        }
    }

    fn run(mut self) -> Result<Script, EngineError> {
        let mut reader = Reader::from_str(self.source);
        reader.config_mut().trim_text(true);
        loop {
            let line = self.line_at(reader.buffer_position() as usize);
            match reader.read_event() {
                Ok(Event::Start(e)) => self.open(&e, line)?,
                Ok(Event::Empty(e)) => {
                    self.open(&e, line)?;
                    self.close(line)?;
                }
                Ok(Event::End(_)) => self.close(line)?,
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.err(line, format!("invalid text content: {e}")))?;
                    self.text(&text, line)?;
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    self.text(&text, line)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(self.err(line, format!("malformed XML: {e}"))),
            }
        }
        match self.finished {
            Some(children) => Ok(Script {
                path: self.path,
                children,
            }),
            None => Err(self.err(1, "missing archetype-script root element".to_owned())),
        }
    }

    fn line_at(&self, pos: usize) -> usize {
        let end = pos.min(self.source.len());
        self.source.as_bytes()[..end]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }

    fn err(&self, line: usize, message: String) -> EngineError {
        EngineError::Load {
            script: self.path.clone(),
            line,
            message,
        }
    }

    fn element_path(&self) -> String {
        self.names.join("/")
    }

    fn open(&mut self, e: &BytesStart, line: usize) -> Result<(), EngineError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Attrs::read(self, e, line)?;
        let position = Position::new(&self.path, line);

        let open = match self.stack.last() {
            None => {
                if self.finished.is_some() {
                    return Err(self.err(line, "multiple root elements".to_owned()));
                }
                if name != "archetype-script" {
                    return Err(self.err(
                        line,
                        format!("invalid root element <{name}>, expected <archetype-script>"),
                    ));
                }
                Open::Script {
                    children: Vec::new(),
                }
            }
            Some(parent) => self.admit(parent, &name, &mut attrs, position, line)?,
        };
        trace!(element = %name, line, "open");
        self.stack.push(open);
        self.names.push(name);
        Ok(())
    }

    /// Creates the partial node for `name` under `parent`, or rejects it.
    fn admit(
        &self,
        parent: &Open,
        name: &str,
        attrs: &mut Attrs,
        position: Position,
        line: usize,
    ) -> Result<Open, EngineError> {
        let not_allowed = || {
            self.err(
                line,
                format!("element <{name}> not allowed under {}", self.element_path()),
            )
        };

        match parent {
            Open::Script { .. }
            | Open::Step { .. }
            | Open::Option { .. }
            | Open::Input { .. }
            | Open::Method { .. } => {
                // Block context: structural children plus, for typed enum and
                // list inputs, their options.
                match name {
                    "step" => {
                        if matches!(parent, Open::Step { .. }) {
                            return Err(not_allowed());
                        }
                        Ok(Open::Step {
                            position,
                            guard: attrs.guard()?,
                            label: attrs.take("label"),
                            help: None,
                            children: Vec::new(),
                        })
                    }
                    "input" => Ok(Open::Inputs {
                        position,
                        guard: attrs.guard()?,
                        children: Vec::new(),
                    }),
                    "context" => Ok(Open::Presets {
                        position,
                        guard: attrs.guard()?,
                        children: Vec::new(),
                    }),
                    "output" => {
                        if matches!(parent, Open::Step { .. }) {
                            return Err(not_allowed());
                        }
                        Ok(Open::Output {
                            position,
                            guard: attrs.guard()?,
                            children: Vec::new(),
                        })
                    }
                    "source" | "exec" => Ok(Open::Invoke {
                        position,
                        guard: attrs.guard()?,
                        invoke: Invoke {
                            kind: if name == "exec" {
                                InvokeKind::Exec
                            } else {
                                InvokeKind::Source
                            },
                            src: attrs.take("src"),
                            url: attrs.take("url"),
                            method: attrs.take("method"),
                        },
                    }),
                    "help" => Ok(Open::Help {
                        text: String::new(),
                    }),
                    "method" => {
                        if !matches!(parent, Open::Script { .. }) {
                            return Err(not_allowed());
                        }
                        Ok(Open::Method {
                            position,
                            name: attrs.require("name")?,
                            children: Vec::new(),
                        })
                    }
                    "option" => {
                        let admissible = matches!(
                            parent,
                            Open::Input {
                                input: Input {
                                    kind: InputKind::Enum | InputKind::List { .. },
                                    ..
                                },
                                ..
                            }
                        );
                        if !admissible {
                            return Err(not_allowed());
                        }
                        Ok(Open::Option {
                            position,
                            guard: attrs.guard()?,
                            value: attrs.require("value")?,
                            label: attrs.take("label"),
                            children: Vec::new(),
                        })
                    }
                    _ => Err(not_allowed()),
                }
            }
            Open::Inputs { .. } => match name {
                "text" | "boolean" | "enum" | "list" => {
                    let kind = match name {
                        "boolean" => InputKind::Boolean,
                        "text" => InputKind::Text {
                            placeholder: attrs.take("placeholder"),
                        },
                        "enum" => InputKind::Enum,
                        _ => InputKind::List {
                            min: attrs.take_usize("min", line)?,
                            max: attrs.take_usize("max", line)?,
                        },
                    };
                    Ok(Open::Input {
                        position,
                        guard: attrs.guard()?,
                        input: Input {
                            name: attrs.require("name")?,
                            label: attrs.take("label"),
                            help: None,
                            default: attrs.take("default"),
                            prompt: attrs.take("prompt"),
                            optional: attrs.take_bool("optional", false, line)?,
                            global: attrs.take_bool("global", false, line)?,
                            kind,
                            children: Vec::new(),
                        },
                    })
                }
                "input" => Ok(Open::Inputs {
                    position,
                    guard: attrs.guard()?,
                    children: Vec::new(),
                }),
                "step" => Ok(Open::Step {
                    position,
                    guard: attrs.guard()?,
                    label: attrs.take("label"),
                    help: None,
                    children: Vec::new(),
                }),
                "context" => Ok(Open::Presets {
                    position,
                    guard: attrs.guard()?,
                    children: Vec::new(),
                }),
                "output" => Ok(Open::Output {
                    position,
                    guard: attrs.guard()?,
                    children: Vec::new(),
                }),
                "source" | "exec" => Ok(Open::Invoke {
                    position,
                    guard: attrs.guard()?,
                    invoke: Invoke {
                        kind: if name == "exec" {
                            InvokeKind::Exec
                        } else {
                            InvokeKind::Source
                        },
                        src: attrs.take("src"),
                        url: attrs.take("url"),
                        method: attrs.take("method"),
                    },
                }),
                _ => Err(not_allowed()),
            },
            Open::Presets { .. } => match name {
                "boolean" | "text" | "enum" | "list" => Ok(Open::Preset {
                    position,
                    guard: attrs.guard()?,
                    path: attrs.require("path")?,
                    kind: match name {
                        "boolean" => PresetKind::Boolean,
                        "text" => PresetKind::Text,
                        "enum" => PresetKind::Enum,
                        _ => PresetKind::List,
                    },
                    text: String::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::Output { .. } => match name {
                "transformation" => Ok(Open::Transformation {
                    position,
                    guard: attrs.guard()?,
                    id: attrs.require("id")?,
                    replacements: Vec::new(),
                }),
                "file" => Ok(Open::CopyFile {
                    position,
                    guard: attrs.guard()?,
                    source: attrs.require("source")?,
                    target: attrs.require("target")?,
                }),
                "files" => Ok(Open::FileSetBlock {
                    position,
                    guard: attrs.guard()?,
                    templates_engine: None,
                    directory: String::new(),
                    includes: Vec::new(),
                    excludes: Vec::new(),
                    transformations: attrs.take_list("transformations"),
                    model: None,
                }),
                "templates" => Ok(Open::FileSetBlock {
                    position,
                    guard: attrs.guard()?,
                    templates_engine: Some(attrs.require("engine")?),
                    directory: String::new(),
                    includes: Vec::new(),
                    excludes: Vec::new(),
                    transformations: attrs.take_list("transformations"),
                    model: None,
                }),
                "template" => Ok(Open::Template {
                    position,
                    guard: attrs.guard()?,
                    engine: attrs.require("engine")?,
                    source: attrs.require("source")?,
                    target: attrs.require("target")?,
                    model: None,
                }),
                "model" => Ok(Open::Model {
                    children: Vec::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::FileSetBlock {
                templates_engine, ..
            } => match name {
                "directory" => Ok(Open::Directory {
                    text: String::new(),
                }),
                "includes" => Ok(Open::Includes),
                "excludes" => Ok(Open::Excludes),
                "model" if templates_engine.is_some() => Ok(Open::Model {
                    children: Vec::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::Template { .. } => match name {
                "model" => Ok(Open::Model {
                    children: Vec::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::Includes => match name {
                "include" => Ok(Open::Pattern {
                    include: true,
                    text: String::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::Excludes => match name {
                "exclude" => Ok(Open::Pattern {
                    include: false,
                    text: String::new(),
                }),
                _ => Err(not_allowed()),
            },
            Open::Transformation { .. } => match name {
                "replace" => {
                    let regex = attrs.require("regex")?;
                    let replacement = attrs.require("replacement")?;
                    // pushed as a marker; the data goes straight to the parent
                    // on close, so stash it in the attrs-free variant
                    Ok(Open::ReplacePending(regex, replacement))
                }
                _ => Err(not_allowed()),
            },
            Open::Model { .. } | Open::ModelList { .. } | Open::ModelMap { .. } => match name {
                "value" => Ok(Open::ModelValue {
                    position,
                    guard: attrs.guard()?,
                    key: attrs.take("key"),
                    order: attrs.take_order(line)?,
                    content: ModelContent {
                        inline: None,
                        file: attrs.take("file"),
                        url: attrs.take("url"),
                        template: attrs.take("template"),
                    },
                    text: String::new(),
                }),
                "list" => Ok(Open::ModelList {
                    position,
                    guard: attrs.guard()?,
                    key: attrs.take("key"),
                    order: attrs.take_order(line)?,
                    children: Vec::new(),
                }),
                "map" => Ok(Open::ModelMap {
                    position,
                    guard: attrs.guard()?,
                    key: attrs.take("key"),
                    order: attrs.take_order(line)?,
                    children: Vec::new(),
                }),
                _ => Err(not_allowed()),
            },
            _ => Err(not_allowed()),
        }
    }

    fn text(&mut self, text: &str, line: usize) -> Result<(), EngineError> {
        match self.stack.last_mut() {
            Some(Open::Help { text: t })
            | Some(Open::Directory { text: t })
            | Some(Open::Pattern { text: t, .. })
            | Some(Open::Preset { text: t, .. })
            | Some(Open::ModelValue { text: t, .. }) => {
                t.push_str(text);
                Ok(())
            }
            Some(open) => {
                let context = open.context_name();
                if text.trim().is_empty() {
                    Ok(())
                } else {
                    Err(self.err(line, format!("unexpected text content in <{context}>")))
                }
            }
            None => Ok(()),
        }
    }

    fn close(&mut self, line: usize) -> Result<(), EngineError> {
        let open = self
            .stack
            .pop()
            .ok_or_else(|| self.err(line, "unbalanced end tag".to_owned()))?;
        self.names.pop();

        match open {
            Open::Script { children } => {
                self.finished = Some(children);
                Ok(())
            }
            Open::Step {
                position,
                guard,
                label,
                help,
                children,
            } => self.attach_node(
                Node::new(position, guard, NodeKind::Step {
                    label,
                    help,
                    children,
                }),
                line,
            ),
            Open::Inputs {
                position,
                guard,
                children,
            } => self.attach_node(Node::new(position, guard, NodeKind::Inputs { children }), line),
            Open::Input {
                position,
                guard,
                input,
            } => self.attach_node(Node::new(position, guard, NodeKind::Input(input)), line),
            Open::Option {
                position,
                guard,
                value,
                label,
                children,
            } => self.attach_node(
                Node::new(
                    position,
                    guard,
                    NodeKind::Option(OptionNode {
                        value,
                        label,
                        children,
                    }),
                ),
                line,
            ),
            Open::Presets {
                position,
                guard,
                children,
            } => self.attach_node(Node::new(position, guard, NodeKind::Presets { children }), line),
            Open::Preset {
                position,
                guard,
                path,
                kind,
                mut text,
            } => {
                if text.is_empty() && kind == PresetKind::Boolean {
                    text.push_str("true");
                }
                let expr = if text.contains("${") {
                    Expression::parse(&text).ok()
                } else {
                    None
                };
                self.attach_node(
                    Node::new(
                        position,
                        guard,
                        NodeKind::Preset(Preset {
                            path,
                            kind,
                            text,
                            expr,
                        }),
                    ),
                    line,
                )
            }
            Open::Output {
                position,
                guard,
                children,
            } => self.attach_node(Node::new(position, guard, NodeKind::Output { children }), line),
            Open::Transformation {
                position,
                guard,
                id,
                replacements,
            } => self.attach_node(
                Node::new(
                    position,
                    guard,
                    NodeKind::Transformation(Transformation { id, replacements }),
                ),
                line,
            ),
            Open::ReplacePending(regex, replacement) => match self.stack.last_mut() {
                Some(Open::Transformation { replacements, .. }) => {
                    replacements.push(Replacement { regex, replacement });
                    Ok(())
                }
                _ => Err(self.err(line, "replace outside transformation".to_owned())),
            },
            Open::CopyFile {
                position,
                guard,
                source,
                target,
            } => self.attach_node(
                Node::new(position, guard, NodeKind::CopyFile { source, target }),
                line,
            ),
            Open::FileSetBlock {
                position,
                guard,
                templates_engine,
                directory,
                includes,
                excludes,
                transformations,
                model,
            } => {
                if directory.is_empty() {
                    return Err(self.err(line, "missing <directory> element".to_owned()));
                }
                let fileset = FileSet {
                    directory,
                    includes,
                    excludes,
                    transformations,
                };
                let kind = match templates_engine {
                    Some(engine) => NodeKind::Templates {
                        engine,
                        fileset,
                        model,
                    },
                    None => NodeKind::CopyFiles(fileset),
                };
                self.attach_node(Node::new(position, guard, kind), line)
            }
            Open::Template {
                position,
                guard,
                engine,
                source,
                target,
                model,
            } => self.attach_node(
                Node::new(
                    position,
                    guard,
                    NodeKind::Template {
                        engine,
                        source,
                        target,
                        model,
                    },
                ),
                line,
            ),
            Open::Model { children } => {
                let model = Model { children };
                match self.stack.last_mut() {
                    Some(Open::Template { model: slot, .. })
                    | Some(Open::FileSetBlock { model: slot, .. }) => {
                        if slot.is_some() {
                            return Err(self.err(line, "multiple model blocks".to_owned()));
                        }
                        *slot = Some(model);
                        Ok(())
                    }
                    Some(Open::Output { children, .. }) => {
                        children.push(Node::new(
                            Position::new(&self.path, line),
                            None,
                            NodeKind::Model(model),
                        ));
                        Ok(())
                    }
                    _ => Err(self.err(line, "model in unexpected position".to_owned())),
                }
            }
            Open::ModelList {
                position,
                guard,
                key,
                order,
                children,
            } => self.attach_model_node(ModelNode {
                position,
                guard,
                order,
                kind: ModelKind::List { key, children },
            }),
            Open::ModelMap {
                position,
                guard,
                key,
                order,
                children,
            } => self.attach_model_node(ModelNode {
                position,
                guard,
                order,
                kind: ModelKind::Map { key, children },
            }),
            Open::ModelValue {
                position,
                guard,
                key,
                order,
                mut content,
                text,
            } => {
                if !text.is_empty() {
                    content.inline = Some(text);
                }
                self.attach_model_node(ModelNode {
                    position,
                    guard,
                    order,
                    kind: ModelKind::Value { key, content },
                })
            }
            Open::Invoke {
                position,
                guard,
                invoke,
            } => {
                if invoke.src.is_none() && invoke.url.is_none() {
                    return Err(self.err(
                        line,
                        "source/exec requires a src or url attribute".to_owned(),
                    ));
                }
                self.attach_node(Node::new(position, guard, NodeKind::Invoke(invoke)), line)
            }
            Open::Method {
                position,
                name,
                children,
            } => self.attach_node(
                Node::new(position, None, NodeKind::Method(Method { name, children })),
                line,
            ),
            Open::Help { text } => {
                match self.stack.last_mut() {
                    Some(Open::Step { help, .. }) => {
                        *help = Some(text);
                        Ok(())
                    }
                    Some(Open::Input { input, .. }) => {
                        input.help = Some(text);
                        Ok(())
                    }
                    _ => self.attach_node(
                        Node::new(Position::new(&self.path, line), None, NodeKind::Help { text }),
                        line,
                    ),
                }
            }
            Open::Directory { text } => match self.stack.last_mut() {
                Some(Open::FileSetBlock { directory, .. }) => {
                    *directory = text.trim().to_owned();
                    Ok(())
                }
                _ => Err(self.err(line, "directory in unexpected position".to_owned())),
            },
            Open::Includes | Open::Excludes => Ok(()),
            Open::Pattern { include, text } => {
                // the grandparent fileset owns the pattern; includes/excludes
                // are still on the stack
                let pattern = text.trim().to_owned();
                let mut frames = self.stack.iter_mut().rev();
                frames.next(); // includes/excludes wrapper
                match frames.next() {
                    Some(Open::FileSetBlock {
                        includes, excludes, ..
                    }) => {
                        if include {
                            includes.push(pattern);
                        } else {
                            excludes.push(pattern);
                        }
                        Ok(())
                    }
                    _ => Err(self.err(line, "pattern in unexpected position".to_owned())),
                }
            }
        }
    }

    fn attach_node(&mut self, node: Node, line: usize) -> Result<(), EngineError> {
        let target = match self.stack.last_mut() {
            Some(Open::Script { children })
            | Some(Open::Step { children, .. })
            | Some(Open::Inputs { children, .. })
            | Some(Open::Option { children, .. })
            | Some(Open::Presets { children, .. })
            | Some(Open::Output { children, .. })
            | Some(Open::Method { children, .. }) => children,
            Some(Open::Input { input, .. }) => &mut input.children,
            Some(other) => {
                let context = other.context_name();
                return Err(self.err(
                    line,
                    format!("cannot attach <{}> under <{context}>", node_name(&node)),
                ));
            }
            None => return Err(self.err(line, "node outside root element".to_owned())),
        };
        target.push(node);
        Ok(())
    }

    fn attach_model_node(&mut self, node: ModelNode) -> Result<(), EngineError> {
        match self.stack.last_mut() {
            Some(Open::Model { children })
            | Some(Open::ModelList { children, .. })
            | Some(Open::ModelMap { children, .. }) => {
                children.push(node);
                Ok(())
            }
            _ => Err(self.err(
                node.position.line,
                "model node in unexpected position".to_owned(),
            )),
        }
    }
}

fn node_name(node: &Node) -> &'static str {
    match &node.kind {
        NodeKind::Step { .. } => "step",
        NodeKind::Inputs { .. } => "input",
        NodeKind::Input(_) => "typed input",
        NodeKind::Option(_) => "option",
        NodeKind::Presets { .. } => "context",
        NodeKind::Preset(_) => "preset",
        NodeKind::Output { .. } => "output",
        NodeKind::Transformation(_) => "transformation",
        NodeKind::CopyFile { .. } => "file",
        NodeKind::CopyFiles(_) => "files",
        NodeKind::Template { .. } => "template",
        NodeKind::Templates { .. } => "templates",
        NodeKind::Model(_) => "model",
        NodeKind::Invoke(_) => "invoke",
        NodeKind::Method(_) => "method",
        NodeKind::Help { .. } => "help",
    }
}

/// Attribute bag for one element, with required/typed accessors.
struct Attrs {
    script: String,
    line: usize,
    element: String,
    values: HashMap<String, String>,
}

impl Attrs {
    fn read(loader: &Loader, e: &BytesStart, line: usize) -> Result<Attrs, EngineError> {
        let element = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut values = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| {
                loader.err(line, format!("bad attribute on <{element}>: {err}"))
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| loader.err(line, format!("bad attribute value: {err}")))?
                .into_owned();
            values.insert(key, value);
        }
        Ok(Attrs {
            script: loader.path.clone(),
            line,
            element,
            values,
        })
    }

    fn take(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    fn take_list(&mut self, name: &str) -> Vec<String> {
        self.take(name)
            .map(|v| {
                v.split([',', ' '])
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn require(&mut self, name: &str) -> Result<String, EngineError> {
        self.take(name).ok_or_else(|| EngineError::Load {
            script: self.script.clone(),
            line: self.line,
            message: format!(
                "missing required attribute {name} on <{}>",
                self.element
            ),
        })
    }

    fn take_bool(&mut self, name: &str, default: bool, line: usize) -> Result<bool, EngineError> {
        match self.take(name) {
            None => Ok(default),
            Some(raw) => argen_script::Value::parse_bool(&raw).map_err(|_| EngineError::Load {
                script: self.script.clone(),
                line,
                message: format!("attribute {name} is not a boolean: {raw:?}"),
            }),
        }
    }

    fn take_usize(&mut self, name: &str, line: usize) -> Result<Option<usize>, EngineError> {
        match self.take(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| EngineError::Load {
                script: self.script.clone(),
                line,
                message: format!("attribute {name} is not a number: {raw:?}"),
            }),
        }
    }

    fn take_order(&mut self, line: usize) -> Result<i32, EngineError> {
        match self.take("order") {
            None => Ok(DEFAULT_MODEL_ORDER),
            Some(raw) => raw.trim().parse().map_err(|_| EngineError::Load {
                script: self.script.clone(),
                line,
                message: format!("attribute order is not a number: {raw:?}"),
            }),
        }
    }

    fn guard(&mut self) -> Result<Option<Expression>, EngineError> {
        match self.take("if") {
            None => Ok(None),
            Some(raw) => Expression::parse(&raw).map(Some).map_err(|e| {
                EngineError::from_expr(e, &Position::new(&self.script, self.line))
            }),
        }
    }
}
