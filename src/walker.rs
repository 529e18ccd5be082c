use tracing::{debug, trace};

use argen_script::{Input, InputKind, Invoke, Node, NodeKind, Script, Value};

use crate::archive;
use crate::context::Context;
use crate::error::EngineError;
use crate::session::Session;

/// What a visitor callback asks the walker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    SkipSubtree,
    Terminate,
}

/// Per-node callbacks for one traversal purpose. The walker owns guard
/// evaluation, scope bookkeeping and invoke expansion; visitors only see
/// nodes that are live.
pub trait Visitor {
    fn enter(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        session: &Session,
    ) -> Result<VisitResult, EngineError> {
        let _ = (node, ctx, session);
        Ok(VisitResult::Continue)
    }

    fn leave(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        let _ = (node, ctx, session);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Terminate,
}

/// Depth-first, context-carrying traversal of a script and everything it
/// invokes.
pub struct Walker<'s> {
    session: &'s Session,
    evaluate_guards: bool,
    invoke_chain: Vec<String>,
}

impl<'s> Walker<'s> {
    pub fn new(session: &'s Session) -> Walker<'s> {
        Walker {
            session,
            evaluate_guards: true,
            invoke_chain: Vec::new(),
        }
    }

    /// Treats every guard as possibly-true; used by the input tree builder.
    pub fn without_guard_evaluation(mut self) -> Walker<'s> {
        self.evaluate_guards = false;
        self
    }

    pub fn walk(
        &mut self,
        script: &Script,
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<(), EngineError> {
        let canonical = archive::canonicalize(&script.path)?;
        debug!(script = %canonical, "walk");
        self.invoke_chain.push(canonical.clone());
        ctx.push_cwd(archive::parent(&canonical).to_owned());
        let result = self.walk_nodes(&script.children, ctx, visitor);
        ctx.pop_cwd();
        self.invoke_chain.pop();
        result.map(|_| ())
    }

    fn walk_nodes(
        &mut self,
        nodes: &[Node],
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<Flow, EngineError> {
        for node in nodes {
            if self.session.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Flow::Terminate = self.walk_node(node, ctx, visitor)? {
                return Ok(Flow::Terminate);
            }
        }
        Ok(Flow::Continue)
    }

    fn walk_node(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<Flow, EngineError> {
        if self.evaluate_guards {
            if let Some(guard) = &node.guard {
                let live = guard
                    .evaluate_bool(ctx)
                    .map_err(|e| EngineError::from_expr(e, &node.position))?;
                if !live {
                    trace!(at = %node.position, guard = %guard.source(), "guard false, skipping");
                    return Ok(Flow::Continue);
                }
            }
        }

        let flow = match visitor.enter(node, ctx, self.session)? {
            VisitResult::Terminate => return Ok(Flow::Terminate),
            VisitResult::SkipSubtree => Flow::Continue,
            VisitResult::Continue => match &node.kind {
                NodeKind::Input(input) => self.walk_input(node, input, ctx, visitor)?,
                NodeKind::Invoke(invoke) => self.walk_invoke(node, invoke, ctx, visitor)?,
                // methods only run when dispatched by an invoke
                NodeKind::Method(_) => Flow::Continue,
                _ => self.walk_nodes(node.children(), ctx, visitor)?,
            },
        };
        if flow == Flow::Terminate {
            return Ok(Flow::Terminate);
        }
        visitor.leave(node, ctx, self.session)?;
        Ok(Flow::Continue)
    }

    /// Walks an input declaration: scopes the context and filters option
    /// children by the resolved value's membership.
    fn walk_input(
        &mut self,
        node: &Node,
        input: &Input,
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<Flow, EngineError> {
        let path = if input.global {
            input.name.clone()
        } else {
            ctx.path_of(&input.name)
        };
        let resolved = ctx.entry(&path).map(|e| e.value.clone());

        let pushed = !input.global;
        if pushed {
            let isolated = matches!(input.kind, InputKind::Enum | InputKind::List { .. });
            ctx.push(input.name.clone(), isolated);
        }

        let result = self.walk_input_children(node, input, resolved, ctx, visitor);

        if pushed {
            ctx.pop();
        }
        result
    }

    fn walk_input_children(
        &mut self,
        node: &Node,
        input: &Input,
        resolved: Option<Value>,
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<Flow, EngineError> {
        if !self.evaluate_guards {
            // reachability analysis: every branch is possible
            return self.walk_nodes(&input.children, ctx, visitor);
        }

        match &input.kind {
            InputKind::Boolean => {
                let on = resolved
                    .as_ref()
                    .map(|v| v.as_bool().unwrap_or(false))
                    .unwrap_or(false);
                if on {
                    self.walk_nodes(&input.children, ctx, visitor)
                } else {
                    Ok(Flow::Continue)
                }
            }
            InputKind::Enum => {
                let selected = resolved.as_ref().map(Value::canonical).unwrap_or_default();
                self.walk_filtered(node, &input.children, ctx, visitor, |value| {
                    value == selected
                })
            }
            InputKind::List { .. } => {
                let selected = resolved
                    .as_ref()
                    .and_then(|v| v.as_list().ok())
                    .unwrap_or_default();
                self.walk_filtered(node, &input.children, ctx, visitor, |value| {
                    selected.iter().any(|s| s == value)
                })
            }
            InputKind::Text { .. } => self.walk_nodes(&input.children, ctx, visitor),
        }
    }

    /// Walks non-option children unconditionally and option children whose
    /// value matches, in declaration order. Matching is exact and
    /// case-sensitive.
    fn walk_filtered(
        &mut self,
        _node: &Node,
        children: &[Node],
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
        matches: impl Fn(&str) -> bool,
    ) -> Result<Flow, EngineError> {
        for child in children {
            if self.session.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let NodeKind::Option(option) = &child.kind {
                if !matches(&option.value) {
                    continue;
                }
            }
            if let Flow::Terminate = self.walk_node(child, ctx, visitor)? {
                return Ok(Flow::Terminate);
            }
        }
        Ok(Flow::Continue)
    }

    /// Expands a cross-script reference: load-or-cache the target, scope the
    /// context and CWD, dispatch into a method when named.
    fn walk_invoke(
        &mut self,
        node: &Node,
        invoke: &Invoke,
        ctx: &mut Context,
        visitor: &mut dyn Visitor,
    ) -> Result<Flow, EngineError> {
        let src = match (&invoke.src, &invoke.url) {
            (Some(src), _) => src,
            (None, Some(url)) => {
                return Err(EngineError::ScriptReference {
                    script: Some(node.position.script.clone()),
                    line: Some(node.position.line),
                    message: format!("url references are not supported: {url}"),
                })
            }
            (None, None) => unreachable!("loader requires src or url"),
        };

        let target = archive::canonicalize(&archive::join(ctx.cwd(), src)).map_err(|_| {
            EngineError::ScriptReference {
                script: Some(node.position.script.clone()),
                line: Some(node.position.line),
                message: format!("malformed script reference: {src}"),
            }
        })?;
        if self.invoke_chain.contains(&target) {
            return Err(EngineError::ScriptReference {
                script: Some(node.position.script.clone()),
                line: Some(node.position.line),
                message: format!(
                    "invoke cycle: {} -> {target}",
                    self.invoke_chain.join(" -> ")
                ),
            });
        }
        let script = self.session.load_script(&target).map_err(|e| match e {
            EngineError::ScriptReference { message, .. } => EngineError::ScriptReference {
                script: Some(node.position.script.clone()),
                line: Some(node.position.line),
                message,
            },
            other => other,
        })?;
        debug!(from = %node.position, to = %target, method = ?invoke.method, "invoke");

        let exec = invoke.kind == argen_script::InvokeKind::Exec;
        if exec {
            ctx.push_cwd(archive::parent(&target).to_owned());
        }
        self.invoke_chain.push(target.clone());

        let result = match &invoke.method {
            Some(name) => match script.method(name) {
                Some(method_node) => self.walk_nodes(method_node.children(), ctx, visitor),
                None => Err(EngineError::ScriptReference {
                    script: Some(node.position.script.clone()),
                    line: Some(node.position.line),
                    message: format!("unknown method {name} in {target}"),
                }),
            },
            None => self.walk_nodes(&script.children, ctx, visitor),
        };

        self.invoke_chain.pop();
        if exec {
            ctx.pop_cwd();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemArchive;
    use argen_script::ValueSource;

    struct Recorder {
        seen: Vec<String>,
    }

    impl Visitor for Recorder {
        fn enter(
            &mut self,
            node: &Node,
            ctx: &mut Context,
            _session: &Session,
        ) -> Result<VisitResult, EngineError> {
            let tag = match &node.kind {
                NodeKind::Input(input) => format!("input:{}", ctx.path_of(&input.name)),
                NodeKind::Option(option) => format!("option:{}", option.value),
                NodeKind::CopyFile { target, .. } => format!("file:{target}"),
                NodeKind::Help { .. } => "help".to_owned(),
                NodeKind::Invoke(_) => "invoke".to_owned(),
                NodeKind::Method(_) => "method".to_owned(),
                NodeKind::Inputs { .. } => "inputs".to_owned(),
                NodeKind::Output { .. } => "output".to_owned(),
                NodeKind::Step { .. } => "step".to_owned(),
                other => format!("{other:?}"),
            };
            self.seen.push(tag);
            Ok(VisitResult::Continue)
        }
    }

    fn session_with(path: &str, xml: &str) -> Session {
        Session::new(Box::new(MemArchive::new().with(path, xml)))
    }

    fn walk_all(session: &Session) -> Vec<String> {
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        let mut recorder = Recorder { seen: Vec::new() };
        Walker::new(session)
            .walk(&script, &mut ctx, &mut recorder)
            .unwrap();
        recorder.seen
    }

    #[test]
    fn guard_false_skips_subtree() {
        let session = session_with(
            "archetype.xml",
            r#"<archetype-script>
                 <output if="${docs}"><file source="d" target="docs.md"/></output>
                 <output><file source="r" target="README.md"/></output>
               </archetype-script>"#,
        );
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        ctx.put("docs", Value::from(false), ValueSource::External);
        let mut recorder = Recorder { seen: Vec::new() };
        Walker::new(&session)
            .walk(&script, &mut ctx, &mut recorder)
            .unwrap();
        assert_eq!(recorder.seen, vec!["output", "file:README.md"]);
    }

    #[test]
    fn enum_walks_only_the_matched_option() {
        let session = session_with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <enum name="lang">
                     <option value="java"><help>j</help></option>
                     <option value="kotlin"><help>k</help></option>
                   </enum>
                 </input>
               </archetype-script>"#,
        );
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        ctx.put("lang", Value::from("kotlin"), ValueSource::External);
        let mut recorder = Recorder { seen: Vec::new() };
        Walker::new(&session)
            .walk(&script, &mut ctx, &mut recorder)
            .unwrap();
        assert_eq!(
            recorder.seen,
            vec!["inputs", "input:lang", "option:kotlin", "help"]
        );
    }

    #[test]
    fn self_invoke_is_a_cycle_error() {
        let session = session_with(
            "archetype.xml",
            r#"<archetype-script><source src="archetype.xml"/></archetype-script>"#,
        );
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        let mut recorder = Recorder { seen: Vec::new() };
        let err = Walker::new(&session)
            .walk(&script, &mut ctx, &mut recorder)
            .unwrap_err();
        match err {
            EngineError::ScriptReference { message, .. } => {
                assert!(message.contains("cycle"), "{message}")
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn invoke_dispatches_into_a_named_method() {
        let archive = MemArchive::new()
            .with(
                "archetype.xml",
                r#"<archetype-script><source src="common.xml" method="readme"/></archetype-script>"#,
            )
            .with(
                "common.xml",
                r#"<archetype-script>
                     <method name="readme"><output><file source="r" target="README.md"/></output></method>
                     <method name="license"><output><file source="l" target="LICENSE"/></output></method>
                     <output><file source="x" target="never.txt"/></output>
                   </archetype-script>"#,
            );
        let session = Session::new(Box::new(archive));
        assert_eq!(walk_all(&session), vec!["invoke", "output", "file:README.md"]);
    }

    #[test]
    fn exec_pushes_the_target_directory() {
        let archive = MemArchive::new()
            .with(
                "archetype.xml",
                r#"<archetype-script><exec src="nested/sub.xml"/></archetype-script>"#,
            )
            .with(
                "nested/sub.xml",
                r#"<archetype-script><source src="leaf.xml"/></archetype-script>"#,
            )
            .with("nested/leaf.xml", r#"<archetype-script><help>deep</help></archetype-script>"#);
        let session = Session::new(Box::new(archive));
        // source inside nested/sub.xml resolves leaf.xml relative to nested/
        assert_eq!(walk_all(&session), vec!["invoke", "invoke", "help"]);
    }

    #[test]
    fn methods_do_not_run_on_a_plain_walk() {
        let session = session_with(
            "archetype.xml",
            r#"<archetype-script>
                 <method name="extra"><output><file source="x" target="x"/></output></method>
                 <help>visible</help>
               </archetype-script>"#,
        );
        assert_eq!(walk_all(&session), vec!["method", "help"]);
    }
}
