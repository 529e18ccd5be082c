use std::collections::{HashMap, HashSet};

use tracing::debug;

use argen_script::{
    Expression, Input, InputKind, Literal, Node, NodeKind, Position, Preset, PresetKind, Value,
    ValueSource,
};

use crate::context::Context;
use crate::error::EngineError;
use crate::prompter::{coerce_answer, Prompter, Question};
use crate::session::Session;
use crate::walker::{Visitor, VisitResult, Walker};

/// Binds every walked input to a value: an externally supplied answer, the
/// declared default, or an interactive prompt. Presets are applied as they
/// are walked and always win over later bindings for the same path.
pub struct InputResolver<'p> {
    answers: HashMap<String, String>,
    prompter: Option<&'p mut dyn Prompter>,
    presets: Vec<(String, Position)>,
    inputs_seen: HashSet<String>,
}

impl<'p> InputResolver<'p> {
    /// Batch mode: unanswered non-optional inputs without defaults fail.
    pub fn batch(answers: HashMap<String, String>) -> InputResolver<'p> {
        InputResolver {
            answers,
            prompter: None,
            presets: Vec::new(),
            inputs_seen: HashSet::new(),
        }
    }

    /// Interactive mode: unanswered inputs fall through to the prompter,
    /// which is re-asked until the answer validates.
    pub fn interactive(
        answers: HashMap<String, String>,
        prompter: &'p mut dyn Prompter,
    ) -> InputResolver<'p> {
        InputResolver {
            answers,
            prompter: Some(prompter),
            presets: Vec::new(),
            inputs_seen: HashSet::new(),
        }
    }

    /// Post-walk check: every preset must have fixed a reachable input.
    pub fn finish(&mut self) -> Result<(), EngineError> {
        for (path, position) in &self.presets {
            if !self.inputs_seen.contains(path) {
                return Err(EngineError::Resolution {
                    script: Some(position.script.clone()),
                    line: Some(position.line),
                    path: path.clone(),
                    message: "preset targets no reachable input".to_owned(),
                });
            }
        }
        Ok(())
    }

    fn apply_preset(
        &mut self,
        node: &Node,
        preset: &Preset,
        ctx: &mut Context,
    ) -> Result<(), EngineError> {
        let value = match &preset.expr {
            Some(expr) => literal_to_value(
                expr.evaluate(ctx)
                    .map_err(|e| EngineError::from_expr(e, &node.position))?,
            ),
            None => match preset.kind {
                PresetKind::Boolean => Value::Bool(
                    Value::parse_bool(&preset.text)
                        .map_err(|e| EngineError::from_value(e, &node.position))?,
                ),
                PresetKind::List => Value::parse_list(Some(&preset.text)),
                PresetKind::Text | PresetKind::Enum => Value::from(preset.text.as_str()),
            },
        };
        debug!(path = %preset.path, value = %value, "preset");
        self.presets.push((preset.path.clone(), node.position.clone()));
        ctx.put(preset.path.clone(), value, ValueSource::Preset);
        Ok(())
    }

    fn resolve_input(
        &mut self,
        node: &Node,
        input: &Input,
        ctx: &mut Context,
    ) -> Result<(), EngineError> {
        let path = if input.global {
            input.name.clone()
        } else {
            ctx.path_of(&input.name)
        };
        self.inputs_seen.insert(path.clone());

        // a preset fixes the outcome; only validate it
        if let Some(entry) = ctx.entry(&path) {
            if entry.source == ValueSource::Preset {
                let value = entry.value.clone();
                validate_value(node, input, &path, &value)?;
                return Ok(());
            }
        }

        let options = option_pairs(input);
        let (value, source) = if let Some(raw) = self.answers.get(&path).cloned() {
            let value = coerce_answer(&raw, &input.kind, &options, input.default.as_deref())
                .map_err(|message| resolution_error(node, &path, message))?;
            (value, ValueSource::External)
        } else if let Some(default) = &input.default {
            (
                evaluate_default(default, &input.kind, node, ctx)?,
                ValueSource::Default,
            )
        } else if let Some(prompter) = self.prompter.as_deref_mut() {
            let value = prompt_until_valid(prompter, node, input, &path, &options)?;
            (value, ValueSource::Prompt)
        } else if input.optional {
            (Value::empty_because("not provided"), ValueSource::Default)
        } else {
            return Err(resolution_error(
                node,
                &path,
                "required input not provided".to_owned(),
            ));
        };

        validate_value(node, input, &path, &value)?;
        debug!(path = %path, value = %value, ?source, "resolved");
        if input.global {
            ctx.put_global(path, value, source);
        } else {
            ctx.put(path, value, source);
        }
        Ok(())
    }

}

/// Kind-specific constraints: option membership and list arity.
fn validate_value(
    node: &Node,
    input: &Input,
    path: &str,
    value: &Value,
) -> Result<(), EngineError> {
    if value.is_empty() {
        return Ok(());
    }
    match &input.kind {
        InputKind::Enum => {
            let selected = value.canonical();
            if !input_has_option(input, &selected) {
                return Err(resolution_error(
                    node,
                    path,
                    format!("{selected:?} is not one of the declared options"),
                ));
            }
        }
        InputKind::List { min, max } => {
            let selected = value
                .as_list()
                .map_err(|e| EngineError::from_value(e, &node.position))?;
            for item in &selected {
                if !input_has_option(input, item) {
                    return Err(resolution_error(
                        node,
                        path,
                        format!("{item:?} is not one of the declared options"),
                    ));
                }
            }
            if let Some(min) = min {
                if selected.len() < *min {
                    return Err(resolution_error(
                        node,
                        path,
                        format!("at least {min} selections required, got {}", selected.len()),
                    ));
                }
            }
            if let Some(max) = max {
                if selected.len() > *max {
                    return Err(resolution_error(
                        node,
                        path,
                        format!("at most {max} selections allowed, got {}", selected.len()),
                    ));
                }
            }
        }
        InputKind::Boolean => {
            value
                .as_bool()
                .map_err(|e| EngineError::from_value(e, &node.position))?;
        }
        InputKind::Text { .. } => {}
    }
    Ok(())
}

impl Visitor for InputResolver<'_> {
    fn enter(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        _session: &Session,
    ) -> Result<VisitResult, EngineError> {
        match &node.kind {
            NodeKind::Preset(preset) => {
                self.apply_preset(node, preset, ctx)?;
                Ok(VisitResult::Continue)
            }
            NodeKind::Input(input) => {
                self.resolve_input(node, input, ctx)?;
                Ok(VisitResult::Continue)
            }
            // output generation belongs to a later pass
            NodeKind::Output { .. } => Ok(VisitResult::SkipSubtree),
            _ => Ok(VisitResult::Continue),
        }
    }
}

/// Walks `script` with a resolver and returns the populated context.
pub fn resolve_script(
    session: &Session,
    script: &argen_script::Script,
    ctx: &mut Context,
    resolver: &mut InputResolver,
) -> Result<(), EngineError> {
    Walker::new(session).walk(script, ctx, resolver)?;
    resolver.finish()
}

/// Exhaustive mode: one resolved context per permutation of the pruned
/// input tree, in enumeration order.
pub fn resolve_permutations(
    session: &Session,
    script: &argen_script::Script,
    limit: Option<usize>,
) -> Result<Vec<Context>, EngineError> {
    let tree = crate::tree::InputTree::build(session, script)?.pruned();
    let mut out = Vec::new();
    for (i, values) in tree.iter_permutations().enumerate() {
        if let Some(limit) = limit {
            if i >= limit {
                break;
            }
        }
        let mut ctx = Context::new();
        let mut resolver = InputResolver::batch(values.into_iter().collect());
        resolve_script(session, script, &mut ctx, &mut resolver)?;
        out.push(ctx);
    }
    Ok(out)
}

fn option_pairs(input: &Input) -> Vec<(String, Option<String>)> {
    input
        .children
        .iter()
        .filter_map(|child| match &child.kind {
            NodeKind::Option(option) => Some((option.value.clone(), option.label.clone())),
            _ => None,
        })
        .collect()
}

fn input_has_option(input: &Input, value: &str) -> bool {
    input.children.iter().any(|child| match &child.kind {
        NodeKind::Option(option) => option.value == value,
        _ => false,
    })
}

fn resolution_error(node: &Node, path: &str, message: String) -> EngineError {
    EngineError::Resolution {
        script: Some(node.position.script.clone()),
        line: Some(node.position.line),
        path: path.to_owned(),
        message,
    }
}

/// Defaults may be expressions over earlier inputs; anything with a `${`
/// is evaluated, everything else is literal text of the input's kind.
fn evaluate_default(
    default: &str,
    kind: &InputKind,
    node: &Node,
    ctx: &Context,
) -> Result<Value, EngineError> {
    if default.contains("${") {
        let expr = Expression::parse(default)
            .map_err(|e| EngineError::from_expr(e, &node.position))?;
        return Ok(literal_to_value(
            expr.evaluate(ctx)
                .map_err(|e| EngineError::from_expr(e, &node.position))?,
        ));
    }
    Ok(match kind {
        InputKind::Boolean => Value::Bool(
            Value::parse_bool(default).map_err(|e| EngineError::from_value(e, &node.position))?,
        ),
        InputKind::List { .. } => Value::parse_list(Some(default)),
        _ => Value::from(default),
    })
}

fn prompt_until_valid(
    prompter: &mut dyn Prompter,
    node: &Node,
    input: &Input,
    path: &str,
    options: &[(String, Option<String>)],
) -> Result<Value, EngineError> {
    let question_options: Vec<(&str, Option<&str>)> = options
        .iter()
        .map(|(v, l)| (v.as_str(), l.as_deref()))
        .collect();
    let question = Question {
        path,
        kind: &input.kind,
        label: input.prompt.as_deref().or(input.label.as_deref()),
        help: input.help.as_deref(),
        options: question_options,
        default: input.default.as_deref(),
    };
    loop {
        let raw = prompter.prompt(&question)?;
        match coerce_answer(&raw, &input.kind, options, input.default.as_deref()) {
            Ok(value) => match validate_value(node, input, path, &value) {
                Ok(()) => return Ok(value),
                Err(e) => debug!(path = %path, error = %e, "re-prompting"),
            },
            Err(message) => debug!(path = %path, %message, "re-prompting"),
        }
    }
}

fn literal_to_value(literal: Literal) -> Value {
    match literal {
        Literal::Bool(b) => Value::Bool(b),
        Literal::Int(i) => Value::Int(i),
        Literal::Str(s) => Value::String(s),
        Literal::List(items) => Value::List(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemArchive;
    use crate::prompter::ScriptedPrompter;

    fn session_with(xml: &str) -> Session {
        Session::new(Box::new(MemArchive::new().with("archetype.xml", xml)))
    }

    fn answers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolve(session: &Session, batch: &[(&str, &str)]) -> Result<Context, EngineError> {
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        let mut resolver = InputResolver::batch(answers(batch));
        resolve_script(session, &script, &mut ctx, &mut resolver)?;
        Ok(ctx)
    }

    const ENUM_SCRIPT: &str = r#"<archetype-script>
        <input>
          <enum name="lang" default="java">
            <option value="java"/>
            <option value="kotlin"/>
          </enum>
        </input>
      </archetype-script>"#;

    #[test]
    fn explicit_answer_wins_over_default() {
        let session = session_with(ENUM_SCRIPT);
        let ctx = resolve(&session, &[("lang", "kotlin")]).unwrap();
        assert_eq!(ctx.get("lang").unwrap().canonical(), "kotlin");
    }

    #[test]
    fn default_applies_when_unanswered() {
        let session = session_with(ENUM_SCRIPT);
        let ctx = resolve(&session, &[]).unwrap();
        assert_eq!(ctx.get("lang").unwrap().canonical(), "java");
    }

    #[test]
    fn invalid_choice_is_a_resolution_error() {
        let session = session_with(ENUM_SCRIPT);
        let err = resolve(&session, &[("lang", "rust")]).unwrap_err();
        assert!(matches!(err, EngineError::Resolution { .. }), "{err:?}");
    }

    #[test]
    fn missing_required_input_fails() {
        let session = session_with(
            r#"<archetype-script>
                 <input><text name="package"/></input>
               </archetype-script>"#,
        );
        let err = resolve(&session, &[]).unwrap_err();
        match err {
            EngineError::Resolution { path, .. } => assert_eq!(path, "package"),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn optional_input_resolves_to_empty() {
        let session = session_with(
            r#"<archetype-script>
                 <input><text name="notes" optional="true"/></input>
               </archetype-script>"#,
        );
        let ctx = resolve(&session, &[]).unwrap();
        assert!(ctx.get("notes").unwrap().is_empty());
    }

    #[test]
    fn preset_wins_over_batch_answer() {
        let session = session_with(
            r#"<archetype-script>
                 <context><enum path="db">h2</enum></context>
                 <input>
                   <enum name="db">
                     <option value="h2"/>
                     <option value="postgres"/>
                   </enum>
                 </input>
               </archetype-script>"#,
        );
        let ctx = resolve(&session, &[("db", "postgres")]).unwrap();
        assert_eq!(ctx.get("db").unwrap().canonical(), "h2");
    }

    #[test]
    fn preset_without_target_fails_the_walk() {
        let session = session_with(
            r#"<archetype-script>
                 <context><boolean path="ghost"/></context>
               </archetype-script>"#,
        );
        let err = resolve(&session, &[]).unwrap_err();
        match err {
            EngineError::Resolution { path, .. } => assert_eq!(path, "ghost"),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn list_arity_is_enforced() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <list name="features" min="2" max="3">
                     <option value="db"/>
                     <option value="web"/>
                     <option value="metrics"/>
                   </list>
                 </input>
               </archetype-script>"#,
        );
        let err = resolve(&session, &[("features", "db")]).unwrap_err();
        assert!(matches!(err, EngineError::Resolution { .. }), "{err:?}");
        let ctx = resolve(&session, &[("features", "db,web")]).unwrap();
        assert_eq!(
            ctx.get("features").unwrap().as_list().unwrap(),
            vec!["db", "web"]
        );
    }

    #[test]
    fn defaults_may_reference_earlier_inputs() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <text name="group" default="com.acme"/>
                   <text name="package" default="${group}"/>
                 </input>
               </archetype-script>"#,
        );
        let ctx = resolve(&session, &[]).unwrap();
        assert_eq!(ctx.get("package").unwrap().canonical(), "com.acme");
    }

    #[test]
    fn boolean_children_see_the_resolved_value() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <boolean name="docs" default="true">
                     <input><text name="format" default="markdown"/></input>
                   </boolean>
                 </input>
               </archetype-script>"#,
        );
        let ctx = resolve(&session, &[]).unwrap();
        assert_eq!(ctx.get("docs.format").unwrap().canonical(), "markdown");
    }

    #[test]
    fn interactive_reprompts_until_valid() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <enum name="lang">
                     <option value="java"/>
                     <option value="kotlin"/>
                   </enum>
                 </input>
               </archetype-script>"#,
        );
        let script = session.load_root().unwrap();
        let mut ctx = Context::new();
        let mut prompter = ScriptedPrompter::new(["rust", "2"]);
        let mut resolver = InputResolver::interactive(HashMap::new(), &mut prompter);
        resolve_script(&session, &script, &mut ctx, &mut resolver).unwrap();
        assert_eq!(ctx.get("lang").unwrap().canonical(), "kotlin");
    }

    #[test]
    fn exhaustive_mode_yields_one_context_per_permutation() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <boolean name="docs"/>
                   <boolean name="ci"/>
                 </input>
               </archetype-script>"#,
        );
        let script = session.load_root().unwrap();
        let contexts = resolve_permutations(&session, &script, None).unwrap();
        assert_eq!(contexts.len(), 4);
        let mut seen: Vec<(String, String)> = contexts
            .iter()
            .map(|ctx| {
                (
                    ctx.get("docs").unwrap().canonical(),
                    ctx.get("ci").unwrap().canonical(),
                )
            })
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);

        let limited = resolve_permutations(&session, &script, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn walks_are_deterministic() {
        let session = session_with(
            r#"<archetype-script>
                 <input>
                   <boolean name="docs" default="true"/>
                   <enum name="lang" default="java">
                     <option value="java"/>
                     <option value="kotlin"/>
                   </enum>
                 </input>
               </archetype-script>"#,
        );
        let first = resolve(&session, &[]).unwrap();
        let second = resolve(&session, &[]).unwrap();
        for path in ["docs", "lang"] {
            assert_eq!(
                first.get(path).unwrap().canonical(),
                second.get(path).unwrap().canonical()
            );
        }
    }
}
