use serde_json::{Map as JsonMap, Value as Json};
use tracing::trace;

use argen_script::{Model, ModelKind, ModelNode, Value};

use crate::archive;
use crate::context::Context;
use crate::error::EngineError;
use crate::session::Session;

/// Accumulates `model` blocks across template directives and materializes
/// them into the scope handed to template engines.
///
/// Merging happens under each node's guard; content is resolved (and, for
/// template-valued nodes, rendered) at merge time so the scope is plain
/// data afterwards.
#[derive(Default)]
pub struct TemplateModel {
    root: Vec<MergedEntry>,
}

#[derive(Debug, Clone)]
struct MergedEntry {
    key: Option<String>,
    order: i32,
    value: MergedValue,
}

#[derive(Debug, Clone)]
enum MergedValue {
    Text(String),
    List(Vec<MergedEntry>),
    Map(Vec<MergedEntry>),
}

impl TemplateModel {
    pub fn new() -> TemplateModel {
        TemplateModel::default()
    }

    pub fn merge(
        &mut self,
        model: &Model,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        let entries = convert_children(&model.children, ctx, session)?;
        merge_entries(&mut self.root, entries);
        Ok(())
    }

    /// Sorts every level stably by `order` and produces the engine scope.
    /// Values become strings, lists arrays, maps objects; empty lists and
    /// maps are dropped.
    pub fn materialize(&self) -> Json {
        Json::Object(materialize_map(&self.root))
    }

    /// The model scope overlaid on the resolved context values; model keys
    /// win over context paths of the same name.
    pub fn scope(&self, ctx: &Context) -> Json {
        let mut scope = context_scope(ctx);
        if let (Json::Object(base), Json::Object(model)) = (&mut scope, self.materialize()) {
            for (key, value) in model {
                base.insert(key, value);
            }
        }
        scope
    }
}

fn convert_children(
    nodes: &[ModelNode],
    ctx: &Context,
    session: &Session,
) -> Result<Vec<MergedEntry>, EngineError> {
    let mut out = Vec::new();
    for node in nodes {
        if let Some(entry) = convert(node, ctx, session)? {
            out.push(entry);
        }
    }
    Ok(out)
}

fn convert(
    node: &ModelNode,
    ctx: &Context,
    session: &Session,
) -> Result<Option<MergedEntry>, EngineError> {
    if let Some(guard) = &node.guard {
        let live = guard
            .evaluate_bool(ctx)
            .map_err(|e| EngineError::from_expr(e, &node.position))?;
        if !live {
            trace!(at = %node.position, "model node guarded off");
            return Ok(None);
        }
    }
    let entry = match &node.kind {
        ModelKind::Value { key, content } => {
            let mut text = if let Some(inline) = &content.inline {
                inline.clone()
            } else if let Some(file) = &content.file {
                let path = archive::canonicalize(&archive::join(ctx.cwd(), file))?;
                session.archive().read_string(&path)?
            } else if let Some(url) = &content.url {
                return Err(EngineError::output(format!(
                    "url model values are not supported: {url}"
                )));
            } else {
                String::new()
            };
            if let Some(engine) = &content.template {
                let scope = context_scope(ctx);
                text = session.engines().get(engine)?.render(&text, &scope)?;
            }
            MergedEntry {
                key: key.clone(),
                order: node.order,
                value: MergedValue::Text(text),
            }
        }
        ModelKind::List { key, children } => MergedEntry {
            key: key.clone(),
            order: node.order,
            value: MergedValue::List(convert_children(children, ctx, session)?),
        },
        ModelKind::Map { key, children } => MergedEntry {
            key: key.clone(),
            order: node.order,
            value: MergedValue::Map(convert_children(children, ctx, session)?),
        },
    };
    Ok(Some(entry))
}

/// Appends new entries, folding keyed lists and maps into existing ones of
/// the same key so repeated merges accumulate children.
fn merge_entries(existing: &mut Vec<MergedEntry>, new: Vec<MergedEntry>) {
    for entry in new {
        let merged = match (&entry.key, &entry.value) {
            (Some(key), MergedValue::List(_)) | (Some(key), MergedValue::Map(_)) => {
                existing.iter_mut().find(|e| {
                    e.key.as_deref() == Some(key.as_str())
                        && matches!(
                            (&e.value, &entry.value),
                            (MergedValue::List(_), MergedValue::List(_))
                                | (MergedValue::Map(_), MergedValue::Map(_))
                        )
                })
            }
            _ => None,
        };
        match merged {
            Some(target) => match (&mut target.value, entry.value) {
                (MergedValue::List(existing), MergedValue::List(new))
                | (MergedValue::Map(existing), MergedValue::Map(new)) => {
                    merge_entries(existing, new)
                }
                _ => unreachable!("kind checked above"),
            },
            None => existing.push(entry),
        }
    }
}

fn sorted(entries: &[MergedEntry]) -> Vec<&MergedEntry> {
    let mut sorted: Vec<&MergedEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.order);
    sorted
}

fn materialize_map(entries: &[MergedEntry]) -> JsonMap<String, Json> {
    let mut out = JsonMap::new();
    for entry in sorted(entries) {
        let Some(key) = &entry.key else { continue };
        match materialize_value(&entry.value) {
            Some(value) => {
                out.insert(key.clone(), value);
            }
            None => {}
        }
    }
    out
}

fn materialize_value(value: &MergedValue) -> Option<Json> {
    match value {
        MergedValue::Text(text) => Some(Json::String(text.clone())),
        MergedValue::List(entries) => {
            let items: Vec<Json> = sorted(entries)
                .into_iter()
                .filter_map(|e| materialize_value(&e.value))
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(Json::Array(items))
            }
        }
        MergedValue::Map(entries) => {
            let map = materialize_map(entries);
            if map.is_empty() {
                None
            } else {
                Some(Json::Object(map))
            }
        }
    }
}

/// Resolved context values as a nested object: dotted paths become nested
/// maps. A scalar is dropped when a deeper path needs its slot as a map.
pub fn context_scope(ctx: &Context) -> Json {
    let mut flat: Vec<(String, Value)> = ctx
        .flatten()
        .into_iter()
        .filter(|(_, e)| !e.value.is_empty())
        .map(|(path, e)| (path, e.value))
        .collect();
    flat.sort_by(|a, b| a.0.cmp(&b.0));

    let mut root = JsonMap::new();
    for (path, value) in flat {
        insert_nested(&mut root, &path, value_to_json(&value));
    }
    Json::Object(root)
}

fn insert_nested(map: &mut JsonMap<String, Json>, path: &str, value: Json) {
    match path.split_once('.') {
        None => {
            // deeper paths already claimed this slot as a map; keep it
            if !matches!(map.get(path), Some(Json::Object(_))) {
                map.insert(path.to_owned(), value);
            }
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_owned())
                .or_insert_with(|| Json::Object(JsonMap::new()));
            if !slot.is_object() {
                *slot = Json::Object(JsonMap::new());
            }
            if let Json::Object(inner) = slot {
                insert_nested(inner, rest, value);
            }
        }
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Bool(b) => Json::Bool(*b),
        Value::List(items) => {
            Json::Array(items.iter().map(|s| Json::String(s.clone())).collect())
        }
        Value::Dynamic(d) => Json::String(d.resolve()),
        Value::Empty(_) => Json::Null,
    }
}
