use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use argen_script::{FileSet, Model, Node, NodeKind, Script, Transformation};

use crate::archive;
use crate::context::Context;
use crate::error::EngineError;
use crate::model::TemplateModel;
use crate::session::Session;
use crate::walker::{Visitor, VisitResult, Walker};

/// Receives the generated project tree. Paths are `/`-joined and relative
/// to the output root.
pub trait OutputSink {
    fn write(&mut self, path: &str, contents: &[u8]) -> Result<(), EngineError>;
}

/// Writes into a directory, creating parents as needed.
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<DirSink, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DirSink { root })
    }
}

impl OutputSink for DirSink {
    fn write(&mut self, path: &str, contents: &[u8]) -> Result<(), EngineError> {
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            full.push(segment);
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, contents)?;
        Ok(())
    }
}

/// Collects generated files in memory; tests and dry runs.
#[derive(Default, Debug)]
pub struct MemorySink {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, path: &str, contents: &[u8]) -> Result<(), EngineError> {
        self.files.insert(path.to_owned(), contents.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OutputSummary {
    pub files_copied: usize,
    pub templates_rendered: usize,
}

/// Generates the project tree from the resolved context: copies `file`/
/// `files`, renders `template`/`templates`, applies in-scope path
/// transformations, and accumulates `model` merges across directives.
pub struct OutputGenerator<'a> {
    sink: &'a mut dyn OutputSink,
    model: TemplateModel,
    transformations: Vec<CompiledTransformation>,
    scope_marks: Vec<usize>,
    summary: OutputSummary,
}

struct CompiledTransformation {
    id: String,
    steps: Vec<(Regex, String)>,
}

impl CompiledTransformation {
    fn compile(t: &Transformation) -> Result<CompiledTransformation, EngineError> {
        let mut steps = Vec::new();
        for replacement in &t.replacements {
            let regex = Regex::new(&replacement.regex).map_err(|e| {
                EngineError::output(format!(
                    "bad regex in transformation {}: {e}",
                    t.id
                ))
            })?;
            steps.push((regex, replacement.replacement.clone()));
        }
        Ok(CompiledTransformation {
            id: t.id.clone(),
            steps,
        })
    }

    fn apply(&self, path: &str, ctx: &Context) -> String {
        let mut out = path.to_owned();
        for (regex, replacement) in &self.steps {
            let replacement = interpolate(replacement, ctx);
            out = regex.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}

/// `${path}` references in path fragments read from the context; unknown
/// references are left as-is.
fn interpolate(text: &str, ctx: &Context) -> String {
    static VAR: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_\-.]+)\}").expect("static pattern"));
    VAR.replace_all(text, |caps: &regex::Captures| {
        ctx.lookup(&caps[1])
            .map(|v| v.canonical())
            .unwrap_or_else(|| caps[0].to_owned())
    })
    .into_owned()
}

impl<'a> OutputGenerator<'a> {
    pub fn new(sink: &'a mut dyn OutputSink) -> OutputGenerator<'a> {
        OutputGenerator {
            sink,
            model: TemplateModel::new(),
            transformations: Vec::new(),
            scope_marks: Vec::new(),
            summary: OutputSummary::default(),
        }
    }

    pub fn summary(&self) -> OutputSummary {
        self.summary
    }

    /// Applies the named transformations, or every in-scope one when no
    /// ids are given.
    fn transform_path(
        &self,
        path: &str,
        ids: Option<&[String]>,
        ctx: &Context,
    ) -> Result<String, EngineError> {
        let mut out = interpolate(path, ctx);
        match ids {
            None => {
                for t in &self.transformations {
                    out = t.apply(&out, ctx);
                }
            }
            Some(ids) => {
                for id in ids {
                    let t = self
                        .transformations
                        .iter()
                        .find(|t| &t.id == id)
                        .ok_or_else(|| {
                            EngineError::output(format!("transformation not found: {id}"))
                        })?;
                    out = t.apply(&out, ctx);
                }
            }
        }
        Ok(out)
    }

    /// Expands a fileset's include/exclude globs against the archive.
    fn expand(
        &self,
        fileset: &FileSet,
        ctx: &Context,
        session: &Session,
    ) -> Result<Vec<(String, String)>, EngineError> {
        let dir = archive::canonicalize(&archive::join(ctx.cwd(), &fileset.directory))?;
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let includes = compile_globs(&fileset.includes)?;
        let excludes = compile_globs(&fileset.excludes)?;

        let mut out = Vec::new();
        for path in session.archive().list() {
            let Some(rel) = path.strip_prefix(&prefix) else {
                continue;
            };
            if !includes.is_empty() && !includes.iter().any(|p| p.matches(rel)) {
                continue;
            }
            if excludes.iter().any(|p| p.matches(rel)) {
                continue;
            }
            out.push((path.clone(), rel.to_owned()));
        }
        if out.is_empty() && !fileset.includes.is_empty() {
            return Err(EngineError::output(format!(
                "includes matched no files under {dir}"
            )));
        }
        Ok(out)
    }

    fn copy_file(
        &mut self,
        source: &str,
        target: &str,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        let source = archive::canonicalize(&archive::join(ctx.cwd(), source))?;
        let contents = session.archive().read(&source)?;
        let target = self.transform_path(target, None, ctx)?;
        debug!(%source, %target, "copy");
        self.sink.write(&target, &contents)?;
        self.summary.files_copied += 1;
        Ok(())
    }

    fn copy_files(
        &mut self,
        fileset: &FileSet,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        for (source, rel) in self.expand(fileset, ctx, session)? {
            let contents = session.archive().read(&source)?;
            let target = self.transform_path(&rel, Some(&fileset.transformations), ctx)?;
            debug!(%source, %target, "copy");
            self.sink.write(&target, &contents)?;
            self.summary.files_copied += 1;
        }
        Ok(())
    }

    fn render_template(
        &mut self,
        engine: &str,
        source: &str,
        target: &str,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        let source = archive::canonicalize(&archive::join(ctx.cwd(), source))?;
        let template = session.archive().read_string(&source)?;
        let scope = self.model.scope(ctx);
        let rendered = session.engines().get(engine)?.render(&template, &scope)?;
        let target = self.transform_path(target, None, ctx)?;
        debug!(%source, %target, engine, "render");
        self.sink.write(&target, rendered.as_bytes())?;
        self.summary.templates_rendered += 1;
        Ok(())
    }

    fn render_templates(
        &mut self,
        engine: &str,
        fileset: &FileSet,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        let scope = self.model.scope(ctx);
        let renderer = session.engines().get(engine)?;
        for (source, rel) in self.expand(fileset, ctx, session)? {
            let template = session.archive().read_string(&source)?;
            let rendered = renderer.render(&template, &scope)?;
            let target = self.transform_path(&rel, Some(&fileset.transformations), ctx)?;
            debug!(%source, %target, engine, "render");
            self.sink.write(&target, rendered.as_bytes())?;
            self.summary.templates_rendered += 1;
        }
        Ok(())
    }

    fn merge_model(
        &mut self,
        model: &Model,
        ctx: &Context,
        session: &Session,
    ) -> Result<(), EngineError> {
        self.model.merge(model, ctx, session)
    }
}

impl Visitor for OutputGenerator<'_> {
    fn enter(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        session: &Session,
    ) -> Result<VisitResult, EngineError> {
        match &node.kind {
            NodeKind::Output { .. } => {
                self.scope_marks.push(self.transformations.len());
                Ok(VisitResult::Continue)
            }
            NodeKind::Transformation(t) => {
                self.transformations.push(CompiledTransformation::compile(t)?);
                Ok(VisitResult::Continue)
            }
            NodeKind::Model(model) => {
                self.merge_model(model, ctx, session)?;
                Ok(VisitResult::Continue)
            }
            NodeKind::CopyFile { source, target } => {
                self.copy_file(source, target, ctx, session)?;
                Ok(VisitResult::Continue)
            }
            NodeKind::CopyFiles(fileset) => {
                self.copy_files(fileset, ctx, session)?;
                Ok(VisitResult::Continue)
            }
            NodeKind::Template {
                engine,
                source,
                target,
                model,
            } => {
                if let Some(model) = model {
                    self.merge_model(model, ctx, session)?;
                }
                self.render_template(engine, source, target, ctx, session)?;
                Ok(VisitResult::Continue)
            }
            NodeKind::Templates {
                engine,
                fileset,
                model,
            } => {
                if let Some(model) = model {
                    self.merge_model(model, ctx, session)?;
                }
                self.render_templates(engine, fileset, ctx, session)?;
                Ok(VisitResult::Continue)
            }
            _ => Ok(VisitResult::Continue),
        }
    }

    fn leave(
        &mut self,
        node: &Node,
        _ctx: &mut Context,
        _session: &Session,
    ) -> Result<(), EngineError> {
        if let NodeKind::Output { .. } = &node.kind {
            if let Some(mark) = self.scope_marks.pop() {
                self.transformations.truncate(mark);
            }
        }
        Ok(())
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<glob::Pattern>, EngineError> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| EngineError::output(format!("bad glob pattern {p:?}: {e}")))
        })
        .collect()
}

/// Walks `script` against an already resolved context and emits the
/// project tree into `sink`.
pub fn generate(
    session: &Session,
    script: &Script,
    ctx: &mut Context,
    sink: &mut dyn OutputSink,
) -> Result<OutputSummary, EngineError> {
    let mut generator = OutputGenerator::new(sink);
    Walker::new(session).walk(script, ctx, &mut generator)?;
    let summary = generator.summary();
    info!(
        files = summary.files_copied,
        templates = summary.templates_rendered,
        "generation complete"
    );
    Ok(summary)
}
