use std::collections::HashMap;

use tracing::trace;

use argen_script::{Value, ValueSource, VariableSource};

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub source: ValueSource,
}

/// Path-scoped key→value store carried through a walk.
///
/// Two stacks: the segment stack (dotted input paths) and the CWD stack
/// (script invocation directories). Values are keyed by full dotted path in
/// one flat map and persist across scope pops, because output generation is
/// a second walk over the same context. Sibling branches cannot observe
/// each other's writes: relative lookup only consults the chain of scopes
/// currently open.
#[derive(Debug)]
pub struct Context {
    segments: Vec<String>,
    values: HashMap<String, Entry>,
    globals: HashMap<String, Entry>,
    cwd: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Context {
        Context {
            segments: Vec::new(),
            values: HashMap::new(),
            globals: HashMap::new(),
            cwd: vec![String::new()],
        }
    }

    /// Current dotted path of the segment stack.
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// Current path extended with a leaf segment.
    pub fn path_of(&self, leaf: &str) -> String {
        let base = self.path();
        if base.is_empty() {
            leaf.to_owned()
        } else {
            format!("{base}.{leaf}")
        }
    }

    /// Opens a scope. Isolation is structural in this engine: values are
    /// keyed by full dotted path and relative lookup only consults the open
    /// scope chain, so sibling branches never observe each other's writes.
    pub fn push(&mut self, segment: impl Into<String>, isolated: bool) {
        let segment = segment.into();
        trace!(scope = %segment, isolated, "push scope");
        self.segments.push(segment);
    }

    pub fn pop(&mut self) {
        debug_assert!(!self.segments.is_empty(), "cannot pop the root scope");
        self.segments.pop();
    }

    /// Writes `value` at a full dotted path, overwriting and recording the
    /// source for diagnostics.
    pub fn put(&mut self, path: impl Into<String>, value: Value, source: ValueSource) {
        self.values.insert(path.into(), Entry { value, source });
    }

    /// Writes into the global scope, visible from every path.
    pub fn put_global(&mut self, name: impl Into<String>, value: Value, source: ValueSource) {
        self.globals.insert(name.into(), Entry { value, source });
    }

    /// Exact-path lookup, then globals.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entry(path).map(|e| &e.value)
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.values.get(path).or_else(|| self.globals.get(path))
    }

    /// Scope-aware lookup: tries `name` under every prefix of the current
    /// path, innermost first, then as an absolute path, then globally.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        for depth in (0..=self.segments.len()).rev() {
            let mut candidate = self.segments[..depth].join(".");
            if !candidate.is_empty() {
                candidate.push('.');
            }
            candidate.push_str(name);
            if let Some(value) = self.get(&candidate) {
                return Some(value);
            }
        }
        None
    }

    /// Every visible entry as `path → Entry`, globals included.
    pub fn flatten(&self) -> HashMap<String, Entry> {
        let mut out: HashMap<String, Entry> = self
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &self.values {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn push_cwd(&mut self, dir: impl Into<String>) {
        self.cwd.push(dir.into());
    }

    pub fn pop_cwd(&mut self) {
        debug_assert!(self.cwd.len() > 1, "cannot pop the root cwd");
        if self.cwd.len() > 1 {
            self.cwd.pop();
        }
    }

    /// Directory of the currently executing script, archive-relative.
    pub fn cwd(&self) -> &str {
        self.cwd.last().map(String::as_str).unwrap_or("")
    }
}

impl VariableSource for Context {
    fn value_of(&self, name: &str) -> Option<String> {
        // empty values read as unset so live guards report them as such
        self.lookup(name)
            .filter(|v| !v.is_empty())
            .map(Value::canonical)
    }
}
