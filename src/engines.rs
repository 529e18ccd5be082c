use std::collections::HashMap;

use handlebars::Handlebars;

use crate::error::EngineError;

/// Renders a template source against a JSON scope.
pub trait TemplateEngine: std::fmt::Debug {
    fn render(&self, source: &str, scope: &serde_json::Value) -> Result<String, EngineError>;
}

/// Name → engine registry. `mustache` and `tera` are registered by default.
pub struct EngineRegistry {
    engines: HashMap<String, Box<dyn TemplateEngine>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        let mut registry = EngineRegistry {
            engines: HashMap::new(),
        };
        registry.register("mustache", Box::new(MustacheEngine::new()));
        registry.register("tera", Box::new(TeraEngine));
        registry
    }
}

impl EngineRegistry {
    pub fn register(&mut self, name: &str, engine: Box<dyn TemplateEngine>) {
        self.engines.insert(name.to_owned(), engine);
    }

    pub fn get(&self, name: &str) -> Result<&dyn TemplateEngine, EngineError> {
        self.engines
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| EngineError::output(format!("unknown template engine: {name}")))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Mustache-flavored engine backed by handlebars. Escaping is disabled:
/// generated files are source code, not HTML.
#[derive(Debug)]
pub struct MustacheEngine {
    registry: Handlebars<'static>,
}

impl MustacheEngine {
    pub fn new() -> MustacheEngine {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.set_strict_mode(false);
        MustacheEngine { registry }
    }
}

impl Default for MustacheEngine {
    fn default() -> Self {
        MustacheEngine::new()
    }
}

impl TemplateEngine for MustacheEngine {
    fn render(&self, source: &str, scope: &serde_json::Value) -> Result<String, EngineError> {
        self.registry
            .render_template(source, scope)
            .map_err(|e| EngineError::output(format!("template rendering failed: {e}")))
    }
}

#[derive(Debug)]
pub struct TeraEngine;

impl TemplateEngine for TeraEngine {
    fn render(&self, source: &str, scope: &serde_json::Value) -> Result<String, EngineError> {
        let context = tera::Context::from_serialize(scope)
            .map_err(|e| EngineError::output(format!("invalid template scope: {e}")))?;
        tera::Tera::one_off(source, &context, false)
            .map_err(|e| EngineError::output(format!("template rendering failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mustache_renders_without_escaping() {
        let registry = EngineRegistry::default();
        let engine = registry.get("mustache").unwrap();
        let scope = json!({"name": "a<b>", "package": "com.acme"});
        let out = engine.render("{{package}}.{{name}}", &scope).unwrap();
        assert_eq!(out, "com.acme.a<b>");
    }

    #[test]
    fn tera_renders() {
        let registry = EngineRegistry::default();
        let engine = registry.get("tera").unwrap();
        let out = engine
            .render("hello {{ who }}", &json!({"who": "world"}))
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn unknown_engine_is_an_output_error() {
        let registry = EngineRegistry::default();
        assert!(matches!(
            registry.get("velocity").unwrap_err(),
            EngineError::Output { .. }
        ));
    }
}
