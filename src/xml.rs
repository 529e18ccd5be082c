use argen_script::{
    Expression, FileSet, Input, InputKind, Invoke, InvokeKind, Model, ModelKind, ModelNode, Node,
    NodeKind, Preset, Script, Transformation, DEFAULT_MODEL_ORDER,
};

/// Canonical XML rendering of a loaded script. Loading the output again
/// yields a structurally equal AST; attribute order and indentation are
/// normalized.
pub fn to_xml(script: &Script) -> String {
    let mut w = XmlWriter::new();
    w.open("archetype-script", &[]);
    for child in &script.children {
        write_node(&mut w, child);
    }
    w.close("archetype-script");
    w.out
}

struct XmlWriter {
    out: String,
    depth: usize,
}

type Attr<'a> = (&'a str, Option<String>);

impl XmlWriter {
    fn new() -> XmlWriter {
        XmlWriter {
            out: String::new(),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn attrs(&mut self, attrs: &[Attr]) {
        for (name, value) in attrs {
            if let Some(value) = value {
                self.out
                    .push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
            }
        }
    }

    fn open(&mut self, name: &str, attrs: &[Attr]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        self.attrs(attrs);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth -= 1;
        self.indent();
        self.out.push_str(&format!("</{name}>\n"));
    }

    fn empty(&mut self, name: &str, attrs: &[Attr]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        self.attrs(attrs);
        self.out.push_str("/>\n");
    }

    fn text_element(&mut self, name: &str, attrs: &[Attr], text: &str) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        self.attrs(attrs);
        self.out
            .push_str(&format!(">{}</{name}>\n", escape_text(text)));
    }
}

fn guard_attr(guard: &Option<Expression>) -> Attr {
    ("if", guard.as_ref().map(|g| g.source().to_owned()))
}

fn flag(value: bool) -> Option<String> {
    value.then(|| "true".to_owned())
}

fn write_node(w: &mut XmlWriter, node: &Node) {
    match &node.kind {
        NodeKind::Step {
            label,
            help,
            children,
        } => {
            w.open("step", &[("label", label.clone()), guard_attr(&node.guard)]);
            if let Some(help) = help {
                w.text_element("help", &[], help);
            }
            for child in children {
                write_node(w, child);
            }
            w.close("step");
        }
        NodeKind::Inputs { children } => {
            w.open("input", &[guard_attr(&node.guard)]);
            for child in children {
                write_node(w, child);
            }
            w.close("input");
        }
        NodeKind::Input(input) => write_input(w, node, input),
        NodeKind::Option(option) => {
            let attrs = [
                ("value", Some(option.value.clone())),
                ("label", option.label.clone()),
                guard_attr(&node.guard),
            ];
            if option.children.is_empty() {
                w.empty("option", &attrs);
            } else {
                w.open("option", &attrs);
                for child in &option.children {
                    write_node(w, child);
                }
                w.close("option");
            }
        }
        NodeKind::Presets { children } => {
            w.open("context", &[guard_attr(&node.guard)]);
            for child in children {
                write_node(w, child);
            }
            w.close("context");
        }
        NodeKind::Preset(preset) => write_preset(w, node, preset),
        NodeKind::Output { children } => {
            w.open("output", &[guard_attr(&node.guard)]);
            for child in children {
                write_node(w, child);
            }
            w.close("output");
        }
        NodeKind::Transformation(t) => write_transformation(w, node, t),
        NodeKind::CopyFile { source, target } => {
            w.empty(
                "file",
                &[
                    ("source", Some(source.clone())),
                    ("target", Some(target.clone())),
                    guard_attr(&node.guard),
                ],
            );
        }
        NodeKind::CopyFiles(fileset) => {
            write_fileset(w, node, "files", None, fileset, None);
        }
        NodeKind::Template {
            engine,
            source,
            target,
            model,
        } => {
            let attrs = [
                ("engine", Some(engine.clone())),
                ("source", Some(source.clone())),
                ("target", Some(target.clone())),
                guard_attr(&node.guard),
            ];
            match model {
                Some(model) => {
                    w.open("template", &attrs);
                    write_model(w, model);
                    w.close("template");
                }
                None => w.empty("template", &attrs),
            }
        }
        NodeKind::Templates {
            engine,
            fileset,
            model,
        } => {
            write_fileset(w, node, "templates", Some(engine), fileset, model.as_ref());
        }
        NodeKind::Model(model) => write_model(w, model),
        NodeKind::Invoke(invoke) => write_invoke(w, node, invoke),
        NodeKind::Method(method) => {
            w.open("method", &[("name", Some(method.name.clone()))]);
            for child in &method.children {
                write_node(w, child);
            }
            w.close("method");
        }
        NodeKind::Help { text } => w.text_element("help", &[], text),
    }
}

fn write_input(w: &mut XmlWriter, node: &Node, input: &Input) {
    let mut attrs: Vec<Attr> = vec![("name", Some(input.name.clone()))];
    if let InputKind::Text { placeholder } = &input.kind {
        attrs.push(("placeholder", placeholder.clone()));
    }
    if let InputKind::List { min, max } = &input.kind {
        attrs.push(("min", min.map(|v| v.to_string())));
        attrs.push(("max", max.map(|v| v.to_string())));
    }
    attrs.push(("label", input.label.clone()));
    attrs.push(("default", input.default.clone()));
    attrs.push(("prompt", input.prompt.clone()));
    attrs.push(("optional", flag(input.optional)));
    attrs.push(("global", flag(input.global)));
    attrs.push(guard_attr(&node.guard));

    let name = input.kind.name();
    if input.children.is_empty() && input.help.is_none() {
        w.empty(name, &attrs);
    } else {
        w.open(name, &attrs);
        if let Some(help) = &input.help {
            w.text_element("help", &[], help);
        }
        for child in &input.children {
            write_node(w, child);
        }
        w.close(name);
    }
}

fn write_preset(w: &mut XmlWriter, node: &Node, preset: &Preset) {
    w.text_element(
        preset.kind.name(),
        &[("path", Some(preset.path.clone())), guard_attr(&node.guard)],
        &preset.text,
    );
}

fn write_transformation(w: &mut XmlWriter, node: &Node, t: &Transformation) {
    w.open(
        "transformation",
        &[("id", Some(t.id.clone())), guard_attr(&node.guard)],
    );
    for replacement in &t.replacements {
        w.empty(
            "replace",
            &[
                ("regex", Some(replacement.regex.clone())),
                ("replacement", Some(replacement.replacement.clone())),
            ],
        );
    }
    w.close("transformation");
}

fn write_fileset(
    w: &mut XmlWriter,
    node: &Node,
    element: &str,
    engine: Option<&String>,
    fileset: &FileSet,
    model: Option<&Model>,
) {
    let transformations = if fileset.transformations.is_empty() {
        None
    } else {
        Some(fileset.transformations.join(" "))
    };
    w.open(
        element,
        &[
            ("engine", engine.cloned()),
            ("transformations", transformations),
            guard_attr(&node.guard),
        ],
    );
    w.text_element("directory", &[], &fileset.directory);
    if !fileset.includes.is_empty() {
        w.open("includes", &[]);
        for pattern in &fileset.includes {
            w.text_element("include", &[], pattern);
        }
        w.close("includes");
    }
    if !fileset.excludes.is_empty() {
        w.open("excludes", &[]);
        for pattern in &fileset.excludes {
            w.text_element("exclude", &[], pattern);
        }
        w.close("excludes");
    }
    if let Some(model) = model {
        write_model(w, model);
    }
    w.close(element);
}

fn write_invoke(w: &mut XmlWriter, node: &Node, invoke: &Invoke) {
    let element = match invoke.kind {
        InvokeKind::Source => "source",
        InvokeKind::Exec => "exec",
    };
    w.empty(
        element,
        &[
            ("src", invoke.src.clone()),
            ("url", invoke.url.clone()),
            ("method", invoke.method.clone()),
            guard_attr(&node.guard),
        ],
    );
}

fn write_model(w: &mut XmlWriter, model: &Model) {
    w.open("model", &[]);
    for child in &model.children {
        write_model_node(w, child);
    }
    w.close("model");
}

fn write_model_node(w: &mut XmlWriter, node: &ModelNode) {
    let order = (node.order != DEFAULT_MODEL_ORDER).then(|| node.order.to_string());
    let guard = ("if", node.guard.as_ref().map(|g| g.source().to_owned()));
    match &node.kind {
        ModelKind::Value { key, content } => {
            let attrs = [
                ("key", key.clone()),
                ("order", order),
                ("file", content.file.clone()),
                ("url", content.url.clone()),
                ("template", content.template.clone()),
                guard,
            ];
            match &content.inline {
                Some(text) => w.text_element("value", &attrs, text),
                None => w.empty("value", &attrs),
            }
        }
        ModelKind::List { key, children } => {
            w.open("list", &[("key", key.clone()), ("order", order), guard]);
            for child in children {
                write_model_node(w, child);
            }
            w.close("list");
        }
        ModelKind::Map { key, children } => {
            w.open("map", &[("key", key.clone()), ("order", order), guard]);
            for child in children {
                write_model_node(w, child);
            }
            w.close("map");
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_str;

    const SAMPLE: &str = r#"<archetype-script>
      <step label="Project">
        <help>Basic settings</help>
        <context>
          <boolean path="ci"/>
        </context>
        <input>
          <text name="package" label="Package" default="com.example"/>
          <boolean name="docs" optional="true">
            <output><file source="d.md" target="docs/d.md"/></output>
          </boolean>
          <enum name="lang" default="java">
            <option value="java"/>
            <option value="kotlin" label="Kotlin"/>
          </enum>
          <list name="features" min="1" max="3">
            <option value="db"/>
            <option value="web"/>
          </list>
        </input>
      </step>
      <method name="shared">
        <output><file source="l" target="LICENSE"/></output>
      </method>
      <output if="${docs}">
        <transformation id="pkg">
          <replace regex="__package__" replacement="${package}"/>
        </transformation>
        <files transformations="pkg">
          <directory>files</directory>
          <includes><include>**/*.java</include></includes>
        </files>
        <templates engine="mustache">
          <directory>tpls</directory>
          <model><value key="x">y</value></model>
        </templates>
        <template engine="mustache" source="pom.mustache" target="pom.xml">
          <model>
            <list key="deps">
              <map>
                <value key="g" order="50">io.acme</value>
              </map>
            </list>
          </model>
        </template>
      </output>
      <source src="common.xml" method="shared"/>
    </archetype-script>"#;

    #[test]
    fn serialization_round_trips() {
        let first = load_str(SAMPLE, "a.xml").unwrap();
        let rendered = to_xml(&first);
        let second = load_str(&rendered, "a.xml").unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap(),
            "canonical form:\n{rendered}"
        );
    }

    #[test]
    fn special_characters_are_escaped() {
        let script = load_str(
            r#"<archetype-script>
                 <output>
                   <transformation id="t">
                     <replace regex="a&amp;b" replacement="&lt;x&gt;"/>
                   </transformation>
                 </output>
               </archetype-script>"#,
            "esc.xml",
        )
        .unwrap();
        let rendered = to_xml(&script);
        assert!(rendered.contains("a&amp;b"), "{rendered}");
        let reloaded = load_str(&rendered, "esc.xml").unwrap();
        assert_eq!(
            serde_json::to_value(&script).unwrap(),
            serde_json::to_value(&reloaded).unwrap()
        );
    }
}
