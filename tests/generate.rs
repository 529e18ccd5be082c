use std::collections::HashMap;

use pretty_assertions::assert_eq;

use argen_core::{
    generate, resolve_script, Context, EngineError, InputResolver, MemArchive, MemorySink, Session,
};

fn resolve_and_generate(
    archive: MemArchive,
    answers: &[(&str, &str)],
) -> Result<MemorySink, EngineError> {
    let session = Session::new(Box::new(archive));
    let script = session.load_root()?;
    let mut ctx = Context::new();
    let answers: HashMap<String, String> = answers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut resolver = InputResolver::batch(answers);
    resolve_script(&session, &script, &mut ctx, &mut resolver)?;
    let mut sink = MemorySink::new();
    generate(&session, &script, &mut ctx, &mut sink)?;
    Ok(sink)
}

#[test]
fn boolean_gate_emits_when_defaulted_true() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <boolean name="a" default="true">
                     <output if="${a}"><file source="x" target="x"/></output>
                   </boolean>
                 </input>
               </archetype-script>"#,
        )
        .with("x", "payload");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(sink.text("x").unwrap(), "payload");
}

#[test]
fn boolean_gate_stays_silent_when_answered_false() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <boolean name="a" default="true">
                     <output><file source="x" target="x"/></output>
                   </boolean>
                 </input>
               </archetype-script>"#,
        )
        .with("x", "payload");
    let sink = resolve_and_generate(archive, &[("a", "false")]).unwrap();
    assert!(sink.files.is_empty());
}

#[test]
fn enum_selection_emits_only_the_matching_subtree() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <enum name="lang">
                     <option value="java">
                       <output><file source="j" target="Main.java"/></output>
                     </option>
                     <option value="kotlin">
                       <output><file source="k" target="Main.kt"/></output>
                     </option>
                   </enum>
                 </input>
               </archetype-script>"#,
        )
        .with("j", "java body")
        .with("k", "kotlin body");
    let sink = resolve_and_generate(archive, &[("lang", "kotlin")]).unwrap();
    assert_eq!(sink.files.len(), 1);
    assert_eq!(sink.text("Main.kt").unwrap(), "kotlin body");
}

#[test]
fn template_merge_respects_order_across_directives() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <output>
                   <model>
                     <list key="plugins"><value order="150">second</value></list>
                   </model>
                   <template engine="mustache" source="t.mustache" target="out.txt">
                     <model>
                       <list key="plugins"><value order="50">first</value></list>
                     </model>
                   </template>
                 </output>
               </archetype-script>"#,
        )
        .with("t.mustache", "{{#each plugins}}{{this}};{{/each}}");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(sink.text("out.txt").unwrap(), "first;second;");
}

#[test]
fn templates_render_context_values() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <text name="package" default="com.acme"/>
                 </input>
                 <output>
                   <templates engine="mustache">
                     <directory>tpls</directory>
                     <includes><include>*.mustache</include></includes>
                   </templates>
                 </output>
               </archetype-script>"#,
        )
        .with("tpls/app.properties.mustache", "base={{package}}\n");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(
        sink.text("app.properties.mustache").unwrap(),
        "base=com.acme\n"
    );
}

#[test]
fn transformations_rewrite_target_paths() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <text name="package" default="com.acme.demo"/>
                 </input>
                 <output>
                   <transformation id="packaged">
                     <replace regex="__package__" replacement="${package}"/>
                     <replace regex="\." replacement="/"/>
                   </transformation>
                   <files transformations="packaged">
                     <directory>src</directory>
                     <includes><include>**/*.java</include></includes>
                   </files>
                 </output>
               </archetype-script>"#,
        )
        .with("src/__package__/Main.java", "class Main {}");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(
        sink.text("com/acme/demo/Main.java").unwrap(),
        "class Main {}"
    );
}

#[test]
fn excludes_filter_matched_files() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <output>
                   <files>
                     <directory>static</directory>
                     <includes><include>**</include></includes>
                     <excludes><exclude>*.tmp</exclude></excludes>
                   </files>
                 </output>
               </archetype-script>"#,
        )
        .with("static/keep.txt", "keep")
        .with("static/drop.tmp", "drop");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert!(sink.files.contains_key("keep.txt"));
    assert!(!sink.files.contains_key("drop.tmp"));
}

#[test]
fn empty_include_expansion_is_an_output_error() {
    let archive = MemArchive::new().with(
        "archetype.xml",
        r#"<archetype-script>
             <output>
               <files>
                 <directory>missing</directory>
                 <includes><include>**/*.rs</include></includes>
               </files>
             </output>
           </archetype-script>"#,
    );
    let err = resolve_and_generate(archive, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Output { .. }), "{err:?}");
}

#[test]
fn unknown_engine_is_an_output_error() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <output>
                   <template engine="velocity" source="t" target="t.out"/>
                 </output>
               </archetype-script>"#,
        )
        .with("t", "body");
    let err = resolve_and_generate(archive, &[]).unwrap_err();
    assert!(err.to_string().contains("unknown template engine"), "{err}");
}

#[test]
fn unknown_transformation_id_is_an_output_error() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <output>
                   <files transformations="ghost">
                     <directory>static</directory>
                   </files>
                 </output>
               </archetype-script>"#,
        )
        .with("static/a.txt", "a");
    let err = resolve_and_generate(archive, &[]).unwrap_err();
    assert!(err.to_string().contains("transformation not found"), "{err}");
}

#[test]
fn invoked_scripts_generate_relative_to_their_directory() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script><exec src="common/base.xml"/></archetype-script>"#,
        )
        .with(
            "common/base.xml",
            r#"<archetype-script>
                 <output><file source="gitignore" target=".gitignore"/></output>
               </archetype-script>"#,
        )
        .with("common/gitignore", "target/\n");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(sink.text(".gitignore").unwrap(), "target/\n");
}

#[test]
fn cancellation_aborts_between_siblings() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <output><file source="x" target="x"/></output>
               </archetype-script>"#,
        )
        .with("x", "body");
    let session = Session::new(Box::new(archive));
    let script = session.load_root().unwrap();
    session
        .cancel_handle()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let mut ctx = Context::new();
    let mut sink = MemorySink::new();
    let err = generate(&session, &script, &mut ctx, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(sink.files.is_empty());
}

#[test]
fn model_files_and_nested_scopes_render() {
    let archive = MemArchive::new()
        .with(
            "archetype.xml",
            r#"<archetype-script>
                 <input>
                   <enum name="db" default="postgres">
                     <option value="h2"/>
                     <option value="postgres">
                       <input><boolean name="pooling" default="true"/></input>
                     </option>
                   </enum>
                 </input>
                 <output>
                   <template engine="mustache" source="cfg.mustache" target="config.yaml">
                     <model>
                       <value key="banner" file="banner.txt"/>
                     </model>
                   </template>
                 </output>
               </archetype-script>"#,
        )
        .with("banner.txt", "generated by argen")
        .with("cfg.mustache", "# {{banner}}\npooling: {{db.pooling}}\n");
    let sink = resolve_and_generate(archive, &[]).unwrap();
    assert_eq!(
        sink.text("config.yaml").unwrap(),
        "# generated by argen\npooling: true\n"
    );
}
