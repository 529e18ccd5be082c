use std::collections::HashMap;

use pretty_assertions::assert_eq;

use argen_core::{resolve_script, Context, InputResolver, InputTree, MemArchive, Session};

fn session_with(xml: &str) -> Session {
    Session::new(Box::new(MemArchive::new().with("archetype.xml", xml)))
}

const TWO_BOOLS_ONE_ENUM: &str = r#"<archetype-script>
    <input>
      <boolean name="docs"/>
      <boolean name="ci"/>
      <enum name="lang">
        <option value="java"/>
        <option value="kotlin"/>
        <option value="groovy"/>
      </enum>
    </input>
  </archetype-script>"#;

#[test]
fn twelve_permutations_and_then_completed() {
    let session = session_with(TWO_BOOLS_ONE_ENUM);
    let script = session.load_root().unwrap();
    let tree = InputTree::build(&session, &script).unwrap().pruned();
    assert_eq!(tree.permutations(), 12);

    let mut iter = tree.iter_permutations();
    let mut count = 0;
    while iter.next().is_some() {
        count += 1;
        assert!(count <= 12, "iterator did not complete after the 12th");
    }
    assert_eq!(count, 12);
}

#[test]
fn every_permutation_resolves_in_batch_mode() {
    let session = session_with(TWO_BOOLS_ONE_ENUM);
    let script = session.load_root().unwrap();
    let tree = InputTree::build(&session, &script).unwrap().pruned();

    let mut resolved = Vec::new();
    for values in tree.iter_permutations() {
        let answers: HashMap<String, String> = values.into_iter().collect();
        let mut ctx = Context::new();
        let mut resolver = InputResolver::batch(answers);
        resolve_script(&session, &script, &mut ctx, &mut resolver).unwrap();
        let snapshot = (
            ctx.get("docs").unwrap().canonical(),
            ctx.get("ci").unwrap().canonical(),
            ctx.get("lang").unwrap().canonical(),
        );
        resolved.push(snapshot);
    }
    resolved.sort();
    resolved.dedup();
    assert_eq!(resolved.len(), 12);
}

#[test]
fn preset_pruning_fixes_the_permutation_space() {
    let session = session_with(
        r#"<archetype-script>
             <context>
               <enum path="db">h2</enum>
               <boolean path="docs">false</boolean>
             </context>
             <input>
               <boolean name="docs"/>
               <enum name="db">
                 <option value="h2"/>
                 <option value="postgres"/>
                 <option value="mysql"/>
               </enum>
             </input>
           </archetype-script>"#,
    );
    let script = session.load_root().unwrap();
    let tree = InputTree::build(&session, &script).unwrap().pruned();
    assert_eq!(tree.permutations(), 1);

    let only: Vec<_> = tree.iter_permutations().collect();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].get("db").unwrap(), "h2");
    assert_eq!(only[0].get("docs").unwrap(), "no");

    // the permutation resolves and honors the presets
    let mut ctx = Context::new();
    let mut resolver = InputResolver::batch(only[0].clone().into_iter().collect());
    resolve_script(&session, &script, &mut ctx, &mut resolver).unwrap();
    assert_eq!(ctx.get("db").unwrap().canonical(), "h2");
    assert!(!ctx.get("docs").unwrap().as_bool().unwrap());
}

#[test]
fn guarded_branches_are_enumerated_as_reachable() {
    let session = session_with(
        r#"<archetype-script>
             <input>
               <boolean name="advanced"/>
               <input if="${advanced}">
                 <enum name="profile">
                   <option value="dev"/>
                   <option value="prod"/>
                 </enum>
               </input>
             </input>
           </archetype-script>"#,
    );
    let script = session.load_root().unwrap();
    let tree = InputTree::build(&session, &script).unwrap().pruned();
    // guard treated as possibly-true: 2 * 2
    assert_eq!(tree.permutations(), 4);
}
