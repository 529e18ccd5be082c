use std::collections::BTreeMap;

use serde::Serialize;

use argen_script::{Input, InputKind, Node, NodeKind, Script, Value};

use crate::context::Context;
use crate::error::EngineError;
use crate::session::Session;
use crate::walker::{Visitor, VisitResult, Walker};

/// Cap on distinct selections enumerated for one list input.
pub const MAX_LIST_PERMUTATIONS: usize = 5;

pub type NodeId = usize;

/// Flattened view of every reachable input with its possible values,
/// independent of guard outcomes. Drives external UIs and exhaustive
/// permutation enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct InputTree {
    root: NodeId,
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub script: String,
    pub line: usize,
    pub path: String,
    pub kind: TreeKind,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeKind {
    Root,
    Presets { values: BTreeMap<String, String> },
    Boolean,
    Enum,
    /// Selections are precomputed: defaults first, then single options,
    /// then the full set, deduplicated and capped.
    List { selections: Vec<String> },
    Text { default: Option<String> },
    Value { value: String },
}

impl InputTree {
    /// Builds the tree by walking `script` with guards treated as
    /// possibly-true.
    pub fn build(session: &Session, script: &Script) -> Result<InputTree, EngineError> {
        let mut ctx = Context::new();
        let mut builder = TreeBuilder::new();
        Walker::new(session)
            .without_guard_evaluation()
            .walk(script, &mut ctx, &mut builder)?;
        Ok(builder.finish())
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Input nodes in tree order, for UI consumers.
    pub fn inputs(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(|n| {
            matches!(
                n.kind,
                TreeKind::Boolean | TreeKind::Enum | TreeKind::List { .. } | TreeKind::Text { .. }
            )
        })
    }

    /// Applies preset maps: boolean and enum inputs keep only the matching
    /// value child, other preset inputs disappear. Ids are re-assigned
    /// densely so consumers can use them as array indices.
    pub fn pruned(&self) -> InputTree {
        let mut out = InputTree {
            root: 0,
            nodes: Vec::new(),
        };
        let mut active: Vec<BTreeMap<String, String>> = Vec::new();
        let root = self
            .copy_pruned(self.root, &mut out, &mut active)
            .expect("the root never carries a preset");
        out.root = root;
        out
    }

    fn copy_pruned(
        &self,
        id: NodeId,
        out: &mut InputTree,
        active: &mut Vec<BTreeMap<String, String>>,
    ) -> Option<NodeId> {
        let node = &self.nodes[id];
        let preset = lookup_preset(active, &node.path);

        let kind = match &node.kind {
            TreeKind::List { .. } | TreeKind::Text { .. } if preset.is_some() => return None,
            other => other.clone(),
        };

        let new_id = out.nodes.len();
        out.nodes.push(TreeNode {
            id: new_id,
            script: node.script.clone(),
            line: node.line,
            path: node.path.clone(),
            kind,
            children: Vec::new(),
        });

        // presets declared among the children scope the whole block
        let mut pushed = 0;
        for map in self.preset_maps_of(node) {
            active.push(map.clone());
            pushed += 1;
        }

        let keep_value = match (&node.kind, preset) {
            (TreeKind::Boolean, Some(v)) => {
                Some(if Value::parse_bool(&v).unwrap_or(false) {
                    "yes".to_owned()
                } else {
                    "no".to_owned()
                })
            }
            (TreeKind::Enum, Some(v)) => Some(v),
            _ => None,
        };

        let mut children = Vec::new();
        for &child in &node.children {
            if let Some(keep) = &keep_value {
                if let TreeKind::Value { value } = &self.nodes[child].kind {
                    if value != keep {
                        continue;
                    }
                }
            }
            if let Some(copied) = self.copy_pruned(child, out, active) {
                children.push(copied);
            }
        }
        out.nodes[new_id].children = children;

        for _ in 0..pushed {
            active.pop();
        }
        Some(new_id)
    }

    fn preset_maps_of<'a>(
        &'a self,
        node: &'a TreeNode,
    ) -> impl Iterator<Item = &'a BTreeMap<String, String>> {
        node.children.iter().filter_map(|&c| {
            match &self.nodes[c].kind {
                TreeKind::Presets { values } => Some(values),
                _ => None,
            }
        })
    }

    /// Total permutation count: products across sibling inputs, sums across
    /// the alternative values of one input.
    pub fn permutations(&self) -> usize {
        self.node_permutations(self.root)
    }

    fn node_permutations(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        match &node.kind {
            TreeKind::Root | TreeKind::Value { .. } => node
                .children
                .iter()
                .map(|&c| self.node_permutations(c))
                .product(),
            TreeKind::Presets { .. } => 1,
            TreeKind::Boolean | TreeKind::Enum => node
                .children
                .iter()
                .map(|&c| self.node_permutations(c))
                .sum::<usize>()
                .max(1),
            TreeKind::List { selections } => selections.len().max(1),
            TreeKind::Text { .. } => node
                .children
                .first()
                .map(|&c| self.node_permutations(c))
                .unwrap_or(1),
        }
    }

    pub fn iter_permutations(&self) -> Permutations {
        Permutations {
            tree: self,
            state: PermutationState::new(self),
            done: self.permutations() == 0,
        }
    }

    fn collect(&self, state: &PermutationState, id: NodeId, out: &mut BTreeMap<String, String>) {
        let node = &self.nodes[id];
        match &node.kind {
            TreeKind::Root | TreeKind::Value { .. } => {
                for &child in &node.children {
                    self.collect(state, child, out);
                }
            }
            TreeKind::Presets { values } => {
                for (path, value) in values {
                    out.insert(path.clone(), value.clone());
                }
            }
            TreeKind::Boolean | TreeKind::Enum => {
                if node.children.is_empty() {
                    return;
                }
                let selected = node.children[state.index(id).current];
                if let TreeKind::Value { value } = &self.nodes[selected].kind {
                    out.insert(node.path.clone(), value.clone());
                }
                self.collect(state, selected, out);
            }
            TreeKind::List { selections } => {
                if let Some(selection) = selections.get(state.index(id).current) {
                    out.insert(node.path.clone(), selection.clone());
                }
            }
            TreeKind::Text { .. } => {
                if let Some(&child) = node.children.first() {
                    if let TreeKind::Value { value } = &self.nodes[child].kind {
                        out.insert(node.path.clone(), value.clone());
                    }
                    self.collect(state, child, out);
                }
            }
        }
    }

    /// Odometer step. Returns true when the subtree wrapped back to its
    /// first permutation; the wrap bubbles upward.
    fn advance(&self, state: &mut PermutationState, id: NodeId) -> bool {
        let node = &self.nodes[id];
        match &node.kind {
            TreeKind::Root | TreeKind::Value { .. } => {
                for &child in &node.children {
                    if !self.advance(state, child) {
                        return false;
                    }
                }
                true
            }
            TreeKind::Presets { .. } => true,
            TreeKind::Boolean | TreeKind::Enum => {
                if node.children.is_empty() {
                    return true;
                }
                let current = node.children[state.index(id).current];
                if !self.advance(state, current) {
                    return false;
                }
                state.index_mut(id).next()
            }
            TreeKind::List { .. } => state.index_mut(id).next(),
            TreeKind::Text { .. } => match node.children.first() {
                Some(&child) => self.advance(state, child),
                None => true,
            },
        }
    }
}

/// One position in a node's value cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PermutationIndex {
    pub current: usize,
    count: usize,
    pub completed: bool,
}

impl PermutationIndex {
    fn new(count: usize) -> PermutationIndex {
        PermutationIndex {
            current: 0,
            count: count.max(1),
            completed: false,
        }
    }

    pub fn permutations(&self) -> usize {
        self.count
    }

    /// Advances, wrapping to 0 at the end. Returns true on wrap and marks
    /// the index completed.
    pub fn next(&mut self) -> bool {
        self.current += 1;
        if self.current >= self.count {
            self.current = 0;
            self.completed = true;
            true
        } else {
            false
        }
    }
}

/// One index per node id, owned by the iterator that created it.
#[derive(Debug, Clone)]
pub struct PermutationState {
    indices: Vec<PermutationIndex>,
}

impl PermutationState {
    pub fn new(tree: &InputTree) -> PermutationState {
        let indices = tree
            .nodes
            .iter()
            .map(|node| {
                let count = match &node.kind {
                    TreeKind::Boolean | TreeKind::Enum => node.children.len(),
                    TreeKind::List { selections } => selections.len(),
                    _ => 1,
                };
                PermutationIndex::new(count)
            })
            .collect();
        PermutationState { indices }
    }

    fn index(&self, id: NodeId) -> &PermutationIndex {
        &self.indices[id]
    }

    fn index_mut(&mut self, id: NodeId) -> &mut PermutationIndex {
        &mut self.indices[id]
    }
}

/// Yields one value-map per permutation; the first equals the defaults of
/// every list input.
pub struct Permutations<'t> {
    tree: &'t InputTree,
    state: PermutationState,
    done: bool,
}

impl Iterator for Permutations<'_> {
    type Item = BTreeMap<String, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut values = BTreeMap::new();
        self.tree.collect(&self.state, self.tree.root, &mut values);
        if self.tree.advance(&mut self.state, self.tree.root) {
            self.done = true;
        }
        Some(values)
    }
}

/// Walker visitor collecting inputs, options and presets into the arena.
struct TreeBuilder {
    nodes: Vec<TreeNode>,
    /// Container nodes new inputs attach to (root and value nodes).
    attach: Vec<NodeId>,
    /// Enum/list input nodes whose options are currently being declared.
    input_stack: Vec<NodeId>,
    /// Presets nodes currently open for entries.
    presets_stack: Vec<NodeId>,
    /// Per-AST-node bookkeeping, mirroring enter/leave.
    frames: Vec<Frame>,
}

#[derive(Default)]
struct Frame {
    attach_pops: usize,
    input_pops: usize,
    presets_pops: usize,
    list_to_finalize: Option<NodeId>,
}

impl TreeBuilder {
    fn new() -> TreeBuilder {
        let root = TreeNode {
            id: 0,
            script: String::new(),
            line: 0,
            path: String::new(),
            kind: TreeKind::Root,
            children: Vec::new(),
        };
        TreeBuilder {
            nodes: vec![root],
            attach: vec![0],
            input_stack: Vec::new(),
            presets_stack: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn finish(self) -> InputTree {
        InputTree {
            root: 0,
            nodes: self.nodes,
        }
    }

    fn alloc(&mut self, parent: NodeId, node: &Node, path: String, kind: TreeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            id,
            script: node.position.script.clone(),
            line: node.position.line,
            path,
            kind,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn alloc_value(&mut self, parent: NodeId, node: &Node, value: &str) -> NodeId {
        let path = self.nodes[parent].path.clone();
        self.alloc(
            parent,
            node,
            path,
            TreeKind::Value {
                value: value.to_owned(),
            },
        )
    }

    fn enter_input(&mut self, node: &Node, input: &Input, path: String) -> Frame {
        let parent = *self.attach.last().expect("root attach always present");
        let mut frame = Frame::default();
        match &input.kind {
            InputKind::Boolean => {
                let id = self.alloc(parent, node, path, TreeKind::Boolean);
                let yes = self.alloc_value(id, node, "yes");
                self.alloc_value(id, node, "no");
                // nested blocks only apply when the flag is on
                self.attach.push(yes);
                frame.attach_pops = 1;
            }
            InputKind::Enum => {
                let id = self.alloc(parent, node, path, TreeKind::Enum);
                self.input_stack.push(id);
                frame.input_pops = 1;
            }
            InputKind::List { .. } => {
                let id = self.alloc(
                    parent,
                    node,
                    path,
                    TreeKind::List {
                        selections: Vec::new(),
                    },
                );
                self.input_stack.push(id);
                frame.input_pops = 1;
                frame.list_to_finalize = Some(id);
            }
            InputKind::Text { placeholder } => {
                let default = input.default.clone().or_else(|| placeholder.clone());
                let id = self.alloc(
                    parent,
                    node,
                    path,
                    TreeKind::Text {
                        default: default.clone(),
                    },
                );
                let value = self.alloc_value(id, node, default.as_deref().unwrap_or(""));
                self.attach.push(value);
                frame.attach_pops = 1;
            }
        }
        frame
    }

    /// Defaults first, then each single option, then the full set; dedup,
    /// cap at [`MAX_LIST_PERMUTATIONS`].
    fn finalize_list(&mut self, id: NodeId, input: &Input) {
        let options: Vec<String> = self.nodes[id]
            .children
            .iter()
            .filter_map(|&c| match &self.nodes[c].kind {
                TreeKind::Value { value } => Some(value.clone()),
                _ => None,
            })
            .collect();
        let defaults = input.default.clone().unwrap_or_default();
        let mut selections = vec![defaults];
        for option in &options {
            selections.push(option.clone());
        }
        if options.len() > 1 {
            selections.push(options.join(","));
        }
        let mut seen = Vec::new();
        selections.retain(|s| {
            if seen.contains(s) {
                false
            } else {
                seen.push(s.clone());
                true
            }
        });
        selections.truncate(MAX_LIST_PERMUTATIONS);
        if let TreeKind::List {
            selections: slot, ..
        } = &mut self.nodes[id].kind
        {
            *slot = selections;
        }
    }
}

impl Visitor for TreeBuilder {
    fn enter(
        &mut self,
        node: &Node,
        ctx: &mut Context,
        _session: &Session,
    ) -> Result<VisitResult, EngineError> {
        let frame = match &node.kind {
            NodeKind::Input(input) => {
                let path = if input.global {
                    input.name.clone()
                } else {
                    ctx.path_of(&input.name)
                };
                self.enter_input(node, input, path)
            }
            NodeKind::Option(option) => {
                let mut frame = Frame::default();
                if let Some(&input_id) = self.input_stack.last() {
                    let value = self.alloc_value(input_id, node, &option.value);
                    self.attach.push(value);
                    frame.attach_pops = 1;
                }
                frame
            }
            NodeKind::Presets { .. } => {
                let parent = *self.attach.last().expect("root attach always present");
                let id = self.alloc(
                    parent,
                    node,
                    String::new(),
                    TreeKind::Presets {
                        values: BTreeMap::new(),
                    },
                );
                self.presets_stack.push(id);
                Frame {
                    presets_pops: 1,
                    ..Frame::default()
                }
            }
            NodeKind::Preset(preset) => {
                if let Some(&id) = self.presets_stack.last() {
                    if let TreeKind::Presets { values } = &mut self.nodes[id].kind {
                        values.insert(preset.path.clone(), preset.text.clone());
                    }
                }
                Frame::default()
            }
            // generation is irrelevant to reachable inputs
            NodeKind::Output { .. } => {
                self.frames.push(Frame::default());
                return Ok(VisitResult::SkipSubtree);
            }
            _ => Frame::default(),
        };
        self.frames.push(frame);
        Ok(VisitResult::Continue)
    }

    fn leave(
        &mut self,
        node: &Node,
        _ctx: &mut Context,
        _session: &Session,
    ) -> Result<(), EngineError> {
        let frame = self.frames.pop().unwrap_or_default();
        for _ in 0..frame.attach_pops {
            self.attach.pop();
        }
        for _ in 0..frame.input_pops {
            self.input_stack.pop();
        }
        for _ in 0..frame.presets_pops {
            self.presets_stack.pop();
        }
        if let (Some(id), NodeKind::Input(input)) = (frame.list_to_finalize, &node.kind) {
            self.finalize_list(id, input);
        }
        Ok(())
    }
}

/// Innermost active preset for `path`, if any.
fn lookup_preset(active: &[BTreeMap<String, String>], path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    active.iter().rev().find_map(|map| map.get(path).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemArchive;

    fn tree_for(xml: &str) -> InputTree {
        let session = Session::new(Box::new(MemArchive::new().with("archetype.xml", xml)));
        let script = session.load_root().unwrap();
        InputTree::build(&session, &script).unwrap()
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
    fn counts_products_of_sums() {
        let tree = tree_for(TWO_BOOLS_ONE_ENUM);
        assert_eq!(tree.permutations(), 12);
    }

    #[test]
    fn enumerates_every_unique_permutation() {
        let tree = tree_for(TWO_BOOLS_ONE_ENUM);
        let all: Vec<_> = tree.iter_permutations().collect();
        assert_eq!(all.len(), 12);
        for values in &all {
            assert_eq!(values.len(), 3);
        }
        let mut unique = all.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn guarded_inputs_are_still_reachable() {
        let tree = tree_for(
            r#"<archetype-script>
                 <input>
                   <boolean name="docs"/>
                   <input if="${docs}">
                     <text name="format" default="markdown"/>
                   </input>
                 </input>
               </archetype-script>"#,
        );
        let paths: Vec<_> = tree.inputs().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["docs", "format"]);
    }

    #[test]
    fn preset_prunes_enum_to_the_matching_value() {
        let tree = tree_for(
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
        let pruned = tree.pruned();
        let db = pruned
            .inputs()
            .find(|n| n.path == "db")
            .expect("db input kept");
        assert_eq!(db.children.len(), 1);
        assert_eq!(
            pruned.node(db.children[0]).kind,
            TreeKind::Value {
                value: "h2".into()
            }
        );
        assert_eq!(pruned.permutations(), 1);
    }

    #[test]
    fn preset_removes_fixed_text_inputs() {
        let tree = tree_for(
            r#"<archetype-script>
                 <context><text path="package">com.fixed</text></context>
                 <input>
                   <text name="package" default="com.example"/>
                   <boolean name="docs"/>
                 </input>
               </archetype-script>"#,
        );
        let pruned = tree.pruned();
        let paths: Vec<_> = pruned.inputs().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["docs"]);
        // the fixed value still reaches permutation maps via the presets node
        let first = pruned.iter_permutations().next().unwrap();
        assert_eq!(first.get("package").unwrap(), "com.fixed");
    }

    #[test]
    fn pruned_ids_are_dense() {
        let tree = tree_for(
            r#"<archetype-script>
                 <context><boolean path="docs">false</boolean></context>
                 <input>
                   <boolean name="docs"/>
                   <enum name="lang"><option value="java"/></enum>
                 </input>
               </archetype-script>"#,
        );
        let pruned = tree.pruned();
        for (i, node) in pruned.nodes.iter().enumerate() {
            assert_eq!(node.id, i);
            for &child in &node.children {
                assert!(child < pruned.len());
            }
        }
        // docs kept only its "no" child
        let docs = pruned.inputs().find(|n| n.path == "docs").unwrap();
        assert_eq!(docs.children.len(), 1);
    }

    #[test]
    fn list_defaults_are_permutation_zero() {
        let tree = tree_for(
            r#"<archetype-script>
                 <input>
                   <list name="features" default="db,web">
                     <option value="db"/>
                     <option value="web"/>
                     <option value="metrics"/>
                   </list>
                 </input>
               </archetype-script>"#,
        );
        let first = tree.iter_permutations().next().unwrap();
        assert_eq!(first.get("features").unwrap(), "db,web");
        assert!(tree.permutations() <= MAX_LIST_PERMUTATIONS);
    }

    #[test]
    fn completion_flag_flips_after_the_last_permutation() {
        let tree = tree_for(TWO_BOOLS_ONE_ENUM);
        let mut state = PermutationState::new(&tree);
        let mut yields = 0;
        loop {
            yields += 1;
            if tree.advance(&mut state, tree.root) {
                break;
            }
        }
        assert_eq!(yields, 12);
        assert!(state.indices.iter().all(|i| i.current == 0));
    }

    #[test]
    fn nested_inputs_multiply_through_option_subtrees() {
        let tree = tree_for(
            r#"<archetype-script>
                 <input>
                   <enum name="db">
                     <option value="h2"/>
                     <option value="postgres">
                       <input><boolean name="pooling"/></input>
                     </option>
                   </enum>
                 </input>
               </archetype-script>"#,
        );
        // h2 alone, postgres with pooling yes/no
        assert_eq!(tree.permutations(), 3);
        let all: Vec<_> = tree.iter_permutations().collect();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|m| m.get("db").unwrap() == "h2"));
        assert!(all
            .iter()
            .any(|m| m.get("db").unwrap() == "postgres"
                && m.get("db.pooling").is_some()));
    }
}
