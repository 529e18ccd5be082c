pub mod archive;
pub mod context;
pub mod engines;
pub mod error;
pub mod loader;
pub mod model;
pub mod output;
pub mod prompter;
pub mod resolver;
pub mod session;
pub mod tree;
pub mod walker;
pub mod xml;

pub use archive::{Archive, DirArchive, MemArchive, TgzArchive};
pub use context::Context;
pub use engines::{EngineRegistry, TemplateEngine};
pub use error::{Diagnostic, EngineError};
pub use loader::{load, load_str};
pub use model::TemplateModel;
pub use output::{generate, DirSink, MemorySink, OutputSink, OutputSummary};
pub use prompter::{Prompter, Question, ScriptedPrompter, TerminalPrompter};
pub use resolver::{resolve_permutations, resolve_script, InputResolver};
pub use session::{Session, ROOT_SCRIPT};
pub use tree::{InputTree, PermutationIndex, PermutationState, MAX_LIST_PERMUTATIONS};
pub use walker::{VisitResult, Visitor, Walker};
