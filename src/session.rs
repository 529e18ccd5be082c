use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use argen_script::Script;

use crate::archive::{self, Archive};
use crate::engines::EngineRegistry;
use crate::error::EngineError;
use crate::loader;

/// Everything one archetype evaluation owns: the archive, the per-path
/// script cache (write-once, never evicted within a build), the template
/// engine registry, and the cooperative cancellation flag.
pub struct Session {
    archive: Box<dyn Archive>,
    scripts: RefCell<HashMap<String, Rc<Script>>>,
    engines: EngineRegistry,
    cancelled: Arc<AtomicBool>,
}

/// Default entry-point script within an archetype.
pub const ROOT_SCRIPT: &str = "archetype.xml";

impl Session {
    pub fn new(archive: Box<dyn Archive>) -> Session {
        Session {
            archive,
            scripts: RefCell::new(HashMap::new()),
            engines: EngineRegistry::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn archive(&self) -> &dyn Archive {
        self.archive.as_ref()
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn engines_mut(&mut self) -> &mut EngineRegistry {
        &mut self.engines
    }

    /// Shareable handle for external cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Loads a script by archive path, serving repeats from the cache.
    pub fn load_script(&self, path: &str) -> Result<Rc<Script>, EngineError> {
        let canonical = archive::canonicalize(path)?;
        if let Some(script) = self.scripts.borrow().get(&canonical) {
            return Ok(script.clone());
        }
        debug!(script = %canonical, "loading script");
        let script = Rc::new(loader::load(self.archive.as_ref(), &canonical)?);
        self.scripts
            .borrow_mut()
            .insert(canonical, script.clone());
        Ok(script)
    }

    /// Loads the archetype's root script.
    pub fn load_root(&self) -> Result<Rc<Script>, EngineError> {
        self.load_script(ROOT_SCRIPT)
    }
}
