//! The backend registry: name → storage engine.
//!
//! Compiled-in backends self-register in [`BackendRegistry::builtin`]. The
//! repository's `extensions.refstorage` configuration selects the engine;
//! `files` is the default. Entries are held in an owner-retained vector —
//! nothing here owns anything else.

use std::path::Path;
use std::sync::Arc;

use silt_config::ConfigFile;

use crate::backend::RefBackend;
use crate::error::RefError;
use crate::files::FilesBackend;
use crate::kv::RedbBackend;

/// The backend used when `extensions.refstorage` is unset.
pub const DEFAULT_BACKEND: &str = "files";

/// File name of the key-value store inside the repository directory.
pub(crate) const KV_DB_FILE: &str = "refdb";

type BackendFactory = fn(&Path, bool) -> Result<Arc<dyn RefBackend>, RefError>;

struct BackendEntry {
    name: &'static str,
    factory: BackendFactory,
}

/// The list of registered backends.
pub struct BackendRegistry {
    entries: Vec<BackendEntry>,
}

impl BackendRegistry {
    /// A registry holding every compiled-in backend.
    pub fn builtin() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register("files", |git_dir, log_all| {
            Ok(Arc::new(
                FilesBackend::new(git_dir).with_log_all_ref_updates(log_all),
            ))
        });
        registry.register("redb", |git_dir, log_all| {
            Ok(Arc::new(
                RedbBackend::open(git_dir.join(KV_DB_FILE))?.with_log_all_ref_updates(log_all),
            ))
        });
        registry
    }

    /// Register a backend under a name. Later registrations win.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        self.entries.push(BackendEntry { name, factory });
    }

    /// Is a backend with this name registered?
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Open the named backend rooted at `git_dir`.
    pub fn open(
        &self,
        git_dir: &Path,
        name: &str,
        log_all_ref_updates: bool,
    ) -> Result<Arc<dyn RefBackend>, RefError> {
        let entry = self
            .entries
            .iter()
            .rev()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                RefError::Generic(format!("unknown ref storage backend '{}'", name))
            })?;
        (entry.factory)(git_dir, log_all_ref_updates)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The backend name a repository's configuration selects.
pub fn configured_backend_name(git_dir: &Path) -> Result<String, RefError> {
    let config = ConfigFile::load(&git_dir.join("config"))?;
    Ok(config
        .get_string("extensions.refstorage")
        .unwrap_or_else(|| DEFAULT_BACKEND.to_string()))
}

/// Submodules must use the same ref storage as the superproject; checked on
/// first access of the submodule's own configuration.
pub fn validate_submodule_backend(
    superproject_backend: &str,
    submodule_git_dir: &Path,
) -> Result<(), RefError> {
    let submodule = configured_backend_name(submodule_git_dir)?;
    if submodule != superproject_backend {
        return Err(RefError::Generic(format!(
            "submodule at '{}' uses ref storage '{}', but the superproject uses '{}'",
            submodule_git_dir.display(),
            submodule,
            superproject_backend
        )));
    }
    Ok(())
}
