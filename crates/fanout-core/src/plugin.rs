//! Plugin loading.
//!
//! [`PluginHandle`] opens one shared library, resolves the well-known
//! [`NODE_ENTRYPOINT`] symbol, and validates the node vtable it returns.
//! The handle owns the library mapping; node handles hold an
//! `Arc<PluginHandle>`, so the library stays loaded for as long as any
//! object it produced is alive.
//!
//! [`PluginLoader`] adds name-based resolution on top: a node type name is
//! looked up across an ordered list of directories using the platform's
//! library file naming, and loaded plugins are cached so two nodes of the
//! same type share one library handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fanout_abi::{NodeEntrypointFn, NODE_ENTRYPOINT};
use fxhash::FxHashMap;
use libloading::Library;

use crate::node::NodeVtbl;
use crate::Error;

// ---------------------------------------------------------------------------
// PluginHandle
// ---------------------------------------------------------------------------

/// An open node plugin: the shared library plus its validated vtable.
pub struct PluginHandle {
    // Option so Drop can close() explicitly and log a failure; never None
    // while the handle is alive.
    library: Option<Library>,
    path: PathBuf,
    vtbl: NodeVtbl,
}

impl PluginHandle {
    /// Opens the shared library at `path` and resolves its node vtable.
    ///
    /// # Errors
    ///
    /// [`Error::PluginLoad`] if the library cannot be opened;
    /// [`Error::PluginSymbol`] if the entry symbol is missing, returns
    /// null, or the resolved vtable has null entries.
    pub fn open(path: &Path) -> Result<Self, Error> {
        // SAFETY: loading a library runs its initializers; the plugin
        // contract requires them to be safe to run at any point.
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::PluginLoad(format!("{}: {e}", path.display())))?;

        // SAFETY: the symbol is declared with the NodeEntrypointFn signature
        // by the plugin ABI contract.
        let entry = unsafe { library.get::<NodeEntrypointFn>(NODE_ENTRYPOINT) }
            .map_err(|e| Error::PluginSymbol(format!("{}: {e}", path.display())))?;

        // SAFETY: entry takes no arguments and returns a pointer we only
        // read after the null check.
        let raw = unsafe { entry() };
        if raw.is_null() {
            return Err(Error::PluginSymbol(format!(
                "{}: node entry point returned null",
                path.display()
            )));
        }

        // SAFETY: non-null and pointing to the plugin's static vtable.
        let vtbl = NodeVtbl::from_raw(unsafe { &*raw })?;

        Ok(Self {
            library: Some(library),
            path: path.to_owned(),
            vtbl,
        })
    }

    /// The path the library was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn vtbl(&self) -> NodeVtbl {
        self.vtbl
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        // Close failures cannot be surfaced from a destructor; log and move on.
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                tracing::error!(path = %self.path.display(), error = %e, "plugin unload failed");
            }
        }
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PluginLoader
// ---------------------------------------------------------------------------

/// Resolves node type names to loaded plugins across a search path.
pub struct PluginLoader {
    paths: Vec<PathBuf>,
    cache: FxHashMap<String, Arc<PluginHandle>>,
}

impl PluginLoader {
    /// Creates a loader searching `paths` in order.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            cache: FxHashMap::default(),
        }
    }

    /// Loads (or returns the cached) plugin for node type `name`.
    ///
    /// # Errors
    ///
    /// [`Error::PluginLoad`] if no library for `name` can be opened in any
    /// search directory; [`Error::PluginSymbol`] if one opens but its entry
    /// point is invalid.
    pub fn load(&mut self, name: &str) -> Result<Arc<PluginHandle>, Error> {
        if let Some(plugin) = self.cache.get(name) {
            return Ok(Arc::clone(plugin));
        }

        let plugin = Arc::new(self.open_by_name(name)?);
        self.cache.insert(name.to_owned(), Arc::clone(&plugin));

        Ok(plugin)
    }

    fn open_by_name(&self, name: &str) -> Result<PluginHandle, Error> {
        let file_name = library_file_name(name);

        for dir in &self.paths {
            let path = dir.join(&file_name);
            if !path.exists() {
                continue;
            }

            match PluginHandle::open(&path) {
                Ok(plugin) => return Ok(plugin),
                // A bad entry point is not recoverable by searching on.
                Err(e @ Error::PluginSymbol(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "candidate plugin failed to load");
                }
            }
        }

        Err(Error::PluginLoad(format!(
            "no plugin library '{file_name}' found in search path"
        )))
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("paths", &self.paths)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Platform file name for node type `name`.
fn library_file_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("fanout-{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("libfanout-{name}.dylib")
    } else {
        format!("libfanout-{name}.so")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
