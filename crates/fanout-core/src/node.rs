//! Node handles.
//!
//! A [`NodeHandle`] binds one plugin-created node instance to a core: it
//! owns the opaque `impl` pointer the plugin's `create` returned, a
//! validated copy of the plugin's vtable, and (for dynamically loaded
//! nodes) a strong reference to the [`PluginHandle`] so the library cannot
//! be unloaded while any of its function pointers might still be called —
//! including the destroy path.
//!
//! The core drives the lifecycle strictly as `create → run → stop →
//! destroy`; `destroy` is only called after `run` has returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fanout_abi::{CoreRef, RawNodeVtbl, StrView};
use libc::{c_int, c_void};

use crate::plugin::PluginHandle;
use crate::Error;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Core-assigned node identifier. Monotone, never reused within a core
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeVtbl
// ---------------------------------------------------------------------------

/// A [`RawNodeVtbl`] with every entry verified non-null.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeVtbl {
    pub create: extern "C" fn(CoreRef, StrView, *mut *mut c_void) -> c_int,
    pub destroy: extern "C" fn(CoreRef, *mut c_void) -> c_int,
    pub run: extern "C" fn(CoreRef, *mut c_void) -> c_int,
    pub stop: extern "C" fn(CoreRef, *mut c_void) -> c_int,
    pub err_to_str: extern "C" fn(c_int) -> StrView,
}

impl NodeVtbl {
    /// Validates a raw table resolved from a plugin entry point.
    ///
    /// # Errors
    ///
    /// [`Error::PluginSymbol`] naming the first missing entry.
    pub(crate) fn from_raw(raw: &RawNodeVtbl) -> Result<Self, Error> {
        let missing = |field: &str| Error::PluginSymbol(format!("vtable entry '{field}' is null"));

        Ok(Self {
            create: raw.create.ok_or_else(|| missing("create"))?,
            destroy: raw.destroy.ok_or_else(|| missing("destroy"))?,
            run: raw.run.ok_or_else(|| missing("run"))?,
            stop: raw.stop.ok_or_else(|| missing("stop"))?,
            err_to_str: raw.err_to_str.ok_or_else(|| missing("err_to_str"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// NodeError
// ---------------------------------------------------------------------------

/// An error produced by a node across the ABI, resolved through the node's
/// own `err_to_str`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{msg} ({code})")]
pub struct NodeError {
    /// Node-defined error code.
    pub code: i32,
    /// Human-readable text from the producing vtable.
    pub msg: String,
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// One attached node instance and its lifecycle.
pub struct NodeHandle {
    id: NodeId,
    name: String,
    core: CoreRef,
    impl_ptr: *mut c_void,
    vtbl: NodeVtbl,
    // Dropped last of the fields that matter: keeps the shared library
    // mapped until after destroy has run. None for statically linked nodes.
    plugin: Option<Arc<PluginHandle>>,
    destroyed: AtomicBool,
}

// SAFETY: the plugin contract requires every vtable entry to be callable
// from any thread (`stop` in particular is documented as cross-thread), and
// impl_ptr is only handed back to those entries.
unsafe impl Send for NodeHandle {}
unsafe impl Sync for NodeHandle {}

impl NodeHandle {
    /// Creates the plugin's node instance.
    ///
    /// The plugin may subscribe and advertise on `core` during this call.
    ///
    /// # Errors
    ///
    /// [`Error::Node`] carrying the plugin's code and message if `create`
    /// returns non-zero.
    pub(crate) fn create(
        core: CoreRef,
        id: NodeId,
        name: &str,
        vtbl: NodeVtbl,
        plugin: Option<Arc<PluginHandle>>,
    ) -> Result<Self, Error> {
        let mut impl_ptr: *mut c_void = std::ptr::null_mut();

        let code = (vtbl.create)(core, StrView::from_str(name), &mut impl_ptr);
        if code != 0 {
            return Err(Error::Node(resolve_error(vtbl, code)));
        }

        Ok(Self {
            id,
            name: name.to_owned(),
            core,
            impl_ptr,
            vtbl,
            plugin,
            destroyed: AtomicBool::new(false),
        })
    }

    /// The core-assigned id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The registration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks in the node's `run` until it stops.
    ///
    /// # Errors
    ///
    /// The node's error, resolved through its `err_to_str`.
    pub fn run(&self) -> Result<(), NodeError> {
        self.call(self.vtbl.run)
    }

    /// Signals the node's `run` to return. Safe from any thread.
    ///
    /// # Errors
    ///
    /// The node's error, resolved through its `err_to_str`.
    pub fn stop(&self) -> Result<(), NodeError> {
        self.call(self.vtbl.stop)
    }

    /// Releases the node instance. Idempotent.
    ///
    /// The core calls this only after `run` has returned.
    ///
    /// # Errors
    ///
    /// The node's error; the handle is considered destroyed regardless.
    pub fn destroy(&self) -> Result<(), NodeError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.call(self.vtbl.destroy)
    }

    /// Resolves one of this node's error codes to text.
    #[must_use]
    pub fn err_msg(&self, code: i32) -> String {
        resolve_error(self.vtbl, code).msg
    }

    fn call(&self, f: extern "C" fn(CoreRef, *mut c_void) -> c_int) -> Result<(), NodeError> {
        match f(self.core, self.impl_ptr) {
            0 => Ok(()),
            code => Err(resolve_error(self.vtbl, code)),
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        // Last-resort cleanup; the core destroys nodes explicitly during
        // shutdown. A destroy failure here can only be logged.
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            let code = (self.vtbl.destroy)(self.core, self.impl_ptr);
            if code != 0 {
                tracing::error!(
                    node = %self.id,
                    name = %self.name,
                    code,
                    "node destroy failed during drop"
                );
            }
        }
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dynamic", &self.plugin.is_some())
            .finish_non_exhaustive()
    }
}

fn resolve_error(vtbl: NodeVtbl, code: c_int) -> NodeError {
    let view = (vtbl.err_to_str)(code);
    // SAFETY: err_to_str returns a view of static plugin storage.
    let msg = unsafe { view.as_str() }.unwrap_or("").to_owned();

    NodeError { code, msg }
}

// ===========================================================================
// Tests
// ===========================================================================
