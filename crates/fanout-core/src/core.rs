//! The dispatch core.
//!
//! [`Core`] owns the subscription table, the delivery worker pool, the
//! parameter store, the plugin loader, and the set of attached nodes. It is
//! the single object a node handle refers to, and every operation a node
//! may perform — subscribe, advertise, publish, log, read and write
//! parameters — goes through it.
//!
//! ## Publish pipeline
//!
//! `publish` builds the message on the calling thread (the build callback
//! may publish reentrantly; no core-wide lock is held across it), freezes
//! the buffer, snapshots the matching subscriber list, and enqueues one
//! delivery task per subscriber. It returns as soon as the tasks are
//! queued; it never waits for delivery. Callback failures and panics are
//! caught per task, logged, and never reach the publisher or other
//! subscribers.
//!
//! ## Shutdown
//!
//! `shutdown` flips the reject flag, stops every node, joins their run
//! threads, drains the pool, destroys the nodes, and drops the
//! subscription table — in that order. After it returns, no subscriber
//! callback begins executing and every core operation fails with
//! [`Error::ShuttingDown`].

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use fanout_abi::{CoreRef, PublishBuildFn, RawNodeVtbl, SubscribeCallback};
use fxhash::FxHashMap;
use libc::c_void;
use parking_lot::Mutex;

use crate::ffi;
use crate::message::{FrozenMessage, MessageBuffer, MessageView};
use crate::node::{NodeHandle, NodeId, NodeVtbl};
use crate::params::ParameterStore;
use crate::plugin::PluginLoader;
use crate::pool::WorkerPool;
use crate::table::{SubscriptionKey, SubscriptionTable, WriterTable, DEFAULT_SHARDS};
use crate::Error;

/// Owner id recorded for subscriptions made outside any node lifecycle
/// call (host code, tests). Real node ids start at 1.
pub const HOST_NODE: NodeId = NodeId(0);

thread_local! {
    static CURRENT_NODE: Cell<u64> = const { Cell::new(HOST_NODE.0) };
}

/// RAII scope tagging subscriptions on this thread with a node id.
struct NodeScope {
    prev: u64,
}

impl NodeScope {
    fn enter(node: NodeId) -> Self {
        let prev = CURRENT_NODE.get();
        CURRENT_NODE.set(node.0);
        Self { prev }
    }
}

impl Drop for NodeScope {
    fn drop(&mut self) {
        CURRENT_NODE.set(self.prev);
    }
}

fn current_node() -> NodeId {
    NodeId(CURRENT_NODE.get())
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Core construction parameters.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Delivery worker threads; `0` sizes to available parallelism.
    pub worker_threads: usize,
    /// Subscription table shard count (rounded up to a power of two).
    pub table_shards: usize,
    /// Directories searched for node plugin libraries, in order.
    pub plugin_paths: Vec<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            table_shards: DEFAULT_SHARDS,
            plugin_paths: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

#[derive(Default)]
struct NodeSet {
    by_name: FxHashMap<String, Arc<NodeHandle>>,
    pending_start: Vec<Arc<NodeHandle>>,
}

/// The dispatch core. See the [module docs](self) for the big picture.
///
/// All state is scoped to the instance; multiple cores can coexist in one
/// process and are torn down independently.
pub struct Core {
    self_ref: Weak<Core>,
    // Declared (and therefore dropped) before the rest: a node's destroy
    // path may call back into the core, so the handles must go while the
    // table, pool, and parameter store are still alive.
    nodes: Mutex<NodeSet>,
    run_threads: Mutex<Vec<JoinHandle<()>>>,
    table: Arc<SubscriptionTable>,
    writers: Arc<WriterTable>,
    pool: WorkerPool,
    params: ParameterStore,
    loader: Mutex<PluginLoader>,
    next_node_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl Core {
    /// Builds a core.
    ///
    /// # Errors
    ///
    /// [`Error::Unknown`] if the worker pool threads cannot be spawned.
    pub fn new(config: CoreConfig) -> Result<Arc<Self>, Error> {
        let pool = WorkerPool::new(config.worker_threads)?;

        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            nodes: Mutex::new(NodeSet::default()),
            run_threads: Mutex::new(Vec::new()),
            table: Arc::new(SubscriptionTable::new(config.table_shards)),
            writers: Arc::new(WriterTable::new()),
            pool,
            params: ParameterStore::new(),
            loader: Mutex::new(PluginLoader::new(config.plugin_paths)),
            next_node_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Static name identifying this core implementation.
    #[must_use]
    pub fn get_type(&self) -> &'static str {
        "fanout::Core"
    }

    /// Whether `shutdown` has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    fn shared(&self) -> Result<Arc<Self>, Error> {
        self.self_ref.upgrade().ok_or(Error::ShuttingDown)
    }

    /// The ABI reference handed to plugins. Stable for the core's lifetime.
    #[must_use]
    pub fn as_raw(&self) -> CoreRef {
        CoreRef {
            impl_ptr: std::ptr::from_ref(self).cast_mut().cast::<c_void>(),
            vptr: ffi::core_vtbl(),
        }
    }

    // --- subscribe / advertise / publish -------------------------------

    /// Registers `callback` for every publish matching `key`.
    ///
    /// The callback runs on the worker pool, possibly concurrently with
    /// itself for different messages. Its return code is logged when
    /// non-zero and never affects other subscribers.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after `shutdown` has begun.
    pub fn subscribe<F>(&self, key: SubscriptionKey, callback: F) -> Result<SubscriberHandle, Error>
    where
        F: for<'a> Fn(&Core, &MessageView<'a>) -> i32 + Send + Sync + 'static,
    {
        self.ensure_live()?;

        let deliver: crate::table::DeliveryFn = Arc::new(move |core: &Core, frozen: &FrozenMessage| {
            let view = frozen.view();
            callback(core, &view)
        });

        let id = self.table.insert(key.clone(), current_node(), deliver);

        Ok(SubscriberHandle {
            table: Arc::clone(&self.table),
            key,
            id,
            connected: true,
        })
    }

    /// Registers a C callback, as the `subscribe` vtable entry does.
    ///
    /// `arg` is stored verbatim and passed back on every invocation; the
    /// core never dereferences it. It must be valid to use from any thread
    /// for as long as the subscription lives.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after `shutdown` has begun.
    pub fn subscribe_raw(
        &self,
        key: SubscriptionKey,
        callback: SubscribeCallback,
        arg: *mut c_void,
    ) -> Result<SubscriberHandle, Error> {
        let arg = UserArg(arg);

        self.subscribe(key, move |core, view| {
            let arg = arg;
            callback(core.as_raw(), view.as_raw(), arg.0)
        })
    }

    /// Records the caller as a writer of `key`.
    ///
    /// Bookkeeping only; publishing is never restricted to advertisers.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after `shutdown` has begun.
    pub fn advertise(&self, key: SubscriptionKey) -> Result<PublisherHandle, Error> {
        self.ensure_live()?;

        let id = self.writers.insert(key.clone(), current_node());

        Ok(PublisherHandle {
            writers: Arc::clone(&self.writers),
            key,
            id,
            connected: true,
        })
    }

    /// Builds a message with `build` and dispatches it to every subscriber
    /// of `key` observed at lookup.
    ///
    /// `build` runs synchronously on this thread and may itself publish.
    /// Returns once the delivery tasks are enqueued; zero subscribers is a
    /// normal no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after `shutdown` has begun; any error
    /// returned by `build` (the partial message is dropped whole);
    /// [`Error::OutOfMemory`] from segment allocation inside `build`.
    pub fn publish_with<F>(&self, key: &SubscriptionKey, build: F) -> Result<(), Error>
    where
        F: FnOnce(&mut MessageBuffer) -> Result<(), Error>,
    {
        self.ensure_live()?;

        let mut buffer = MessageBuffer::new(key.msg_type);
        build(&mut buffer)?;

        self.dispatch(key, buffer.freeze())
    }

    /// Publishes through a C build callback, as the `publish` vtable entry
    /// does.
    ///
    /// # Errors
    ///
    /// As [`publish_with`](Self::publish_with); a non-zero code from the
    /// callback surfaces as [`Error::BuildCallback`].
    pub fn publish_raw(
        &self,
        key: &SubscriptionKey,
        build: PublishBuildFn,
        arg: *mut c_void,
    ) -> Result<(), Error> {
        self.ensure_live()?;

        let mut buffer = MessageBuffer::new(key.msg_type);
        let code = build(self.as_raw(), ffi::builder_ref(&mut buffer), arg);
        if code != 0 {
            return Err(Error::BuildCallback(code));
        }

        self.dispatch(key, buffer.freeze())
    }

    fn dispatch(&self, key: &SubscriptionKey, frozen: FrozenMessage) -> Result<(), Error> {
        let subscribers = self.table.snapshot(key);
        if subscribers.is_empty() {
            return Ok(());
        }

        let core = self.shared()?;

        for entry in subscribers {
            let core = Arc::clone(&core);
            let frozen = frozen.clone();
            let topic = key.topic.clone();

            self.pool.spawn(move || {
                // Cancelled deliveries still release their message
                // reference when `frozen` drops here.
                if core.is_shutting_down() {
                    return;
                }

                match catch_unwind(AssertUnwindSafe(|| (entry.deliver)(&core, &frozen))) {
                    Ok(0) => {}
                    Ok(code) => {
                        tracing::error!(
                            topic = %topic,
                            msg_type = frozen.msg_type(),
                            subscriber = entry.id,
                            code,
                            "subscriber callback failed"
                        );
                    }
                    Err(_) => {
                        tracing::error!(
                            topic = %topic,
                            msg_type = frozen.msg_type(),
                            subscriber = entry.id,
                            "subscriber callback panicked"
                        );
                    }
                }
            });
        }

        Ok(())
    }

    /// Blocks until every delivery task enqueued so far has completed.
    ///
    /// Diagnostic aid: dispatch is asynchronous, and tests use this to
    /// observe the post-fan-out state deterministically.
    pub fn wait_idle(&self) {
        self.pool.drain();
    }

    // --- logging -------------------------------------------------------

    /// Logs at error level on behalf of a node.
    pub fn log_error(&self, msg: &str) {
        tracing::error!(target: "fanout", "{}", msg);
    }

    /// Logs at warn level on behalf of a node.
    pub fn log_warn(&self, msg: &str) {
        tracing::warn!(target: "fanout", "{}", msg);
    }

    /// Logs at info level on behalf of a node.
    pub fn log_info(&self, msg: &str) {
        tracing::info!(target: "fanout", "{}", msg);
    }

    /// Logs at debug level on behalf of a node.
    pub fn log_debug(&self, msg: &str) {
        tracing::debug!(target: "fanout", "{}", msg);
    }

    /// Logs at trace level on behalf of a node.
    pub fn log_trace(&self, msg: &str) {
        tracing::trace!(target: "fanout", "{}", msg);
    }

    // --- parameters ----------------------------------------------------

    /// The core-scoped parameter store.
    #[must_use]
    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    // --- nodes ---------------------------------------------------------

    /// Loads the plugin for `type_name` and attaches a node instance under
    /// `name`.
    ///
    /// The plugin's `create` runs during this call and may subscribe and
    /// advertise; those registrations are owned by the new node and swept
    /// when it is destroyed.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`], [`Error::NodeExists`], plugin load/symbol
    /// errors, or the node's own `create` failure as [`Error::Node`].
    pub fn add_node(&self, name: &str, type_name: &str) -> Result<NodeId, Error> {
        self.ensure_live()?;

        let plugin = self.loader.lock().load(type_name)?;
        let vtbl = plugin.vtbl();

        self.attach(name, vtbl, Some(plugin))
    }

    /// Attaches a node whose vtable is linked into the host process.
    ///
    /// Lifecycle is identical to plugin nodes; no library handle is held.
    ///
    /// # Errors
    ///
    /// As [`add_node`](Self::add_node), minus the loader errors; an
    /// incomplete vtable is [`Error::PluginSymbol`].
    pub fn add_static_node(&self, name: &str, raw: &'static RawNodeVtbl) -> Result<NodeId, Error> {
        self.ensure_live()?;

        let vtbl = NodeVtbl::from_raw(raw)?;
        self.attach(name, vtbl, None)
    }

    fn attach(
        &self,
        name: &str,
        vtbl: NodeVtbl,
        plugin: Option<Arc<crate::plugin::PluginHandle>>,
    ) -> Result<NodeId, Error> {
        let mut nodes = self.nodes.lock();
        if nodes.by_name.contains_key(name) {
            return Err(Error::NodeExists(name.to_owned()));
        }

        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed));

        let handle = {
            let _scope = NodeScope::enter(id);
            NodeHandle::create(self.as_raw(), id, name, vtbl, plugin)?
        };

        let handle = Arc::new(handle);
        nodes.by_name.insert(name.to_owned(), Arc::clone(&handle));
        nodes.pending_start.push(handle);

        tracing::info!(node = %id, name, "node attached");

        Ok(id)
    }

    /// Gives every not-yet-started node its own `run` thread.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after `shutdown` has begun;
    /// [`Error::Unknown`] if a thread cannot be spawned.
    pub fn start_nodes(&self) -> Result<(), Error> {
        self.ensure_live()?;

        let pending = std::mem::take(&mut self.nodes.lock().pending_start);
        let core = self.shared()?;

        for node in pending {
            let core = Arc::clone(&core);
            let thread = std::thread::Builder::new()
                .name(format!("fanout-node-{}", node.name()))
                .spawn(move || {
                    let _scope = NodeScope::enter(node.id());
                    if let Err(e) = node.run() {
                        tracing::error!(node = %node.id(), name = %node.name(), error = %e, "node run failed");
                    }
                    drop(core);
                })
                .map_err(|_| Error::Unknown)?;

            self.run_threads.lock().push(thread);
        }

        Ok(())
    }

    /// Number of attached nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().by_name.len()
    }

    /// Number of registered subscribers across all keys.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.table.len()
    }

    // --- shutdown ------------------------------------------------------

    /// Tears the core down cooperatively.
    ///
    /// Order: reject flag, node `stop`, join of every run thread, pool
    /// drain (already-enqueued tasks complete or cancel), node `destroy`,
    /// subscription table drop. Idempotent: a second call returns
    /// immediately.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let nodes: Vec<Arc<NodeHandle>> = self.nodes.lock().by_name.values().cloned().collect();

        for node in &nodes {
            if let Err(e) = node.stop() {
                tracing::error!(node = %node.id(), error = %e, "node stop failed");
            }
        }

        let threads = std::mem::take(&mut *self.run_threads.lock());
        for thread in threads {
            if thread.join().is_err() {
                tracing::error!("node run thread panicked");
            }
        }

        self.pool.drain();

        for node in &nodes {
            if let Err(e) = node.destroy() {
                tracing::error!(node = %node.id(), error = %e, "node destroy failed");
            }
            self.table.remove_node(node.id());
            self.writers.remove_node(node.id());
        }

        {
            let mut set = self.nodes.lock();
            set.by_name.clear();
            set.pending_start.clear();
        }

        self.table.clear();

        tracing::info!("core shut down");
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("subscribers", &self.table.len())
            .field("nodes", &self.node_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// User-supplied opaque pointer, shared with delivery tasks.
///
/// The subscribe contract makes the pointee's thread safety the caller's
/// responsibility; the core never dereferences it.
#[derive(Clone, Copy)]
struct UserArg(*mut c_void);

// SAFETY: see above — opaque, never dereferenced by the core.
unsafe impl Send for UserArg {}
unsafe impl Sync for UserArg {}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owning handle for one subscription.
///
/// `disconnect` (or drop) removes the entry from the table.
pub struct SubscriberHandle {
    table: Arc<SubscriptionTable>,
    key: SubscriptionKey,
    id: u64,
    connected: bool,
}

impl SubscriberHandle {
    /// The subscribed key.
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Table-unique subscriber id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscription. Idempotent; returns `true` on the call
    /// that actually removed it.
    pub fn disconnect(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.connected = false;
        self.table.remove(&self.key, self.id)
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("connected", &self.connected)
            .finish()
    }
}

/// Owning handle for one advertisement.
pub struct PublisherHandle {
    writers: Arc<WriterTable>,
    key: SubscriptionKey,
    id: u64,
    connected: bool,
}

impl PublisherHandle {
    /// The advertised key.
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Removes the advertisement record. Idempotent.
    pub fn disconnect(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.connected = false;
        self.writers.remove(self.id)
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for PublisherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("connected", &self.connected)
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
