//! # Fanout ABI
//!
//! The C ABI contract between the fanout core and node plugins.
//!
//! Everything in this crate is `#[repr(C)]` and may be handed across a
//! shared-library boundary. Polymorphism is expressed as tables of function
//! pointers ([`CoreVtbl`], [`RawNodeVtbl`], [`MsgBuilderVtbl`]) paired with an
//! opaque `impl` pointer; this is the only dispatch shape that survives an
//! ABI boundary, so the core keeps it even where plain trait objects would do
//! internally.
//!
//! ## Conventions
//!
//! - All strings are `(ptr, len)` views ([`StrView`]) without nul
//!   termination. An empty view carries a null pointer and zero length.
//! - All fallible entries return a non-negative `c_int`; `0` is success.
//!   The stable code mapping lives in [`ErrorCode`].
//! - Function-pointer fields in [`RawNodeVtbl`] are `Option` so a loader can
//!   reject a table with missing entries instead of calling through null.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use libc::{c_char, c_int, c_void};

// ---------------------------------------------------------------------------
// Scalar aliases
// ---------------------------------------------------------------------------

/// 64-bit tag identifying a message schema.
///
/// Opaque to the core: two messages match only if their tags are bit-equal.
pub type MsgType = u64;

/// A machine word as carried in message segments (8 bytes, host alignment).
pub type Word = u64;

/// Signed length/index type crossing the ABI (matches C `ptrdiff_t`).
pub type Index = isize;

/// Exported entry-point symbol every node plugin must define.
///
/// The symbol is a zero-argument function returning a pointer to a static
/// [`RawNodeVtbl`]. The trailing nul is included so the bytes can be handed
/// to `dlsym`-style resolvers directly.
pub const NODE_ENTRYPOINT: &[u8] = b"node_entrypoint\0";

/// Type of the function resolved from [`NODE_ENTRYPOINT`].
pub type NodeEntrypointFn = unsafe extern "C" fn() -> *const RawNodeVtbl;

// ---------------------------------------------------------------------------
// StrView
// ---------------------------------------------------------------------------

/// Borrowed, non-owning `(ptr, len)` string view.
///
/// The pointee must stay alive and unmodified for as long as the view is in
/// use; the core never retains a view past the call it was passed to.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrView {
    /// First byte, or null for the empty view.
    pub data: *const c_char,
    /// Length in bytes. Never negative.
    pub len: Index,
}

impl StrView {
    /// The empty view (null pointer, zero length).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            len: 0,
        }
    }

    /// Borrows a Rust string as a view.
    ///
    /// The returned view is valid only while `s` is.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        Self {
            data: s.as_ptr().cast::<c_char>(),
            len: s.len() as Index,
        }
    }

    /// Reconstructs the viewed bytes as a `&str`.
    ///
    /// Returns `None` if the view is null, the length is negative, or the
    /// bytes are not valid UTF-8.
    ///
    /// # Safety
    ///
    /// `self.data` must point to `self.len` initialized bytes that outlive
    /// the returned reference.
    #[must_use]
    pub unsafe fn as_str<'a>(self) -> Option<&'a str> {
        if self.data.is_null() || self.len < 0 {
            return None;
        }
        let bytes = std::slice::from_raw_parts(self.data.cast::<u8>(), self.len as usize);
        std::str::from_utf8(bytes).ok()
    }
}

// ---------------------------------------------------------------------------
// Message segments and views
// ---------------------------------------------------------------------------

/// A writable message segment handed to a build callback.
///
/// On input to `alloc_segment` the `len` field carries the minimum number of
/// words requested; on success both fields are overwritten with the actual
/// allocation, which is cache-line aligned and a multiple of 16 words long.
#[repr(C)]
#[derive(Debug)]
pub struct MsgSegment {
    /// Segment storage, 128-byte aligned.
    pub data: *mut Word,
    /// Length in words.
    pub len: Index,
}

/// A read-only view of one frozen message segment.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MsgSegmentView {
    /// Segment storage, 128-byte aligned.
    pub data: *const Word,
    /// Length in words.
    pub len: Index,
}

/// A read-only view over a frozen message.
///
/// Valid only for the span of the callback invocation receiving it;
/// subscribers must not retain it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MsgView {
    /// Segments in insertion order.
    pub segments: *const MsgSegmentView,
    /// Number of segments.
    pub num_segments: Index,
    /// Schema tag the message was published under.
    pub msg_type: MsgType,
}

// ---------------------------------------------------------------------------
// Core / handle / builder references
// ---------------------------------------------------------------------------

/// Reference to a core instance, passed by value across the ABI.
///
/// Copyable; carries no ownership of the core itself.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CoreRef {
    /// Opaque pointer to the core implementation.
    pub impl_ptr: *mut c_void,
    /// The core's dispatch table.
    pub vptr: *const CoreVtbl,
}

/// An owning reference to one subscription, produced by `subscribe`.
#[repr(C)]
#[derive(Debug)]
pub struct SubscriberRef {
    /// Opaque pointer to the handle implementation.
    pub impl_ptr: *mut c_void,
    /// The handle's dispatch table.
    pub vptr: *const SubscriberVtbl,
}

/// An owning reference to one advertisement, produced by `advertise`.
#[repr(C)]
#[derive(Debug)]
pub struct PublisherRef {
    /// Opaque pointer to the handle implementation.
    pub impl_ptr: *mut c_void,
    /// The handle's dispatch table.
    pub vptr: *const PublisherVtbl,
}

/// Reference to a message under construction, passed to build callbacks.
///
/// Valid only for the span of the build callback.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MsgBuilderRef {
    /// Opaque pointer to the builder implementation.
    pub impl_ptr: *mut c_void,
    /// The builder's dispatch table.
    pub vptr: *const MsgBuilderVtbl,
}

// ---------------------------------------------------------------------------
// Callback types and parameter blocks
// ---------------------------------------------------------------------------

/// Subscriber callback: invoked once per matching publish.
///
/// The `*mut c_void` is the user argument registered at subscribe time,
/// passed back verbatim; the core never dereferences it. A non-zero return
/// is logged by the core and does not affect other deliveries.
pub type SubscribeCallback = extern "C" fn(CoreRef, MsgView, *mut c_void) -> c_int;

/// Publish build callback: fills message segments via the builder.
///
/// Runs synchronously on the publishing thread. A non-zero return aborts the
/// publish; the partial message is dropped whole.
pub type PublishBuildFn = extern "C" fn(CoreRef, MsgBuilderRef, *mut c_void) -> c_int;

/// Parameter block for `subscribe`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SubscribeParams {
    /// Topic byte string (UTF-8, matched byte-exact).
    pub topic: StrView,
    /// Schema tag to match.
    pub msg_type: MsgType,
    /// Callback to invoke per delivery. Must not be null.
    pub callback: Option<SubscribeCallback>,
    /// User argument stored verbatim.
    pub arg: *mut c_void,
}

/// Parameter block for `advertise`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AdvertiseParams {
    /// Topic byte string.
    pub topic: StrView,
    /// Schema tag this publisher will use.
    pub msg_type: MsgType,
}

/// Parameter block for `publish`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PublishParams {
    /// Topic byte string.
    pub topic: StrView,
    /// Schema tag for the new message.
    pub msg_type: MsgType,
    /// Build callback. Must not be null.
    pub build: Option<PublishBuildFn>,
    /// User argument handed back to the build callback.
    pub arg: *mut c_void,
}

// ---------------------------------------------------------------------------
// Vtables
// ---------------------------------------------------------------------------

/// Dispatch table the core exposes to nodes.
///
/// `impl_ptr` of the owning [`CoreRef`] is always the first argument.
#[repr(C)]
pub struct CoreVtbl {
    /// Returns a static string naming the core implementation.
    pub get_type: extern "C" fn(*const c_void) -> StrView,
    /// Maps one of the core's error codes to a static human-readable string.
    pub get_err_msg: extern "C" fn(*const c_void, c_int) -> StrView,
    /// Registers a subscription; writes the handle on success.
    pub subscribe: extern "C" fn(*mut c_void, SubscribeParams, *mut SubscriberRef) -> c_int,
    /// Records an advertisement; writes the handle on success.
    pub advertise: extern "C" fn(*mut c_void, AdvertiseParams, *mut PublisherRef) -> c_int,
    /// Builds and dispatches one message.
    pub publish: extern "C" fn(*mut c_void, PublishParams) -> c_int,
    /// Logs at error level.
    pub log_error: extern "C" fn(*const c_void, StrView),
    /// Logs at warn level.
    pub log_warn: extern "C" fn(*const c_void, StrView),
    /// Logs at info level.
    pub log_info: extern "C" fn(*const c_void, StrView),
    /// Logs at debug level.
    pub log_debug: extern "C" fn(*const c_void, StrView),
    /// Logs at trace level.
    pub log_trace: extern "C" fn(*const c_void, StrView),
    /// Writes the bound kind of a parameter ([`ParamKindCode`] value).
    pub param_type_of: extern "C" fn(*const c_void, StrView, *mut c_int) -> c_int,
    /// Binds or updates an integer parameter.
    pub param_set_int: extern "C" fn(*mut c_void, StrView, i64) -> c_int,
    /// Reads an integer parameter.
    pub param_get_int: extern "C" fn(*const c_void, StrView, *mut i64) -> c_int,
    /// Atomically replaces an integer parameter, writing the prior value.
    pub param_swap_int: extern "C" fn(*mut c_void, StrView, i64, *mut i64) -> c_int,
    /// Binds or updates a boolean parameter.
    pub param_set_bool: extern "C" fn(*mut c_void, StrView, bool) -> c_int,
    /// Reads a boolean parameter.
    pub param_get_bool: extern "C" fn(*const c_void, StrView, *mut bool) -> c_int,
    /// Atomically replaces a boolean parameter, writing the prior value.
    pub param_swap_bool: extern "C" fn(*mut c_void, StrView, bool, *mut bool) -> c_int,
    /// Binds or updates a float parameter.
    pub param_set_float: extern "C" fn(*mut c_void, StrView, f64) -> c_int,
    /// Reads a float parameter.
    pub param_get_float: extern "C" fn(*const c_void, StrView, *mut f64) -> c_int,
    /// Atomically replaces a float parameter, writing the prior value.
    pub param_swap_float: extern "C" fn(*mut c_void, StrView, f64, *mut f64) -> c_int,
    /// Binds or updates a string parameter.
    pub param_set_str: extern "C" fn(*mut c_void, StrView, StrView) -> c_int,
    /// Copies a string parameter into a caller buffer.
    ///
    /// Writes the full length to `len_out` and copies `min(len, cap)` bytes
    /// into `buf`. Call with `cap == 0` to size the buffer first.
    pub param_get_str:
        extern "C" fn(*const c_void, StrView, *mut c_char, Index, *mut Index) -> c_int,
    /// Replaces a string parameter, copying the prior value out as
    /// `param_get_str` does.
    pub param_swap_str:
        extern "C" fn(*mut c_void, StrView, StrView, *mut c_char, Index, *mut Index) -> c_int,
}

/// Dispatch table of a subscription handle.
#[repr(C)]
pub struct SubscriberVtbl {
    /// Returns the subscribed topic.
    pub get_topic: extern "C" fn(*const c_void) -> StrView,
    /// Returns the subscribed schema tag.
    pub get_msg_type: extern "C" fn(*const c_void) -> MsgType,
    /// Removes the subscription and releases the handle.
    pub disconnect: extern "C" fn(*mut c_void) -> c_int,
    /// Maps one of the handle's error codes to a static string.
    pub get_err_msg: extern "C" fn(*const c_void, c_int) -> StrView,
}

/// Dispatch table of an advertisement handle.
#[repr(C)]
pub struct PublisherVtbl {
    /// Returns the advertised topic.
    pub get_topic: extern "C" fn(*const c_void) -> StrView,
    /// Returns the advertised schema tag.
    pub get_msg_type: extern "C" fn(*const c_void) -> MsgType,
    /// Removes the advertisement and releases the handle.
    pub disconnect: extern "C" fn(*mut c_void) -> c_int,
    /// Maps one of the handle's error codes to a static string.
    pub get_err_msg: extern "C" fn(*const c_void, c_int) -> StrView,
}

/// Dispatch table of a message builder.
#[repr(C)]
pub struct MsgBuilderVtbl {
    /// Appends a segment of at least `segment.len` words; overwrites
    /// `segment` with the actual allocation.
    pub alloc_segment: extern "C" fn(*mut c_void, *mut MsgSegment) -> c_int,
    /// Maps one of the builder's error codes to a static string.
    pub get_err_msg: extern "C" fn(*const c_void, c_int) -> StrView,
}

/// Node plugin dispatch table, as resolved from [`NODE_ENTRYPOINT`].
///
/// Every field must be populated; a loader rejects tables with any null
/// entry before the first call. All entries must be non-unwinding.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawNodeVtbl {
    /// Allocates a node instance. May subscribe/advertise during the call.
    pub create: Option<extern "C" fn(CoreRef, StrView, *mut *mut c_void) -> c_int>,
    /// Releases all node-held resources. `run` has returned before this.
    pub destroy: Option<extern "C" fn(CoreRef, *mut c_void) -> c_int>,
    /// Blocks until the node decides to stop or `stop` is called.
    pub run: Option<extern "C" fn(CoreRef, *mut c_void) -> c_int>,
    /// Signals `run` to return. Safe to call from another thread.
    pub stop: Option<extern "C" fn(CoreRef, *mut c_void) -> c_int>,
    /// Maps a node-defined error code to a human-readable string.
    pub err_to_str: Option<extern "C" fn(c_int) -> StrView>,
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable error-code mapping shared by every core entry point.
///
/// Codes are non-negative and never reused; `0` is success.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Arena or table allocation failed.
    OutOfMemory = 1,
    /// Operation attempted after shutdown began.
    ShuttingDown = 2,
    /// Parameter kind disagreement.
    TypeMismatch = 3,
    /// Parameter or subscription unknown.
    NotFound = 4,
    /// Dynamic library open failed.
    PluginLoad = 5,
    /// Plugin entry symbol not found or invalid.
    PluginSymbol = 6,
    /// Everything else.
    Unknown = 7,
}

impl ErrorCode {
    /// Maps a raw code back to its kind. Unmapped codes become [`Unknown`].
    ///
    /// [`Unknown`]: ErrorCode::Unknown
    #[must_use]
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::OutOfMemory,
            2 => Self::ShuttingDown,
            3 => Self::TypeMismatch,
            4 => Self::NotFound,
            5 => Self::PluginLoad,
            6 => Self::PluginSymbol,
            _ => Self::Unknown,
        }
    }

    /// The raw integer code.
    #[must_use]
    pub fn code(self) -> c_int {
        self as c_int
    }

    /// Stable human-readable description.
    #[must_use]
    pub fn what(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::OutOfMemory => "out of memory",
            Self::ShuttingDown => "shutting down",
            Self::TypeMismatch => "parameter type mismatch",
            Self::NotFound => "not found",
            Self::PluginLoad => "plugin library load failed",
            Self::PluginSymbol => "plugin entry symbol missing or invalid",
            Self::Unknown => "unknown error",
        }
    }

    /// `what()` as a borrowed ABI view (static lifetime).
    #[must_use]
    pub fn what_view(self) -> StrView {
        StrView::from_str(self.what())
    }
}

/// Parameter kind discriminants written by `param_type_of`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKindCode {
    /// 64-bit signed integer.
    Int = 0,
    /// Boolean.
    Bool = 1,
    /// 64-bit float.
    Float = 2,
    /// UTF-8 string.
    Str = 3,
}

// ---------------------------------------------------------------------------
// Schema type hashing
// ---------------------------------------------------------------------------

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derives a [`MsgType`] tag from a schema's fully qualified name.
///
/// 64-bit FNV-1a over the raw bytes. The core never interprets the result;
/// matching stays bit-exact on the returned value.
#[must_use]
pub fn schema_type_id(name: &str) -> MsgType {
    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ===========================================================================
// Tests
// ===========================================================================
