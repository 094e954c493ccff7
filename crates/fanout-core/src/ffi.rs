//! `extern "C"` entry points backing the core's vtables.
//!
//! Every entry translates between the Rust surface and the C contract in
//! `fanout-abi`: opaque `impl` pointers are cast back to their Rust types,
//! results become non-negative error codes, and no unwind ever crosses the
//! boundary — each entry runs under `catch_unwind` and maps a panic to
//! [`ErrorCode::Unknown`].
//!
//! One asymmetry, inherited from the publish contract: a non-zero code
//! returned by a plugin's *build* callback is negated before it is handed
//! back through `publish`, so plugin-origin build failures can never be
//! confused with the core's own (non-negative) codes.

use std::panic::{catch_unwind, AssertUnwindSafe};

use libc::{c_char, c_int, c_void};

use fanout_abi::{
    AdvertiseParams, CoreVtbl, ErrorCode, Index, MsgBuilderRef, MsgBuilderVtbl, MsgSegment,
    MsgType, ParamKindCode, PublishParams, PublisherRef, PublisherVtbl, StrView, SubscribeParams,
    SubscriberRef, SubscriberVtbl,
};

use crate::core::{Core, PublisherHandle, SubscriberHandle};
use crate::message::MessageBuffer;
use crate::params::ParamKind;
use crate::table::SubscriptionKey;
use crate::Error;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("panic caught at the plugin ABI boundary");
            fallback
        }
    }
}

unsafe fn core_from<'a>(impl_ptr: *const c_void) -> &'a Core {
    debug_assert!(!impl_ptr.is_null());
    &*impl_ptr.cast::<Core>()
}

fn err_code(e: &Error) -> c_int {
    e.code().code()
}

fn kind_code(kind: ParamKind) -> c_int {
    let code = match kind {
        ParamKind::Int => ParamKindCode::Int,
        ParamKind::Bool => ParamKindCode::Bool,
        ParamKind::Float => ParamKindCode::Float,
        ParamKind::Str => ParamKindCode::Str,
    };
    code as c_int
}

/// Copies `value` out through the `(buf, cap, len_out)` triple used by the
/// string parameter entries. Always writes the full length; copies at most
/// `cap` bytes.
unsafe fn copy_str_out(value: &str, buf: *mut c_char, cap: Index, len_out: *mut Index) {
    if !len_out.is_null() {
        *len_out = value.len() as Index;
    }
    if !buf.is_null() && cap > 0 {
        let n = value.len().min(cap as usize);
        std::ptr::copy_nonoverlapping(value.as_ptr(), buf.cast::<u8>(), n);
    }
}

// ---------------------------------------------------------------------------
// Core vtable
// ---------------------------------------------------------------------------

/// The core's dispatch table, shared by every [`Core`] instance.
pub(crate) fn core_vtbl() -> *const CoreVtbl {
    static VTBL: CoreVtbl = CoreVtbl {
        get_type: get_type_entry,
        get_err_msg: get_err_msg_entry,
        subscribe: subscribe_entry,
        advertise: advertise_entry,
        publish: publish_entry,
        log_error: log_error_entry,
        log_warn: log_warn_entry,
        log_info: log_info_entry,
        log_debug: log_debug_entry,
        log_trace: log_trace_entry,
        param_type_of: param_type_of_entry,
        param_set_int: param_set_int_entry,
        param_get_int: param_get_int_entry,
        param_swap_int: param_swap_int_entry,
        param_set_bool: param_set_bool_entry,
        param_get_bool: param_get_bool_entry,
        param_swap_bool: param_swap_bool_entry,
        param_set_float: param_set_float_entry,
        param_get_float: param_get_float_entry,
        param_swap_float: param_swap_float_entry,
        param_set_str: param_set_str_entry,
        param_get_str: param_get_str_entry,
        param_swap_str: param_swap_str_entry,
    };

    &VTBL
}

extern "C" fn get_type_entry(impl_ptr: *const c_void) -> StrView {
    guard(StrView::empty(), || {
        // SAFETY: impl_ptr is the Core behind the CoreRef this vtable ships in.
        let core = unsafe { core_from(impl_ptr) };
        StrView::from_str(core.get_type())
    })
}

extern "C" fn get_err_msg_entry(_impl_ptr: *const c_void, code: c_int) -> StrView {
    // Negated codes are plugin build-callback failures reflected back.
    ErrorCode::from_code(code.abs()).what_view()
}

extern "C" fn subscribe_entry(
    impl_ptr: *mut c_void,
    params: SubscribeParams,
    out: *mut SubscriberRef,
) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if out.is_null() {
            return ErrorCode::Unknown.code();
        }
        let Some(callback) = params.callback else {
            return ErrorCode::Unknown.code();
        };
        // SAFETY: topic is valid for the duration of this call per the ABI
        // contract; the key copies it.
        let Some(topic) = (unsafe { params.topic.as_str() }) else {
            return ErrorCode::Unknown.code();
        };

        // SAFETY: impl_ptr is the Core behind the CoreRef.
        let core = unsafe { core_from(impl_ptr) };
        let key = SubscriptionKey::new(topic, params.msg_type);

        match core.subscribe_raw(key, callback, params.arg) {
            Ok(handle) => {
                // SAFETY: out checked non-null above.
                unsafe {
                    *out = SubscriberRef {
                        impl_ptr: Box::into_raw(Box::new(handle)).cast::<c_void>(),
                        vptr: subscriber_vtbl(),
                    };
                }
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

extern "C" fn advertise_entry(
    impl_ptr: *mut c_void,
    params: AdvertiseParams,
    out: *mut PublisherRef,
) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if out.is_null() {
            return ErrorCode::Unknown.code();
        }
        // SAFETY: as in subscribe_entry.
        let Some(topic) = (unsafe { params.topic.as_str() }) else {
            return ErrorCode::Unknown.code();
        };

        // SAFETY: impl_ptr is the Core behind the CoreRef.
        let core = unsafe { core_from(impl_ptr) };

        match core.advertise(SubscriptionKey::new(topic, params.msg_type)) {
            Ok(handle) => {
                // SAFETY: out checked non-null above.
                unsafe {
                    *out = PublisherRef {
                        impl_ptr: Box::into_raw(Box::new(handle)).cast::<c_void>(),
                        vptr: publisher_vtbl(),
                    };
                }
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

extern "C" fn publish_entry(impl_ptr: *mut c_void, params: PublishParams) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        let Some(build) = params.build else {
            return ErrorCode::Unknown.code();
        };
        // SAFETY: as in subscribe_entry.
        let Some(topic) = (unsafe { params.topic.as_str() }) else {
            return ErrorCode::Unknown.code();
        };

        // SAFETY: impl_ptr is the Core behind the CoreRef.
        let core = unsafe { core_from(impl_ptr) };
        let key = SubscriptionKey::new(topic, params.msg_type);

        match core.publish_raw(&key, build, params.arg) {
            Ok(()) => 0,
            Err(Error::BuildCallback(code)) => -code,
            Err(e) => err_code(&e),
        }
    })
}

// --- logging entries ---

macro_rules! log_entry {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(impl_ptr: *const c_void, msg: StrView) {
            guard((), || {
                // SAFETY: impl_ptr is the Core; msg is valid for this call.
                let core = unsafe { core_from(impl_ptr) };
                if let Some(msg) = unsafe { msg.as_str() } {
                    core.$method(msg);
                }
            });
        }
    };
}

log_entry!(log_error_entry, log_error);
log_entry!(log_warn_entry, log_warn);
log_entry!(log_info_entry, log_info);
log_entry!(log_debug_entry, log_debug);
log_entry!(log_trace_entry, log_trace);

// --- parameter entries ---

unsafe fn param_name<'a>(view: StrView) -> Option<&'a str> {
    view.as_str()
}

extern "C" fn param_type_of_entry(
    impl_ptr: *const c_void,
    name: StrView,
    out: *mut c_int,
) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if out.is_null() {
            return ErrorCode::Unknown.code();
        }
        // SAFETY: ABI contract as above.
        let core = unsafe { core_from(impl_ptr) };
        let Some(name) = (unsafe { param_name(name) }) else {
            return ErrorCode::Unknown.code();
        };

        match core.params().kind_of(name) {
            Ok(kind) => {
                // SAFETY: out checked non-null above.
                unsafe { *out = kind_code(kind) };
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

macro_rules! scalar_param_entries {
    ($set:ident, $get:ident, $swap:ident, $ty:ty, $set_m:ident, $get_m:ident, $swap_m:ident) => {
        extern "C" fn $set(impl_ptr: *mut c_void, name: StrView, value: $ty) -> c_int {
            guard(ErrorCode::Unknown.code(), || {
                // SAFETY: ABI contract as above.
                let core = unsafe { core_from(impl_ptr) };
                let Some(name) = (unsafe { param_name(name) }) else {
                    return ErrorCode::Unknown.code();
                };
                match core.params().$set_m(name, value) {
                    Ok(()) => 0,
                    Err(e) => err_code(&e),
                }
            })
        }

        extern "C" fn $get(impl_ptr: *const c_void, name: StrView, out: *mut $ty) -> c_int {
            guard(ErrorCode::Unknown.code(), || {
                if out.is_null() {
                    return ErrorCode::Unknown.code();
                }
                // SAFETY: ABI contract as above.
                let core = unsafe { core_from(impl_ptr) };
                let Some(name) = (unsafe { param_name(name) }) else {
                    return ErrorCode::Unknown.code();
                };
                match core.params().$get_m(name) {
                    Ok(value) => {
                        // SAFETY: out checked non-null above.
                        unsafe { *out = value };
                        0
                    }
                    Err(e) => err_code(&e),
                }
            })
        }

        extern "C" fn $swap(
            impl_ptr: *mut c_void,
            name: StrView,
            value: $ty,
            prior: *mut $ty,
        ) -> c_int {
            guard(ErrorCode::Unknown.code(), || {
                if prior.is_null() {
                    return ErrorCode::Unknown.code();
                }
                // SAFETY: ABI contract as above.
                let core = unsafe { core_from(impl_ptr) };
                let Some(name) = (unsafe { param_name(name) }) else {
                    return ErrorCode::Unknown.code();
                };
                match core.params().$swap_m(name, value) {
                    Ok(old) => {
                        // SAFETY: prior checked non-null above.
                        unsafe { *prior = old };
                        0
                    }
                    Err(e) => err_code(&e),
                }
            })
        }
    };
}

scalar_param_entries!(
    param_set_int_entry,
    param_get_int_entry,
    param_swap_int_entry,
    i64,
    set_int,
    get_int,
    swap_int
);
scalar_param_entries!(
    param_set_bool_entry,
    param_get_bool_entry,
    param_swap_bool_entry,
    bool,
    set_bool,
    get_bool,
    swap_bool
);
scalar_param_entries!(
    param_set_float_entry,
    param_get_float_entry,
    param_swap_float_entry,
    f64,
    set_float,
    get_float,
    swap_float
);

extern "C" fn param_set_str_entry(impl_ptr: *mut c_void, name: StrView, value: StrView) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        // SAFETY: ABI contract as above.
        let core = unsafe { core_from(impl_ptr) };
        let (Some(name), Some(value)) = (unsafe { param_name(name) }, unsafe { value.as_str() })
        else {
            return ErrorCode::Unknown.code();
        };
        match core.params().set_str(name, value) {
            Ok(()) => 0,
            Err(e) => err_code(&e),
        }
    })
}

extern "C" fn param_get_str_entry(
    impl_ptr: *const c_void,
    name: StrView,
    buf: *mut c_char,
    cap: Index,
    len_out: *mut Index,
) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        // SAFETY: ABI contract as above.
        let core = unsafe { core_from(impl_ptr) };
        let Some(name) = (unsafe { param_name(name) }) else {
            return ErrorCode::Unknown.code();
        };
        match core.params().get_str(name) {
            Ok(value) => {
                // SAFETY: buf/cap/len_out per the copy-out contract.
                unsafe { copy_str_out(&value, buf, cap, len_out) };
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

extern "C" fn param_swap_str_entry(
    impl_ptr: *mut c_void,
    name: StrView,
    value: StrView,
    buf: *mut c_char,
    cap: Index,
    len_out: *mut Index,
) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        // SAFETY: ABI contract as above.
        let core = unsafe { core_from(impl_ptr) };
        let (Some(name), Some(value)) = (unsafe { param_name(name) }, unsafe { value.as_str() })
        else {
            return ErrorCode::Unknown.code();
        };
        match core.params().swap_str(name, value) {
            Ok(prior) => {
                // SAFETY: buf/cap/len_out per the copy-out contract.
                unsafe { copy_str_out(&prior, buf, cap, len_out) };
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

// ---------------------------------------------------------------------------
// Subscriber / publisher handle vtables
// ---------------------------------------------------------------------------

fn subscriber_vtbl() -> *const SubscriberVtbl {
    static VTBL: SubscriberVtbl = SubscriberVtbl {
        get_topic: sub_get_topic_entry,
        get_msg_type: sub_get_msg_type_entry,
        disconnect: sub_disconnect_entry,
        get_err_msg: get_err_msg_entry,
    };
    &VTBL
}

extern "C" fn sub_get_topic_entry(impl_ptr: *const c_void) -> StrView {
    guard(StrView::empty(), || {
        // SAFETY: impl_ptr is the boxed SubscriberHandle from subscribe_entry.
        let handle = unsafe { &*impl_ptr.cast::<SubscriberHandle>() };
        StrView::from_str(&handle.key().topic)
    })
}

extern "C" fn sub_get_msg_type_entry(impl_ptr: *const c_void) -> MsgType {
    guard(0, || {
        // SAFETY: as above.
        let handle = unsafe { &*impl_ptr.cast::<SubscriberHandle>() };
        handle.key().msg_type
    })
}

extern "C" fn sub_disconnect_entry(impl_ptr: *mut c_void) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if impl_ptr.is_null() {
            return ErrorCode::Unknown.code();
        }
        // SAFETY: impl_ptr was produced by Box::into_raw in subscribe_entry
        // and this is the only place that reclaims it.
        drop(unsafe { Box::from_raw(impl_ptr.cast::<SubscriberHandle>()) });
        0
    })
}

fn publisher_vtbl() -> *const PublisherVtbl {
    static VTBL: PublisherVtbl = PublisherVtbl {
        get_topic: pub_get_topic_entry,
        get_msg_type: pub_get_msg_type_entry,
        disconnect: pub_disconnect_entry,
        get_err_msg: get_err_msg_entry,
    };
    &VTBL
}

extern "C" fn pub_get_topic_entry(impl_ptr: *const c_void) -> StrView {
    guard(StrView::empty(), || {
        // SAFETY: impl_ptr is the boxed PublisherHandle from advertise_entry.
        let handle = unsafe { &*impl_ptr.cast::<PublisherHandle>() };
        StrView::from_str(&handle.key().topic)
    })
}

extern "C" fn pub_get_msg_type_entry(impl_ptr: *const c_void) -> MsgType {
    guard(0, || {
        // SAFETY: as above.
        let handle = unsafe { &*impl_ptr.cast::<PublisherHandle>() };
        handle.key().msg_type
    })
}

extern "C" fn pub_disconnect_entry(impl_ptr: *mut c_void) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if impl_ptr.is_null() {
            return ErrorCode::Unknown.code();
        }
        // SAFETY: produced by Box::into_raw in advertise_entry; reclaimed once.
        drop(unsafe { Box::from_raw(impl_ptr.cast::<PublisherHandle>()) });
        0
    })
}

// ---------------------------------------------------------------------------
// Message builder vtable
// ---------------------------------------------------------------------------

/// Wraps a buffer for the span of one build callback.
pub(crate) fn builder_ref(buffer: &mut MessageBuffer) -> MsgBuilderRef {
    static VTBL: MsgBuilderVtbl = MsgBuilderVtbl {
        alloc_segment: alloc_segment_entry,
        get_err_msg: get_err_msg_entry,
    };

    MsgBuilderRef {
        impl_ptr: std::ptr::from_mut(buffer).cast::<c_void>(),
        vptr: &VTBL,
    }
}

extern "C" fn alloc_segment_entry(impl_ptr: *mut c_void, segment: *mut MsgSegment) -> c_int {
    guard(ErrorCode::Unknown.code(), || {
        if impl_ptr.is_null() || segment.is_null() {
            return ErrorCode::Unknown.code();
        }

        // SAFETY: impl_ptr is the MessageBuffer behind the MsgBuilderRef,
        // exclusively borrowed for the duration of the build callback.
        let buffer = unsafe { &mut *impl_ptr.cast::<MessageBuffer>() };
        // SAFETY: segment checked non-null; len carries the request.
        let requested = unsafe { (*segment).len }.max(0) as usize;

        match buffer.allocate_segment(requested) {
            Ok(words) => {
                // SAFETY: segment checked non-null above.
                unsafe {
                    (*segment).data = words.as_mut_ptr();
                    (*segment).len = words.len() as Index;
                }
                0
            }
            Err(e) => err_code(&e),
        }
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use fanout_abi::{CoreRef, MsgView};

    use crate::core::CoreConfig;

    const TYPE: MsgType = 0x93c2_0128_30d6_8d3c;

    fn new_core() -> Arc<Core> {
        Core::new(CoreConfig::default()).unwrap()
    }

    unsafe fn vtbl(core: &CoreRef) -> &CoreVtbl {
        &*core.vptr
    }

    // --- Round-trip through the C surface ---

    extern "C" fn counting_callback(_core: CoreRef, msg: MsgView, arg: *mut c_void) -> c_int {
        assert_eq!(msg.msg_type, TYPE);
        assert_eq!(msg.num_segments, 1);
        // SAFETY: the view is valid for the span of this callback.
        let first = unsafe { *msg.segments };
        assert_eq!(unsafe { *first.data }, 0xabcd);

        // SAFETY: arg is the &AtomicUsize registered by the test.
        let hits = unsafe { &*arg.cast::<AtomicUsize>() };
        hits.fetch_add(1, Ordering::SeqCst);
        0
    }

    extern "C" fn one_word_build(_core: CoreRef, builder: MsgBuilderRef, _arg: *mut c_void) -> c_int {
        let mut segment = MsgSegment {
            data: std::ptr::null_mut(),
            len: 4,
        };
        // SAFETY: builder is live for the span of this callback.
        let code = unsafe { ((*builder.vptr).alloc_segment)(builder.impl_ptr, &mut segment) };
        assert_eq!(code, 0);
        assert!(segment.len >= 4);
        // SAFETY: the segment was just allocated for us.
        unsafe { *segment.data = 0xabcd };
        0
    }

    extern "C" fn failing_build(_core: CoreRef, _builder: MsgBuilderRef, _arg: *mut c_void) -> c_int {
        9
    }

    #[test]
    fn test_subscribe_publish_disconnect_via_vtables() {
        let core = new_core();
        let raw = core.as_raw();
        // SAFETY: raw is a live core reference.
        let v = unsafe { vtbl(&raw) };
        let hits = AtomicUsize::new(0);

        let mut sub = SubscriberRef {
            impl_ptr: std::ptr::null_mut(),
            vptr: std::ptr::null(),
        };
        let params = SubscribeParams {
            topic: StrView::from_str("foo"),
            msg_type: TYPE,
            callback: Some(counting_callback),
            arg: std::ptr::from_ref(&hits).cast_mut().cast::<c_void>(),
        };
        assert_eq!((v.subscribe)(raw.impl_ptr, params, &mut sub), 0);
        assert!(!sub.impl_ptr.is_null());

        // SAFETY: sub was just written by subscribe.
        let topic = unsafe { ((*sub.vptr).get_topic)(sub.impl_ptr) };
        assert_eq!(unsafe { topic.as_str() }, Some("foo"));
        assert_eq!(unsafe { ((*sub.vptr).get_msg_type)(sub.impl_ptr) }, TYPE);

        let publish = PublishParams {
            topic: StrView::from_str("foo"),
            msg_type: TYPE,
            build: Some(one_word_build),
            arg: std::ptr::null_mut(),
        };
        assert_eq!((v.publish)(raw.impl_ptr, publish), 0);

        core.wait_idle();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // SAFETY: disconnect consumes the handle exactly once.
        assert_eq!(unsafe { ((*sub.vptr).disconnect)(sub.impl_ptr) }, 0);
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_reports_negated_build_code() {
        let core = new_core();
        let raw = core.as_raw();

        let params = PublishParams {
            topic: StrView::from_str("foo"),
            msg_type: TYPE,
            build: Some(failing_build),
            arg: std::ptr::null_mut(),
        };
        // SAFETY: raw is a live core reference.
        let code = (unsafe { vtbl(&raw) }.publish)(raw.impl_ptr, params);
        assert_eq!(code, -9);
    }

    #[test]
    fn test_get_err_msg_is_stable() {
        let core = new_core();
        let raw = core.as_raw();

        // SAFETY: raw is a live core reference; returned views are static.
        let view = (unsafe { vtbl(&raw) }.get_err_msg)(raw.impl_ptr, 2);
        assert_eq!(unsafe { view.as_str() }, Some("shutting down"));

        let negated = (unsafe { vtbl(&raw) }.get_err_msg)(raw.impl_ptr, -2);
        assert_eq!(unsafe { negated.as_str() }, Some("shutting down"));
    }

    #[test]
    fn test_param_entries_round_trip() {
        let core = new_core();
        let raw = core.as_raw();
        let v = unsafe { vtbl(&raw) };

        let name = StrView::from_str("x");

        assert_eq!((v.param_set_int)(raw.impl_ptr, name, 5), 0);

        let mut out = 0i64;
        assert_eq!((v.param_get_int)(raw.impl_ptr, name, &mut out), 0);
        assert_eq!(out, 5);

        let mut prior = 0i64;
        assert_eq!((v.param_swap_int)(raw.impl_ptr, name, 7, &mut prior), 0);
        assert_eq!(prior, 5);

        // Kind stickiness surfaces the stable mismatch code.
        assert_eq!(
            (v.param_set_bool)(raw.impl_ptr, name, true),
            ErrorCode::TypeMismatch.code()
        );

        let mut kind = -1;
        assert_eq!((v.param_type_of)(raw.impl_ptr, name, &mut kind), 0);
        assert_eq!(kind, ParamKindCode::Int as c_int);

        // Unbound name.
        let missing = StrView::from_str("missing");
        let mut len: Index = 0;
        assert_eq!(
            (v.param_get_str)(raw.impl_ptr, missing, std::ptr::null_mut(), 0, &mut len),
            ErrorCode::NotFound.code()
        );
    }

    #[test]
    fn test_param_str_copy_out() {
        let core = new_core();
        let raw = core.as_raw();
        let v = unsafe { vtbl(&raw) };

        let name = StrView::from_str("greeting");
        assert_eq!(
            (v.param_set_str)(raw.impl_ptr, name, StrView::from_str("hello")),
            0
        );

        // Size query.
        let mut len: Index = 0;
        assert_eq!(
            (v.param_get_str)(raw.impl_ptr, name, std::ptr::null_mut(), 0, &mut len),
            0
        );
        assert_eq!(len, 5);

        // Full copy.
        let mut buf = [0u8; 16];
        assert_eq!(
            (v.param_get_str)(
                raw.impl_ptr,
                name,
                buf.as_mut_ptr().cast::<c_char>(),
                buf.len() as Index,
                &mut len
            ),
            0
        );
        assert_eq!(&buf[..5], b"hello");

        // Swap returns the prior value through the same copy-out shape.
        let mut prior = [0u8; 16];
        assert_eq!(
            (v.param_swap_str)(
                raw.impl_ptr,
                name,
                StrView::from_str("world"),
                prior.as_mut_ptr().cast::<c_char>(),
                prior.len() as Index,
                &mut len
            ),
            0
        );
        assert_eq!(&prior[..5], b"hello");
    }
}
