//! # Fanout Core
//!
//! An in-process publish/subscribe message bus for plugin-loaded nodes.
//!
//! This crate provides:
//! - **Dispatch core**: `(topic, type)`-keyed routing with a sharded
//!   subscription table and a work-stealing delivery pool
//! - **Message buffers**: zero-copy segmented messages, cache-line-aligned,
//!   shared by reference across the fan-out
//! - **Plugin loading**: shared-library nodes bound through C vtables, with
//!   library lifetime pinned to every object it produced
//! - **Parameters**: a core-scoped typed key/value store with sticky kinds
//!
//! ## Design Principles
//!
//! 1. **Publish never waits for delivery** - callbacks run on the pool
//! 2. **The same bytes for every reader** - one frozen buffer per publish
//! 3. **Failures stay local** - a subscriber error or panic is logged and
//!    isolated from the publisher and its peers
//! 4. **No process-global state** - everything hangs off a [`Core`] instance
//!
//! ## Example
//!
//! ```rust,ignore
//! use fanout_core::{Core, CoreConfig, SubscriptionKey};
//!
//! let core = Core::new(CoreConfig::default())?;
//! let key = SubscriptionKey::new("telemetry", fanout_abi::schema_type_id("demo.Reading"));
//!
//! let _sub = core.subscribe(key.clone(), |_core, view| {
//!     println!("{} segments", view.num_segments());
//!     0
//! })?;
//!
//! core.publish_with(&key, |msg| {
//!     msg.allocate_segment(16)?[0] = 42;
//!     Ok(())
//! })?;
//!
//! core.shutdown();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Raw pointers cross the plugin ABI throughout; unsafe is confined to the
// boundary modules and the arena.
#![allow(unsafe_code)]
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

pub mod arena;
pub mod core;
pub mod ffi;
pub mod message;
pub mod node;
pub mod params;
pub mod plugin;
pub mod pool;
pub mod table;

pub use crate::core::{Core, CoreConfig, PublisherHandle, SubscriberHandle, HOST_NODE};
pub use crate::message::{FrozenMessage, MessageBuffer, MessageView};
pub use crate::node::{NodeError, NodeHandle, NodeId};
pub use crate::params::{ParamKind, ParamValue, ParameterStore};
pub use crate::plugin::{PluginHandle, PluginLoader};
pub use crate::table::SubscriptionKey;

use fanout_abi::ErrorCode;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for core operations.
///
/// Every variant maps onto the stable code taxonomy in
/// [`fanout_abi::ErrorCode`] via [`code`](Error::code); variants carrying
/// context the taxonomy cannot express map to
/// [`Unknown`](ErrorCode::Unknown).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Arena or table allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Operation attempted after `shutdown` began.
    #[error("shutting down")]
    ShuttingDown,

    /// Parameter kind disagreement.
    #[error("parameter type mismatch")]
    TypeMismatch,

    /// Parameter or subscription unknown.
    #[error("not found")]
    NotFound,

    /// Dynamic library open failed.
    #[error("plugin library load failed: {0}")]
    PluginLoad(String),

    /// Plugin entry symbol missing, null, or incomplete.
    #[error("plugin entry invalid: {0}")]
    PluginSymbol(String),

    /// A node reported an error across the ABI.
    #[error("node error: {0}")]
    Node(#[from] node::NodeError),

    /// A node is already attached under this name.
    #[error("node '{0}' already attached")]
    NodeExists(String),

    /// A publish build callback returned this non-zero code.
    #[error("build callback failed with code {0}")]
    BuildCallback(i32),

    /// Everything else.
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// The stable ABI code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfMemory => ErrorCode::OutOfMemory,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::TypeMismatch => ErrorCode::TypeMismatch,
            Self::NotFound => ErrorCode::NotFound,
            Self::PluginLoad(_) => ErrorCode::PluginLoad,
            Self::PluginSymbol(_) => ErrorCode::PluginSymbol,
            Self::Node(_) | Self::NodeExists(_) | Self::BuildCallback(_) | Self::Unknown => {
                ErrorCode::Unknown
            }
        }
    }

    /// The stable human-readable string for this error's code.
    #[must_use]
    pub fn what(&self) -> &'static str {
        self.code().what()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::OutOfMemory.code().code(), 1);
        assert_eq!(Error::ShuttingDown.code().code(), 2);
        assert_eq!(Error::TypeMismatch.code().code(), 3);
        assert_eq!(Error::NotFound.code().code(), 4);
        assert_eq!(Error::PluginLoad(String::new()).code().code(), 5);
        assert_eq!(Error::PluginSymbol(String::new()).code().code(), 6);
        assert_eq!(Error::Unknown.code().code(), 7);
    }

    #[test]
    fn test_error_what_matches_code() {
        assert_eq!(Error::ShuttingDown.what(), "shutting down");
        assert_eq!(Error::NotFound.what(), "not found");
    }
}
