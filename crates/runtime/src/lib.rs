//! Shared, collector-managed containers for embedded interpreters.
//!
//! Interpreters with isolated heaps exchange values through shared tables
//! whose lifetime is governed by the out-of-band collector in `tether-gc`.
//! This crate provides the three coupled pieces on top of it:
//!
//! - [`value::StoredValue`]: the tagged value record every shareable value
//!   is deep-copied into, itself a managed object;
//! - [`table`]: the thread-safe associative container of value records;
//! - [`marshal`]: the deep copy between a host interpreter's stack and the
//!   record graph, cycle-aware in both directions of ownership.
//!
//! The host interpreter is reached only through the [`host::ScriptHost`]
//! seam; [`api`] implements the operations a binding layer exposes to
//! scripts, including the container's metatable dispatch.

/// Host-facing operations and metatable dispatch.
pub mod api;
/// Error types for marshaling and container operations.
pub mod error;
/// RAII external references held by interpreter handles.
pub mod handle;
/// The seam between tether and an embedding interpreter.
pub mod host;
/// Deep copies between interpreter values and stored records.
pub mod marshal;
/// Collector payload and the process-wide default collector.
pub mod runtime;
/// Shared associative containers.
pub mod table;
/// Stored value records and their total order.
pub mod value;

/// Miniature stack interpreter for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::{Error, HostError, Result};
pub use handle::SharedHandle;
pub use host::{ScriptHost, SlotKind};
pub use runtime::{Gc, Object, global};
pub use tether_gc::{Collector, Heap, ObjRef};
pub use value::{ScriptFn, StoredValue, Upvalue};
