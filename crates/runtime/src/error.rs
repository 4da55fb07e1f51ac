//! Error types for marshaling and container operations.

use thiserror::Error;

/// Errors surfaced to the host binding layer.
///
/// Misuse of object references themselves (unbalanced release, use of a
/// stale handle) is a programmer bug and asserts instead of erroring.
#[derive(Debug, Error)]
pub enum Error {
	/// A host value kind with no shared representation (foreign userdata,
	/// coroutines, and the like).
	#[error("cannot share {0} values")]
	Unshareable(&'static str),

	/// An argument was not of the kind the operation requires.
	#[error("{0} expected")]
	Expected(&'static str),

	/// Metatable `__index` chains are followed to a bounded depth.
	#[error("'__index' chain too long")]
	IndexChainTooLong,

	/// Failure reported by the embedding interpreter.
	#[error(transparent)]
	Host(#[from] HostError),
}

/// Message carried out of a host callback (code dump, load, call).
#[derive(Debug, Error)]
#[error("host error: {0}")]
pub struct HostError(pub String);

/// Result type for shared-container and marshaling operations.
pub type Result<T> = std::result::Result<T, Error>;
