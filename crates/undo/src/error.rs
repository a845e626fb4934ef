//! Error types for the undo engine.

use thiserror::Error;

use crate::host::PolicyReason;

/// Errors surfaced by undo operations.
#[derive(Debug, Error)]
pub enum UndoError {
	/// The host refused the change (read-only buffer, sandbox, text lock).
	#[error("change not allowed: {0}")]
	PolicyDenied(PolicyReason),

	/// A saved range no longer fits the buffer; replay was aborted and the
	/// buffer marked changed.
	#[error("undo: line numbers wrong")]
	RangeInvalid,

	/// The buffer shrank underneath a pending change capture.
	#[error("line count changed unexpectedly")]
	LineCountChanged,

	/// Joining onto the previous change is not possible after an undo.
	#[error("undojoin is not allowed after undo")]
	JoinAfterUndo,

	/// An absolute navigation target does not exist in the tree.
	#[error("undo number {0} not found")]
	SeqNotFound(i64),

	/// A long-running copy was cancelled by the host's interrupt flag.
	#[error("interrupted")]
	Interrupted,

	/// The undofile does not start with the undofile magic.
	#[error("not an undo file: {path}")]
	NotAnUndofile {
		/// File the magic check failed for.
		path: String,
	},

	/// The undofile was written by an incompatible format version.
	#[error("incompatible undo file: {path}")]
	IncompatibleVersion {
		/// File the version check failed for.
		path: String,
	},

	/// The buffer text no longer matches the hash stored in the undofile.
	#[error("file contents changed, cannot use undo info")]
	ContentMismatch,

	/// Structurally invalid undofile data.
	#[error("corrupted undo file ({reason}): {path}")]
	Corrupt {
		/// Short identifier of the corruption kind.
		reason: &'static str,
		/// File in which the error occurred.
		path: String,
	},

	/// An I/O failure while reading or writing an undofile.
	#[error("undo file I/O error on {path}: {source}")]
	Io {
		/// File the operation was working on.
		path: String,
		#[source]
		source: std::io::Error,
	},

	/// Inconsistent in-memory undo structures.
	#[error("internal undo error: {0}")]
	Internal(&'static str),
}

/// Result type for undo operations.
pub type Result<T> = std::result::Result<T, UndoError>;
