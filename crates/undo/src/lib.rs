//! Branching undo engine for line-oriented text buffers.
//!
//! Every recorded change becomes a node in a DAG, so undoing a few steps
//! and then editing keeps the displaced future reachable as an alternate
//! branch instead of discarding it. Navigation works by step count,
//! wall-clock time, save count, or absolute change number, and the whole
//! tree persists across sessions in a binary undofile.
//!
//! # Architecture
//!
//! ```text
//! editor ──edit──► UndoTree::record_change     capture pre-image
//!        ──u/CTRL-R──► UndoTree::undo / redo   replay one step
//!        ──g-/:earlier──► UndoTree::navigate   walk the whole DAG
//!        ──:wundo/:rundo──► undofile           durable representation
//! ```
//!
//! The engine owns only the history. Buffer text, cursor, marks, and
//! policy all stay with the editor behind the [`UndoHost`] trait, which
//! keeps the engine testable against an in-memory buffer.
//!
//! # Example
//!
//! ```
//! use xeno_undo::{UndoHost, UndoTree};
//! # use xeno_undo::testing::MemoryBuffer;
//!
//! let mut buf = MemoryBuffer::from_lines(&["one", "two"]);
//! let mut tree = UndoTree::new();
//!
//! // Announce the change, then perform it.
//! tree.save_sub(&mut buf, 2).unwrap();
//! buf.replace_line(2, b"TWO");
//! tree.sync(&buf);
//!
//! tree.undo(&mut buf, 1).unwrap();
//! assert_eq!(buf.line(2), b"two");
//! tree.redo(&mut buf, 1).unwrap();
//! assert_eq!(buf.line(2), b"TWO");
//! ```

pub mod error;
pub mod host;
pub mod testing;
pub mod tree;
pub mod types;
pub mod undofile;

pub use error::{Result, UndoError};
pub use host::{PolicyReason, UndoHost};
pub use tree::{LeafInfo, NavigateUnit, UndoTree};
pub use types::{
	ExtmarkDelta, ExtmarkMove, ExtmarkSplice, HeaderFlags, HistoryEnd, Lnum, Position,
	ReplayDirection, StepSummary, VisualSelection, NUM_NAMED_MARKS,
};
