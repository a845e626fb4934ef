//! Shared value types for the undo engine.
//!
//! Line numbers are 1-based; a [`Position`] with `lnum == 0` means "unset".
//! All of these types round-trip through the undofile, so their field widths
//! match the on-disk encoding documented in [`crate::undofile`].

use bitflags::bitflags;

/// A 1-based buffer line number. `0` is used as a sentinel in several
/// places ("line above line 1", "unset mark", "past end of buffer").
pub type Lnum = i64;

/// Number of named-mark slots snapshotted per undo step (`'a` through `'z`).
pub const NUM_NAMED_MARKS: usize = 26;

/// A cursor or mark position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
	/// Line number, 1-based. `0` means the position is unset.
	pub lnum: Lnum,
	/// Byte column, 0-based.
	pub col: i64,
	/// Columns beyond the end of the line when virtual editing is active.
	pub coladd: i64,
}

impl Position {
	/// Position at the first column of `lnum`.
	pub fn at_line(lnum: Lnum) -> Self {
		Self {
			lnum,
			col: 0,
			coladd: 0,
		}
	}

	/// Whether the position is set.
	pub fn is_set(&self) -> bool {
		self.lnum != 0
	}
}

/// Snapshot of the visual selection taken when a change step opens.
///
/// `mode` and `curswant` are opaque to the engine; they are restored to the
/// host exactly as captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisualSelection {
	pub start: Position,
	pub end: Position,
	pub mode: i64,
	pub curswant: i64,
}

bitflags! {
	/// Per-step buffer state bits, swapped with the live buffer on replay.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct HeaderFlags: u16 {
		/// The buffer was modified when this step was recorded.
		const CHANGED = 0x01;
		/// The buffer was the empty shell (one synthetic empty line).
		const EMPTYBUF = 0x02;
		/// This step was recorded for a buffer reload.
		const RELOAD = 0x04;
	}
}

/// Direction of a single replay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayDirection {
	/// Toward the root of the tree (older state).
	Undo,
	/// Toward a leaf (newer state).
	Redo,
}

/// An extmark splice delta recorded alongside a change step.
///
/// Rows and columns are encoded as 4 bytes on disk, byte counts as 8 bytes,
/// all big-endian, after a 4-byte tag of `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtmarkSplice {
	pub start_row: i64,
	pub start_col: i64,
	pub old_row: i64,
	pub old_col: i64,
	pub old_byte: i64,
	pub new_row: i64,
	pub new_col: i64,
	pub new_byte: i64,
}

/// An extmark move delta recorded alongside a change step.
///
/// Encoded like [`ExtmarkSplice`] but with a 4-byte tag of `1`; the three
/// `*_byte` fields take 8 bytes each, the rest 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtmarkMove {
	pub start_row: i64,
	pub start_col: i64,
	pub start_byte: i64,
	pub extent_row: i64,
	pub extent_col: i64,
	pub extent_byte: i64,
	pub new_row: i64,
	pub new_col: i64,
	pub new_byte: i64,
}

/// One opaque extmark undo record. The engine stores, persists, and replays
/// these; interpreting them is the host's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtmarkDelta {
	Splice(ExtmarkSplice),
	Move(ExtmarkMove),
}

/// Which end of the history a stepping operation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEnd {
	Oldest,
	Newest,
}

/// Outcome data for an undo, redo, or navigation call.
///
/// The engine reports what happened; turning this into user messages is the
/// host's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepSummary {
	/// Number of change steps actually replayed.
	pub steps: usize,
	/// Total lines inserted into the buffer across the replayed steps.
	pub lines_added: Lnum,
	/// Total lines removed from the buffer across the replayed steps.
	pub lines_removed: Lnum,
	/// Whether the last replayed step went in the undo direction.
	pub did_undo: bool,
	/// Set when stepping ran out of history before completing the count.
	pub end_reached: Option<HistoryEnd>,
	/// Sequence number identifying the resulting buffer state.
	pub seq_after: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn position_sentinel() {
		assert!(!Position::default().is_set());
		assert!(Position::at_line(3).is_set());
	}

	#[test]
	fn flags_are_disjoint() {
		let all = HeaderFlags::CHANGED | HeaderFlags::EMPTYBUF | HeaderFlags::RELOAD;
		assert_eq!(all.bits(), 0x07);
	}
}
