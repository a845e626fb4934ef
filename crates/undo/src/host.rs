//! Host trait abstracting the buffer and window state the engine works on.
//!
//! The engine never owns buffer text. Everything it reads or mutates goes
//! through [`UndoHost`], which the editor implements:
//!
//! ```text
//! UndoTree                        UndoHost (editor implements)
//! ┌───────────────────┐           ┌──────────────────────────────┐
//! │ header arena      │           │ line store (get/put lines)   │
//! │ record_change()   │◄─────────►│ cursor / named marks / visual│
//! │ undo() / redo()   │           │ changed + empty flags        │
//! │ navigate()        │           │ extmark delta replay         │
//! │ undofile io       │           │ policy gates, clock          │
//! └───────────────────┘           └──────────────────────────────┘
//! ```
//!
//! # Line store contract
//!
//! Lines are 1-based byte strings. A buffer always holds at least one line;
//! deleting the last remaining line leaves a single empty line and the host
//! reports the buffer as empty through [`UndoHost::buffer_empty`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{ExtmarkDelta, Lnum, Position, ReplayDirection, VisualSelection, NUM_NAMED_MARKS};

/// Why the host refused a text change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyReason {
	/// The buffer is not modifiable.
	NotModifiable,
	/// Changes are not allowed in the sandbox.
	Sandbox,
	/// Text is locked while another operation runs.
	TextLock,
}

impl fmt::Display for PolicyReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PolicyReason::NotModifiable => f.write_str("buffer is not modifiable"),
			PolicyReason::Sandbox => f.write_str("not allowed in sandbox"),
			PolicyReason::TextLock => f.write_str("text is locked"),
		}
	}
}

/// Operations the engine needs from the editor.
///
/// Methods with defaults are conveniences for hosts (and tests) that do not
/// track the corresponding state; a full editor overrides all of them.
pub trait UndoHost {
	// Line store.

	/// Returns a copy of line `lnum` (1-based).
	fn line(&self, lnum: Lnum) -> Vec<u8>;

	/// Number of lines in the buffer, always at least 1.
	fn line_count(&self) -> Lnum;

	/// Inserts `line` after line `after`; `after == 0` inserts before line 1.
	fn append_line(&mut self, after: Lnum, line: &[u8]);

	/// Replaces the text of line `lnum`.
	fn replace_line(&mut self, lnum: Lnum, line: &[u8]);

	/// Deletes line `lnum`. Deleting the only line empties the buffer
	/// instead, leaving one empty line.
	fn delete_line(&mut self, lnum: Lnum);

	/// Whether the buffer is the empty shell (one synthetic empty line).
	fn buffer_empty(&self) -> bool;

	/// Sets the empty-shell state after replay recreated it.
	fn set_buffer_empty(&mut self, empty: bool);

	/// Tells the host that lines `[top+1, top+old_count]` were replaced by
	/// `new_count` lines, so it can shift its own marks and report the
	/// changed region.
	fn adjust_marks_for_splice(&mut self, top: Lnum, old_count: Lnum, new_count: Lnum);

	// Buffer flags.

	/// Whether the buffer is currently marked modified.
	fn is_changed(&self) -> bool;

	/// Marks the buffer modified or unmodified.
	fn set_changed(&mut self, changed: bool);

	// Cursor and window.

	/// Current cursor position.
	fn cursor(&self) -> Position;

	/// Moves the cursor.
	fn set_cursor(&mut self, pos: Position);

	/// Whether virtual editing is active for the window.
	fn virtual_active(&self) -> bool {
		false
	}

	/// Current virtual column of the cursor.
	fn virtual_col(&self) -> i64 {
		0
	}

	/// Moves the cursor to the given virtual column on its current line.
	fn advance_virtual_col(&mut self, _vcol: i64) {}

	/// Moves the cursor to the first non-blank of its current line.
	fn cursor_to_line_start(&mut self);

	/// Clamps the cursor onto an existing line and column.
	fn clamp_cursor(&mut self);

	// Named marks and visual selection.

	/// Snapshot of the named-mark slots.
	fn named_marks(&self) -> [Position; NUM_NAMED_MARKS];

	/// Restores one named-mark slot.
	fn set_named_mark(&mut self, index: usize, pos: Position);

	/// Snapshot of the visual selection.
	fn visual_selection(&self) -> VisualSelection;

	/// Restores the visual selection.
	fn set_visual_selection(&mut self, visual: VisualSelection);

	// Extmarks.

	/// Replays one extmark delta in the given direction.
	fn apply_extmark_delta(&mut self, delta: &ExtmarkDelta, direction: ReplayDirection);

	// Policy and environment.

	/// Whether text changes are currently allowed.
	fn change_allowed(&self) -> std::result::Result<(), PolicyReason>;

	/// Effective history depth for this buffer. `0` keeps one step, a
	/// negative value disables undo recording entirely.
	fn undo_levels(&self) -> i64;

	/// Called before the first change and before each replay step. The host
	/// may warn about read-only files here and may reload the buffer.
	fn change_warning(&mut self) {}

	/// Cooperative cancellation flag, polled between line copies.
	fn interrupted(&self) -> bool {
		false
	}

	/// Wall-clock seconds since the epoch.
	fn now(&self) -> i64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs() as i64)
			.unwrap_or(0)
	}

	// Event gating.

	/// Suspends host event dispatch while a replay step mutates the buffer.
	fn suspend_events(&mut self) {}

	/// Resumes host event dispatch after a replay step.
	fn resume_events(&mut self) {}

	/// A step recorded for a buffer reload was replayed; the host should
	/// drop derived buffer state.
	fn notify_reload(&mut self) {}
}
