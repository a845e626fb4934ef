//! In-memory [`UndoHost`] for tests and examples.
//!
//! [`MemoryBuffer`] keeps lines, cursor, marks, flags, and a settable clock
//! so time-based behavior is deterministic. Extmark deltas handed back by
//! the engine are logged instead of interpreted.

use crate::host::{PolicyReason, UndoHost};
use crate::tree::UndoTree;
use crate::types::{ExtmarkDelta, Lnum, Position, ReplayDirection, VisualSelection, NUM_NAMED_MARKS};

/// A buffer with just enough editor state to drive the engine.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
	lines: Vec<Vec<u8>>,
	empty: bool,
	changed: bool,
	cursor: Position,
	marks: [Position; NUM_NAMED_MARKS],
	visual: VisualSelection,
	/// Wall clock returned by [`UndoHost::now`].
	pub clock: i64,
	/// Effective history depth.
	pub levels: i64,
	/// Gate for [`UndoHost::change_allowed`].
	pub modifiable: bool,
	/// Cooperative cancellation flag.
	pub interrupt: bool,
	/// Every extmark delta replayed through this host, in order.
	pub extmark_log: Vec<(ExtmarkDelta, ReplayDirection)>,
	/// Every splice reported through mark adjustment: `(top, old, new)`.
	pub splice_log: Vec<(Lnum, Lnum, Lnum)>,
}

impl MemoryBuffer {
	/// A buffer holding the given lines; an empty slice makes the empty
	/// shell.
	pub fn from_lines(lines: &[&str]) -> Self {
		let (lines, empty) = if lines.is_empty() {
			(vec![Vec::new()], true)
		} else {
			(lines.iter().map(|l| l.as_bytes().to_vec()).collect(), false)
		};
		Self {
			lines,
			empty,
			changed: false,
			cursor: Position::at_line(1),
			marks: [Position::default(); NUM_NAMED_MARKS],
			visual: VisualSelection::default(),
			clock: 100_000,
			levels: 1000,
			modifiable: true,
			interrupt: false,
			extmark_log: Vec::new(),
			splice_log: Vec::new(),
		}
	}

	/// The buffer text as strings, for assertions.
	pub fn text(&self) -> Vec<String> {
		self.lines
			.iter()
			.map(|l| String::from_utf8_lossy(l).into_owned())
			.collect()
	}

	/// Records and applies an in-place replacement of line `lnum`.
	pub fn edit_replace(&mut self, tree: &mut UndoTree, lnum: Lnum, text: &str) {
		tree.save_sub(self, lnum).expect("save_sub");
		self.replace_line(lnum, text.as_bytes());
		self.changed = true;
	}

	/// Records and applies an insertion before line `lnum`.
	pub fn edit_insert(&mut self, tree: &mut UndoTree, lnum: Lnum, text: &str) {
		tree.save_ins(self, lnum).expect("save_ins");
		self.lines.insert(lnum as usize - 1, text.as_bytes().to_vec());
		self.empty = false;
		self.changed = true;
	}

	/// Records and applies a deletion of `count` lines starting at `lnum`.
	pub fn edit_delete(&mut self, tree: &mut UndoTree, lnum: Lnum, count: Lnum) {
		tree.save_del(self, lnum, count).expect("save_del");
		for _ in 0..count {
			self.delete_line(lnum);
		}
		self.changed = true;
	}
}

impl UndoHost for MemoryBuffer {
	fn line(&self, lnum: Lnum) -> Vec<u8> {
		self.lines[lnum as usize - 1].clone()
	}

	fn line_count(&self) -> Lnum {
		self.lines.len() as Lnum
	}

	fn append_line(&mut self, after: Lnum, line: &[u8]) {
		self.lines.insert(after as usize, line.to_vec());
		self.empty = false;
	}

	fn replace_line(&mut self, lnum: Lnum, line: &[u8]) {
		self.lines[lnum as usize - 1] = line.to_vec();
		self.empty = false;
	}

	fn delete_line(&mut self, lnum: Lnum) {
		if self.lines.len() == 1 {
			self.lines[0].clear();
			self.empty = true;
		} else {
			self.lines.remove(lnum as usize - 1);
		}
	}

	fn buffer_empty(&self) -> bool {
		self.empty
	}

	fn set_buffer_empty(&mut self, empty: bool) {
		self.empty = empty;
	}

	fn adjust_marks_for_splice(&mut self, top: Lnum, old_count: Lnum, new_count: Lnum) {
		self.splice_log.push((top, old_count, new_count));
	}

	fn is_changed(&self) -> bool {
		self.changed
	}

	fn set_changed(&mut self, changed: bool) {
		self.changed = changed;
	}

	fn cursor(&self) -> Position {
		self.cursor
	}

	fn set_cursor(&mut self, pos: Position) {
		self.cursor = pos;
	}

	fn cursor_to_line_start(&mut self) {
		self.cursor.col = 0;
		self.cursor.coladd = 0;
	}

	fn clamp_cursor(&mut self) {
		self.cursor.lnum = self.cursor.lnum.clamp(1, self.line_count());
		let len = self.lines[self.cursor.lnum as usize - 1].len() as i64;
		self.cursor.col = self.cursor.col.min(len.saturating_sub(1).max(0));
	}

	fn named_marks(&self) -> [Position; NUM_NAMED_MARKS] {
		self.marks
	}

	fn set_named_mark(&mut self, index: usize, pos: Position) {
		self.marks[index] = pos;
	}

	fn visual_selection(&self) -> VisualSelection {
		self.visual
	}

	fn set_visual_selection(&mut self, visual: VisualSelection) {
		self.visual = visual;
	}

	fn apply_extmark_delta(&mut self, delta: &ExtmarkDelta, direction: ReplayDirection) {
		self.extmark_log.push((*delta, direction));
	}

	fn change_allowed(&self) -> Result<(), PolicyReason> {
		if self.modifiable {
			Ok(())
		} else {
			Err(PolicyReason::NotModifiable)
		}
	}

	fn undo_levels(&self) -> i64 {
		self.levels
	}

	fn interrupted(&self) -> bool {
		self.interrupt
	}

	fn now(&self) -> i64 {
		self.clock
	}
}
