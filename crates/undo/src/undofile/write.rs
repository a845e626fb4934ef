//! Serializing the tree into the undofile format.

use std::io::Write;

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::Result;
use crate::host::UndoHost;
use crate::tree::{NodeId, UndoTree};
use crate::types::{ExtmarkDelta, Position, VisualSelection};
use crate::undofile::codec::ByteWriter;
use crate::undofile::{
	ENTRY_END_MAGIC, ENTRY_MAGIC, EXTMARK_TAG_MOVE, EXTMARK_TAG_SPLICE, FILE_VERSION,
	HEADER_END_MAGIC, HEADER_MAGIC, START_MAGIC, TAG_SAVE_NR, UNDO_HASH_SIZE,
};

/// SHA-256 over every buffer line followed by a NUL byte; compared on read
/// to detect that the file text changed since the undofile was written.
pub(crate) fn buffer_hash(host: &impl UndoHost) -> [u8; UNDO_HASH_SIZE] {
	let mut hasher = Sha256::new();
	for lnum in 1..=host.line_count() {
		hasher.update(host.line(lnum));
		hasher.update([0u8]);
	}
	hasher.finalize().into()
}

impl UndoTree {
	/// Writes the whole tree to `out` in the undofile format. The open
	/// header is closed first.
	pub fn write_undofile<W: Write + ?Sized>(
		&mut self,
		host: &mut impl UndoHost,
		out: &mut W,
		path: &str,
	) -> Result<()> {
		self.sync(host);

		let hash = buffer_hash(host);
		let mut w = ByteWriter::new(out, path);

		w.bytes(START_MAGIC)?;
		w.u16(FILE_VERSION)?;
		w.bytes(&hash)?;
		w.u32(host.line_count())?;

		// The single-line slot.
		match &self.line_slot.text {
			Some(text) => w.string(text)?,
			None => w.u32(0)?,
		}
		w.u32(self.line_slot.lnum)?;
		w.u32(self.line_slot.col)?;

		// Links are written as sequence numbers and swizzled on read.
		w.u32(self.oldhead.map(|id| self.header(id).seq).unwrap_or(0))?;
		w.u32(self.newhead.map(|id| self.header(id).seq).unwrap_or(0))?;
		w.u32(self.curhead.map(|id| self.header(id).seq).unwrap_or(0))?;
		w.u32(self.num_heads as i64)?;
		w.u32(self.seq_last)?;
		w.u32(self.seq_cur)?;
		w.i64(self.time_cur)?;

		// Optional fields, each (len, tag, payload), closed by a 0 byte.
		w.u8(4)?;
		w.u8(TAG_SAVE_NR)?;
		w.u32(self.save_nr_last)?;
		w.u8(0)?;

		// Emit every reachable header once, walking the DAG the same way
		// the navigator does.
		let mark = self.next_walk_token();
		let mut written = 0usize;
		let mut uhp = self.oldhead;
		while let Some(cur) = uhp {
			if self.header(cur).walk != mark {
				self.header_mut(cur).walk = mark;
				self.write_header(&mut w, cur)?;
				written += 1;
			}

			let h = self.header(cur);
			let (prev, alt_next, next, alt_prev) = (h.prev, h.alt_next, h.next, h.alt_prev);
			if prev.is_some() && self.header_walk(prev) != mark {
				uhp = prev;
			} else if alt_next.is_some() && self.header_walk(alt_next) != mark {
				uhp = alt_next;
			} else if next.is_some() && alt_prev.is_none() && self.header_walk(next) != mark {
				uhp = next;
			} else if alt_prev.is_some() {
				uhp = alt_prev;
			} else {
				uhp = next;
			}
		}

		w.u16(HEADER_END_MAGIC)?;
		w.flush()?;
		trace!(path, headers = written, "wrote undofile");
		debug_assert_eq!(written, self.num_heads);
		Ok(())
	}

	fn header_walk(&self, id: Option<NodeId>) -> u64 {
		id.map(|i| self.header(i).walk).unwrap_or(0)
	}

	fn write_header<W: Write + ?Sized>(&self, w: &mut ByteWriter<'_, W>, id: NodeId) -> Result<()> {
		let h = self.header(id);

		w.u16(HEADER_MAGIC)?;
		w.u32(h.next.map(|n| self.header(n).seq).unwrap_or(0))?;
		w.u32(h.prev.map(|n| self.header(n).seq).unwrap_or(0))?;
		w.u32(h.alt_next.map(|n| self.header(n).seq).unwrap_or(0))?;
		w.u32(h.alt_prev.map(|n| self.header(n).seq).unwrap_or(0))?;
		w.u32(h.seq)?;
		write_pos(w, h.cursor)?;
		w.u32(h.cursor_vcol)?;
		w.u16(h.flags.bits())?;
		for mark in &h.named_marks {
			write_pos(w, *mark)?;
		}
		write_visual(w, &h.visual)?;
		w.i64(h.time)?;

		w.u8(4)?;
		w.u8(TAG_SAVE_NR)?;
		w.u32(h.save_nr)?;
		w.u8(0)?;

		for entry in &h.entries {
			w.u16(ENTRY_MAGIC)?;
			w.u32(entry.top)?;
			w.u32(entry.bot)?;
			w.u32(entry.lcount)?;
			w.u32(entry.size())?;
			for line in &entry.lines {
				w.string(line)?;
			}
		}
		w.u16(ENTRY_END_MAGIC)?;

		for delta in &h.extmarks {
			write_extmark(w, delta)?;
		}
		w.u16(ENTRY_END_MAGIC)?;

		Ok(())
	}
}

fn write_pos<W: Write + ?Sized>(w: &mut ByteWriter<'_, W>, pos: Position) -> Result<()> {
	w.u32(pos.lnum)?;
	w.u32(pos.col)?;
	w.u32(pos.coladd)
}

fn write_visual<W: Write + ?Sized>(
	w: &mut ByteWriter<'_, W>,
	visual: &VisualSelection,
) -> Result<()> {
	write_pos(w, visual.start)?;
	write_pos(w, visual.end)?;
	w.u32(visual.mode)?;
	w.u32(visual.curswant)
}

fn write_extmark<W: Write + ?Sized>(w: &mut ByteWriter<'_, W>, delta: &ExtmarkDelta) -> Result<()> {
	w.u16(ENTRY_MAGIC)?;
	match delta {
		ExtmarkDelta::Splice(s) => {
			w.u32(EXTMARK_TAG_SPLICE)?;
			w.u32(s.start_row)?;
			w.u32(s.start_col)?;
			w.u32(s.old_row)?;
			w.u32(s.old_col)?;
			w.i64(s.old_byte)?;
			w.u32(s.new_row)?;
			w.u32(s.new_col)?;
			w.i64(s.new_byte)?;
		}
		ExtmarkDelta::Move(m) => {
			w.u32(EXTMARK_TAG_MOVE)?;
			w.u32(m.start_row)?;
			w.u32(m.start_col)?;
			w.i64(m.start_byte)?;
			w.u32(m.extent_row)?;
			w.u32(m.extent_col)?;
			w.i64(m.extent_byte)?;
			w.u32(m.new_row)?;
			w.u32(m.new_col)?;
			w.i64(m.new_byte)?;
		}
	}
	Ok(())
}
