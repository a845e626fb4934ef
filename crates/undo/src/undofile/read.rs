//! Deserializing an undofile back into a tree.
//!
//! Headers are read into a table first, with links as sequence numbers.
//! Once the whole file parsed cleanly the numbers are swizzled into arena
//! ids and the loaded tree replaces the in-memory one atomically; any
//! failure leaves the existing tree untouched.

use std::collections::HashMap;
use std::io::Read;

use tracing::{trace, warn};

use crate::error::{Result, UndoError};
use crate::host::UndoHost;
use crate::tree::{Entry, Header, NodeId, UndoTree};
use crate::types::{
	ExtmarkDelta, ExtmarkMove, ExtmarkSplice, HeaderFlags, Position, VisualSelection,
};
use crate::undofile::codec::ByteReader;
use crate::undofile::write::buffer_hash;
use crate::undofile::{
	ENTRY_END_MAGIC, ENTRY_MAGIC, EXTMARK_TAG_MOVE, EXTMARK_TAG_SPLICE, FILE_VERSION,
	HEADER_END_MAGIC, HEADER_MAGIC, START_MAGIC, TAG_SAVE_NR, UNDO_HASH_SIZE,
};

/// A header as read from disk: links are still sequence numbers.
struct ReadHeader {
	header: Header,
	next_seq: i64,
	prev_seq: i64,
	alt_next_seq: i64,
	alt_prev_seq: i64,
}

impl UndoTree {
	/// Reads an undofile from `input` and installs it, verifying that the
	/// stored hash and line count still match the buffer.
	pub fn read_undofile<R: Read + ?Sized>(
		&mut self,
		host: &impl UndoHost,
		input: &mut R,
		path: &str,
	) -> Result<()> {
		let mut r = ByteReader::new(input, path);

		let mut magic = [0u8; START_MAGIC.len()];
		if r.exact(&mut magic).is_err() || magic != *START_MAGIC {
			return Err(UndoError::NotAnUndofile {
				path: path.to_owned(),
			});
		}
		if r.u16()? != FILE_VERSION {
			return Err(UndoError::IncompatibleVersion {
				path: path.to_owned(),
			});
		}

		let mut stored_hash = [0u8; UNDO_HASH_SIZE];
		r.exact(&mut stored_hash)?;
		let stored_line_count = r.u32()?;
		if stored_hash != buffer_hash(host) || stored_line_count != host.line_count() {
			warn!(path, "file contents changed, cannot use undo info");
			return Err(UndoError::ContentMismatch);
		}

		// The single-line slot.
		let slot_len = r.u32()?;
		if slot_len < 0 {
			return Err(r.corrupt("line length"));
		}
		let slot_text = if slot_len > 0 {
			Some(r.string(slot_len as usize)?)
		} else {
			None
		};
		let slot_lnum = r.u32()?;
		let slot_col = r.u32()?;
		if slot_lnum < 0 || slot_col < 0 {
			return Err(r.corrupt("line lnum/col"));
		}

		let oldhead_seq = r.u32()?;
		let newhead_seq = r.u32()?;
		let curhead_seq = r.u32()?;
		let num_heads = r.u32()?;
		let seq_last = r.u32()?;
		let seq_cur = r.u32()?;
		let time_cur = r.i64()?;

		let mut save_nr_last: i64 = 0;
		loop {
			let len = r.u8()?;
			if len == 0 {
				break;
			}
			let tag = r.u8()?;
			match tag {
				TAG_SAVE_NR => {
					save_nr_last = r.u32()?;
				}
				_ => {
					// Unknown field, skip its payload.
					for _ in 0..len {
						r.u8()?;
					}
				}
			}
		}

		let mut table: Vec<ReadHeader> = Vec::new();
		loop {
			let magic = r.u16()?;
			if magic != HEADER_MAGIC {
				if table.len() as i64 != num_heads {
					return Err(r.corrupt("num_head"));
				}
				if magic != HEADER_END_MAGIC {
					return Err(r.corrupt("end marker"));
				}
				break;
			}
			if table.len() as i64 >= num_heads {
				return Err(r.corrupt("num_head too small"));
			}
			table.push(read_header(&mut r)?);
		}

		// Swizzle sequence numbers into arena ids.
		let mut by_seq: HashMap<i64, usize> = HashMap::with_capacity(table.len());
		for (index, read) in table.iter().enumerate() {
			if by_seq.insert(read.header.seq, index).is_some() {
				return Err(r.corrupt("duplicate uh_seq"));
			}
		}

		// Everything parsed; replace the existing tree.
		self.clear();
		let mut ids: Vec<NodeId> = Vec::with_capacity(table.len());
		for read in &table {
			ids.push(self.alloc(Header::new(read.header.seq, 0)));
		}
		let resolve = |seq: i64| -> Option<NodeId> { by_seq.get(&seq).map(|&index| ids[index]) };
		for (index, read) in table.into_iter().enumerate() {
			let next = resolve(read.next_seq);
			let prev = resolve(read.prev_seq);
			let alt_next = resolve(read.alt_next_seq);
			let alt_prev = resolve(read.alt_prev_seq);
			let h = self.header_mut(ids[index]);
			*h = read.header;
			h.next = next;
			h.prev = prev;
			h.alt_next = alt_next;
			h.alt_prev = alt_prev;
		}

		self.oldhead = (oldhead_seq > 0).then(|| resolve(oldhead_seq)).flatten();
		self.newhead = (newhead_seq > 0).then(|| resolve(newhead_seq)).flatten();
		self.curhead = (curhead_seq > 0).then(|| resolve(curhead_seq)).flatten();
		self.num_heads = ids.len();
		self.seq_last = seq_last;
		self.seq_cur = seq_cur;
		self.time_cur = time_cur;
		self.save_nr_last = save_nr_last;
		self.save_nr_cur = save_nr_last;
		self.line_slot.text = slot_text;
		self.line_slot.lnum = slot_lnum;
		self.line_slot.col = slot_col;
		self.synced = true;

		trace!(path, headers = self.num_heads, "read undofile");
		Ok(())
	}
}

fn read_header<R: Read + ?Sized>(r: &mut ByteReader<'_, R>) -> Result<ReadHeader> {
	let next_seq = r.u32()?;
	let prev_seq = r.u32()?;
	let alt_next_seq = r.u32()?;
	let alt_prev_seq = r.u32()?;
	let seq = r.u32()?;
	if seq <= 0 {
		return Err(r.corrupt("uh_seq"));
	}

	let mut header = Header::new(seq, 0);
	header.cursor = read_pos(r)?;
	header.cursor_vcol = r.u32()?;
	header.flags = HeaderFlags::from_bits_truncate(r.u16()?);
	for mark in header.named_marks.iter_mut() {
		*mark = read_pos(r)?;
	}
	header.visual = read_visual(r)?;
	header.time = r.i64()?;

	loop {
		let len = r.u8()?;
		if len == 0 {
			break;
		}
		let tag = r.u8()?;
		match tag {
			TAG_SAVE_NR => {
				header.save_nr = r.u32()?;
			}
			_ => {
				for _ in 0..len {
					r.u8()?;
				}
			}
		}
	}

	loop {
		let magic = r.u16()?;
		if magic != ENTRY_MAGIC {
			if magic != ENTRY_END_MAGIC {
				return Err(r.corrupt("entry end"));
			}
			break;
		}
		header.entries.push(read_entry(r)?);
	}

	loop {
		let magic = r.u16()?;
		if magic != ENTRY_MAGIC {
			if magic != ENTRY_END_MAGIC {
				return Err(r.corrupt("entry end"));
			}
			break;
		}
		header.extmarks.push(read_extmark(r)?);
	}

	Ok(ReadHeader {
		header,
		next_seq,
		prev_seq,
		alt_next_seq,
		alt_prev_seq,
	})
}

fn read_entry<R: Read + ?Sized>(r: &mut ByteReader<'_, R>) -> Result<Entry> {
	let top = r.u32()?;
	let bot = r.u32()?;
	let lcount = r.u32()?;
	let size = r.u32()?;
	if size < 0 {
		return Err(r.corrupt("line length"));
	}
	let mut lines = Vec::with_capacity(size.min(1 << 16) as usize);
	for _ in 0..size {
		let len = r.u32()?;
		if len < 0 {
			return Err(r.corrupt("line length"));
		}
		lines.push(r.string(len as usize)?);
	}
	Ok(Entry {
		top,
		bot,
		lcount,
		lines,
	})
}

fn read_extmark<R: Read + ?Sized>(r: &mut ByteReader<'_, R>) -> Result<ExtmarkDelta> {
	let tag = r.u32()?;
	match tag {
		EXTMARK_TAG_SPLICE => Ok(ExtmarkDelta::Splice(ExtmarkSplice {
			start_row: r.u32()?,
			start_col: r.u32()?,
			old_row: r.u32()?,
			old_col: r.u32()?,
			old_byte: r.i64()?,
			new_row: r.u32()?,
			new_col: r.u32()?,
			new_byte: r.i64()?,
		})),
		EXTMARK_TAG_MOVE => Ok(ExtmarkDelta::Move(ExtmarkMove {
			start_row: r.u32()?,
			start_col: r.u32()?,
			start_byte: r.i64()?,
			extent_row: r.u32()?,
			extent_col: r.u32()?,
			extent_byte: r.i64()?,
			new_row: r.u32()?,
			new_col: r.u32()?,
			new_byte: r.i64()?,
		})),
		_ => Err(r.corrupt("extmark entry")),
	}
}

fn read_pos<R: Read + ?Sized>(r: &mut ByteReader<'_, R>) -> Result<Position> {
	// Negative stored values are clamped rather than rejected.
	Ok(Position {
		lnum: r.u32()?.max(0),
		col: r.u32()?.max(0),
		coladd: r.u32()?.max(0),
	})
}

fn read_visual<R: Read + ?Sized>(r: &mut ByteReader<'_, R>) -> Result<VisualSelection> {
	Ok(VisualSelection {
		start: read_pos(r)?,
		end: read_pos(r)?,
		mode: r.u32()?,
		curswant: r.u32()?,
	})
}
