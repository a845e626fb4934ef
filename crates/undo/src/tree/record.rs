//! The save path: capturing pre-images before the buffer is mutated.
//!
//! Callers announce a change as a line range before performing it. While the
//! tree is synced the next capture opens a new header; afterwards captures
//! append entries to the open header until [`UndoTree::sync`] closes it.
//! Making a change while positioned below the leaf moves the displaced
//! future onto an alternate branch instead of discarding it.

use tracing::trace;

use crate::error::{Result, UndoError};
use crate::host::UndoHost;
use crate::tree::{Entry, Header, NodeId, UndoTree};
use crate::types::{ExtmarkDelta, HeaderFlags, Lnum};

/// Upper bound on the entries scanned for single-line coalescing.
const COALESCE_SCAN_LIMIT: usize = 10;

impl UndoTree {
	/// Saves the cursor line before it is changed.
	pub fn save_cursor(&mut self, host: &mut impl UndoHost) -> Result<()> {
		let cur = host.cursor().lnum;
		let top = if cur > 0 { cur - 1 } else { 0 };
		self.save_range(host, top, cur + 1)
	}

	/// Saves the lines between `top` and `bot` (both exclusive) before they
	/// are changed. `top` may be 0 and `bot` may be `line_count + 1`.
	///
	/// A single-line range also feeds the line slot for the line-level undo
	/// command.
	pub fn save_range(&mut self, host: &mut impl UndoHost, top: Lnum, bot: Lnum) -> Result<()> {
		if top >= bot || bot > host.line_count() + 1 {
			return Err(UndoError::RangeInvalid);
		}
		if top + 2 == bot {
			self.save_line_for_undo(host, top + 1);
		}
		self.record_change(host, top, bot, 0, false)
	}

	/// Saves line `lnum` before it is replaced in place.
	pub fn save_sub(&mut self, host: &mut impl UndoHost, lnum: Lnum) -> Result<()> {
		self.record_change(host, lnum - 1, lnum + 1, lnum + 1, false)
	}

	/// Records that a new line is inserted before line `lnum`.
	pub fn save_ins(&mut self, host: &mut impl UndoHost, lnum: Lnum) -> Result<()> {
		self.record_change(host, lnum - 1, lnum, lnum + 1, false)
	}

	/// Saves `nlines` lines starting at `lnum` before they are deleted.
	pub fn save_del(&mut self, host: &mut impl UndoHost, lnum: Lnum, nlines: Lnum) -> Result<()> {
		let newbot = if nlines == host.line_count() { 2 } else { lnum };
		self.record_change(host, lnum - 1, lnum + nlines, newbot, false)
	}

	/// Captures the pre-image of `[top+1, bot-1]` before the caller mutates
	/// that range.
	///
	/// `newbot` is the post-change value of `bot` when already known, 0
	/// otherwise. `reload` marks a capture taken for a buffer reload, which
	/// skips the policy gate and tags the header.
	pub fn record_change(
		&mut self,
		host: &mut impl UndoHost,
		top: Lnum,
		bot: Lnum,
		newbot: Lnum,
		reload: bool,
	) -> Result<()> {
		if !reload {
			host.change_allowed().map_err(UndoError::PolicyDenied)?;
			// The warning hook may reload the buffer, so the range has to
			// be re-validated afterwards.
			host.change_warning();
			if bot > host.line_count() + 1 {
				return Err(UndoError::LineCountChanged);
			}
		}
		debug_assert!(self.consistency_error().is_none());

		let size = bot - top - 1;
		let levels = host.undo_levels();

		if self.synced {
			// The branch from the current position down to the root becomes
			// an alternate of the new header.
			let mut old_curhead = self.curhead;
			if let Some(oc) = old_curhead {
				self.newhead = self.header(oc).next;
				self.curhead = None;
			}

			self.trim(levels, &mut old_curhead);

			if levels < 0 {
				// Undo disabled; the displaced branch can never be reached.
				if let Some(oc) = old_curhead {
					self.free_branch(oc, &mut None);
				}
				self.synced = false;
				return Ok(());
			}

			let mut header = Header::new(self.seq_last + 1, host.now());
			header.next = self.newhead;
			header.alt_next = old_curhead;
			header.cursor = host.cursor();
			header.cursor_vcol = if host.virtual_active() && header.cursor.coladd > 0 {
				host.virtual_col()
			} else {
				-1
			};
			if host.is_changed() {
				header.flags |= HeaderFlags::CHANGED;
			}
			if host.buffer_empty() {
				header.flags |= HeaderFlags::EMPTYBUF;
			}
			header.named_marks = host.named_marks();
			header.visual = host.visual_selection();

			self.seq_last += 1;
			self.seq_cur = header.seq;
			self.time_cur = header.time + 1;

			let alt_prev = old_curhead.and_then(|oc| self.header(oc).alt_prev);
			header.alt_prev = alt_prev;
			let new_id = self.alloc(header);
			if let Some(oc) = old_curhead {
				// Splice the new header into the alternate chain in the
				// displaced header's place.
				if let Some(ap) = alt_prev {
					self.header_mut(ap).alt_next = Some(new_id);
				}
				self.header_mut(oc).alt_prev = Some(new_id);
				if self.oldhead == Some(oc) {
					self.oldhead = Some(new_id);
				}
			}
			if let Some(nh) = self.newhead {
				self.header_mut(nh).prev = Some(new_id);
			}
			self.newhead = Some(new_id);
			if self.oldhead.is_none() {
				self.oldhead = Some(new_id);
			}
			self.num_heads += 1;
			trace!(
				seq = self.seq_last,
				alt = old_curhead.map(|oc| self.header(oc).seq),
				"opened undo header"
			);
		} else {
			if levels < 0 {
				return Ok(());
			}

			let Some(nh) = self.newhead else {
				return Err(UndoError::Internal("undo list corrupt"));
			};
			if self.header(nh).entries.is_empty() {
				return Err(UndoError::Internal("undo list corrupt"));
			}

			// Re-saving a line that was saved just before wastes memory when
			// a command rewrites the same line many times. Reuse the earlier
			// entry when no intervening entry shifted the line count or
			// covered this line. Only the last few entries are worth
			// scanning.
			if size == 1 {
				let line_count = host.line_count();
				let deferred = self.header(nh).deferred_bot;
				let scan = self.header(nh).entries.len().min(COALESCE_SCAN_LIMIT);
				let mut idx = 0usize;
				while idx < scan {
					let uep = &self.header(nh).entries[idx];
					let is_deferred = deferred && idx == 0;
					let shifted = if is_deferred {
						uep.lcount != line_count
					} else {
						let resolved_bot = if uep.bot == 0 { line_count + 1 } else { uep.bot };
						uep.top + uep.size() + 1 != resolved_bot
					};
					if shifted
						|| (uep.size() > 1
							&& top >= uep.top && top + 2 <= uep.top + uep.size() + 1)
					{
						break;
					}

					if uep.size() == 1 && uep.top == top {
						if idx > 0 {
							// Close out the pending bot first; later line
							// count changes belong to the reused entry. The
							// entries skipped over neither shift lines nor
							// cover this one, so their order is free.
							self.resolve_deferred_bot(host);
							self.synced = false;
							let entry = self.header_mut(nh).entries.remove(idx);
							self.header_mut(nh).entries.insert(0, entry);
						}

						let header = self.header_mut(nh);
						let entry = &mut header.entries[0];
						if newbot != 0 {
							entry.bot = newbot;
						} else if bot > line_count {
							entry.bot = 0;
						} else {
							entry.lcount = line_count;
							header.deferred_bot = true;
						}
						trace!(seq = header.seq, top, "coalesced single-line save");
						return Ok(());
					}
					idx += 1;
				}
			}

			// Close out the previous capture's deferred bot.
			self.resolve_deferred_bot(host);
		}

		let line_count = host.line_count();
		let mut entry = Entry {
			top,
			bot: 0,
			lcount: 0,
			lines: Vec::new(),
		};
		let mut defer = false;
		if newbot != 0 {
			entry.bot = newbot;
		} else if bot > line_count {
			// Past the end of the buffer; resolve once the true bottom is
			// known.
			entry.bot = 0;
		} else {
			entry.lcount = line_count;
			defer = true;
		}

		if size > 0 {
			entry.lines.reserve(size as usize);
			for lnum in top + 1..=top + size {
				if host.interrupted() {
					return Err(UndoError::Interrupted);
				}
				entry.lines.push(host.line(lnum));
			}
		}

		let Some(nh) = self.newhead else {
			return Err(UndoError::Internal("undo list corrupt"));
		};
		let header = self.header_mut(nh);
		header.entries.insert(0, entry);
		header.deferred_bot = defer;
		if reload {
			header.flags |= HeaderFlags::RELOAD;
		}
		trace!(seq = header.seq, top, bot, size, "captured pre-image");
		self.synced = false;

		debug_assert!(self.consistency_error().is_none());
		Ok(())
	}

	/// Resolves the head entry's deferred `bot` from the line count delta
	/// since the entry was captured, then marks the tree synced.
	pub(crate) fn resolve_deferred_bot(&mut self, host: &impl UndoHost) {
		let Some(nh) = self.newhead else {
			tracing::error!("undo list corrupt");
			return;
		};
		if self.header(nh).entries.is_empty() {
			tracing::error!("undo list corrupt");
			return;
		}

		if self.header(nh).deferred_bot {
			let line_count = host.line_count();
			let header = self.header_mut(nh);
			let entry = &mut header.entries[0];
			let extra = line_count - entry.lcount;
			entry.bot = entry.top + entry.size() + 1 + extra;
			if entry.bot < 1 || entry.bot > line_count {
				tracing::error!("undo line missing");
				// Assume all lines were deleted; replay then restores the
				// old lines without removing current ones.
				entry.bot = entry.top + 1;
			}
			header.deferred_bot = false;
		}

		self.synced = true;
	}

	/// Closes the open header: the next recorded change starts a new one.
	pub fn sync(&mut self, host: &impl UndoHost) {
		if self.synced {
			return;
		}
		if host.undo_levels() < 0 {
			self.synced = true;
		} else {
			self.resolve_deferred_bot(host);
			self.curhead = None;
		}
	}

	/// Keeps the current header open so the next change joins it.
	///
	/// Fails after an undo; silently does nothing when no change was made
	/// yet, the header is already open, or history is disabled.
	pub fn join_next_change(&mut self, host: &impl UndoHost) -> Result<()> {
		if self.newhead.is_none() {
			return Ok(());
		}
		if self.curhead.is_some() {
			return Err(UndoError::JoinAfterUndo);
		}
		if !self.synced || host.undo_levels() < 0 {
			return Ok(());
		}
		self.synced = false;
		Ok(())
	}

	/// Flags every header as "undoing to here modifies the buffer". Called
	/// after the file was written and the buffer marked unchanged.
	pub fn mark_all_changed(&mut self) {
		self.mark_branch_changed(self.oldhead);
	}

	fn mark_branch_changed(&mut self, first: Option<NodeId>) {
		let mut id = first;
		while let Some(cur) = id {
			self.header_mut(cur).flags |= HeaderFlags::CHANGED;
			if let Some(alt) = self.header(cur).alt_next {
				self.mark_branch_changed(Some(alt));
			}
			id = self.header(cur).prev;
		}
	}

	/// Increments the file-write ordinal and stamps it on the header the
	/// current buffer state hangs below.
	pub fn bump_save_nr(&mut self) {
		self.save_nr_last += 1;
		self.save_nr_cur = self.save_nr_last;
		let uhp = match self.curhead {
			Some(c) => self.header(c).next,
			None => self.newhead,
		};
		if let Some(u) = uhp {
			let save_nr = self.save_nr_last;
			self.header_mut(u).save_nr = save_nr;
			trace!(seq = self.header(u).seq, save_nr, "stamped save point");
		}
	}

	/// Returns the header the buffer state hangs below, creating an empty
	/// reload-tagged one when the tree is empty and history is enabled.
	pub fn force_header(&mut self, host: &mut impl UndoHost) -> Option<NodeId> {
		if let Some(c) = self.curhead {
			return Some(c);
		}
		if let Some(n) = self.newhead {
			return Some(n);
		}
		// Replace an empty range by an empty range.
		let _ = self.record_change(host, 0, 1, 1, true);
		self.curhead.or(self.newhead)
	}

	/// Attaches an extmark delta to the current header. Returns false when
	/// history is disabled and no header exists.
	pub fn push_extmark_delta(&mut self, host: &mut impl UndoHost, delta: ExtmarkDelta) -> bool {
		let Some(id) = self.force_header(host) else {
			return false;
		};
		self.header_mut(id).extmarks.push(delta);
		true
	}

	// The single-line slot, independent of the DAG.

	/// Stores a copy of line `lnum` in the line slot.
	pub fn save_line_for_undo(&mut self, host: &impl UndoHost, lnum: Lnum) {
		if lnum == self.line_slot.lnum {
			return;
		}
		if lnum < 1 || lnum > host.line_count() {
			return;
		}
		self.clear_line_slot();
		self.line_slot.lnum = lnum;
		self.line_slot.col = if host.cursor().lnum == lnum {
			host.cursor().col
		} else {
			0
		};
		self.line_slot.text = Some(host.line(lnum));
	}

	/// Forgets the saved line, for example when insert mode crosses lines.
	pub fn clear_line_slot(&mut self) {
		if self.line_slot.text.is_none() {
			return;
		}
		self.line_slot.text = None;
		self.line_slot.lnum = 0;
	}

	/// Swaps the saved line with the live one; repeated invocation toggles.
	/// Returns false when there is nothing to swap.
	pub fn swap_line_slot(&mut self, host: &mut impl UndoHost) -> Result<bool> {
		if self.line_slot.text.is_none() || self.line_slot.lnum > host.line_count() {
			return Ok(false);
		}
		let lnum = self.line_slot.lnum;
		self.record_change(host, lnum - 1, lnum + 1, 0, false)?;

		let old = host.line(lnum);
		if let Some(saved) = self.line_slot.text.take() {
			host.replace_line(lnum, &saved);
		}
		self.line_slot.text = Some(old);

		let slot_col = self.line_slot.col;
		let mut cur = host.cursor();
		if cur.lnum == lnum {
			self.line_slot.col = cur.col;
		}
		cur.col = slot_col;
		cur.lnum = lnum;
		cur.coladd = 0;
		host.set_cursor(cur);
		host.clamp_cursor();
		Ok(true)
	}
}
