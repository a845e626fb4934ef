//! Replaying change steps: undo, redo, and branch-forget.
//!
//! A single step swaps the recorded pre-image of each entry with the live
//! text of its range. Because the swap stores what it removed back into the
//! entry, every entry is its own inverse and the same routine serves both
//! directions.

use tracing::trace;

use crate::error::{Result, UndoError};
use crate::host::UndoHost;
use crate::tree::UndoTree;
use crate::types::{HeaderFlags, HistoryEnd, Lnum, ReplayDirection, StepSummary};

impl UndoTree {
	/// Undoes `count` change steps. An unsynced change is closed first and
	/// reduces the count to one.
	pub fn undo(&mut self, host: &mut impl UndoHost, count: usize) -> Result<StepSummary> {
		let mut count = count;
		if !self.synced {
			self.sync(host);
			count = 1;
		}
		self.do_steps(host, count, true)
	}

	/// Redoes `count` change steps.
	pub fn redo(&mut self, host: &mut impl UndoHost, count: usize) -> Result<StepSummary> {
		self.do_steps(host, count, false)
	}

	fn do_steps(
		&mut self,
		host: &mut impl UndoHost,
		count: usize,
		undo: bool,
	) -> Result<StepSummary> {
		host.change_allowed().map_err(UndoError::PolicyDenied)?;

		let mut summary = StepSummary {
			did_undo: undo,
			..StepSummary::default()
		};

		for _ in 0..count {
			// The warning hook may reload the buffer and rewrite the tree,
			// so it runs before the step is chosen.
			host.change_warning();

			if undo {
				self.curhead = match self.curhead {
					None => self.newhead,
					Some(c) if host.undo_levels() > 0 => self.header(c).next,
					Some(c) => Some(c),
				};
				if self.num_heads == 0 || self.curhead.is_none() {
					// Stick at the oldest change.
					self.curhead = self.oldhead;
					summary.end_reached = Some(HistoryEnd::Oldest);
					break;
				}
				let (added, removed) = self.apply_header(host, ReplayDirection::Undo)?;
				summary.steps += 1;
				summary.lines_added += added;
				summary.lines_removed += removed;
			} else {
				let Some(cur) = self.curhead else {
					summary.end_reached = Some(HistoryEnd::Newest);
					break;
				};
				if host.undo_levels() <= 0 {
					summary.end_reached = Some(HistoryEnd::Newest);
					break;
				}
				let (added, removed) = self.apply_header(host, ReplayDirection::Redo)?;
				summary.steps += 1;
				summary.lines_added += added;
				summary.lines_removed += removed;

				// Advance for the next redo; at the end of the redoable
				// changes this header becomes the leaf.
				if self.header(cur).prev.is_none() {
					self.newhead = Some(cur);
				}
				self.curhead = self.header(cur).prev;
			}
		}

		summary.seq_after = self.seq_cur;
		Ok(summary)
	}

	/// Undoes `count` steps and unlinks the just-undone header from the
	/// tree, promoting its first alternate into its place. Returns false
	/// when nothing was undone.
	pub fn undo_and_forget(&mut self, host: &mut impl UndoHost, count: usize) -> Result<bool> {
		let mut count = count;
		if !self.synced {
			self.sync(host);
			count = 1;
		}
		self.do_steps(host, count, true)?;

		let Some(to_forget) = self.curhead else {
			return Ok(false);
		};
		trace!(seq = self.header(to_forget).seq, "forgetting undone branch");

		self.newhead = self.header(to_forget).next;
		self.curhead = self.header(to_forget).alt_next;
		let alt_prev = self.header(to_forget).alt_prev;
		if let Some(ch) = self.curhead {
			self.header_mut(to_forget).alt_next = None;
			self.header_mut(ch).alt_prev = alt_prev;
			self.seq_cur = self
				.header(ch)
				.next
				.map(|n| self.header(n).seq)
				.unwrap_or(0);
		} else if let Some(nh) = self.newhead {
			self.seq_cur = self.header(nh).seq;
		}
		if let Some(ap) = alt_prev {
			self.header_mut(ap).alt_next = self.curhead;
		}
		if let Some(nh) = self.newhead {
			self.header_mut(nh).prev = self.curhead;
		}
		if self.seq_last == self.header(to_forget).seq {
			self.seq_last -= 1;
		}
		if self.oldhead == Some(to_forget) {
			// The promoted alternate takes over the root slot; alternates
			// of a root are roots themselves.
			self.oldhead = self.curhead;
		}

		// The detached header is fully unlinked from the alternate chain;
		// freeing it must not touch the spliced links again.
		self.header_mut(to_forget).alt_prev = None;
		self.free_branch(to_forget, &mut None);
		debug_assert!(self.consistency_error().is_none());
		Ok(true)
	}

	/// Replays the current header in the given direction: swaps every
	/// entry's recorded lines with the live range, restores cursor, marks,
	/// visual selection and buffer flags, and replays extmark deltas.
	///
	/// Returns the number of lines inserted and removed.
	pub(crate) fn apply_header(
		&mut self,
		host: &mut impl UndoHost,
		direction: ReplayDirection,
	) -> Result<(Lnum, Lnum)> {
		// Host event handlers must not see the tree mid-mutation.
		host.suspend_events();
		let result = self.apply_header_inner(host, direction);
		host.resume_events();
		debug_assert!(self.consistency_error().is_none());
		result
	}

	fn apply_header_inner(
		&mut self,
		host: &mut impl UndoHost,
		direction: ReplayDirection,
	) -> Result<(Lnum, Lnum)> {
		let undo = direction == ReplayDirection::Undo;
		let curhead = self
			.curhead
			.ok_or(UndoError::Internal("replay without a current header"))?;

		let old_flags = self.header(curhead).flags;
		let mut new_flags = old_flags & HeaderFlags::RELOAD;
		if host.is_changed() {
			new_flags |= HeaderFlags::CHANGED;
		}
		if host.buffer_empty() {
			new_flags |= HeaderFlags::EMPTYBUF;
		}

		let saved_marks = host.named_marks();
		let saved_visual = host.visual_selection();
		let header_cursor = self.header(curhead).cursor;

		trace!(
			seq = self.header(curhead).seq,
			entries = self.header(curhead).entries.len(),
			?direction,
			"replaying change step"
		);

		let mut entries = std::mem::take(&mut self.header_mut(curhead).entries);
		let entry_count = entries.len();
		let mut cursor_target = Lnum::MAX;
		let mut lines_added: Lnum = 0;
		let mut lines_removed: Lnum = 0;

		for index in 0..entry_count {
			let line_count = host.line_count();
			let top = entries[index].top;
			let bot = if entries[index].bot == 0 {
				line_count + 1
			} else {
				entries[index].bot
			};
			if top > line_count || top >= bot || bot > line_count + 1 {
				// A mixed buffer state is worse than a wrong modified flag.
				self.header_mut(curhead).entries = entries;
				host.set_changed(true);
				return Err(UndoError::RangeInvalid);
			}

			let oldsize = bot - top - 1;
			let newsize = entries[index].size();

			if top < cursor_target {
				// Put the cursor where the saved position lands inside this
				// block, or on the first line that actually differs.
				let saved_lnum = header_cursor.lnum;
				if saved_lnum >= top && saved_lnum <= top + newsize + 1 {
					host.set_cursor(header_cursor);
					cursor_target = header_cursor.lnum - 1;
				} else {
					let mut same = 0;
					while same < newsize && same < oldsize {
						if entries[index].lines[same as usize] != host.line(top + 1 + same) {
							break;
						}
						same += 1;
					}
					if same == newsize && cursor_target == Lnum::MAX && index == entry_count - 1 {
						cursor_target = top;
						let mut cur = host.cursor();
						cur.lnum = cursor_target + 1;
						host.set_cursor(cur);
					} else if same < newsize {
						cursor_target = top + same;
						let mut cur = host.cursor();
						cur.lnum = cursor_target + 1;
						host.set_cursor(cur);
					}
				}
			}

			// Swap the live range out and the recorded lines in.
			let mut replaced: Vec<Vec<u8>> = Vec::with_capacity(oldsize as usize);
			let mut emptied_buffer = false;
			if oldsize > 0 {
				for lnum in top + 1..bot {
					replaced.push(host.line(lnum));
				}
				for lnum in (top + 1..bot).rev() {
					if host.line_count() == 1 {
						// Removing the last line leaves the empty shell.
						emptied_buffer = true;
					}
					host.delete_line(lnum);
				}
			}

			for (i, line) in entries[index].lines.iter().enumerate() {
				let lnum = top + i as Lnum;
				if emptied_buffer && lnum == 0 {
					host.replace_line(1, line);
				} else {
					host.append_line(lnum, line);
				}
			}

			host.adjust_marks_for_splice(top, oldsize, newsize);

			lines_added += newsize;
			lines_removed += oldsize;
			entries[index].lines = replaced;
			entries[index].bot = top + newsize + 1;
		}

		// The next replay walks the entries in the opposite order.
		entries.reverse();
		self.header_mut(curhead).entries = entries;

		// Extmark deltas invert by replay order.
		if undo {
			for i in (0..self.header(curhead).extmarks.len()).rev() {
				let delta = self.header(curhead).extmarks[i];
				host.apply_extmark_delta(&delta, direction);
			}
		} else {
			for i in 0..self.header(curhead).extmarks.len() {
				let delta = self.header(curhead).extmarks[i];
				host.apply_extmark_delta(&delta, direction);
			}
		}
		if old_flags.contains(HeaderFlags::RELOAD) {
			host.notify_reload();
		}

		self.header_mut(curhead).flags = new_flags;
		if old_flags.contains(HeaderFlags::EMPTYBUF)
			&& host.line_count() == 1
			&& host.line(1).is_empty()
		{
			host.set_buffer_empty(true);
		}
		host.set_changed(old_flags.contains(HeaderFlags::CHANGED));

		// Swap named marks and the visual selection in and out.
		for i in 0..saved_marks.len() {
			let recorded = self.header(curhead).named_marks[i];
			if recorded.is_set() {
				host.set_named_mark(i, recorded);
			}
			self.header_mut(curhead).named_marks[i] = if saved_marks[i].is_set() {
				saved_marks[i]
			} else {
				crate::types::Position::default()
			};
		}
		if self.header(curhead).visual.start.is_set() {
			host.set_visual_selection(self.header(curhead).visual);
			self.header_mut(curhead).visual = saved_visual;
		}

		// A cursor exactly one line below the recorded position stays put,
		// so undoing an opened line does not jump. Otherwise restore the
		// recorded column when the line matches, or land on the first
		// non-blank.
		let mut cur = host.cursor();
		if header_cursor.lnum + 1 == cur.lnum && cur.lnum > 1 {
			cur.lnum -= 1;
		}
		if cur.lnum <= host.line_count() {
			if header_cursor.lnum == cur.lnum {
				cur.col = header_cursor.col;
				let vcol = self.header(curhead).cursor_vcol;
				if host.virtual_active() && vcol >= 0 {
					host.set_cursor(cur);
					host.advance_virtual_col(vcol);
				} else {
					cur.coladd = 0;
					host.set_cursor(cur);
				}
			} else {
				host.set_cursor(cur);
				host.cursor_to_line_start();
			}
		} else {
			// The cursor line vanished; clamping moves it to the last line.
			cur.col = 0;
			cur.coladd = 0;
			host.set_cursor(cur);
		}
		host.clamp_cursor();

		self.seq_cur = self.header(curhead).seq;
		if undo {
			// Position just above the undone change, so stepping back by
			// time lands here.
			self.seq_cur = self
				.header(curhead)
				.next
				.map(|n| self.header(n).seq)
				.unwrap_or(0);
		}
		let save_nr = self.header(curhead).save_nr;
		if save_nr != 0 {
			self.save_nr_cur = if undo { save_nr - 1 } else { save_nr };
		}
		self.time_cur = self.header(curhead).time;

		Ok((lines_added, lines_removed))
	}
}

#[cfg(test)]
mod tests {
	use crate::host::UndoHost;
	use crate::testing::MemoryBuffer;
	use crate::tree::UndoTree;
	use crate::types::{
		ExtmarkDelta, ExtmarkSplice, HistoryEnd, Position, ReplayDirection, VisualSelection,
	};

	fn setup(lines: &[&str]) -> (UndoTree, MemoryBuffer) {
		(UndoTree::new(), MemoryBuffer::from_lines(lines))
	}

	#[test]
	fn undo_then_redo_restores_everything() {
		let (mut tree, mut buf) = setup(&["a", "b", "c"]);
		buf.clock = 500;
		buf.edit_replace(&mut tree, 2, "B");
		tree.sync(&buf);
		let before = (buf.text(), tree.seq_cur(), tree.time_cur(), tree.save_nr_cur());

		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.text(), ["a", "b", "c"]);
		assert_eq!(tree.seq_cur(), 0);

		tree.redo(&mut buf, 1).expect("redo");
		assert_eq!((buf.text(), tree.seq_cur()), (before.0, before.1));
		assert_eq!(tree.save_nr_cur(), before.3);
	}

	#[test]
	fn undo_past_the_root_reports_the_end() {
		let (mut tree, mut buf) = setup(&["a"]);
		buf.edit_replace(&mut tree, 1, "A");
		tree.sync(&buf);
		let summary = tree.undo(&mut buf, 5).expect("undo");
		assert_eq!(summary.steps, 1);
		assert_eq!(summary.end_reached, Some(HistoryEnd::Oldest));
		assert_eq!(buf.text(), ["a"]);

		let summary = tree.redo(&mut buf, 5).expect("redo");
		assert_eq!(summary.steps, 1);
		assert_eq!(summary.end_reached, Some(HistoryEnd::Newest));
		assert_eq!(buf.text(), ["A"]);
	}

	#[test]
	fn changed_flag_is_swapped() {
		let (mut tree, mut buf) = setup(&["a"]);
		assert!(!buf.is_changed());
		buf.edit_replace(&mut tree, 1, "A");
		tree.sync(&buf);
		assert!(buf.is_changed());
		tree.undo(&mut buf, 1).expect("undo");
		assert!(!buf.is_changed());
		tree.redo(&mut buf, 1).expect("redo");
		assert!(buf.is_changed());
	}

	#[test]
	fn named_marks_are_swapped() {
		let (mut tree, mut buf) = setup(&["a", "b"]);
		buf.set_named_mark(0, Position::at_line(2));
		buf.edit_replace(&mut tree, 1, "A");
		tree.sync(&buf);
		buf.set_named_mark(0, Position::at_line(1));

		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.named_marks()[0].lnum, 2);
		tree.redo(&mut buf, 1).expect("redo");
		assert_eq!(buf.named_marks()[0].lnum, 1);
	}

	#[test]
	fn visual_selection_is_swapped_when_recorded() {
		let (mut tree, mut buf) = setup(&["a", "b"]);
		let recorded = VisualSelection {
			start: Position::at_line(1),
			end: Position::at_line(2),
			mode: 118,
			curswant: 0,
		};
		buf.set_visual_selection(recorded);
		buf.edit_replace(&mut tree, 1, "A");
		tree.sync(&buf);
		buf.set_visual_selection(VisualSelection::default());

		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.visual_selection(), recorded);
	}

	#[test]
	fn cursor_one_line_below_recorded_stays_put() {
		let (mut tree, mut buf) = setup(&["a", "b", "c"]);
		buf.set_cursor(Position::at_line(1));
		// Open a line below: insert before line 2 with the cursor on it.
		tree.save_ins(&mut buf, 2).expect("save_ins");
		buf.append_line(1, b"opened");
		buf.set_changed(true);
		tree.sync(&buf);
		buf.set_cursor(Position::at_line(2));

		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.text(), ["a", "b", "c"]);
		assert_eq!(buf.cursor().lnum, 1);
	}

	#[test]
	fn deleting_every_line_round_trips_through_the_empty_shell() {
		let (mut tree, mut buf) = setup(&["a", "b"]);
		buf.edit_delete(&mut tree, 1, 2);
		tree.sync(&buf);
		assert!(buf.buffer_empty());
		assert_eq!(buf.text(), [""]);

		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.text(), ["a", "b"]);
		assert!(!buf.buffer_empty());

		tree.redo(&mut buf, 1).expect("redo");
		assert_eq!(buf.text(), [""]);
		assert!(buf.buffer_empty());
	}

	#[test]
	fn extmark_deltas_replay_in_reverse_on_undo() {
		let (mut tree, mut buf) = setup(&["a"]);
		buf.edit_replace(&mut tree, 1, "A");
		let first = ExtmarkDelta::Splice(ExtmarkSplice {
			start_row: 1,
			..ExtmarkSplice::default()
		});
		let second = ExtmarkDelta::Splice(ExtmarkSplice {
			start_row: 2,
			..ExtmarkSplice::default()
		});
		tree.push_extmark_delta(&mut buf, first);
		tree.push_extmark_delta(&mut buf, second);
		tree.sync(&buf);

		tree.undo(&mut buf, 1).expect("undo");
		let undo_log: Vec<_> = buf.extmark_log.drain(..).collect();
		assert_eq!(undo_log[0], (second, ReplayDirection::Undo));
		assert_eq!(undo_log[1], (first, ReplayDirection::Undo));

		tree.redo(&mut buf, 1).expect("redo");
		let redo_log: Vec<_> = buf.extmark_log.drain(..).collect();
		assert_eq!(redo_log[0], (first, ReplayDirection::Redo));
		assert_eq!(redo_log[1], (second, ReplayDirection::Redo));
	}

	#[test]
	fn splice_notifications_cover_each_entry() {
		let (mut tree, mut buf) = setup(&["a", "b", "c"]);
		buf.edit_replace(&mut tree, 2, "B");
		tree.sync(&buf);
		buf.splice_log.clear();
		tree.undo(&mut buf, 1).expect("undo");
		assert_eq!(buf.splice_log, [(1, 1, 1)]);
	}

	#[test]
	fn forgetting_a_branch_unlinks_it() {
		let (mut tree, mut buf) = setup(&["a", "b", "c"]);
		buf.edit_replace(&mut tree, 2, "B");
		tree.sync(&buf);
		buf.edit_replace(&mut tree, 3, "C");
		tree.sync(&buf);

		assert!(tree.undo_and_forget(&mut buf, 1).expect("forget"));
		assert_eq!(buf.text(), ["a", "B", "c"]);
		assert_eq!(tree.num_heads(), 1);
		assert_eq!(tree.seq_last(), 1);
		assert_eq!(tree.newhead_seq(), Some(1));
		assert!(tree.curhead_seq().is_none());
		assert!(tree.consistency_error().is_none());

		// The forgotten change is no longer redoable.
		let summary = tree.redo(&mut buf, 1).expect("redo");
		assert_eq!(summary.steps, 0);
		assert_eq!(buf.text(), ["a", "B", "c"]);
	}

	#[test]
	fn forgetting_promotes_the_first_alternate() {
		let (mut tree, mut buf) = setup(&["a", "b", "c"]);
		buf.edit_replace(&mut tree, 2, "B");
		tree.sync(&buf);
		tree.undo(&mut buf, 1).expect("undo");
		buf.edit_replace(&mut tree, 1, "A");
		tree.sync(&buf);
		// seq 2 is the live branch, seq 1 its alternate.
		assert!(tree.undo_and_forget(&mut buf, 1).expect("forget"));
		assert_eq!(buf.text(), ["a", "b", "c"]);
		assert_eq!(tree.curhead_seq(), Some(1));
		assert_eq!(tree.num_heads(), 1);
		assert!(tree.consistency_error().is_none());

		// Redo now follows the promoted branch.
		tree.redo(&mut buf, 1).expect("redo");
		assert_eq!(buf.text(), ["a", "B", "c"]);
	}
}
