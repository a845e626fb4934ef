//! Read-only views of the tree for listings and scripting.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::host::UndoHost;
use crate::tree::{NodeId, UndoTree};
use crate::types::Position;

/// One leaf of the tree, as shown by a history listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeafInfo {
	/// Sequence number of the leaf header.
	pub seq: i64,
	/// Number of change steps between the origin and this leaf.
	pub changes: i64,
	/// Capture time of the leaf header.
	pub time: i64,
	/// File-write ordinal attached to the leaf, 0 when none.
	pub save_nr: i64,
}

impl UndoTree {
	/// Enumerates the leaves of the tree, ordered by sequence number.
	pub fn list_leaves(&mut self) -> Vec<LeafInfo> {
		let mark = self.next_walk_token();
		let nomark = self.next_walk_token();
		let mut leaves = Vec::new();
		let mut changes: i64 = 1;

		let mut uhp = self.oldhead;
		while let Some(cur) = uhp {
			let h = self.header(cur);
			if h.prev.is_none() && h.walk != nomark && h.walk != mark {
				leaves.push(LeafInfo {
					seq: h.seq,
					changes,
					time: h.time,
					save_nr: h.save_nr,
				});
			}
			self.header_mut(cur).walk = mark;

			let h = self.header(cur);
			let (prev, alt_next, next, alt_prev) = (h.prev, h.alt_next, h.next, h.alt_prev);
			if self.visitable(prev, mark, nomark) {
				uhp = prev;
				changes += 1;
			} else if self.visitable(alt_next, mark, nomark) {
				uhp = alt_next;
			} else if next.is_some() && alt_prev.is_none() && self.visitable(next, mark, nomark) {
				uhp = next;
				changes -= 1;
			} else {
				self.header_mut(cur).walk = nomark;
				if alt_prev.is_some() {
					uhp = alt_prev;
				} else {
					uhp = next;
					changes -= 1;
				}
			}
		}

		leaves.sort_by_key(|leaf| leaf.seq);
		leaves
	}

	fn visitable(&self, id: Option<NodeId>, mark: u64, nomark: u64) -> bool {
		id.map(|i| {
			let w = self.header(i).walk;
			w != mark && w != nomark
		})
		.unwrap_or(false)
	}

	/// Nested representation of the whole tree for scripting, shaped like
	/// `{ synced, seq_last, save_last, seq_cur, time_cur, save_cur,
	/// entries: [ { seq, time, newhead?, curhead?, save?, alt? } ] }`.
	pub fn eval_tree(&self) -> Value {
		json!({
			"synced": self.synced as i64,
			"seq_last": self.seq_last,
			"save_last": self.save_nr_last,
			"seq_cur": self.seq_cur,
			"time_cur": self.time_cur,
			"save_cur": self.save_nr_cur,
			"entries": self.eval_branch(self.oldhead),
		})
	}

	fn eval_branch(&self, first: Option<NodeId>) -> Value {
		let mut list = Vec::new();
		let mut uhp = first;
		while let Some(cur) = uhp {
			let h = self.header(cur);
			let mut dict = Map::new();
			dict.insert("seq".to_owned(), json!(h.seq));
			dict.insert("time".to_owned(), json!(h.time));
			if Some(cur) == self.newhead {
				dict.insert("newhead".to_owned(), json!(1));
			}
			if Some(cur) == self.curhead {
				dict.insert("curhead".to_owned(), json!(1));
			}
			if h.save_nr > 0 {
				dict.insert("save".to_owned(), json!(h.save_nr));
			}
			if let Some(alt) = h.alt_next {
				dict.insert("alt".to_owned(), self.eval_branch(Some(alt)));
			}
			list.push(Value::Object(dict));
			uhp = h.prev;
		}
		Value::Array(list)
	}

	/// After a reload was captured as a whole-file step, points the
	/// recorded cursor at the first line that differs from the saved text.
	pub fn find_first_changed(&mut self, host: &impl UndoHost) {
		if self.curhead.is_some() {
			return;
		}
		let Some(nh) = self.newhead else {
			return;
		};
		let (top, bot, size) = {
			let h = self.header(nh);
			let Some(entry) = h.entries.first() else {
				return;
			};
			(entry.top, entry.bot, entry.size())
		};
		// Only applies when the last step covers the whole file.
		if top != 0 || bot != 0 {
			return;
		}

		let line_count = host.line_count();
		let mut lnum = 1;
		while lnum < line_count && lnum <= size {
			let differs = {
				let h = self.header(nh);
				h.entries[0].lines[(lnum - 1) as usize] != host.line(lnum)
			};
			if differs {
				self.header_mut(nh).cursor = Position::at_line(lnum);
				return;
			}
			lnum += 1;
		}
		if line_count != size {
			// Lines were added or removed at the end.
			self.header_mut(nh).cursor = Position::at_line(lnum);
		}
	}
}
