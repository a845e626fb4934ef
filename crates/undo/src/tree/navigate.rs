//! Navigation over the whole tree by step count, wall-clock time, save
//! count, or absolute change number.
//!
//! The target can sit on any branch, so the search walks every reachable
//! header once, stamping walk tokens: `mark` on the path that may lead to
//! the target, `nomark` on headers ruled out. When no header matches the
//! target exactly, a second round re-targets the closest candidate found in
//! the first. Path execution then undoes up to the common ancestor and
//! redoes down the marked branch, rotating alternate lists so a plain redo
//! afterwards follows the same path.

use tracing::trace;

use crate::error::{Result, UndoError};
use crate::host::UndoHost;
use crate::tree::{NodeId, UndoTree};
use crate::types::{HistoryEnd, ReplayDirection, StepSummary};

/// Unit of a [`UndoTree::navigate`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateUnit {
	/// Relative change steps, like single undos that cross branches.
	Steps,
	/// Wall-clock seconds.
	Seconds,
	/// File-write ordinals.
	Saves,
	/// `step` is an absolute sequence number; 0 is the tree origin.
	Absolute,
}

impl UndoTree {
	/// Moves the buffer `step` units through the tree. Negative steps go
	/// back in time, positive steps forward.
	pub fn navigate(
		&mut self,
		host: &mut impl UndoHost,
		step: i64,
		unit: NavigateUnit,
	) -> Result<StepSummary> {
		host.change_allowed().map_err(UndoError::PolicyDenied)?;
		if !self.synced {
			self.sync(host);
		}

		let absolute = unit == NavigateUnit::Absolute;
		let mut dosec = unit == NavigateUnit::Seconds;
		let mut dofile = unit == NavigateUnit::Saves;
		let mut above = false;

		// "target" is the coordinate to reach; "closest" narrows toward the
		// best reachable candidate as the walk proceeds.
		let mut target: i64;
		let mut closest: i64;
		if absolute {
			target = step;
			closest = -1;
		} else {
			if dosec {
				target = self.time_cur + step;
			} else if dofile {
				if step < 0 {
					// Changes made since the last write count as one
					// file-step, so one step back lands on the last write.
					let uhp = match self.curhead {
						Some(c) => self.header(c).next,
						None => self.newhead,
					};
					let at_save_point =
						uhp.map(|u| self.header(u).save_nr != 0).unwrap_or(false);
					target = self.save_nr_cur + step + if at_save_point { 0 } else { 1 };
					if target <= 0 {
						// Before the first write: before the oldest change.
						dofile = false;
					}
				} else {
					target = self.save_nr_cur + step;
					if target > self.save_nr_last {
						// After the last write: after the latest change.
						target = self.seq_last + 1;
						dofile = false;
					}
				}
			} else {
				target = self.seq_cur + step;
			}
			if step < 0 {
				target = target.max(0);
				closest = -1;
			} else {
				closest = if dosec {
					host.now() + 1
				} else if dofile {
					self.save_nr_last + 2
				} else {
					self.seq_last + 2
				};
				if target >= closest {
					target = closest - 1;
				}
			}
		}
		let closest_start = closest;
		let mut closest_seq = self.seq_cur;
		let mut mark: u64 = 0;
		let mut nomark: u64 = 0;
		let mut found: Option<NodeId> = None;

		let mut summary = StepSummary {
			did_undo: true,
			..StepSummary::default()
		};

		// Round 1 searches for the target and remembers the closest
		// candidate; round 2 re-targets that candidate by sequence number,
		// because several headers can share one timestamp.
		if target != 0 {
			'rounds: for round in 1..=2 {
				mark = self.next_walk_token();
				nomark = self.next_walk_token();
				let mut uhp = self.curhead.or(self.newhead);

				while let Some(cur) = uhp {
					self.header_mut(cur).walk = mark;
					let val = if dosec {
						self.header(cur).time
					} else if dofile {
						self.header(cur).save_nr
					} else {
						self.header(cur).seq
					};

					if round == 1 && !(dofile && val == 0) {
						// A candidate must lie on the correct side of the
						// current position; equal timestamps tie-break on
						// the sequence number.
						let seq = self.header(cur).seq;
						let right_side = if step < 0 {
							seq <= self.seq_cur
						} else {
							seq > self.seq_cur
						};
						let better = if dosec && val == closest {
							if step < 0 {
								seq < closest_seq
							} else {
								seq > closest_seq
							}
						} else if closest == closest_start {
							true
						} else if val > target {
							if closest > target {
								val - target <= closest - target
							} else {
								val - target <= target - closest
							}
						} else if closest > target {
							target - val <= closest - target
						} else {
							target - val <= target - closest
						};
						if right_side && better {
							closest = val;
							closest_seq = seq;
						}
					}

					// An exact match ends the search, except that a time
					// match keeps refining the sequence number.
					if target == val && !dosec {
						target = self.header(cur).seq;
						found = Some(cur);
						break 'rounds;
					}

					let prev = self.header(cur).prev;
					let alt_next = self.header(cur).alt_next;
					let next = self.header(cur).next;
					let alt_prev = self.header(cur).alt_prev;
					if self.walk_fresh(prev, mark, nomark) {
						uhp = prev;
					} else if self.walk_fresh(alt_next, mark, nomark) {
						uhp = alt_next;
					} else if next.is_some()
						&& alt_prev.is_none()
						&& self.walk_fresh(next, mark, nomark)
					{
						// Still at the start: this change is not on the
						// path.
						if Some(cur) == self.curhead {
							self.header_mut(cur).walk = nomark;
						}
						uhp = next;
					} else {
						self.header_mut(cur).walk = nomark;
						uhp = if alt_prev.is_some() { alt_prev } else { next };
					}
				}

				if round == 2 {
					break;
				}
				if absolute {
					return Err(UndoError::SeqNotFound(step));
				}
				if closest == closest_start {
					summary.end_reached = Some(if step < 0 {
						HistoryEnd::Oldest
					} else {
						HistoryEnd::Newest
					});
					summary.seq_after = self.seq_cur;
					return Ok(summary);
				}

				target = closest_seq;
				dosec = false;
				dofile = false;
				if step < 0 {
					above = true;
				}
			}
		}

		trace!(target, above, found = found.is_some(), "navigating undo tree");

		if found.is_none() && target != 0 {
			summary.seq_after = self.seq_cur;
			return Ok(summary);
		}

		// First go up the tree as far as needed.
		while !host.interrupted() {
			host.change_warning();
			let uhp = match self.curhead {
				None => self.newhead,
				Some(c) => self.header(c).next,
			};
			let Some(u) = uhp else {
				break;
			};
			if (target > 0 && self.header(u).walk != mark)
				|| (self.header(u).seq == target && !above)
			{
				break;
			}
			self.curhead = Some(u);
			let (added, removed) = self.apply_header(host, ReplayDirection::Undo)?;
			summary.steps += 1;
			summary.lines_added += added;
			summary.lines_removed += removed;
			summary.did_undo = true;
			if target > 0 {
				// Don't go back down here.
				self.header_mut(u).walk = nomark;
			}
		}

		// Back at the origin no redo is needed.
		if target > 0 {
			// Now go down the tree, branching off where the marks lead.
			while !host.interrupted() {
				host.change_warning();
				let Some(start) = self.curhead else {
					break;
				};

				// Move to the first marked branch of the alternate list.
				let mut u = start;
				while let Some(ap) = self.header(u).alt_prev {
					if self.header(ap).walk != mark {
						break;
					}
					u = ap;
				}
				// The last marked branch is the one to follow.
				let mut last = u;
				while let Some(an) = self.header(last).alt_next {
					if self.header(an).walk != mark {
						break;
					}
					last = an;
				}
				if last != u {
					// Make the used branch the first alternate, so a plain
					// undo or redo afterwards takes this path.
					while let Some(ap) = self.header(u).alt_prev {
						u = ap;
					}
					let last_alt_prev = self.header(last).alt_prev;
					let last_alt_next = self.header(last).alt_next;
					if let Some(an) = last_alt_next {
						self.header_mut(an).alt_prev = last_alt_prev;
					}
					if let Some(ap) = last_alt_prev {
						self.header_mut(ap).alt_next = last_alt_next;
					}
					self.header_mut(last).alt_prev = None;
					self.header_mut(last).alt_next = Some(u);
					self.header_mut(u).alt_prev = Some(last);
					if self.oldhead == Some(u) {
						self.oldhead = Some(last);
					}
					u = last;
					if let Some(n) = self.header(u).next {
						self.header_mut(n).prev = Some(u);
					}
				}
				self.curhead = Some(u);

				if self.header(u).walk != mark {
					// Must have reached the target.
					break;
				}

				// Going backwards without an exact match stops just above
				// the chosen header.
				if self.header(u).seq == target && above {
					self.seq_cur = target - 1;
					break;
				}

				let (added, removed) = self.apply_header(host, ReplayDirection::Redo)?;
				summary.steps += 1;
				summary.lines_added += added;
				summary.lines_removed += removed;
				summary.did_undo = false;

				if self.header(u).prev.is_none() {
					self.newhead = Some(u);
				}
				self.curhead = self.header(u).prev;

				if self.header(u).seq == target {
					break;
				}

				let down = self.header(u).prev;
				let lost = match down {
					Some(d) => self.header(d).walk != mark,
					None => true,
				};
				if lost {
					// Need to redo more but the marked path is gone.
					tracing::error!("navigation lost the marked path");
					break;
				}
			}
		}

		summary.seq_after = self.seq_cur;
		debug_assert!(self.consistency_error().is_none());
		Ok(summary)
	}

	fn walk_fresh(&self, id: Option<NodeId>, mark: u64, nomark: u64) -> bool {
		id.map(|i| {
			let w = self.header(i).walk;
			w != mark && w != nomark
		})
		.unwrap_or(false)
	}
}
