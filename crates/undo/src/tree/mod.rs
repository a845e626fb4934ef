//! The per-buffer undo tree.
//!
//! Change steps form a branching DAG:
//!
//! ```text
//! oldhead ──────────────────────────────┐
//!                                       ▼
//!            ┌──────────┐   next   ┌──────────┐   next
//! newhead ──►│  Header  ├─────────►│  Header  ├─────────► (root)
//!            │          │◄─────────┤          │
//!            └────┬─────┘   prev   └────┬─────┘
//!                 │ entries             │ alt_next / alt_prev
//!                 ▼                     ▼
//!             pre-image            alternate branch
//!             line ranges          (divergent future)
//! ```
//!
//! Every header owns a list of [`Entry`] pre-images, newest first. The
//! `prev`/`next` chain is the primary branch between [`UndoTree::newhead`]
//! and the root; `alt_next`/`alt_prev` hang divergent futures off the point
//! where they were abandoned.
//!
//! Headers live in a slab arena and link to each other by [`NodeId`], which
//! mirrors the on-disk representation where links are sequence numbers.

mod inspect;
mod navigate;
mod record;
mod replay;

pub use inspect::LeafInfo;
pub use navigate::NavigateUnit;

use tracing::trace;

use crate::types::{
	ExtmarkDelta, HeaderFlags, Lnum, Position, VisualSelection, NUM_NAMED_MARKS,
};

/// Index of a header in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
	fn index(self) -> usize {
		self.0 as usize
	}
}

/// One contiguous range replacement: the pre-image of lines
/// `[top+1, bot-1]` as they were before the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
	/// Line above the first replaced line; 0 means "before line 1".
	pub(crate) top: Lnum,
	/// Line below the last replaced line; 0 means "past end of buffer",
	/// resolved against `lcount` before the header closes.
	pub(crate) bot: Lnum,
	/// Buffer line count when this entry was captured, used to resolve a
	/// deferred `bot`.
	pub(crate) lcount: Lnum,
	/// Saved pre-image lines.
	pub(crate) lines: Vec<Vec<u8>>,
}

impl Entry {
	pub(crate) fn size(&self) -> Lnum {
		self.lines.len() as Lnum
	}
}

/// One atomic change step: a node in the undo DAG.
#[derive(Debug, Clone)]
pub(crate) struct Header {
	/// Older sibling on the same branch (toward the root).
	pub(crate) next: Option<NodeId>,
	/// Newer sibling on the same branch (toward the leaf).
	pub(crate) prev: Option<NodeId>,
	/// Head of an alternate branch that diverged at this point.
	pub(crate) alt_next: Option<NodeId>,
	/// The header this one is an alternate of.
	pub(crate) alt_prev: Option<NodeId>,
	/// Unique, monotonically assigned change number.
	pub(crate) seq: i64,
	/// Wall-clock capture time in seconds.
	pub(crate) time: i64,
	/// File-write ordinal when this step coincided with a save, else 0.
	pub(crate) save_nr: i64,
	/// Cursor position to restore when traversing this node.
	pub(crate) cursor: Position,
	/// Virtual column of the cursor, -1 when not applicable.
	pub(crate) cursor_vcol: i64,
	/// Buffer state bits swapped in and out on replay.
	pub(crate) flags: HeaderFlags,
	/// Named-mark snapshot.
	pub(crate) named_marks: [Position; NUM_NAMED_MARKS],
	/// Visual selection snapshot.
	pub(crate) visual: VisualSelection,
	/// Pre-image entries, newest first.
	pub(crate) entries: Vec<Entry>,
	/// Extmark deltas recorded with this step, in capture order.
	pub(crate) extmarks: Vec<ExtmarkDelta>,
	/// The head entry still has a deferred `bot`.
	pub(crate) deferred_bot: bool,
	/// Transient traversal stamp; carries no meaning between walks.
	pub(crate) walk: u64,
}

impl Header {
	pub(crate) fn new(seq: i64, time: i64) -> Self {
		Self {
			next: None,
			prev: None,
			alt_next: None,
			alt_prev: None,
			seq,
			time,
			save_nr: 0,
			cursor: Position::default(),
			cursor_vcol: -1,
			flags: HeaderFlags::empty(),
			named_marks: [Position::default(); NUM_NAMED_MARKS],
			visual: VisualSelection::default(),
			entries: Vec::new(),
			extmarks: Vec::new(),
			deferred_bot: false,
			walk: 0,
		}
	}
}

/// The single-line slot for the line-level undo command, orthogonal to the
/// DAG.
#[derive(Debug, Default)]
pub(crate) struct LineSlot {
	pub(crate) text: Option<Vec<u8>>,
	pub(crate) lnum: Lnum,
	pub(crate) col: i64,
}

/// The undo state of one buffer: the header arena plus bookkeeping.
#[derive(Debug)]
pub struct UndoTree {
	nodes: Vec<Option<Header>>,
	free: Vec<NodeId>,
	/// Root of the DAG (oldest header on the primary branch).
	pub(crate) oldhead: Option<NodeId>,
	/// Leaf of the primary branch (most recent change).
	pub(crate) newhead: Option<NodeId>,
	/// Last header replayed in the undo direction; the next redo. `None`
	/// means the buffer is at the leaf.
	pub(crate) curhead: Option<NodeId>,
	/// Count of reachable headers.
	pub(crate) num_heads: usize,
	/// Highest sequence number ever assigned.
	pub(crate) seq_last: i64,
	/// Sequence number identifying the current buffer state.
	pub(crate) seq_cur: i64,
	/// Capture time of the header matching the current buffer state.
	pub(crate) time_cur: i64,
	/// Highest file-write ordinal ever assigned.
	pub(crate) save_nr_last: i64,
	/// File-write ordinal matching the current buffer state.
	pub(crate) save_nr_cur: i64,
	/// When true the next recorded change opens a new header.
	pub(crate) synced: bool,
	pub(crate) line_slot: LineSlot,
	last_walk: u64,
}

impl Default for UndoTree {
	fn default() -> Self {
		Self::new()
	}
}

impl UndoTree {
	/// Creates an empty tree in the synced state.
	pub fn new() -> Self {
		Self {
			nodes: Vec::new(),
			free: Vec::new(),
			oldhead: None,
			newhead: None,
			curhead: None,
			num_heads: 0,
			seq_last: 0,
			seq_cur: 0,
			time_cur: 0,
			save_nr_last: 0,
			save_nr_cur: 0,
			synced: true,
			line_slot: LineSlot::default(),
			last_walk: 0,
		}
	}

	// Read-only bookkeeping accessors, mirrored by the scripting readout.

	/// Sequence number of the current buffer state.
	pub fn seq_cur(&self) -> i64 {
		self.seq_cur
	}

	/// Highest sequence number ever assigned.
	pub fn seq_last(&self) -> i64 {
		self.seq_last
	}

	/// Capture time matching the current buffer state.
	pub fn time_cur(&self) -> i64 {
		self.time_cur
	}

	/// File-write ordinal matching the current buffer state.
	pub fn save_nr_cur(&self) -> i64 {
		self.save_nr_cur
	}

	/// Highest file-write ordinal ever assigned.
	pub fn save_nr_last(&self) -> i64 {
		self.save_nr_last
	}

	/// Whether the next recorded change opens a new header.
	pub fn is_synced(&self) -> bool {
		self.synced
	}

	/// Number of reachable headers.
	pub fn num_heads(&self) -> usize {
		self.num_heads
	}

	/// Whether the single-line slot holds a saved line.
	pub fn has_line_slot(&self) -> bool {
		self.line_slot.text.is_some()
	}

	/// Sequence number of the root header, if any.
	pub fn oldhead_seq(&self) -> Option<i64> {
		self.oldhead.map(|id| self.header(id).seq)
	}

	/// Sequence number of the primary-branch leaf, if any.
	pub fn newhead_seq(&self) -> Option<i64> {
		self.newhead.map(|id| self.header(id).seq)
	}

	/// Sequence number of the next redo header, if any.
	pub fn curhead_seq(&self) -> Option<i64> {
		self.curhead.map(|id| self.header(id).seq)
	}

	// Arena plumbing.

	pub(crate) fn alloc(&mut self, header: Header) -> NodeId {
		if let Some(id) = self.free.pop() {
			self.nodes[id.index()] = Some(header);
			id
		} else {
			let id = NodeId(self.nodes.len() as u32);
			self.nodes.push(Some(header));
			id
		}
	}

	pub(crate) fn header(&self, id: NodeId) -> &Header {
		self.nodes[id.index()].as_ref().expect("stale undo node id")
	}

	pub(crate) fn header_mut(&mut self, id: NodeId) -> &mut Header {
		self.nodes[id.index()].as_mut().expect("stale undo node id")
	}

	/// Fresh traversal stamp; `header.walk == token` then means "seen in
	/// this walk". Stamps never need clearing.
	pub(crate) fn next_walk_token(&mut self) -> u64 {
		self.last_walk += 1;
		self.last_walk
	}

	// Freeing.

	/// Frees one header, its entries, and any alternate branch hanging off
	/// it, splicing the surrounding links back together.
	pub(crate) fn free_header(&mut self, id: NodeId, protected: &mut Option<NodeId>) {
		// An alternate redo branch of this node can never be reached again.
		if let Some(alt) = self.header(id).alt_next {
			self.free_branch(alt, protected);
		}
		if let Some(ap) = self.header(id).alt_prev {
			self.header_mut(ap).alt_next = None;
		}

		let next = self.header(id).next;
		let prev = self.header(id).prev;
		match next {
			None => self.oldhead = prev,
			Some(n) => self.header_mut(n).prev = prev,
		}
		match prev {
			None => self.newhead = next,
			Some(p) => {
				// Every alternate sibling of the newer node pointed here.
				let mut cur = Some(p);
				while let Some(c) = cur {
					self.header_mut(c).next = next;
					cur = self.header(c).alt_next;
				}
			}
		}

		self.free_entries(id, protected);
	}

	/// Frees an alternate branch and all branches hanging off it.
	pub(crate) fn free_branch(&mut self, id: NodeId, protected: &mut Option<NodeId>) {
		if Some(id) == self.oldhead {
			// Top branch: unlink header by header so the shared pointers
			// stay valid.
			while let Some(old) = self.oldhead {
				self.free_header(old, protected);
			}
			return;
		}

		if let Some(ap) = self.header(id).alt_prev {
			self.header_mut(ap).alt_next = None;
		}

		let mut next = Some(id);
		while let Some(cur) = next {
			if let Some(alt) = self.header(cur).alt_next {
				self.free_branch(alt, protected);
			}
			next = self.header(cur).prev;
			self.free_entries(cur, protected);
		}
	}

	/// Frees one header and drops every pointer to it.
	fn free_entries(&mut self, id: NodeId, protected: &mut Option<NodeId>) {
		if self.curhead == Some(id) {
			self.curhead = None;
		}
		if self.newhead == Some(id) {
			self.newhead = None;
		}
		if *protected == Some(id) {
			*protected = None;
		}
		trace!(seq = self.header(id).seq, "freeing undo header");
		self.nodes[id.index()] = None;
		self.free.push(id);
		self.num_heads -= 1;
	}

	/// Enforces the bounded-history policy: drops headers until at most
	/// `limit` remain, preferring whole alternate branches (the oldest one
	/// first) over nodes with descendants on the active branch.
	pub(crate) fn trim(&mut self, limit: i64, protected: &mut Option<NodeId>) {
		while self.num_heads as i64 > limit {
			let Some(mut victim) = self.oldhead else {
				break;
			};
			if Some(victim) == *protected {
				// The displaced branch itself is oldest; it cannot be
				// reattached once its root is gone.
				self.free_branch(victim, protected);
			} else if self.header(victim).alt_next.is_none() {
				self.free_header(victim, protected);
			} else {
				while let Some(alt) = self.header(victim).alt_next {
					victim = alt;
				}
				self.free_branch(victim, protected);
			}
			debug_assert!(self.consistency_error().is_none());
		}
	}

	/// Drops the whole tree and the single-line slot. Sequence and save
	/// counters are kept so later changes continue numbering.
	pub fn clear(&mut self) {
		self.nodes.clear();
		self.free.clear();
		self.oldhead = None;
		self.newhead = None;
		self.curhead = None;
		self.num_heads = 0;
		self.synced = true;
		self.line_slot = LineSlot::default();
	}

	// Debug self-check.

	/// Verifies the structural invariants of the tree: back-links are
	/// symmetric, `newhead` and `curhead` are reachable exactly once, and
	/// `num_heads` matches the reachable count. Returns a description of
	/// the first problem found.
	pub fn consistency_error(&self) -> Option<String> {
		let mut seen_newhead = 0usize;
		let mut seen_curhead = 0usize;
		let mut count = 0usize;
		if let Some(err) = self.check_subtree(
			self.oldhead,
			None,
			None,
			&mut count,
			&mut seen_newhead,
			&mut seen_curhead,
		) {
			return Some(err);
		}
		if seen_newhead == 0 && self.oldhead.is_some() && self.newhead.is_some() {
			return Some("newhead not reachable".to_owned());
		}
		if self.curhead.is_some() && seen_curhead == 0 {
			return Some("curhead not reachable".to_owned());
		}
		if count != self.num_heads {
			return Some(format!(
				"num_heads is {} but {} headers are reachable",
				self.num_heads, count
			));
		}
		None
	}

	fn check_subtree(
		&self,
		id: Option<NodeId>,
		exp_next: Option<NodeId>,
		exp_alt_prev: Option<NodeId>,
		count: &mut usize,
		seen_newhead: &mut usize,
		seen_curhead: &mut usize,
	) -> Option<String> {
		let Some(id) = id else {
			return None;
		};
		*count += 1;
		let h = self.header(id);
		if Some(id) == self.curhead {
			*seen_curhead += 1;
			if *seen_curhead > 1 {
				return Some("curhead found twice (looping?)".to_owned());
			}
		}
		if Some(id) == self.newhead {
			*seen_newhead += 1;
			if *seen_newhead > 1 {
				return Some("newhead found twice (looping?)".to_owned());
			}
		}
		if h.next != exp_next {
			return Some(format!("next link wrong on seq {}", h.seq));
		}
		if h.alt_prev != exp_alt_prev {
			return Some(format!("alt_prev link wrong on seq {}", h.seq));
		}
		if let Some(err) = self.check_subtree(
			h.alt_next,
			h.next,
			Some(id),
			count,
			seen_newhead,
			seen_curhead,
		) {
			return Some(err);
		}
		self.check_subtree(h.prev, Some(id), None, count, seen_newhead, seen_curhead)
	}
}
