//! End-to-end behavior of the undo engine against an in-memory buffer.

use std::io::Cursor;

use xeno_undo::testing::MemoryBuffer;
use xeno_undo::{NavigateUnit, UndoError, UndoHost, UndoTree};

fn setup(lines: &[&str]) -> (UndoTree, MemoryBuffer) {
	(UndoTree::new(), MemoryBuffer::from_lines(lines))
}

/// Replace line 2 and line 3 as two separate change steps, then walk the
/// linear history in both directions.
#[test]
fn linear_undo_redo() {
	let (mut tree, mut buf) = setup(&["a", "b", "c"]);
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);
	buf.edit_replace(&mut tree, 3, "C");
	tree.sync(&buf);
	assert_eq!(buf.text(), ["a", "B", "C"]);
	assert_eq!(tree.seq_cur(), 2);

	tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(buf.text(), ["a", "B", "c"]);
	assert_eq!(tree.seq_cur(), 1);

	tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(buf.text(), ["a", "b", "c"]);
	assert_eq!(tree.seq_cur(), 0);

	tree.redo(&mut buf, 2).expect("redo");
	assert_eq!(buf.text(), ["a", "B", "C"]);
	assert_eq!(tree.seq_cur(), 2);
}

/// Editing below the leaf preserves the displaced future as an alternate
/// branch instead of discarding it.
#[test]
fn divergent_edit_keeps_both_futures() {
	let (mut tree, mut buf) = setup(&["a", "b", "c"]);
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);
	buf.edit_replace(&mut tree, 3, "C");
	tree.sync(&buf);
	tree.undo(&mut buf, 2).expect("undo");
	assert_eq!(buf.text(), ["a", "b", "c"]);

	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);
	assert_eq!(tree.seq_cur(), 3);
	assert_eq!(tree.num_heads(), 3);

	let leaves = tree.list_leaves();
	let seqs: Vec<i64> = leaves.iter().map(|leaf| leaf.seq).collect();
	assert_eq!(seqs, [2, 3]);
	assert!(tree.consistency_error().is_none());

	// Both futures stay reachable.
	tree.navigate(&mut buf, 2, NavigateUnit::Absolute).expect("navigate");
	assert_eq!(buf.text(), ["a", "B", "C"]);
	tree.navigate(&mut buf, 3, NavigateUnit::Absolute).expect("navigate");
	assert_eq!(buf.text(), ["A", "b", "c"]);
}

/// Six unsynced overwrites of one line collapse into a single pre-image.
#[test]
fn single_line_overwrites_coalesce() {
	let (mut tree, mut buf) = setup(&["1", "2", "3", "4", "before", "6"]);
	for round in 0..6 {
		buf.edit_replace(&mut tree, 5, &format!("after-{round}"));
	}
	tree.sync(&buf);

	let summary = tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(summary.lines_removed, 1);
	assert_eq!(summary.lines_added, 1);
	assert_eq!(buf.text()[4], "before");
}

/// Going back eight seconds lands on the state whose creation time is
/// nearest on the old side of the target.
#[test]
fn time_navigation_finds_the_nearest_state() {
	let (mut tree, mut buf) = setup(&["a", "b", "c"]);
	buf.clock = 1000;
	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);
	buf.clock = 1003;
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);
	buf.clock = 1020;
	buf.edit_replace(&mut tree, 3, "C");
	tree.sync(&buf);

	let summary = tree
		.navigate(&mut buf, -8, NavigateUnit::Seconds)
		.expect("earlier");
	assert_eq!(tree.seq_cur(), 2);
	assert_eq!(buf.text(), ["A", "B", "c"]);
	assert!(summary.did_undo);

	// And forward again to the newest state.
	tree.navigate(&mut buf, 30, NavigateUnit::Seconds).expect("later");
	assert_eq!(tree.seq_cur(), 3);
	assert_eq!(buf.text(), ["A", "B", "C"]);
}

/// Stepping back by file writes visits each save point in turn.
#[test]
fn save_navigation_steps_between_writes() {
	let (mut tree, mut buf) = setup(&["line"]);
	for round in 1..=9 {
		buf.edit_replace(&mut tree, 1, &format!("v{round}"));
		tree.sync(&buf);
		if round == 3 || round == 7 {
			buf.set_changed(false);
			tree.mark_all_changed();
			tree.bump_save_nr();
		}
	}
	assert_eq!(tree.seq_cur(), 9);
	assert_eq!(tree.save_nr_last(), 2);

	tree.navigate(&mut buf, -1, NavigateUnit::Saves).expect("earlier 1f");
	assert_eq!(tree.seq_cur(), 7);
	assert_eq!(buf.text(), ["v7"]);
	assert_eq!(tree.save_nr_cur(), 2);

	tree.navigate(&mut buf, -1, NavigateUnit::Saves).expect("earlier 1f");
	assert_eq!(tree.seq_cur(), 3);
	assert_eq!(buf.text(), ["v3"]);

	// Forward one write returns to the later save point.
	tree.navigate(&mut buf, 1, NavigateUnit::Saves).expect("later 1f");
	assert_eq!(tree.seq_cur(), 7);
	assert_eq!(buf.text(), ["v7"]);
}

/// The serialized tree survives a round trip and refuses a changed buffer.
#[test]
fn persistence_round_trip_and_hash_check() {
	let (mut tree, mut buf) = setup(&["a", "b", "c"]);
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);
	buf.edit_replace(&mut tree, 3, "C");
	tree.sync(&buf);
	tree.undo(&mut buf, 2).expect("undo");
	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);

	let mut serialized = Vec::new();
	tree.write_undofile(&mut buf, &mut serialized, "mem")
		.expect("write");

	let shape_before = tree.eval_tree();
	let heads_before = tree.num_heads();

	tree.clear();
	assert_eq!(tree.num_heads(), 0);
	tree.read_undofile(&buf, &mut Cursor::new(&serialized), "mem")
		.expect("read");

	assert_eq!(tree.num_heads(), heads_before);
	assert_eq!(tree.seq_cur(), 3);
	assert_eq!(tree.newhead_seq(), Some(3));
	assert_eq!(tree.oldhead_seq(), Some(3));
	assert_eq!(tree.eval_tree(), shape_before);
	assert!(tree.consistency_error().is_none());

	// The restored history replays.
	tree.navigate(&mut buf, 2, NavigateUnit::Absolute).expect("navigate");
	assert_eq!(buf.text(), ["a", "B", "C"]);

	// A buffer that changed since the write is rejected untouched.
	let (mut fresh, other) = setup(&["a", "b", "x"]);
	let err = fresh
		.read_undofile(&other, &mut Cursor::new(&serialized), "mem")
		.unwrap_err();
	assert!(matches!(err, UndoError::ContentMismatch));
	assert_eq!(fresh.num_heads(), 0);
}

/// The scripting readout mirrors the tree structure.
#[test]
fn eval_tree_shape() {
	let (mut tree, mut buf) = setup(&["a", "b"]);
	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);
	tree.undo(&mut buf, 1).expect("undo");
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);

	let value = tree.eval_tree();
	assert_eq!(value["seq_last"], 2);
	assert_eq!(value["seq_cur"], 2);
	assert_eq!(value["synced"], 1);
	let entries = value["entries"].as_array().expect("entries");
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0]["seq"], 2);
	assert_eq!(entries[0]["newhead"], 1);
	let alt = entries[0]["alt"].as_array().expect("alt");
	assert_eq!(alt[0]["seq"], 1);
}

/// Undoing a whole-buffer reload step places the cursor on the first
/// changed line.
#[test]
fn reload_capture_finds_first_changed_line() {
	let (mut tree, mut buf) = setup(&["one", "two", "three"]);
	let past_end = buf.line_count() + 1;
	tree.record_change(&mut buf, 0, past_end, 0, true)
		.expect("capture");
	buf.replace_line(2, b"TWO");
	tree.sync(&buf);
	tree.find_first_changed(&buf);

	tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(buf.text(), ["one", "two", "three"]);
	assert_eq!(buf.cursor().lnum, 2);
}
