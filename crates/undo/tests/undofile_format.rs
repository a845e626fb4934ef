//! Byte-level and filesystem-level checks of the undofile format.

use std::io::Cursor;

use rstest::rstest;
use xeno_undo::testing::MemoryBuffer;
use xeno_undo::{
	undofile, ExtmarkDelta, ExtmarkSplice, ReplayDirection, UndoError, UndoHost, UndoTree,
};

fn setup(lines: &[&str]) -> (UndoTree, MemoryBuffer) {
	(UndoTree::new(), MemoryBuffer::from_lines(lines))
}

fn serialized_two_changes() -> (UndoTree, MemoryBuffer, Vec<u8>) {
	let (mut tree, mut buf) = setup(&["a", "b", "c"]);
	buf.edit_replace(&mut tree, 2, "B");
	tree.sync(&buf);
	buf.edit_replace(&mut tree, 3, "C");
	tree.sync(&buf);
	let mut bytes = Vec::new();
	tree.write_undofile(&mut buf, &mut bytes, "mem").expect("write");
	(tree, buf, bytes)
}

#[test]
fn file_starts_with_magic_and_version() {
	let (_, _, bytes) = serialized_two_changes();
	assert_eq!(&bytes[..9], b"Vim\x9fUnDo\xe5");
	assert_eq!(&bytes[9..11], &[0x00, 0x03]);
	// 32 hash bytes, then the big-endian line count.
	assert_eq!(&bytes[43..47], &[0, 0, 0, 3]);
	// The stream ends with the end-of-headers magic.
	assert_eq!(&bytes[bytes.len() - 2..], &[0xe7, 0xaa]);
}

#[test]
fn garbage_is_not_an_undofile() {
	let (mut tree, buf) = setup(&["a"]);
	let err = tree
		.read_undofile(&buf, &mut Cursor::new(b"garbage".as_slice()), "mem")
		.unwrap_err();
	assert!(matches!(err, UndoError::NotAnUndofile { .. }));
}

#[test]
fn wrong_version_is_rejected() {
	let (mut tree, buf) = setup(&["a"]);
	let mut bytes = b"Vim\x9fUnDo\xe5".to_vec();
	bytes.extend_from_slice(&[0x00, 0x02]);
	let err = tree
		.read_undofile(&buf, &mut Cursor::new(&bytes), "mem")
		.unwrap_err();
	assert!(matches!(err, UndoError::IncompatibleVersion { .. }));
}

#[rstest]
#[case::in_file_header(60)]
#[case::in_first_header(120)]
#[case::near_the_end(2)]
fn truncated_files_are_corrupt(#[case] cut_from_end: usize) {
	let (_, buf, bytes) = serialized_two_changes();
	let mut tree = UndoTree::new();
	let cut = bytes.len().saturating_sub(cut_from_end);
	let err = tree
		.read_undofile(&buf, &mut Cursor::new(&bytes[..cut]), "mem")
		.unwrap_err();
	assert!(matches!(err, UndoError::Corrupt { .. }));
	assert_eq!(tree.num_heads(), 0);
}

#[test]
fn broken_end_marker_is_corrupt() {
	let (_, buf, mut bytes) = serialized_two_changes();
	let mut tree = UndoTree::new();
	let len = bytes.len();
	bytes[len - 2] = 0x12;
	bytes[len - 1] = 0x34;
	let err = tree
		.read_undofile(&buf, &mut Cursor::new(&bytes), "mem")
		.unwrap_err();
	assert!(matches!(
		err,
		UndoError::Corrupt {
			reason: "end marker",
			..
		}
	));
}

#[test]
fn duplicate_sequence_numbers_are_corrupt() {
	let (_, buf, mut bytes) = serialized_two_changes();

	// Find the serialized headers by their magic and overwrite the second
	// header's sequence number with the first one's. The sequence field
	// sits behind the magic and the four link fields.
	let header_offsets: Vec<usize> = (47..bytes.len() - 1)
		.filter(|&i| bytes[i] == 0x5f && bytes[i + 1] == 0xd0)
		.collect();
	assert_eq!(header_offsets.len(), 2);
	let seq_field = |offset: usize| offset + 2 + 16;
	let first_seq = bytes[seq_field(header_offsets[0])..seq_field(header_offsets[0]) + 4].to_vec();
	let target = seq_field(header_offsets[1]);
	bytes[target..target + 4].copy_from_slice(&first_seq);

	let mut tree = UndoTree::new();
	let err = tree
		.read_undofile(&buf, &mut Cursor::new(&bytes), "mem")
		.unwrap_err();
	assert!(matches!(
		err,
		UndoError::Corrupt {
			reason: "duplicate uh_seq",
			..
		}
	));
}

#[test]
fn extmark_deltas_survive_the_round_trip() {
	let (mut tree, mut buf) = setup(&["a"]);
	buf.edit_replace(&mut tree, 1, "A");
	let delta = ExtmarkDelta::Splice(ExtmarkSplice {
		start_row: 1,
		start_col: 2,
		old_row: 0,
		old_col: 3,
		old_byte: 70_000,
		new_row: 0,
		new_col: 5,
		new_byte: 4,
	});
	tree.push_extmark_delta(&mut buf, delta);
	tree.sync(&buf);

	let mut bytes = Vec::new();
	tree.write_undofile(&mut buf, &mut bytes, "mem").expect("write");
	tree.clear();
	tree.read_undofile(&buf, &mut Cursor::new(&bytes), "mem")
		.expect("read");

	tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(buf.extmark_log, [(delta, ReplayDirection::Undo)]);
}

#[test]
fn line_slot_survives_the_round_trip() {
	let (mut tree, mut buf) = setup(&["a", "b"]);
	tree.save_line_for_undo(&buf, 2);
	buf.replace_line(2, b"B");

	let mut bytes = Vec::new();
	tree.write_undofile(&mut buf, &mut bytes, "mem").expect("write");
	tree.clear();
	assert!(!tree.has_line_slot());
	tree.read_undofile(&buf, &mut Cursor::new(&bytes), "mem")
		.expect("read");
	assert!(tree.has_line_slot());

	tree.swap_line_slot(&mut buf).expect("swap");
	assert_eq!(buf.text(), ["a", "b"]);
}

#[test]
fn write_file_and_read_file_round_trip() {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("buffer.un~");
	let (mut tree, mut buf) = setup(&["a", "b"]);
	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);

	assert!(undofile::write_file(&mut tree, &mut buf, &path, false).expect("write"));
	assert!(path.exists());

	tree.clear();
	undofile::read_file(&mut tree, &buf, &path).expect("read");
	assert_eq!(tree.num_heads(), 1);
	tree.undo(&mut buf, 1).expect("undo");
	assert_eq!(buf.text(), ["a", "b"]);
}

#[test]
fn write_file_skips_when_there_is_nothing_to_undo() {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("buffer.un~");
	let (mut tree, mut buf) = setup(&["a"]);
	assert!(!undofile::write_file(&mut tree, &mut buf, &path, false).expect("write"));
	assert!(!path.exists());
}

#[test]
fn write_file_refuses_to_replace_a_foreign_file() {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("notes.txt");
	std::fs::write(&path, "do not clobber").expect("seed file");

	let (mut tree, mut buf) = setup(&["a"]);
	buf.edit_replace(&mut tree, 1, "A");
	tree.sync(&buf);

	let err = undofile::write_file(&mut tree, &mut buf, &path, false).unwrap_err();
	assert!(matches!(err, UndoError::NotAnUndofile { .. }));
	assert_eq!(std::fs::read_to_string(&path).expect("read"), "do not clobber");

	// Forcing replaces it.
	assert!(undofile::write_file(&mut tree, &mut buf, &path, true).expect("write"));
	undofile::read_file(&mut UndoTree::new(), &buf, &path).expect("read");
}
