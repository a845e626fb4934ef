//! The durable on-disk representation of an undo tree.
//!
//! All integers are big-endian; strings carry a 4-byte length prefix and no
//! terminator. Header links are stored as sequence numbers and swizzled
//! back to arena ids on load.
//!
//! ```text
//! file   ::= "Vim\x9fUnDo\xe5"  version(2)
//!            buffer-hash(32)  line-count(4)
//!            slot-text(string)  slot-lnum(4)  slot-col(4)
//!            oldhead(4) newhead(4) curhead(4)          // 0 = none
//!            num-heads(4) seq-last(4) seq-cur(4) time-cur(8)
//!            optional*  0x00
//!            header*  0xe7aa
//! header ::= 0x5fd0
//!            next(4) prev(4) alt-next(4) alt-prev(4) seq(4)
//!            cursor(12) cursor-vcol(4) flags(2)
//!            mark(12){26}  visual(32)  time(8)
//!            optional*  0x00
//!            ( 0xf518 entry )*  0x3581
//!            ( 0xf518 extmark )*  0x3581
//! entry  ::= top(4) bot(4) lcount(4) size(4) line(string){size}
//! optional ::= len(1) tag(1) payload(len)              // tag 1 = save nr
//! ```
//!
//! The buffer hash is SHA-256 over every line followed by a NUL byte; a
//! mismatch on load rejects the file without touching the in-memory tree.

mod codec;
mod read;
mod write;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Result, UndoError};
use crate::host::UndoHost;
use crate::tree::UndoTree;

/// Magic bytes at the start of an undofile.
pub const START_MAGIC: &[u8; 9] = b"Vim\x9fUnDo\xe5";
/// Format version.
pub const FILE_VERSION: u16 = 3;
/// Magic before each serialized header.
pub(crate) const HEADER_MAGIC: u16 = 0x5fd0;
/// Magic after the last header.
pub(crate) const HEADER_END_MAGIC: u16 = 0xe7aa;
/// Magic before each entry or extmark record.
pub(crate) const ENTRY_MAGIC: u16 = 0xf518;
/// Magic after the last entry of a list.
pub(crate) const ENTRY_END_MAGIC: u16 = 0x3581;
/// Optional-field tag for the save ordinal, in the file header and in each
/// change header.
pub(crate) const TAG_SAVE_NR: u8 = 1;
/// Extmark record tag for a splice delta.
pub(crate) const EXTMARK_TAG_SPLICE: i64 = 0;
/// Extmark record tag for a move delta.
pub(crate) const EXTMARK_TAG_MOVE: i64 = 1;
/// Size of the buffer hash.
pub const UNDO_HASH_SIZE: usize = 32;

/// Writes the tree to the undofile at `path`.
///
/// An existing file is only replaced when it carries the undofile magic,
/// unless `force` is set. Returns false when there is no undo information
/// and nothing was written (an existing undofile is still removed then).
///
/// # Errors
///
/// On a write failure the partial file is removed and the error reports the
/// path.
pub fn write_file(
	tree: &mut UndoTree,
	host: &mut impl UndoHost,
	path: &Path,
	force: bool,
) -> Result<bool> {
	let name = path.display().to_string();

	if path.exists() {
		if !force {
			let mut magic = [0u8; START_MAGIC.len()];
			let readable = File::open(path)
				.and_then(|mut f| f.read_exact(&mut magic))
				.is_ok();
			if !readable || magic != *START_MAGIC {
				return Err(UndoError::NotAnUndofile { path: name });
			}
		}
		std::fs::remove_file(path).map_err(|source| UndoError::Io {
			path: name.clone(),
			source,
		})?;
	}

	if tree.num_heads() == 0 && !tree.has_line_slot() {
		trace!(path = %name, "skipping undofile write, nothing to undo");
		return Ok(false);
	}

	let file = OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(path)
		.map_err(|source| UndoError::Io {
			path: name.clone(),
			source,
		})?;

	let result = (|| {
		let mut out = BufWriter::new(&file);
		tree.write_undofile(host, &mut out, &name)?;
		file.sync_all().map_err(|source| UndoError::Io {
			path: name.clone(),
			source,
		})
	})();

	if result.is_err() {
		let _ = std::fs::remove_file(path);
	}
	result.map(|_| true)
}

/// Reads the undofile at `path` into the tree. The existing tree is only
/// replaced when the whole file parses and matches the buffer.
pub fn read_file(tree: &mut UndoTree, host: &impl UndoHost, path: &Path) -> Result<()> {
	let name = path.display().to_string();
	let file = File::open(path).map_err(|source| UndoError::Io {
		path: name.clone(),
		source,
	})?;
	let mut input = BufReader::new(file);
	tree.read_undofile(host, &mut input, &name)
}

/// Resolves the undofile location for `ffname` from a comma-separated
/// directory list.
///
/// A `.` entry names a hidden sibling (`dir/name` becomes `dir/.name.un~`);
/// any other entry is a directory holding the full path with separators
/// replaced by `%`. When reading, the first existing file wins; when
/// writing, the first usable directory wins and the last listed directory
/// is created if none exists.
pub fn undofile_path(ffname: &Path, undodir: &str, reading: bool) -> Option<PathBuf> {
	let entries: Vec<&str> = undodir.split(',').filter(|entry| !entry.is_empty()).collect();
	for (index, entry) in entries.iter().enumerate() {
		let candidate = if *entry == "." {
			ffname.file_name().map(|name| {
				let mut hidden = ffname.to_path_buf();
				hidden.set_file_name(format!(".{}.un~", name.to_string_lossy()));
				hidden
			})
		} else {
			let dir = Path::new(entry.trim_end_matches(std::path::is_separator));
			let mut has_directory = dir.is_dir();
			if !has_directory && index == entries.len() - 1 && !reading {
				has_directory = std::fs::create_dir_all(dir).is_ok();
			}
			if has_directory {
				let munged: String = ffname
					.to_string_lossy()
					.chars()
					.map(|c| if std::path::is_separator(c) { '%' } else { c })
					.collect();
				Some(dir.join(munged))
			} else {
				None
			}
		};
		if let Some(candidate) = candidate {
			if !reading || candidate.exists() {
				return Some(candidate);
			}
		}
	}
	None
}
