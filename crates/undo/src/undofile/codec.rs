//! Big-endian primitives for the undofile format.
//!
//! Every multi-byte integer on disk is big-endian. Four-byte fields carry
//! 32-bit two's-complement values, times are 8-byte signed seconds, strings
//! are 4-byte length prefixed with no terminator.

use std::io::{Read, Write};

use crate::error::{Result, UndoError};

pub(crate) struct ByteWriter<'a, W: Write + ?Sized> {
	out: &'a mut W,
	path: &'a str,
}

impl<'a, W: Write + ?Sized> ByteWriter<'a, W> {
	pub(crate) fn new(out: &'a mut W, path: &'a str) -> Self {
		Self { out, path }
	}

	pub(crate) fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
		self.out.write_all(bytes).map_err(|source| UndoError::Io {
			path: self.path.to_owned(),
			source,
		})
	}

	pub(crate) fn u8(&mut self, value: u8) -> Result<()> {
		self.bytes(&[value])
	}

	pub(crate) fn u16(&mut self, value: u16) -> Result<()> {
		self.bytes(&value.to_be_bytes())
	}

	/// Writes the low 32 bits of `value`, so -1 round-trips as a 4-byte
	/// field.
	pub(crate) fn u32(&mut self, value: i64) -> Result<()> {
		self.bytes(&(value as u32).to_be_bytes())
	}

	/// Full 8-byte signed value, used for times and byte counts.
	pub(crate) fn i64(&mut self, value: i64) -> Result<()> {
		self.bytes(&value.to_be_bytes())
	}

	/// Length-prefixed byte string.
	pub(crate) fn string(&mut self, value: &[u8]) -> Result<()> {
		self.u32(value.len() as i64)?;
		if !value.is_empty() {
			self.bytes(value)?;
		}
		Ok(())
	}

	pub(crate) fn flush(&mut self) -> Result<()> {
		self.out.flush().map_err(|source| UndoError::Io {
			path: self.path.to_owned(),
			source,
		})
	}
}

pub(crate) struct ByteReader<'a, R: Read + ?Sized> {
	input: &'a mut R,
	path: &'a str,
}

impl<'a, R: Read + ?Sized> ByteReader<'a, R> {
	pub(crate) fn new(input: &'a mut R, path: &'a str) -> Self {
		Self { input, path }
	}

	pub(crate) fn corrupt(&self, reason: &'static str) -> UndoError {
		UndoError::Corrupt {
			reason,
			path: self.path.to_owned(),
		}
	}

	pub(crate) fn exact(&mut self, buf: &mut [u8]) -> Result<()> {
		self.input.read_exact(buf).map_err(|source| {
			if source.kind() == std::io::ErrorKind::UnexpectedEof {
				self.corrupt("truncated")
			} else {
				UndoError::Io {
					path: self.path.to_owned(),
					source,
				}
			}
		})
	}

	pub(crate) fn u8(&mut self) -> Result<u8> {
		let mut buf = [0u8; 1];
		self.exact(&mut buf)?;
		Ok(buf[0])
	}

	pub(crate) fn u16(&mut self) -> Result<u16> {
		let mut buf = [0u8; 2];
		self.exact(&mut buf)?;
		Ok(u16::from_be_bytes(buf))
	}

	/// Reads a 4-byte field as a signed 32-bit value.
	pub(crate) fn u32(&mut self) -> Result<i64> {
		let mut buf = [0u8; 4];
		self.exact(&mut buf)?;
		Ok(i32::from_be_bytes(buf) as i64)
	}

	/// Full 8-byte signed value, used for times and byte counts.
	pub(crate) fn i64(&mut self) -> Result<i64> {
		let mut buf = [0u8; 8];
		self.exact(&mut buf)?;
		Ok(i64::from_be_bytes(buf))
	}

	pub(crate) fn string(&mut self, len: usize) -> Result<Vec<u8>> {
		let mut buf = vec![0u8; len];
		self.exact(&mut buf)?;
		Ok(buf)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn integers_round_trip_big_endian() {
		let mut buf = Vec::new();
		{
			let mut w = ByteWriter::new(&mut buf, "test");
			w.u16(0x5fd0).unwrap();
			w.u32(-1).unwrap();
			w.u32(42).unwrap();
			w.i64(-3).unwrap();
			w.string(b"abc").unwrap();
		}
		assert_eq!(&buf[..2], &[0x5f, 0xd0]);
		assert_eq!(&buf[2..6], &[0xff, 0xff, 0xff, 0xff]);

		let mut cursor = Cursor::new(buf);
		let mut r = ByteReader::new(&mut cursor, "test");
		assert_eq!(r.u16().unwrap(), 0x5fd0);
		assert_eq!(r.u32().unwrap(), -1);
		assert_eq!(r.u32().unwrap(), 42);
		assert_eq!(r.i64().unwrap(), -3);
		let len = r.u32().unwrap();
		assert_eq!(r.string(len as usize).unwrap(), b"abc");
	}

	#[test]
	fn short_read_is_reported_as_truncated() {
		let mut cursor = Cursor::new(vec![0u8; 2]);
		let mut r = ByteReader::new(&mut cursor, "test");
		let err = r.u32().unwrap_err();
		assert!(matches!(err, UndoError::Corrupt { reason: "truncated", .. }));
	}
}
