//! Decoder for the kernel change-notification record stream.
//!
//! A read from an inotify descriptor returns a packed sequence of records,
//! each a fixed 16-byte header (`wd`, `mask`, `cookie`, `len`, native
//! endian) followed by `len` bytes of NUL-padded entry name. [`RecordDecoder`]
//! walks such a buffer, checks every header and name field against the
//! buffer bounds, and yields the records that carry a name.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;

use crate::error::{CollectorError, Result};

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 16;

/// Longest name the kernel will report (`NAME_MAX`), plus its terminator.
pub const MAX_NAME_LEN: usize = 256;

/// Event mask bits.
pub mod mask {
    pub const CREATE: u32 = 0x0000_0100;
    pub const Q_OVERFLOW: u32 = 0x0000_4000;
    pub const IGNORED: u32 = 0x0000_8000;
    pub const ISDIR: u32 = 0x4000_0000;
}

/// One decoded notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub watch: i32,
    pub mask: u32,
    pub cookie: u32,
    pub name: OsString,
}

impl EventRecord {
    pub fn is_create(&self) -> bool {
        self.mask & mask::CREATE != 0
    }

    pub fn is_dir(&self) -> bool {
        self.mask & mask::ISDIR != 0
    }
}

/// Iterator over the named records in one read buffer.
///
/// Yields `Err` once and then stops if the buffer is malformed.
#[derive(Debug)]
pub struct RecordDecoder<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    fn fail(&mut self, reason: &'static str) -> Option<Result<EventRecord>> {
        self.failed = true;
        Some(Err(CollectorError::Decode {
            offset: self.offset,
            reason,
        }))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}

impl Iterator for RecordDecoder<'_> {
    type Item = Result<EventRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed || self.offset >= self.buf.len() {
                return None;
            }

            let rest = &self.buf[self.offset..];
            if rest.len() < HEADER_LEN {
                return self.fail("truncated record header");
            }

            let watch = read_u32(rest, 0) as i32;
            let mask = read_u32(rest, 4);
            let cookie = read_u32(rest, 8);
            let name_len = read_u32(rest, 12) as usize;

            let Some(record_len) = HEADER_LEN.checked_add(name_len) else {
                return self.fail("name length overflows");
            };
            if record_len > rest.len() {
                return self.fail("name field exceeds buffer");
            }

            let padded = &rest[HEADER_LEN..record_len];
            let name = match padded.iter().position(|&b| b == 0) {
                Some(end) => &padded[..end],
                None => padded,
            };
            self.offset += record_len;

            // Records about the watch itself (overflow, removal) carry no name.
            if name.is_empty() {
                continue;
            }

            return Some(Ok(EventRecord {
                watch,
                mask,
                cookie,
                name: OsString::from_vec(name.to_vec()),
            }));
        }
    }
}
