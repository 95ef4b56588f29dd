//! lib0 binary encoding used by the sync and awareness frames.
//!
//! The var-int, var-buf and var-string primitives come from `yrs`; these
//! wrappers fix the integer width to `u64` and turn decoding failures into
//! protocol errors.

use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

use crate::models::CollabError;

#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_var_uint(&mut self, value: u64) {
        self.buf.write_var(value);
    }

    pub fn write_var_buf(&mut self, bytes: &[u8]) {
        self.buf.write_buf(bytes);
    }

    pub fn write_var_string(&mut self, s: &str) {
        self.buf.write_string(s);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub struct Decoder<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(buf) }
    }

    pub fn read_var_uint(&mut self) -> Result<u64, CollabError> {
        self.cursor
            .read_var::<u64>()
            .map_err(|e| CollabError::Protocol(format!("invalid var-uint: {}", e)))
    }

    pub fn read_var_buf(&mut self) -> Result<&[u8], CollabError> {
        self.cursor
            .read_buf()
            .map_err(|e| CollabError::Protocol(format!("invalid var-buf: {}", e)))
    }

    /// Strings are checked for valid utf-8 before they are handed out.
    pub fn read_var_string(&mut self) -> Result<&str, CollabError> {
        let bytes = self.read_var_buf()?;
        std::str::from_utf8(bytes).map_err(|e| CollabError::Protocol(format!("invalid utf-8 string: {}", e)))
    }
}
