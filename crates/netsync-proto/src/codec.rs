//! Primitive encoding helpers shared by all message types.
//!
//! Integers are big-endian. Strings are a `u16` byte length followed by
//! UTF-8 bytes.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Message is empty")]
    Empty,

    #[error("Unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    #[error("Message truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("String field too long: {0} bytes")]
    StringTooLong(usize),

    #[error("Too many list entries: {0}")]
    ListTooLong(usize),

    #[error("Unexpected trailing bytes: {0}")]
    TrailingBytes(usize),

    #[error("Invalid tag {tag} for {field}")]
    InvalidTag { field: &'static str, tag: u8 },

    #[error("Snapshot payload: {0}")]
    Snapshot(String),
}

/// Append-only byte buffer for encoding.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(msg_type: u8) -> Self {
        Self { buf: vec![msg_type] }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_str(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::StringTooLong(value.len()))?;
        self.put_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Presence byte (0 or 1) followed by the string when present.
    pub fn put_opt_str(&mut self, value: Option<&str>) -> Result<(), CodecError> {
        match value {
            Some(s) => {
                self.put_u8(1);
                self.put_str(s)
            }
            None => {
                self.put_u8(0);
                Ok(())
            }
        }
    }

    pub fn put_str_list(&mut self, values: &[String]) -> Result<(), CodecError> {
        let count = u16::try_from(values.len()).map_err(|_| CodecError::ListTooLong(values.len()))?;
        self.put_u16(count);
        for value in values {
            self.put_str(value)?;
        }
        Ok(())
    }

    /// `u32` length followed by raw bytes.
    pub fn put_blob(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(data.len()).map_err(|_| CodecError::ListTooLong(data.len()))?;
        self.put_u32(len);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded message.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
                needed,
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn opt_string(&mut self) -> Result<Option<String>, CodecError> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.string().map(Some),
            tag => Err(CodecError::InvalidTag {
                field: "optional string",
                tag,
            }),
        }
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.u16()? as usize;
        let mut values = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            values.push(self.string()?);
        }
        Ok(values)
    }

    pub fn blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Fails if any bytes were left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        let remaining = self.data.len() - self.offset;
        if remaining == 0 {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(remaining))
        }
    }
}
