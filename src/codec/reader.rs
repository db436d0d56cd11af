//! Bounds-checked little-endian reader over raw account bytes.

use thiserror::Error;

use solana_sdk::pubkey::Pubkey;

/// Errors raised while reading raw account bytes.
///
/// Every variant carries the cursor offset so a failed decode can be
/// located inside the account data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The read would run past the end of the buffer.
    #[error("buffer too short at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    BufferTooShort {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// An optional field carried a presence tag other than 0 or 1.
    #[error("invalid option tag {tag} at offset {offset}")]
    InvalidOptionTag { offset: usize, tag: u8 },

    /// The bytes do not match the decoder's expected layout.
    #[error("{account_type}: {reason}")]
    LayoutMismatch {
        account_type: &'static str,
        reason: String,
    },
}

/// Sequential reader over `&[u8]` with an explicit cursor.
///
/// All multi-byte integers are little-endian, matching on-chain account
/// layouts. Reads never panic; running past the end yields
/// [`DecodeError::BufferTooShort`].
///
/// # Example
///
/// ```
/// use weathervane::codec::ByteReader;
///
/// let data = [7u8, 0, 0, 0, 1];
/// let mut reader = ByteReader::new(&data);
/// assert_eq!(reader.read_u32().unwrap(), 7);
/// assert!(reader.read_bool().unwrap());
/// assert!(reader.is_empty());
/// ```
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once the cursor reaches the end.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `needed` bytes, advancing the cursor.
    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        if needed > self.remaining() {
            return Err(DecodeError::BufferTooShort {
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Reads a single byte as a boolean; any nonzero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a 32-byte public key.
    pub fn read_pubkey(&mut self) -> Result<Pubkey, DecodeError> {
        Ok(Pubkey::new_from_array(self.take_array::<32>()?))
    }

    /// Reads a fixed-size string field of `len` bytes, truncated at the
    /// first NUL.
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end])
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Reads a u32-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Reads a u32-count-prefixed sequence, calling `read_element` per
    /// element.
    ///
    /// The count is untrusted input, so no preallocation happens from it;
    /// a garbage count fails on the first out-of-bounds element instead.
    pub fn read_vec<T, F>(&mut self, mut read_element: F) -> Result<Vec<T>, DecodeError>
    where
        F: FnMut(&mut Self) -> Result<T, DecodeError>,
    {
        let count = self.read_u32()?;
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(read_element(self)?);
        }
        Ok(out)
    }

    /// Reads an optional value behind a 1-byte presence tag
    /// (0 = absent, 1 = present).
    pub fn read_option<T, F>(&mut self, read_value: F) -> Result<Option<T>, DecodeError>
    where
        F: FnOnce(&mut Self) -> Result<T, DecodeError>,
    {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(None),
            1 => read_value(self).map(Some),
            tag => Err(DecodeError::InvalidOptionTag { offset, tag }),
        }
    }
}
