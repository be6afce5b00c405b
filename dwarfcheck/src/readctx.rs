//! Bounded byte cursor over a section slice.
//!
//! All section readers in this crate consume their bytes through a
//! [`ReadCtx`]: a window into an immutable byte slice with a current
//! position. Offsets reported in diagnostics are always relative to the
//! window's beginning, so sub-cursors either rebase their window (CU
//! contexts, location expressions) or keep the parent's base (line tables).
//!
//! Every reader returns `None` when the window runs out; callers turn that
//! into the appropriate diagnostic. The LEB128 readers additionally report
//! whether the encoding spent more bytes than the value needs, which feeds
//! the "encoded as" bloat messages.

/// A bounded, endian-aware read cursor.
#[derive(Clone, Debug)]
pub struct ReadCtx<'data> {
    data: &'data [u8],
    pos: usize,
    little_endian: bool,
}

/// Result of a LEB128 read: the value plus a flag that is true when the
/// encoding used more bytes than necessary for the magnitude.
pub type Leb128<T> = (T, bool);

impl<'data> ReadCtx<'data> {
    /// Creates a cursor over the whole slice, positioned at its beginning.
    pub fn new(data: &'data [u8], little_endian: bool) -> Self {
        ReadCtx {
            data,
            pos: 0,
            little_endian,
        }
    }

    /// Current offset from the beginning of the window.
    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    /// Moves the cursor to an absolute offset within the window.
    pub fn seek(&mut self, offset: u64) -> Option<()> {
        if offset <= self.data.len() as u64 {
            self.pos = offset as usize;
            Some(())
        } else {
            None
        }
    }

    /// True once the cursor has consumed the whole window.
    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// True if at least `n` more bytes can be read.
    pub fn need(&self, n: u64) -> bool {
        (self.data.len() - self.pos) as u64 >= n
    }

    /// Number of bytes left in the window.
    pub fn remaining(&self) -> u64 {
        (self.data.len() - self.pos) as u64
    }

    /// Size of the whole window.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw bytes of the whole window.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// Advances the cursor by `n` bytes.
    pub fn skip(&mut self, n: u64) -> Option<()> {
        if self.need(n) {
            self.pos += n as usize;
            Some(())
        } else {
            None
        }
    }

    /// A sub-cursor over `[begin, end)` of this window, rebased so that its
    /// offsets start at zero. The cursor starts at the sub-window's
    /// beginning.
    pub fn sub(&self, begin: u64, end: u64) -> Option<ReadCtx<'data>> {
        if begin > end || end > self.data.len() as u64 {
            return None;
        }
        Some(ReadCtx {
            data: &self.data[begin as usize..end as usize],
            pos: 0,
            little_endian: self.little_endian,
        })
    }

    /// A sub-cursor covering the next `len` bytes, rebased to zero. The
    /// parent cursor is not advanced.
    pub fn sub_here(&self, len: u64) -> Option<ReadCtx<'data>> {
        let begin = self.pos as u64;
        self.sub(begin, begin.checked_add(len)?)
    }

    /// A cursor sharing this window's base but truncated to end at `end`.
    /// The position is preserved. Used where diagnostics must keep reporting
    /// window-absolute offsets.
    pub fn truncated(&self, end: u64) -> Option<ReadCtx<'data>> {
        if end < self.pos as u64 || end > self.data.len() as u64 {
            return None;
        }
        Some(ReadCtx {
            data: &self.data[..end as usize],
            pos: self.pos,
            little_endian: self.little_endian,
        })
    }

    fn take(&mut self, n: usize) -> Option<&'data [u8]> {
        let bytes = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Reads a 2-byte integer in the file's byte order.
    pub fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    /// Reads a 4-byte integer in the file's byte order.
    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    /// Reads an 8-byte integer in the file's byte order.
    pub fn read_u64(&mut self) -> Option<u64> {
        let bytes = self.take(8)?.try_into().ok()?;
        Some(if self.little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        })
    }

    /// Reads a DWARF offset: 8 bytes in 64-bit DWARF, otherwise 4.
    pub fn read_offset(&mut self, is_64: bool) -> Option<u64> {
        if is_64 {
            self.read_u64()
        } else {
            self.read_u32().map(u64::from)
        }
    }

    /// Reads an integer of the given byte width (1, 2, 4 or 8).
    pub fn read_var(&mut self, width: u8) -> Option<u64> {
        match width {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => None,
        }
    }

    /// Reads an unsigned LEB128 value.
    ///
    /// The flag in the result is true when the encoding carried redundant
    /// trailing bytes. Values wider than 64 bits fail.
    pub fn read_uleb128(&mut self) -> Option<Leb128<u64>> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        let mut size = 0usize;
        loop {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7f);
            if shift >= 64 || (shift == 63 && payload > 1) {
                if payload != 0 {
                    return None;
                }
            } else {
                result |= payload << shift;
            }
            shift += 7;
            size += 1;
            if byte & 0x80 == 0 {
                let bloat = size > 1 && payload == 0;
                return Some((result, bloat));
            }
        }
    }

    /// Reads a signed LEB128 value. Same bloat contract as
    /// [`read_uleb128`](Self::read_uleb128).
    pub fn read_sleb128(&mut self) -> Option<Leb128<i64>> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut size = 0usize;
        let mut prev: u8 = 0;
        loop {
            let byte = self.read_u8()?;
            let payload = byte & 0x7f;
            if shift < 64 {
                result |= i64::from(payload) << shift;
            }
            shift += 7;
            size += 1;
            if byte & 0x80 == 0 {
                if shift < 64 && payload & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                // The last byte is redundant if it only repeats the sign of
                // the byte before it.
                let bloat = size > 1
                    && ((payload == 0 && prev & 0x40 == 0)
                        || (payload == 0x7f && prev & 0x40 != 0));
                return Some((result, bloat));
            }
            prev = payload;
        }
    }

    /// Reads a NUL-terminated string, returning its bytes without the
    /// terminator. No copy is made.
    pub fn read_str(&mut self) -> Option<&'data [u8]> {
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0)?;
        self.pos += nul + 1;
        Some(&rest[..nul])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width() {
        let mut ctx = ReadCtx::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06], true);
        assert_eq!(ctx.read_u16(), Some(0x0201));
        assert_eq!(ctx.read_u32(), Some(0x06050403));
        assert_eq!(ctx.offset(), 6);
        assert!(ctx.eof());
        assert_eq!(ctx.read_u8(), None);

        let mut ctx = ReadCtx::new(&[0x01, 0x02, 0x03, 0x04], false);
        assert_eq!(ctx.read_u32(), Some(0x01020304));
    }

    #[test]
    fn test_offset_width() {
        let data = [0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00];
        let mut ctx = ReadCtx::new(&data, true);
        assert_eq!(ctx.read_offset(false), Some(0x12345678));
        ctx.seek(0).unwrap();
        assert_eq!(ctx.read_offset(true), Some(0x12345678));
    }

    #[test]
    fn test_uleb128() {
        let cases: &[(&[u8], u64, bool)] = &[
            (&[0x00], 0, false),
            (&[0x7f], 0x7f, false),
            (&[0x80, 0x01], 0x80, false),
            (&[0xae, 0x57], 0x2bae, false),
            // Redundant continuation: 0x7f encoded on two bytes.
            (&[0xff, 0x00], 0x7f, true),
        ];
        for &(bytes, value, bloat) in cases {
            let mut ctx = ReadCtx::new(bytes, true);
            assert_eq!(ctx.read_uleb128(), Some((value, bloat)), "{bytes:?}");
            assert!(ctx.eof());
        }

        // Runaway encoding without a final byte.
        let mut ctx = ReadCtx::new(&[0x80, 0x80, 0x80], true);
        assert_eq!(ctx.read_uleb128(), None);
    }

    #[test]
    fn test_sleb128() {
        let cases: &[(&[u8], i64, bool)] = &[
            (&[0x00], 0, false),
            (&[0x02], 2, false),
            (&[0x7e], -2, false),
            (&[0xff, 0x00], 127, false),
            (&[0x80, 0x7f], -128, false),
            // -1 encoded on two bytes.
            (&[0xff, 0x7f], -1, true),
            // 1 encoded on two bytes.
            (&[0x81, 0x00], 1, true),
        ];
        for &(bytes, value, bloat) in cases {
            let mut ctx = ReadCtx::new(bytes, true);
            assert_eq!(ctx.read_sleb128(), Some((value, bloat)), "{bytes:?}");
        }
    }

    #[test]
    fn test_read_str() {
        let mut ctx = ReadCtx::new(b"foo\0bar\0tail", true);
        assert_eq!(ctx.read_str(), Some(&b"foo"[..]));
        assert_eq!(ctx.read_str(), Some(&b"bar"[..]));
        // No terminator in the remainder.
        assert_eq!(ctx.read_str(), None);
        assert_eq!(ctx.offset(), 8);
    }

    #[test]
    fn test_sub_cursor() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let mut ctx = ReadCtx::new(&data, true);
        ctx.skip(2).unwrap();

        let mut sub = ctx.sub_here(3).unwrap();
        assert_eq!(sub.offset(), 0);
        assert_eq!(sub.read_u8(), Some(2));
        assert_eq!(sub.len(), 3);

        // The parent did not move.
        assert_eq!(ctx.offset(), 2);

        let trunc = ctx.truncated(4).unwrap();
        assert_eq!(trunc.offset(), 2);
        assert_eq!(trunc.remaining(), 2);
        assert!(ctx.sub(5, 3).is_none());
        assert!(ctx.sub(0, 9).is_none());
    }
}
