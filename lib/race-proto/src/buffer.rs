use byteorder::{BigEndian, ByteOrder};

/// Maximum length of a string carried on the wire, including the schema name in a `Request`.
pub const MAX_STRING_LEN: usize = 128;

/// Fixed-capacity byte buffer with bounds-checked scalar and string codecs.
///
/// Every encode/decode operation takes an explicit cursor position and returns the position
/// just past what it wrote or read. A failed operation returns `None` and never partially
/// mutates the buffer or advances the cursor past where it started.
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    #[inline]
    pub fn new(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0u8; capacity],
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn fits(&self, pos: usize, len: usize) -> bool {
        pos.checked_add(len).map_or(false, |end| end <= self.data.len())
    }

    #[inline]
    pub fn write_i16(&mut self, pos: usize, value: i16) -> Option<usize> {
        if !self.fits(pos, 2) {
            return None;
        }
        BigEndian::write_i16(&mut self.data[pos..pos + 2], value);
        Some(pos + 2)
    }

    #[inline]
    pub fn write_i32(&mut self, pos: usize, value: i32) -> Option<usize> {
        if !self.fits(pos, 4) {
            return None;
        }
        BigEndian::write_i32(&mut self.data[pos..pos + 4], value);
        Some(pos + 4)
    }

    #[inline]
    pub fn write_i64(&mut self, pos: usize, value: i64) -> Option<usize> {
        if !self.fits(pos, 8) {
            return None;
        }
        BigEndian::write_i64(&mut self.data[pos..pos + 8], value);
        Some(pos + 8)
    }

    #[inline]
    pub fn write_f64(&mut self, pos: usize, value: f64) -> Option<usize> {
        if !self.fits(pos, 8) {
            return None;
        }
        // Doubles are byte-swapped as opaque 64-bit words, never through a pointer cast.
        BigEndian::write_u64(&mut self.data[pos..pos + 8], value.to_bits());
        Some(pos + 8)
    }

    #[inline]
    pub fn write_str(&mut self, pos: usize, value: &str) -> Option<usize> {
        let bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return None;
        }
        let after_len = self.write_i16(pos, bytes.len() as i16)?;
        if !self.fits(after_len, bytes.len()) {
            return None;
        }
        self.data[after_len..after_len + bytes.len()].copy_from_slice(bytes);
        Some(after_len + bytes.len())
    }

    /// Patches an `i16` at an absolute offset without touching the cursor. Used to back-fill
    /// `msg_length` once a variable-length payload has been composed.
    #[inline]
    pub fn set_i16(&mut self, pos: usize, value: i16) -> Option<()> {
        if !self.fits(pos, 2) {
            return None;
        }
        BigEndian::write_i16(&mut self.data[pos..pos + 2], value);
        Some(())
    }

    #[inline]
    pub fn peek_i16(&self, pos: usize) -> Option<i16> {
        if !self.fits(pos, 2) {
            return None;
        }
        Some(BigEndian::read_i16(&self.data[pos..pos + 2]))
    }

    #[inline]
    pub fn read_i16(&self, pos: usize) -> Option<(i16, usize)> {
        self.peek_i16(pos).map(|v| (v, pos + 2))
    }

    #[inline]
    pub fn peek_i32(&self, pos: usize) -> Option<i32> {
        if !self.fits(pos, 4) {
            return None;
        }
        Some(BigEndian::read_i32(&self.data[pos..pos + 4]))
    }

    #[inline]
    pub fn read_i32(&self, pos: usize) -> Option<(i32, usize)> {
        self.peek_i32(pos).map(|v| (v, pos + 4))
    }

    #[inline]
    pub fn peek_i64(&self, pos: usize) -> Option<i64> {
        if !self.fits(pos, 8) {
            return None;
        }
        Some(BigEndian::read_i64(&self.data[pos..pos + 8]))
    }

    #[inline]
    pub fn read_i64(&self, pos: usize) -> Option<(i64, usize)> {
        self.peek_i64(pos).map(|v| (v, pos + 8))
    }

    #[inline]
    pub fn peek_f64(&self, pos: usize) -> Option<f64> {
        if !self.fits(pos, 8) {
            return None;
        }
        Some(f64::from_bits(BigEndian::read_u64(&self.data[pos..pos + 8])))
    }

    #[inline]
    pub fn read_f64(&self, pos: usize) -> Option<(f64, usize)> {
        self.peek_f64(pos).map(|v| (v, pos + 8))
    }

    /// Allocates and returns the full string at `pos`. Fails cleanly (leaving `pos` untouched
    /// by the caller) if the length prefix runs past the end of the buffer.
    #[inline]
    pub fn read_str(&self, pos: usize) -> Option<(String, usize)> {
        let len = self.peek_i16(pos)?;
        if len < 0 {
            return None;
        }
        let len = len as usize;
        let start = pos + 2;
        if !self.fits(start, len) {
            return None;
        }
        let value = String::from_utf8_lossy(&self.data[start..start + len]).into_owned();
        Some((value, start + len))
    }

    /// Reads the string at `pos`, truncating to at most `max_len - 1` bytes. The wire cursor
    /// still advances past the full on-wire length, matching the original truncate-but-advance
    /// behavior -- the bytes beyond `max_len - 1` are simply discarded.
    #[inline]
    pub fn read_str_truncated(&self, pos: usize, max_len: usize) -> Option<(String, usize)> {
        let len = self.peek_i16(pos)?;
        if len < 0 {
            return None;
        }
        let len = len as usize;
        let start = pos + 2;
        if !self.fits(start, len) {
            return None;
        }
        let copy_len = len.min(max_len.saturating_sub(1));
        let value = String::from_utf8_lossy(&self.data[start..start + copy_len]).into_owned();
        Some((value, start + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let mut buf = Buffer::new(64);
        let pos = buf.write_i64(0, 0x1111_2222_3333_4444).unwrap();
        let pos = buf.write_f64(pos, 1.2345).unwrap();
        let pos = buf.write_str(pos, "blahh").unwrap();
        assert_eq!(pos, 8 + 8 + 2 + 5);

        assert_eq!(&buf.as_slice()[0..8], &[0x11, 0x11, 0x22, 0x22, 0x33, 0x33, 0x44, 0x44]);

        let (v, pos) = buf.read_i64(0).unwrap();
        assert_eq!(v, 0x1111_2222_3333_4444);
        let (v, pos) = buf.read_f64(pos).unwrap();
        assert_eq!(v, 1.2345);
        let (v, pos) = buf.read_str(pos).unwrap();
        assert_eq!(v, "blahh");
        assert_eq!(pos, 8 + 8 + 2 + 5);
    }

    #[test]
    fn test_write_overflow_leaves_buffer_untouched() {
        let mut buf = Buffer::new(4);
        assert!(buf.write_i64(0, 42).is_none());
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_read_string_length_past_end_fails_cleanly() {
        let mut buf = Buffer::new(8);
        buf.write_i16(0, 100).unwrap();
        assert!(buf.read_str(0).is_none());
    }

    #[test]
    fn test_set_short_patches_without_moving_cursor() {
        let mut buf = Buffer::new(16);
        buf.write_i16(2, 0).unwrap();
        buf.set_i16(2, 40).unwrap();
        let (v, _) = buf.read_i16(2).unwrap();
        assert_eq!(v, 40);
    }

    #[test]
    fn test_read_str_truncated() {
        let mut buf = Buffer::new(32);
        let pos = buf.write_str(0, "gov.nasa.race").unwrap();
        let (v, next) = buf.read_str_truncated(0, 5).unwrap();
        assert_eq!(v, "gov.");
        assert_eq!(next, pos);
    }
}
