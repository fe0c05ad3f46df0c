//! Edit buffer for one shell line

/// Longest line forwarded to the co-processor.
pub const LINE_SIZE: usize = 128;

/// Printable ASCII only, so the contents are always valid UTF-8.
pub struct LineBuffer {
    buf: [u8; LINE_SIZE],
    len: usize,
    overflowed: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; LINE_SIZE],
            len: 0,
            overflowed: false,
        }
    }

    /// Append a byte. Returns `false` (and marks the line overflowed) when full.
    pub fn push(&mut self, c: u8) -> bool {
        if self.len == LINE_SIZE {
            self.overflowed = true;
            return false;
        }
        self.buf[self.len] = c;
        self.len += 1;
        true
    }

    /// Remove the last byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.overflowed {
            // Keep rejecting the line until it is cleared
            return None;
        }
        self.len = self.len.checked_sub(1)?;
        Some(self.buf[self.len])
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Input was lost to a full buffer since the last clear.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
