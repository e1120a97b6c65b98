use core::fmt::{self, Write};

/// Size of the on-stack text buffer for one sample line.
pub const LINE_CAPACITY: usize = 20;

pub const PREFIX: &str = "ADC: ";
pub const TERMINATOR: &str = "\r\n";

/// One formatted serial line, `ADC: <value>\r\n`.
///
/// Text is cut off like `snprintf(buf, LINE_CAPACITY, ..)` would: at most
/// `LINE_CAPACITY - 1` bytes are kept, the last slot belongs to the NUL.
#[derive(Clone, Copy)]
pub struct SampleLine {
    buf: [u8; LINE_CAPACITY],
    len: usize,
    truncated: bool,
}

impl SampleLine {
    pub const fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    pub fn format(sample: u32) -> Self {
        let mut line = Self::new();
        // Infallible: `write_str` never reports an error.
        let _ = write!(line, "{PREFIX}{sample}{TERMINATOR}");
        line
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only whole ASCII strings are ever copied in.
        core::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Default for SampleLine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SampleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SampleLine").field(&self.as_str()).finish()
    }
}

impl Write for SampleLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAPACITY - 1 - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sample() {
        assert_eq!(SampleLine::format(2048).as_str(), "ADC: 2048\r\n");
        assert_eq!(SampleLine::format(0).as_bytes(), b"ADC: 0\r\n");
    }

    #[test]
    fn test_widest_sample_fits() {
        let line = SampleLine::format(u32::MAX);
        assert_eq!(line.as_str(), "ADC: 4294967295\r\n");
        assert_eq!(line.len(), 17);
        assert!(!line.is_truncated());
    }

    #[test]
    fn test_overflowing_write_is_cut() {
        let mut line = SampleLine::new();
        let _ = line.write_str("0123456789abcdefghijKLMN");
        assert_eq!(line.as_str(), "0123456789abcdefghi");
        assert_eq!(line.len(), LINE_CAPACITY - 1);
        assert!(line.is_truncated());
    }

    #[test]
    fn test_exactly_full_line_is_not_truncated() {
        let mut line = SampleLine::new();
        let _ = line.write_str("0123456789abcdefghi");
        assert_eq!(line.len(), 19);
        assert!(!line.is_truncated());
        let _ = line.write_str("j");
        assert!(line.is_truncated());
        assert_eq!(line.len(), 19);
    }
}
