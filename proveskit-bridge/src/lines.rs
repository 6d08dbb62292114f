//! Line framing for the device's `\r\n`-delimited console output.

/// Record delimiter used by the flight controller in both directions.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Upper bound on an unterminated record before it is flushed as a line.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Accumulates raw reads and yields complete lines.
///
/// - Records are split on `\r\n`; the delimiter is not part of the line.
/// - Bytes are decoded as lossy UTF-8 per record, so a multi-byte character
///   split across two reads is reassembled before decoding.
/// - A record longer than [`MAX_PENDING_BYTES`] is flushed as-is.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the device; returns the lines they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // Earlier bytes hold no delimiter, except possibly its first half.
        let mut search = self
            .pending
            .len()
            .saturating_sub(LINE_DELIMITER.len() - 1);
        self.pending
            .extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = find_delimiter(&self.pending[search..]) {
            let end = search + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + LINE_DELIMITER.len();
            search = start;
        }
        self.pending
            .drain(..start);

        if self.pending.len() > MAX_PENDING_BYTES {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending
                .clear();
        }

        lines
    }

    /// Bytes of the current unterminated record.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(LINE_DELIMITER.len())
        .position(|w| w == LINE_DELIMITER)
}

/// Filter non-printable control characters for cleaner terminal output.
///
/// Keeps `\t` and printable Unicode chars. Drops other control characters,
/// including stray `\r` and `\n` inside a line.
pub fn clean_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for ch in line.chars() {
        match ch {
            '\t' => out.push(ch),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_complete_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"boot ok\r\nhello\r\n");
        assert_eq!(lines, vec!["boot ok", "hello"]);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn test_partial_line_carried_over() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"temp=2").is_empty());
        assert_eq!(splitter.pending(), b"temp=2");
        assert_eq!(splitter.push(b"1.5\r\n"), vec!["temp=21.5"]);
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"abc\r").is_empty());
        assert_eq!(splitter.push(b"\ndef\r\n"), vec!["abc", "def"]);
    }

    #[test]
    fn test_bare_newline_is_not_a_delimiter() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"a\nb\r\n"), vec!["a\nb"]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"\r\n\r\nx\r\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        // '°' is 0xC2 0xB0
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(&[b'2', b'1', 0xC2]).is_empty());
        assert_eq!(splitter.push(&[0xB0, b'C', b'\r', b'\n']), vec!["21°C"]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(&[0xFF, b'A', b'\r', b'\n']), vec!["\u{FFFD}A"]);
    }

    #[test]
    fn test_oversized_record_flushed() {
        let mut splitter = LineSplitter::new();
        let big = vec![b'x'; MAX_PENDING_BYTES + 1];
        let lines = splitter.push(&big);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_PENDING_BYTES + 1);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn test_long_record_fed_in_small_reads() {
        let mut splitter = LineSplitter::new();
        let record = vec![b'y'; 4096];
        for chunk in record.chunks(7) {
            assert!(splitter.push(chunk).is_empty());
        }
        assert!(splitter.push(b"\r").is_empty());
        let lines = splitter.push(b"\nnext\r\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 4096);
        assert_eq!(lines[1], "next");
    }

    #[test]
    fn test_clean_line_filters_control_chars() {
        assert_eq!(clean_line("A\x07B\x1BC\tD\rE"), "ABC\tDE");
    }
}
