//! Session buffer with bounded tail search.
//!
//! Only the last N bytes of the accumulated output are searched for event
//! patterns, so prompt detection stays cheap even while a command floods
//! the session with output.

use regex::Regex;

/// Accumulates decoded session output and searches its tail for events.
///
/// ANSI escape sequences are stripped on the way in; the child runs with
/// `TERM=VT100` but devices still emit the occasional control sequence.
#[derive(Debug)]
pub struct ExpectBuffer {
    data: String,
    search_window: usize,
}

impl ExpectBuffer {
    /// Create a buffer searching the trailing `search_window` bytes.
    pub fn new(search_window: usize) -> Self {
        Self {
            data: String::with_capacity(4096),
            search_window,
        }
    }

    /// Append raw bytes from the child, scrubbing ANSI escapes.
    pub fn extend(&mut self, raw: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(raw);
        self.data.push_str(&String::from_utf8_lossy(&cleaned));
    }

    /// Byte offset where the search region starts for the given window
    /// override, clamped to a character boundary.
    fn window_start(&self, window: Option<usize>) -> usize {
        let window = window.unwrap_or(self.search_window);
        let mut start = self.data.len().saturating_sub(window);
        while start < self.data.len() && !self.data.is_char_boundary(start) {
            start += 1;
        }
        start
    }

    /// Find the earliest match among the candidate patterns inside the
    /// search window.
    ///
    /// Returns `(candidate index, match start, match end)` with offsets
    /// absolute to the buffer. The match with the smallest start position
    /// wins; ties go to the earlier candidate.
    pub fn find_first(
        &self,
        candidates: &[(usize, &Regex)],
        window: Option<usize>,
    ) -> Option<(usize, usize, usize)> {
        let start = self.window_start(window);
        let tail = &self.data[start..];

        let mut best: Option<(usize, usize, usize)> = None;
        for (index, pattern) in candidates {
            if let Some(m) = pattern.find(tail) {
                let absolute = (*index, start + m.start(), start + m.end());
                match best {
                    Some((_, best_start, _)) if m.start() + start >= best_start => {}
                    _ => best = Some(absolute),
                }
            }
        }
        best
    }

    /// Find an exact substring inside the search window.
    pub fn find_exact(&self, needle: &str, window: Option<usize>) -> Option<(usize, usize)> {
        let start = self.window_start(window);
        memchr::memmem::find(self.data[start..].as_bytes(), needle.as_bytes())
            .map(|pos| (start + pos, start + pos + needle.len()))
    }

    /// Remove and return everything up to `end` (exclusive).
    pub fn consume(&mut self, end: usize) -> String {
        let consumed = self.data[..end].to_string();
        self.data.drain(..end);
        consumed
    }

    /// Take the whole buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.data)
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_strips_ansi() {
        let mut buffer = ExpectBuffer::new(100);
        buffer.extend(b"\x1b[32mRouter#\x1b[0m");
        assert_eq!(buffer.as_str(), "Router#");
    }

    #[test]
    fn test_find_first_prefers_earliest_match() {
        let mut buffer = ExpectBuffer::new(1000);
        buffer.extend(b"Username: something Password:");
        let user = Regex::new("Username:").unwrap();
        let pass = Regex::new("Password:").unwrap();
        // Password listed first, but Username matches earlier in the stream.
        let found = buffer.find_first(&[(0, &pass), (1, &user)], None).unwrap();
        assert_eq!(found.0, 1);
    }

    #[test]
    fn test_find_first_tie_break_by_order() {
        let mut buffer = ExpectBuffer::new(1000);
        buffer.extend(b"Router#");
        let a = Regex::new("Router#").unwrap();
        let b = Regex::new("Router").unwrap();
        let found = buffer.find_first(&[(0, &a), (1, &b)], None).unwrap();
        assert_eq!(found.0, 0);
    }

    #[test]
    fn test_window_excludes_old_data() {
        let mut buffer = ExpectBuffer::new(10);
        buffer.extend(b"Router#");
        buffer.extend(&[b'x'; 100]);
        let prompt = Regex::new("Router#").unwrap();
        assert!(buffer.find_first(&[(0, &prompt)], None).is_none());
        assert!(buffer.find_first(&[(0, &prompt)], Some(200)).is_some());
    }

    #[test]
    fn test_consume_splits_before_and_after() {
        let mut buffer = ExpectBuffer::new(1000);
        buffer.extend(b"some output\nRouter# trailing");
        let prompt = Regex::new("Router#").unwrap();
        let (_, start, end) = buffer.find_first(&[(0, &prompt)], None).unwrap();
        let before = buffer.consume(start);
        let matched = buffer.consume(end - start);
        assert_eq!(before, "some output\n");
        assert_eq!(matched, "Router#");
        assert_eq!(buffer.as_str(), " trailing");
    }

    #[test]
    fn test_find_exact() {
        let mut buffer = ExpectBuffer::new(1000);
        buffer.extend(b"show version\r\noutput");
        assert!(buffer.find_exact("show version", None).is_some());
        assert!(buffer.find_exact("missing", None).is_none());
    }
}
