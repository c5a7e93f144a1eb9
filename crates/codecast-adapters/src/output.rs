//! Incremental decoding of interpreter output.

/// Splits a byte stream into UTF-8 strings without breaking characters.
///
/// A multi-byte character split across reads is held back until its
/// remaining bytes arrive. Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns any complete text.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let hold = incomplete_tail(&self.pending);
        let ready = self.pending.len() - hold;
        if ready == 0 {
            return None;
        }
        let tail = self.pending.split_off(ready);
        let head = std::mem::replace(&mut self.pending, tail);
        let text = match String::from_utf8(head) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Some(text)
    }

    /// Flushes whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Number of trailing bytes that start a character not yet complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(b"hi\n").as_deref(), Some("hi\n"));
        assert_eq!(chunker.finish(), None);
    }

    #[test]
    fn test_split_character_is_held_back() {
        let euro = "€".as_bytes();
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[b'a', euro[0]]).as_deref(), Some("a"));
        assert_eq!(chunker.push(&euro[1..2]), None);
        assert_eq!(chunker.push(&[euro[2], b'b']).as_deref(), Some("€b"));
    }

    #[test]
    fn test_four_byte_character_across_reads() {
        let crab = "🦀".as_bytes();
        let mut chunker = Utf8Chunker::new();
        let mut out = String::new();
        for byte in crab {
            if let Some(text) = chunker.push(&[*byte]) {
                out.push_str(&text);
            }
        }
        assert_eq!(out, "🦀");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[b'x', 0xFF, b'y']).as_deref(), Some("x\u{FFFD}y"));
    }

    #[test]
    fn test_truncated_tail_is_flushed_lossily() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[0xE2, 0x82]), None);
        assert_eq!(chunker.finish().as_deref(), Some("\u{FFFD}"));
    }
}
