//! Identity number extraction
//!
//! An ID is a run of 8 to 10 ASCII digits with no digit directly before or
//! after it. Longer runs are never split.

use std::ops::RangeInclusive;

/// Accepted ID lengths
pub const ID_LENGTH: RangeInclusive<usize> = 8..=10;

/// First ID in `text`, if any
pub fn extract(text: &str) -> Option<String> {
    candidates(text).next().map(str::to_owned)
}

/// Every ID in `text`, in order of appearance
pub fn extract_all(text: &str) -> Vec<&str> {
    candidates(text).collect()
}

fn candidates(text: &str) -> impl Iterator<Item = &str> {
    DigitRuns { text, pos: 0 }.filter(|run| ID_LENGTH.contains(&run.len()))
}

/// Maximal runs of ASCII digits, left to right
struct DigitRuns<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for DigitRuns<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        // ASCII digits are single bytes and never occur inside a multi-byte
        // UTF-8 sequence, so byte offsets here are always char boundaries.
        let bytes = self.text.as_bytes();

        let start = self.pos + bytes[self.pos..].iter().position(u8::is_ascii_digit)?;
        let len = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(bytes.len() - start);

        self.pos = start + len;
        Some(&self.text[start..self.pos])
    }
}
