//! Sentence accumulator — groups streamed fragments into speakable units.
//!
//! Fragments are appended to a buffer. As soon as the buffer contains a
//! sentence terminator the whole buffer is released as one unit, terminator
//! and whatever followed it in the same fragment included. Units are never
//! split or trimmed here, so the concatenation of released units always
//! equals the concatenation of the input.

const TERMINATORS: [char; 3] = ['.', '!', '?'];

#[derive(Debug, Default)]
pub struct SentenceAccumulator {
    buffer: String,
}

impl SentenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment; returns the buffered unit if it is now complete.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        if self.buffer.contains(&TERMINATORS[..]) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// End of input: release any non-empty remainder.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fragments: &[&str]) -> (Vec<Option<String>>, Option<String>) {
        let mut acc = SentenceAccumulator::new();
        let released = fragments.iter().map(|f| acc.push(f)).collect();
        (released, acc.finish())
    }

    #[test]
    fn test_no_terminator_flushes_only_at_end() {
        let (released, rest) = run(&["Hello", " there"]);
        assert_eq!(released, vec![None, None]);
        assert_eq!(rest.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_terminator_releases_buffer() {
        let (released, rest) = run(&["Hi", " there.", " How are you"]);
        assert_eq!(released, vec![None, Some("Hi there.".to_string()), None]);
        assert_eq!(rest.as_deref(), Some(" How are you"));
    }

    #[test]
    fn test_text_after_terminator_stays_in_unit() {
        let (released, rest) = run(&["Wait! Now", " go"]);
        assert_eq!(released[0].as_deref(), Some("Wait! Now"));
        assert_eq!(rest.as_deref(), Some(" go"));
    }

    #[test]
    fn test_finish_on_empty_buffer() {
        let mut acc = SentenceAccumulator::new();
        assert_eq!(acc.push("Done?"), Some("Done?".to_string()));
        assert!(acc.is_empty());
        assert_eq!(acc.finish(), None);
    }

    #[test]
    fn test_concatenation_is_preserved() {
        let fragments = ["So", ". Then", " what", "?! ok", "", " bye", "…"];
        let (released, rest) = run(&fragments);
        let mut joined: String = released.into_iter().flatten().collect();
        joined.extend(rest);
        assert_eq!(joined, fragments.concat());
    }
}
