//! Line framing for streamed process output.
//!
//! Chunks arrive in whatever sizes the pipe hands us. The framer strips
//! terminal control sequences (spinners, colours, progress bars), keeps at
//! most one trailing partial line, and yields complete lines in arrival order.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::unwrap_used)]
static ANSI_CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());

/// Remove CSI escape sequences, then any stray carriage return or ESC.
///
/// Only sequences fully contained in `text` are recognised; a sequence split
/// across two chunks loses its ESC byte and leaves the remainder as text.
pub fn strip_control_sequences(text: &str) -> String {
    let stripped = ANSI_CSI.replace_all(text, "");
    stripped.replace(['\r', '\x1b'], "")
}

/// Accumulates text chunks and splits them into trimmed lines.
///
/// One instance per session; there is no reset.
#[derive(Debug, Default)]
pub struct OutputFramer {
    buffer: String,
}

impl OutputFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a chunk and return the lines it completed.
    ///
    /// Lines are trimmed but empty ones are kept; dropping them is up to the
    /// consumer.
    pub fn push(&mut self, chunk: &str) -> std::vec::IntoIter<String> {
        self.buffer.push_str(&strip_control_sequences(chunk));

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new().into_iter();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .split_terminator('\n')
            .map(|line| line.trim().to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Text received since the last newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(self) -> Option<String> {
        let line = self.buffer.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn feed(chunks: &[&str]) -> (Vec<String>, String) {
        let mut framer = OutputFramer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.push(chunk));
        }
        (lines, framer.pending().to_string())
    }

    #[test]
    fn chunk_without_newline_only_grows_buffer() {
        let mut framer = OutputFramer::new();
        assert_eq!(framer.push("{\"jsonrpc\"").count(), 0);
        assert_eq!(framer.pending(), "{\"jsonrpc\"");
    }

    #[test]
    fn chunk_ending_on_newline_leaves_empty_buffer() {
        let (lines, pending) = feed(&["one\ntwo\n"]);
        assert_eq!(lines, ["one", "two"]);
        assert_eq!(pending, "");
    }

    #[test]
    fn crlf_is_treated_as_newline() {
        let (lines, _) = feed(&["a\r\nb\r\n"]);
        assert_eq!(lines, ["a", "b"]);
    }

    #[test]
    fn empty_lines_are_emitted_for_the_consumer_to_drop() {
        let (lines, _) = feed(&["a\n\n  \nb\n"]);
        assert_eq!(lines, ["a", "", "", "b"]);
    }

    #[rstest]
    #[case::single_chunk(&["alpha\nbeta\ngamma"])]
    #[case::split_mid_line(&["al", "pha\nbe", "ta\ngam", "ma"])]
    #[case::one_char_at_a_time(&["a", "l", "p", "h", "a", "\n", "b", "e", "t", "a", "\n", "g", "a", "m", "m", "a"])]
    #[case::newline_at_chunk_start(&["alpha", "\nbeta", "\ngamma"])]
    fn streaming_matches_batch_split(#[case] chunks: &[&str]) {
        let joined: String = chunks.concat();
        let mut batch: Vec<String> = joined.split('\n').map(str::to_string).collect();
        let tail = batch.pop().unwrap_or_default();

        let (lines, pending) = feed(chunks);
        assert_eq!(lines, batch);
        assert_eq!(pending, tail);
    }

    #[rstest]
    #[case("\x1b[32mready\x1b[0m\n", "ready")]
    #[case("\x1b[1;31m{\"id\":1}\x1b[0m\n", "{\"id\":1}")]
    #[case("\x1b[2K\x1b[1Gbuilding\n", "building")]
    #[case("50%\r100%\n", "50%100%")]
    fn control_sequences_are_removed(#[case] chunk: &str, #[case] expected: &str) {
        let (lines, _) = feed(&[chunk]);
        assert_eq!(lines, [expected]);
    }

    #[test]
    fn escape_split_across_chunks_does_not_panic() {
        let (lines, _) = feed(&["text\x1b", "[32mmore\n"]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("text"));
    }

    #[test]
    fn finish_flushes_trailing_partial_line() {
        let mut framer = OutputFramer::new();
        assert_eq!(framer.push("done\nbye  ").count(), 1);
        assert_eq!(framer.finish().as_deref(), Some("bye"));

        let mut framer = OutputFramer::new();
        framer.push("done\n").for_each(drop);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn multibyte_text_survives_framing() {
        let (lines, _) = feed(&["héllo ", "wörld ✓\n"]);
        assert_eq!(lines, ["héllo wörld ✓"]);
    }
}
