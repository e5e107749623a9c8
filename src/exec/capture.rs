//! Per-call output capture
//! Bounded in-memory sinks standing in for the standard streams of
//! evaluated code. Each evaluation owns its own pair.

use crate::config::types::{OutputIntegrity, OutputLimits};

/// Which standard stream a write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "<stdout>",
            Stream::Stderr => "<stderr>",
        }
    }
}

/// Growable text buffer with an optional byte cap
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    buffer: String,
    limit: Option<usize>,
    integrity: OutputIntegrity,
    /// Bytes dropped after the cap was reached
    dropped: usize,
}

impl OutputSink {
    /// Create a sink that keeps at most `limit` bytes (unbounded when `None`)
    pub fn new(limit: Option<usize>) -> Self {
        OutputSink {
            buffer: String::new(),
            limit,
            integrity: OutputIntegrity::Complete,
            dropped: 0,
        }
    }

    /// Append text, truncating on a character boundary once the cap is hit
    pub fn write(&mut self, text: &str) {
        let Some(limit) = self.limit else {
            self.buffer.push_str(text);
            return;
        };

        let room = limit.saturating_sub(self.buffer.len());
        if text.len() <= room {
            self.buffer.push_str(text);
            return;
        }

        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.push_str(&text[..cut]);
        self.dropped += text.len() - cut;
        self.integrity = OutputIntegrity::TruncatedByLimit;
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.integrity
    }

    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

/// The stdout/stderr pair handed to one evaluation
#[derive(Debug, Clone, Default)]
pub struct CapturedStreams {
    pub stdout: OutputSink,
    pub stderr: OutputSink,
}

impl CapturedStreams {
    pub fn new(limits: &OutputLimits) -> Self {
        CapturedStreams {
            stdout: OutputSink::new(limits.stdout_limit),
            stderr: OutputSink::new(limits.stderr_limit),
        }
    }

    pub fn sink_mut(&mut self, stream: Stream) -> &mut OutputSink {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }

    /// Worst integrity across both streams
    pub fn combined_integrity(&self) -> OutputIntegrity {
        if self.stdout.integrity() == OutputIntegrity::Complete {
            self.stderr.integrity()
        } else {
            self.stdout.integrity()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_sink_keeps_everything() {
        let mut sink = OutputSink::new(None);
        sink.write("hello ");
        sink.write("world\n");
        assert_eq!(sink.contents(), "hello world\n");
        assert_eq!(sink.integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn test_sink_truncates_at_limit() {
        let mut sink = OutputSink::new(Some(8));
        sink.write("12345");
        sink.write("67890");
        assert_eq!(sink.contents(), "12345678");
        assert_eq!(sink.dropped_bytes(), 2);
        assert_eq!(sink.integrity(), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn test_sink_truncates_on_char_boundary() {
        let mut sink = OutputSink::new(Some(3));
        sink.write("aé€");
        assert_eq!(sink.contents(), "aé");
    }

    #[test]
    fn test_streams_combined_integrity() {
        let limits = OutputLimits {
            stdout_limit: None,
            stderr_limit: Some(1),
        };
        let mut streams = CapturedStreams::new(&limits);
        streams.sink_mut(Stream::Stdout).write("fine");
        assert_eq!(streams.combined_integrity(), OutputIntegrity::Complete);
        streams.sink_mut(Stream::Stderr).write("oops");
        assert_eq!(streams.combined_integrity(), OutputIntegrity::TruncatedByLimit);
    }
}
