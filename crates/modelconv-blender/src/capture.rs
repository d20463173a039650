//! Bounded capture of subprocess output.

/// Default per-stream capture limit.
pub const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Which end of an oversized stream is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Head,
    Tail,
}

/// Accumulates at most `limit` bytes of a stream.
///
/// Stderr keeps the tail, where tool errors end up; stdout keeps the head.
#[derive(Debug)]
pub struct BoundedCapture {
    limit: usize,
    retain: Retain,
    buf: Vec<u8>,
    dropped: usize,
}

impl BoundedCapture {
    pub fn new(limit: usize, retain: Retain) -> Self {
        Self {
            limit,
            retain,
            buf: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        match self.retain {
            Retain::Head => {
                let room = self.limit.saturating_sub(self.buf.len());
                let take = room.min(chunk.len());
                self.buf.extend_from_slice(&chunk[..take]);
                self.dropped += chunk.len() - take;
            }
            Retain::Tail => {
                self.buf.extend_from_slice(chunk);
                if self.buf.len() > self.limit {
                    let excess = self.buf.len() - self.limit;
                    self.buf.drain(..excess);
                    self.dropped += excess;
                }
            }
        }
    }

    /// Bytes discarded so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Captured text with a truncation marker when bytes were dropped.
    pub fn into_text(self) -> String {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        if self.dropped == 0 {
            return text;
        }
        match self.retain {
            Retain::Head => format!("{}\n[... {} bytes truncated]", text, self.dropped),
            Retain::Tail => format!("[... {} bytes truncated]\n{}", self.dropped, text),
        }
    }
}
