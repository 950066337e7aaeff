//! Batches small SSE frames into fewer, larger writes.

/// Accumulates rendered frames until the pending bytes reach a threshold,
/// then hands the whole batch back for a single write. Frames are never
/// split; a batch always ends on a frame boundary.
pub struct ChunkCoalescer {
    buf: String,
    threshold: usize,
}

impl ChunkCoalescer {
    pub fn new(threshold: usize) -> Self {
        ChunkCoalescer {
            buf: String::new(),
            threshold,
        }
    }

    /// Add a frame. Returns the accumulated batch once it reaches the
    /// threshold.
    pub fn append(&mut self, frame: &str) -> Option<String> {
        self.buf.push_str(frame);
        if self.buf.len() >= self.threshold {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Drain whatever is pending, if anything.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
