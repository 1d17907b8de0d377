//! Incremental splitter for the quote stream body.
//!
//! The streaming endpoint writes a sequence of concatenated JSON objects (not
//! an array) over a chunked response, and chunk boundaries fall anywhere. The
//! splitter tracks brace depth outside string literals and hands back each
//! complete top-level object. It does not validate JSON: an object with a bad
//! value inside is still returned as one frame, so the caller can reject that
//! frame alone and carry on with the next one.

use tracing::warn;

/// Default cap on a single frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FrameSplitter {
    buf: Vec<u8>,
    /// Index in `buf` where scanning resumes
    scanned: usize,
    /// Start of the object currently being read
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Reading the rest of an oversized object without buffering it
    discarding: bool,
    max_frame_bytes: usize,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            start: None,
            depth: 0,
            in_string: false,
            escaped: false,
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Feed one chunk, returning every object it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        let mut i = self.scanned;
        while i < self.buf.len() {
            let byte = self.buf[i];

            if self.start.is_none() {
                // Between objects: whitespace, newlines and stray text such
                // as the broker's "END" marker are skipped.
                if byte == b'{' {
                    self.start = Some(i);
                    self.depth = 1;
                }
                i += 1;
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
            } else {
                match byte {
                    b'"' => self.in_string = true,
                    b'{' => self.depth += 1,
                    b'}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            if let Some(start) = self.start.take() {
                                if self.discarding {
                                    self.discarding = false;
                                } else {
                                    frames.push(self.buf[start..=i].to_vec());
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        self.compact();
        frames
    }

    /// Bytes held for an unfinished frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    fn compact(&mut self) {
        match self.start {
            None => {
                self.buf.clear();
                self.scanned = 0;
            }
            Some(_) if self.discarding => {
                self.buf.clear();
                self.start = Some(0);
                self.scanned = 0;
            }
            Some(start) => {
                self.buf.drain(..start);
                self.start = Some(0);
                self.scanned = self.buf.len();

                if self.buf.len() > self.max_frame_bytes {
                    warn!(
                        "Dropping oversized partial frame ({} bytes > {})",
                        self.buf.len(),
                        self.max_frame_bytes
                    );
                    // Depth and string state are kept so the scan can find
                    // where this object really ends.
                    self.discarding = true;
                    self.buf.clear();
                    self.scanned = 0;
                }
            }
        }
    }
}
