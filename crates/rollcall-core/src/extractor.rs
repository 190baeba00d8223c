//! Capture-side seam: where query embeddings come from.
//!
//! Face detection and descriptor inference run outside this workspace (the
//! browser client ships them). An extractor only has to hand over one
//! embedding per capture attempt, or report that the frame had no face.
//! Holding an extractor value means the source is ready; there is no
//! separate "models loaded" state to check.

use crate::codec::{self, CodecError};
use crate::types::Embedding;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("capture source exhausted")]
    SourceExhausted,
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("frame descriptor: {0}")]
    Codec(#[from] CodecError),
}

/// Source of face embeddings, one capture attempt per call.
pub trait EmbeddingExtractor: Send {
    /// Run one capture attempt. `Ok(None)` means no face was found in the frame.
    fn extract(&mut self) -> Result<Option<Embedding>, ExtractError>;
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<E> {
    fn extract(&mut self) -> Result<Option<Embedding>, ExtractError> {
        (**self).extract()
    }
}

/// Extractor over a line-oriented descriptor export.
///
/// Each non-blank line is one frame: an encoded descriptor, or `-` / `null`
/// for a frame in which no face was detected.
pub struct DescriptorStream<R> {
    reader: R,
    line: String,
    frames_read: usize,
}

impl<R: BufRead> DescriptorStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            frames_read: 0,
        }
    }

    /// Number of frames consumed so far.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }
}

impl<R: BufRead + Send> EmbeddingExtractor for DescriptorStream<R> {
    fn extract(&mut self) -> Result<Option<Embedding>, ExtractError> {
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| ExtractError::Capture(e.to_string()))?;
            if n == 0 {
                return Err(ExtractError::SourceExhausted);
            }

            let frame = self.line.trim();
            if frame.is_empty() {
                continue;
            }
            self.frames_read += 1;

            return match frame {
                "-" | "null" => Ok(None),
                text => Ok(Some(codec::decode(text)?)),
            };
        }
    }
}
