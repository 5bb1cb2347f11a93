//! Line-buffering over an async byte stream, shared by the SSE and
//! line-delimited-JSON adapters.

use std::pin::Pin;

use obs_error::ObsError;
use tokio_stream::{Stream, StreamExt};

/// Pulls lines out of a chunked byte stream (e.g. `reqwest::Response::bytes_stream`),
/// tolerating chunk boundaries that split in the middle of a line.
///
/// The stream is boxed so adapter structs (`ResponsesChunkSource`,
/// `WorkflowChunkSource`) don't need to name reqwest's opaque stream type.
pub(crate) struct ByteLineReader<B, E> {
    stream: Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>,
    buf: Vec<u8>,
    exhausted: bool,
}

impl<B, E> ByteLineReader<B, E>
where
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(stream: impl Stream<Item = Result<B, E>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buf: Vec::new(),
            exhausted: false,
        }
    }

    /// Returns the next line with its trailing newline stripped, or `None`
    /// once the stream is fully drained.
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>, ObsError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.exhausted {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Err(ObsError::new(
                        obs_error::ErrorKind::ServiceUnavailable,
                        "stream read failed",
                    )
                    .with_source(err));
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Stops reading and discards any buffered, unparsed bytes.
    pub(crate) fn close(&mut self) {
        self.exhausted = true;
        self.buf.clear();
    }
}
