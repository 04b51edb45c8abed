use bytes::{Bytes, BytesMut};
use deepchat_core::chat::{ClientError, Message, SnapshotStream};
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("utf8: {0}")]
    Utf8(String),
    #[error("json: {0}")]
    Json(String),
}

/// Reassembles delta records from raw network chunks and accumulates the
/// assistant reply. Chunk boundaries carry no meaning: the bytes of a
/// trailing incomplete line are held back until the line completes, so any
/// split of the same byte sequence decodes to the same content.
pub struct StreamDecoder {
    buf: BytesMut,
    message: Message,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            message: Message::assistant(""),
        }
    }

    /// Consumes one raw chunk and returns the accumulator snapshot. Complete
    /// lines decode now, the unterminated tail stays buffered for the next
    /// feed. One snapshot per chunk, however many delta lines it carried.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<&Message, DecodeError> {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = twoway::find_bytes(&self.buf, b"\n") {
            let line = self.buf.split_to(pos + 1);
            self.decode_line(&line)?;
        }
        Ok(&self.message)
    }

    /// Flushes a trailing line that never saw its newline. Returns the final
    /// snapshot only when the flush appended content.
    pub fn finish(&mut self) -> Result<Option<&Message>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let line = self.buf.split_to(self.buf.len());
        let appended = self.decode_line(&line)?;
        if appended {
            Ok(Some(&self.message))
        } else {
            Ok(None)
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<bool, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|e| DecodeError::Utf8(e.to_string()))?;
        let line = strip_frame(text);
        if !line.starts_with('{') {
            return Ok(false);
        }
        let record: Value =
            serde_json::from_str(line).map_err(|e| DecodeError::Json(e.to_string()))?;
        let delta = record["choices"][0]["delta"]["content"]
            .as_str()
            .unwrap_or("");
        self.message.content.push_str(delta);
        Ok(!delta.is_empty())
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// `data: {` framing collapses to the bare record. Anything else is left
/// as-is for the starts-with-`{` test to discard.
fn strip_frame(line: &str) -> &str {
    let trimmed = line.trim();
    if let Some(prefix) = trimmed.get(..6) {
        if prefix.eq_ignore_ascii_case("data: ") && trimmed[6..].starts_with('{') {
            return &trimmed[6..];
        }
    }
    trimmed
}

/// Pull-based view of the response byte stream: one chunk per call, no
/// read-ahead, fused after the first error or the end of the stream.
pub struct ChunkReader<S> {
    source: S,
    done: bool,
}

impl<S> ChunkReader<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            done: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        if self.done {
            return Ok(None);
        }
        match self.source.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Adapts a raw byte stream into a stream of accumulator snapshots, one per
/// received chunk plus a final one when an unterminated tail added content.
/// The first decode or transport error ends the stream.
pub fn snapshot_stream<S>(source: S) -> SnapshotStream
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send + Unpin + 'static,
{
    let mut reader = ChunkReader::new(source);
    let mut decoder = StreamDecoder::new();
    Box::pin(async_stream::stream! {
        loop {
            match reader.next_chunk().await {
                Ok(Some(chunk)) => match decoder.feed(&chunk) {
                    Ok(snapshot) => yield Ok(snapshot.clone()),
                    Err(e) => {
                        yield Err(ClientError::Decode(e.to_string()));
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        match decoder.finish() {
            Ok(Some(snapshot)) => yield Ok(snapshot.clone()),
            Ok(None) => {}
            Err(e) => yield Err(ClientError::Decode(e.to_string())),
        }
    })
}
