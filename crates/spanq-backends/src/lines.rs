//! Newline framing for streamed HTTP bodies (SSE and NDJSON).

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use spanq_core::backend::{BackendError, FragmentStream};

/// What one body line means to a fragment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Fragment(String),
    Skip,
    Done,
    Error(String),
}

/// Accumulates body chunks and yields complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and drain every complete line, without its terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Remaining unterminated line at end of body, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

/// Turn a streaming response body into fragments, one parsed line at a time.
///
/// The stream ends at the first `Done` or `Error` line, or at end of body.
pub(crate) fn fragment_stream<F>(
    response: reqwest::Response,
    model: String,
    parse: F,
) -> FragmentStream
where
    F: Fn(&str) -> LineEvent + Send + 'static,
{
    response
        .bytes_stream()
        .map(Some)
        .chain(stream::once(future::ready(None)))
        .scan(
            (LineBuffer::default(), false),
            move |(buffer, done), chunk| {
                if *done {
                    return future::ready(None);
                }
                let lines = match chunk {
                    Some(Ok(bytes)) => buffer.push(&bytes),
                    Some(Err(error)) => {
                        *done = true;
                        return future::ready(Some(vec![Err(BackendError::stream(
                            &model,
                            error.to_string(),
                        ))]));
                    }
                    None => buffer.finish().into_iter().collect(),
                };
                let mut items = Vec::new();
                for line in lines {
                    match parse(&line) {
                        LineEvent::Fragment(text) => items.push(Ok(text)),
                        LineEvent::Skip => {}
                        LineEvent::Done => {
                            *done = true;
                            break;
                        }
                        LineEvent::Error(message) => {
                            items.push(Err(BackendError::stream(&model, message)));
                            *done = true;
                            break;
                        }
                    }
                }
                future::ready(Some(items))
            },
        )
        .flat_map(stream::iter)
        .boxed()
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(&['\r', '\n'][..])
        .to_string()
}
