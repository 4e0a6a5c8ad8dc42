//! Byte framing shared by the HTTP adapters.
//!
//! Response bodies arrive as arbitrary byte chunks. The decoders here split
//! them into lines (before UTF-8 decoding, so multi-byte characters survive a
//! chunk boundary), turn lines into provider payloads and hand each payload to
//! a provider-specific parse function.

use super::FragmentStream;
use crate::error::ChatError;
use crate::types::ProviderKind;
use futures_util::stream;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Text(String),
    Done,
}

/// Turns one payload (an SSE `data:` field or an NDJSON line) into a frame.
/// An empty vec means the payload carried nothing to emit.
pub(crate) type ParseFn = fn(&str) -> Result<Vec<Frame>, serde_json::Error>;

pub(crate) trait FrameDecoder: Send + 'static {
    fn push(&mut self, bytes: &[u8]) -> Vec<Frame>;

    /// Called once at end of body to flush a trailing unterminated record.
    fn finish(&mut self) -> Vec<Frame> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
        line.pop();
        if line.ends_with(b"\r") {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn take_rest(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn apply(provider: ProviderKind, parse: ParseFn, payload: &str, out: &mut Vec<Frame>) {
    match parse(payload) {
        Ok(frames) => out.extend(frames),
        Err(e) => {
            let err = ChatError::protocol(provider, e);
            tracing::warn!(error = %err, payload, "skipping malformed stream fragment");
        }
    }
}

/// Server-Sent Events: `data:` lines accumulate until a blank line ends the event.
pub(crate) struct SseDecoder {
    provider: ProviderKind,
    lines: LineBuffer,
    data: String,
    parse: ParseFn,
}

impl SseDecoder {
    pub(crate) fn new(provider: ProviderKind, parse: ParseFn) -> Self {
        Self {
            provider,
            lines: LineBuffer::default(),
            data: String::new(),
            parse,
        }
    }

    fn flush_event(&mut self, out: &mut Vec<Frame>) {
        if self.data.is_empty() {
            return;
        }
        if self.data.ends_with('\n') {
            self.data.pop();
        }
        let data = std::mem::take(&mut self.data);
        if !data.trim().is_empty() {
            apply(self.provider, self.parse, &data, out);
        }
    }

    fn line(&mut self, line: &str, out: &mut Vec<Frame>) {
        if line.is_empty() {
            self.flush_event(out);
            return;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            self.data.push_str(rest);
            self.data.push('\n');
        }
        // event:, id:, retry: and comments carry nothing we use.
    }
}

impl FrameDecoder for SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.lines.push(bytes);
        let mut out = Vec::new();
        while let Some(line) = self.lines.next_line() {
            self.line(&line, &mut out);
        }
        out
    }

    fn finish(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        if let Some(rest) = self.lines.take_rest() {
            self.line(&rest, &mut out);
        }
        self.flush_event(&mut out);
        out
    }
}

/// Newline-delimited JSON: one object per line.
pub(crate) struct NdjsonDecoder {
    provider: ProviderKind,
    lines: LineBuffer,
    parse: ParseFn,
}

impl NdjsonDecoder {
    pub(crate) fn new(provider: ProviderKind, parse: ParseFn) -> Self {
        Self {
            provider,
            lines: LineBuffer::default(),
            parse,
        }
    }
}

impl FrameDecoder for NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.lines.push(bytes);
        let mut out = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if !line.trim().is_empty() {
                apply(self.provider, self.parse, &line, &mut out);
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        if let Some(rest) = self.lines.take_rest() {
            if !rest.trim().is_empty() {
                apply(self.provider, self.parse, &rest, &mut out);
            }
        }
        out
    }
}

enum State<D> {
    Connecting(reqwest::RequestBuilder, D),
    Reading {
        resp: reqwest::Response,
        decoder: D,
        pending: VecDeque<String>,
        ended: bool,
    },
    Finished,
}

/// Lazily send `request` and decode its body into text fragments.
///
/// Nothing touches the network until the stream is first polled. Dropping the
/// stream drops the response, which closes the connection. Transport errors
/// and non-2xx statuses end the stream with a single `StreamFailure` item.
pub(crate) fn fragment_stream<D: FrameDecoder>(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    decoder: D,
) -> FragmentStream {
    let s = stream::unfold(State::Connecting(request, decoder), move |mut state| async move {
        loop {
            state = match state {
                State::Connecting(request, decoder) => {
                    tracing::debug!(%provider, "sending chat request");
                    let resp = match request.send().await {
                        Ok(resp) => resp,
                        Err(e) => {
                            tracing::warn!(%provider, error = %e, "chat request failed");
                            return Some((Err(ChatError::stream(provider, e)), State::Finished));
                        }
                    };
                    let status = resp.status();
                    if !status.is_success() {
                        let text = resp.text().await.unwrap_or_default();
                        tracing::warn!(%provider, %status, "chat request rejected");
                        let message = if text.trim().is_empty() {
                            format!("HTTP {status}")
                        } else {
                            format!("HTTP {status}: {}", text.trim())
                        };
                        return Some((Err(ChatError::stream(provider, message)), State::Finished));
                    }
                    State::Reading {
                        resp,
                        decoder,
                        pending: VecDeque::new(),
                        ended: false,
                    }
                }
                State::Reading {
                    mut resp,
                    mut decoder,
                    mut pending,
                    mut ended,
                } => {
                    if let Some(text) = pending.pop_front() {
                        let next = State::Reading {
                            resp,
                            decoder,
                            pending,
                            ended,
                        };
                        return Some((Ok(text), next));
                    }
                    if ended {
                        return None;
                    }
                    let frames = match resp.chunk().await {
                        Ok(Some(bytes)) => decoder.push(&bytes),
                        Ok(None) => {
                            ended = true;
                            decoder.finish()
                        }
                        Err(e) => {
                            tracing::warn!(%provider, error = %e, "chat stream interrupted");
                            return Some((Err(ChatError::stream(provider, e)), State::Finished));
                        }
                    };
                    for frame in frames {
                        match frame {
                            Frame::Text(t) if !t.is_empty() => pending.push_back(t),
                            Frame::Text(_) => {}
                            Frame::Done => {
                                ended = true;
                                break;
                            }
                        }
                    }
                    State::Reading {
                        resp,
                        decoder,
                        pending,
                        ended,
                    }
                }
                State::Finished => return None,
            };
        }
    });
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(payload: &str) -> Result<Vec<Frame>, serde_json::Error> {
        let v: serde_json::Value = serde_json::from_str(payload)?;
        if v.get("done").and_then(|d| d.as_bool()) == Some(true) {
            return Ok(vec![Frame::Done]);
        }
        Ok(v.get("t")
            .and_then(|t| t.as_str())
            .map(|t| Frame::Text(t.to_string()))
            .into_iter()
            .collect())
    }

    #[test]
    fn ndjson_reassembles_split_lines() {
        let mut d = NdjsonDecoder::new(ProviderKind::Ollama, text_field);
        assert!(d.push(br#"{"t":"he"#).is_empty());
        assert_eq!(
            d.push(b"llo\"}\n{\"t\":\" world\"}\n"),
            vec![Frame::Text("hello".into()), Frame::Text(" world".into())]
        );
    }

    #[test]
    fn ndjson_skips_malformed_lines() {
        let mut d = NdjsonDecoder::new(ProviderKind::Ollama, text_field);
        let frames = d.push(b"{\"t\":\"a\"}\nnot json at all\n\n{\"t\":\"b\"}\n");
        assert_eq!(frames, vec![Frame::Text("a".into()), Frame::Text("b".into())]);
    }

    #[test]
    fn ndjson_flushes_unterminated_last_line() {
        let mut d = NdjsonDecoder::new(ProviderKind::Ollama, text_field);
        assert!(d.push(br#"{"done":true}"#).is_empty());
        assert_eq!(d.finish(), vec![Frame::Done]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let mut d = NdjsonDecoder::new(ProviderKind::Ollama, text_field);
        let line = "{\"t\":\"caf\u{e9}\"}\n".as_bytes().to_vec();
        let split = line.len() - 4;
        assert!(d.push(&line[..split]).is_empty());
        assert_eq!(d.push(&line[split..]), vec![Frame::Text("caf\u{e9}".into())]);
    }

    #[test]
    fn sse_events_end_on_blank_lines() {
        let mut d = SseDecoder::new(ProviderKind::Foundry, text_field);
        let frames =
            d.push(b"event: x\r\ndata: {\"t\":\"one\"}\r\n\r\ndata:{\"t\":\"two\"}\n\n: comment\n");
        assert_eq!(frames, vec![Frame::Text("one".into()), Frame::Text("two".into())]);
    }

    #[test]
    fn sse_skips_malformed_event_and_keeps_going() {
        let mut d = SseDecoder::new(ProviderKind::Foundry, text_field);
        let frames = d.push(b"data: {broken\n\ndata: {\"t\":\"ok\"}\n\n");
        assert_eq!(frames, vec![Frame::Text("ok".into())]);
    }

    #[test]
    fn sse_finish_flushes_pending_event() {
        let mut d = SseDecoder::new(ProviderKind::Foundry, text_field);
        assert!(d.push(b"data: {\"t\":\"tail\"}").is_empty());
        assert_eq!(d.finish(), vec![Frame::Text("tail".into())]);
    }
}
