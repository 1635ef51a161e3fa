use anyhow::anyhow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Other,
}

/// Minimal SSE parser.
///
/// - Buffers bytes until a full line is available, so multi-byte characters split across chunks survive
/// - Emits Data events when a blank line ends an event
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<anyhow::Result<SseEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if let Some(data) = self.take_event() {
                    out.push(Ok(SseEvent::Data(data)));
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(anyhow!(e).context("SSE line is not valid UTF-8")));
                    continue;
                }
            };

            if let Some(rest) = s.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            } else {
                // event:, id:, retry: and ": keep-alive" comments
                out.push(Ok(SseEvent::Other));
            }
        }

        out
    }

    /// Flush a final event that was not followed by a blank line before the body closed.
    pub fn finish(&mut self) -> Option<anyhow::Result<SseEvent>> {
        if !self.buf.is_empty() {
            // Only a partial last line can be left over; terminate it and run it through push.
            self.buf.push(b'\n');
            for ev in self.push(&[]) {
                if let Err(e) = ev {
                    self.cur_data.clear();
                    return Some(Err(e));
                }
            }
        }
        self.take_event().map(|data| Ok(SseEvent::Data(data)))
    }

    fn take_event(&mut self) -> Option<String> {
        if self.cur_data.is_empty() {
            return None;
        }
        if self.cur_data.ends_with('\n') {
            self.cur_data.pop();
        }
        Some(std::mem::take(&mut self.cur_data))
    }
}
