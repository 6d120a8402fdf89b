use crate::command::message::{IncomingMessage, MessageKind, classify};
use log::warn;

/// Turns the raw server byte stream into complete messages.
///
/// Bytes are pushed in as they arrive and [recognize][Self::recognize]
/// is called until it returns `None`, meaning the remaining bytes are a
/// partial message. Leftover bytes stay buffered and parsing resumes
/// exactly where it stopped once more data is pushed.
pub struct MessageRecognizer {
    buffer: Vec<u8>,
}

impl MessageRecognizer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Recognizes the next complete message in the buffer.
    ///
    /// Payload commands are only returned once their whole chunk has
    /// arrived. Lines with an unparsable length parameter are skipped.
    pub fn recognize(&mut self) -> Option<IncomingMessage> {
        loop {
            let end = self.buffer.windows(2).position(|window| window == b"\r\n")?;
            let line_length = end + 2;
            let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(&command) = tokens.first() else {
                self.buffer.drain(..line_length);
                continue;
            };

            let kind = classify(command);
            if kind == MessageKind::Payload {
                let Some(chunk_length) = tokens.last().and_then(|token| token.parse::<usize>().ok())
                else {
                    warn!("Payload command without a length parameter: {line}");
                    self.buffer.drain(..line_length);
                    continue;
                };

                if self.buffer.len() < line_length + chunk_length {
                    return None;
                }

                let middle = &tokens[1..tokens.len() - 1];
                let tr_id = middle.first().and_then(|token| token.parse::<u64>().ok());
                let params = middle[if tr_id.is_some() { 1 } else { 0 }..]
                    .iter()
                    .map(|param| param.to_string())
                    .collect();

                let chunk = self.buffer[line_length..line_length + chunk_length].to_vec();
                self.buffer.drain(..line_length + chunk_length);

                return Some(IncomingMessage {
                    command: command.to_string(),
                    tr_id,
                    params,
                    chunk: Some(chunk),
                    kind,
                });
            }

            let tr_id = tokens.get(1).and_then(|token| token.parse::<u64>().ok());
            let params = tokens[if tr_id.is_some() { 2 } else { 1 }..]
                .iter()
                .map(|param| param.to_string())
                .collect();

            self.buffer.drain(..line_length);
            return Some(IncomingMessage {
                command: command.to_string(),
                tr_id,
                params,
                chunk: None,
                kind,
            });
        }
    }
}

impl Default for MessageRecognizer {
    fn default() -> Self {
        Self::new()
    }
}
