/// Commands followed by a payload chunk. The chunk length in bytes is
/// the last parameter on the command line.
const PAYLOAD_COMMANDS: &[&str] = &["MSG", "UBX", "UBN", "GCF", "NOT", "IPG"];

const NORMAL_COMMANDS: &[&str] = &[
    "ACK", "ADC", "ADG", "ANS", "BLP", "BPR", "BYE", "CAL", "CHG", "CHL", "CVR", "FLN", "GTC",
    "ILN", "IRO", "JOI", "LSG", "LST", "NAK", "NLN", "OUT", "PNG", "PRP", "QNG", "QRY", "REG",
    "REM", "RMG", "RNG", "SBP", "SBS", "SYN", "USR", "UUX", "VER", "XFR",
];

/// What a command token means on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageKind {
    /// A known single line command.
    Normal,
    /// A known command carrying a payload chunk.
    Payload,
    /// A three digit numeric error reply.
    Error(u16),
    /// A token not in the command tables. Consumed as one line.
    Unknown,
}

pub fn classify(command: &str) -> MessageKind {
    if command.len() == 3 && command.bytes().all(|byte| byte.is_ascii_digit()) {
        return MessageKind::Error(command.parse().unwrap_or(0));
    }

    if PAYLOAD_COMMANDS.contains(&command) {
        return MessageKind::Payload;
    }

    if NORMAL_COMMANDS.contains(&command) {
        return MessageKind::Normal;
    }

    MessageKind::Unknown
}

/// A message built locally to be sent to the server.
///
/// The transaction ID is assigned by the session right before the
/// message is written, so it starts out as `None`. Commands like PNG
/// that carry no transaction ID are built with
/// [without_tr_id][Self::without_tr_id].
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub command: String,
    pub tr_id: Option<u64>,
    pub params: Vec<String>,
    pub chunk: Option<Vec<u8>>,
    pub supports_tr_id: bool,
}

impl OutgoingMessage {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            tr_id: None,
            params: Vec::new(),
            chunk: None,
            supports_tr_id: true,
        }
    }

    pub fn with_params(command: &str, params: &[&str]) -> Self {
        Self {
            params: params.iter().map(|param| param.to_string()).collect(),
            ..Self::new(command)
        }
    }

    pub fn with_chunk(command: &str, params: &[&str], chunk: Vec<u8>) -> Self {
        Self {
            chunk: Some(chunk),
            ..Self::with_params(command, params)
        }
    }

    /// A command that is sent without a transaction ID.
    pub fn without_tr_id(command: &str, params: &[&str]) -> Self {
        Self {
            supports_tr_id: false,
            ..Self::with_params(command, params)
        }
    }

    /// The command line without the payload chunk.
    pub fn first_line(&self) -> String {
        let mut line = self.command.clone();
        if let Some(tr_id) = self.tr_id {
            line.push(' ');
            line.push_str(&tr_id.to_string());
        }

        for param in &self.params {
            line.push(' ');
            line.push_str(param);
        }

        if let Some(chunk) = &self.chunk {
            line.push(' ');
            line.push_str(&chunk.len().to_string());
        }

        line
    }

    /// Wire form of the message. Payload messages get their chunk length
    /// appended as the last parameter.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.first_line().into_bytes();
        bytes.extend_from_slice(b"\r\n");

        if let Some(chunk) = &self.chunk {
            bytes.extend_from_slice(chunk);
        }

        bytes
    }
}

/// A complete message recognized out of the server byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub command: String,
    pub tr_id: Option<u64>,
    pub params: Vec<String>,
    pub chunk: Option<Vec<u8>>,
    pub kind: MessageKind,
}

impl IncomingMessage {
    /// The command line as received, without the payload chunk.
    pub fn first_line(&self) -> String {
        let mut line = self.command.clone();
        if let Some(tr_id) = self.tr_id {
            line.push(' ');
            line.push_str(&tr_id.to_string());
        }

        for param in &self.params {
            line.push(' ');
            line.push_str(param);
        }

        if let Some(chunk) = &self.chunk {
            line.push(' ');
            line.push_str(&chunk.len().to_string());
        }

        line
    }
}
