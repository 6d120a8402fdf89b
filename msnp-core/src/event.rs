use crate::command::message::{IncomingMessage, OutgoingMessage};

/// How a file transfer ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferResult {
    /// All bytes were transferred.
    Good,
    /// One of the sides canceled the transfer.
    Canceled,
    /// The receiving side refused the invitation.
    Refused,
    /// The file could not be read or written.
    FileError,
}

/// Session and transfer events returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection is up and the session tasks are running.
    Established,

    /// A complete message arrived from the server.
    MessageReceived(IncomingMessage),

    /// A message was written to the socket.
    MessageSent(OutgoingMessage),

    /// The server replied with an error code. The request it answers
    /// is looked up by transaction ID in the outgoing history.
    ServerError {
        code: u16,
        request: OutgoingMessage,
    },

    /// The session timeout fired.
    SessionTimeout,

    /// The connection dropped without a local close. Followed by
    /// [Closed][Event::Closed].
    TransportError(String),

    /// The session was closed locally.
    Closed,

    /// A contact wants to send a file.
    FileTransferRequest {
        session_id: u32,
        email: String,
        file_name: String,
        file_size: u64,
    },

    /// A file transfer was accepted and is now running.
    FileTransferStarted {
        session_id: u32,
    },

    /// More file data was sent or received.
    FileTransferProgress {
        session_id: u32,
        transferred: u64,
        file_size: u64,
    },

    /// A file transfer ended. Fired exactly once per transfer.
    FileTransferFinished {
        session_id: u32,
        result: TransferResult,
    },

    /// A contact's display picture.
    DisplayPicture {
        email: String,
        data: Vec<u8>,
    },
}
