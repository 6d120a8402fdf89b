use std::error::Error;
use std::fmt;

/// Errors the library might return.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkError {
    /// Could not resolve server name.
    ResolutionError,
    /// Could not connect to the server.
    CouldNotConnectToServer,
    /// An invalid argument was sent.
    InvalidArgument,
    /// This session has been closed.
    SessionClosed,
    /// Error receiving data.
    ReceivingError,
    /// Error transmitting data.
    TransmittingError,
    /// Message could not be delivered to all recipients.
    MessageNotDelivered,
    /// Could not read or write a P2P binary header.
    BinaryHeaderError,
    /// Could not get a channel to send the transfer through.
    CouldNotGetTransferChannel,
    /// No transfer with that session ID.
    TransferNotFound,
    /// Transfer is not in a state where that action is possible.
    InvalidTransferState,
    /// Could not open or read the file being transferred.
    FileAccessError,
    /// Could not get contact display picture.
    CouldNotGetDisplayPicture,
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SdkError::ResolutionError => write!(f, "Could not resolve server name"),

            SdkError::CouldNotConnectToServer => write!(f, "Could not connect to the server"),

            SdkError::InvalidArgument => write!(f, "An invalid argument was sent"),

            SdkError::SessionClosed => write!(f, "This session has been closed"),

            SdkError::ReceivingError => write!(f, "Error receiving data"),

            SdkError::TransmittingError => write!(f, "Error transmitting data"),

            SdkError::MessageNotDelivered => {
                write!(f, "Message could not be delivered to all recipients")
            }

            SdkError::BinaryHeaderError => {
                write!(f, "Could not read or write a P2P binary header")
            }

            SdkError::CouldNotGetTransferChannel => {
                write!(f, "Could not get a channel to send the transfer through")
            }

            SdkError::TransferNotFound => write!(f, "No transfer with that session ID"),

            SdkError::InvalidTransferState => {
                write!(f, "Transfer is not in a state where that action is possible")
            }

            SdkError::FileAccessError => {
                write!(f, "Could not open or read the file being transferred")
            }

            SdkError::CouldNotGetDisplayPicture => {
                write!(f, "Could not get contact display picture")
            }
        }
    }
}

impl Error for SdkError {}
