use std::fmt;

#[derive(Debug, PartialEq)]
pub enum P2pError {
    /// Payload is not a P2P message.
    NotP2p,

    /// Could not read or write the binary header.
    BinaryHeader,

    /// Could not parse the MSNSLP message.
    SlpParse,

    /// Invite has an invalid context.
    InvalidContext,
}

impl fmt::Display for P2pError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            P2pError::NotP2p => write!(f, "Payload is not a P2P message"),
            P2pError::BinaryHeader => write!(f, "Could not read or write the binary header"),
            P2pError::SlpParse => write!(f, "Could not parse the MSNSLP message"),
            P2pError::InvalidContext => write!(f, "Invite has an invalid context"),
        }
    }
}

impl std::error::Error for P2pError {}
