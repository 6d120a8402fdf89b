#[derive(Debug, Clone)]
pub(crate) enum InternalEvent {
    ServerReply(String),

    P2POk {
        peer: String,
        message: Vec<u8>,
    },

    P2PDataPreparation {
        peer: String,
        message: Vec<u8>,
    },

    P2PData {
        peer: String,
        message: Vec<u8>,
    },

    P2PBye {
        peer: String,
        message: Vec<u8>,
    },

    P2PAck {
        peer: String,
        message: Vec<u8>,
    },
}
