pub(crate) mod base_id;
pub mod binary_header;
pub(crate) mod duel;
pub mod file_context;
pub(crate) mod file_transfer;
pub mod message;
pub(crate) mod retriever;
pub(crate) mod router;
pub mod slp;
