//! Client core for the MSNP protocol: a [Session] owns the connection
//! and its reader, dispatcher and sender tasks, recognizes the line
//! based commands the server sends, correlates error replies with the
//! requests that caused them and speaks the P2P binary sub-protocol
//! used for display pictures and file transfers.
//!
//! ```no_run
//! use msnp_core::{Event, OutgoingMessage, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::connect("messenger.example.com", "1863", "alice@example.com").await?;
//!     session.add_event_handler_closure(|event| {
//!         if let Event::MessageReceived(message) = event {
//!             println!("{}", message.first_line());
//!         }
//!     });
//!
//!     session
//!         .send(OutgoingMessage::with_params("VER", &["MSNP11", "CVR0"]))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod event;
pub mod event_handler;
mod internal_event;
pub mod models;
pub mod p2p;
pub mod p2p_error;
pub mod sdk_error;
pub mod session;

pub use command::message::{IncomingMessage, MessageKind, OutgoingMessage};
pub use command::recognizer::MessageRecognizer;
pub use event::{Event, TransferResult};
pub use event_handler::EventHandler;
pub use models::msn_object::MsnObject;
pub use p2p_error::P2pError;
pub use sdk_error::SdkError;
pub use session::Session;
