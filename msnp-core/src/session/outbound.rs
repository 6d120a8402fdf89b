use crate::command::message::OutgoingMessage;
use crate::command::transaction::TransactionId;
use crate::internal_event::InternalEvent;
use crate::sdk_error::SdkError;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

pub(crate) enum SendJob {
    Message(OutgoingMessage),
    /// Flushes whatever is still queued, then shuts the socket down.
    Shutdown,
}

/// Clonable handle for queueing messages onto a session's sender task.
/// Everything that sends through one session shares its transaction ID
/// source through this handle.
#[derive(Clone)]
pub(crate) struct Outbound {
    queue: mpsc::Sender<SendJob>,
    tr_id: Arc<TransactionId>,
    internal_tx: broadcast::Sender<InternalEvent>,
}

impl Outbound {
    pub(crate) fn new(
        queue: mpsc::Sender<SendJob>,
        tr_id: Arc<TransactionId>,
        internal_tx: broadcast::Sender<InternalEvent>,
    ) -> Self {
        Self {
            queue,
            tr_id,
            internal_tx,
        }
    }

    /// Assigns a transaction ID and queues the message. Commands that
    /// carry no transaction ID return 0.
    pub(crate) async fn send(&self, mut message: OutgoingMessage) -> Result<u64, SdkError> {
        let tr_id = if message.supports_tr_id {
            let tr_id = self.tr_id.next();
            message.tr_id = Some(tr_id);
            tr_id
        } else {
            0
        };

        self.queue
            .send(SendJob::Message(message))
            .await
            .or(Err(SdkError::TransmittingError))?;

        Ok(tr_id)
    }

    /// Queues the message and waits for the server to acknowledge it by
    /// transaction ID. A NAK or a 282 fails the send.
    pub(crate) async fn send_awaiting_ack(
        &self,
        message: OutgoingMessage,
    ) -> Result<u64, SdkError> {
        // Subscribing first so a fast reply cannot slip past
        let mut internal_rx = self.internal_tx.subscribe();
        let tr_id = self.send(message).await?;

        loop {
            if let InternalEvent::ServerReply(reply) =
                internal_rx.recv().await.or(Err(SdkError::ReceivingError))?
            {
                let args: Vec<&str> = reply.trim().split(' ').collect();
                match args.as_slice() {
                    ["ACK", id, ..] if *id == tr_id.to_string() => return Ok(tr_id),

                    ["NAK", id, ..] | ["282", id, ..] if *id == tr_id.to_string() => {
                        return Err(SdkError::MessageNotDelivered);
                    }

                    _ => (),
                }
            }
        }
    }

    pub(crate) async fn shutdown(&self) -> Result<(), SdkError> {
        self.queue
            .send(SendJob::Shutdown)
            .await
            .or(Err(SdkError::TransmittingError))
    }
}
