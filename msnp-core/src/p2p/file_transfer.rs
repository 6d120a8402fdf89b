use crate::event::{Event, TransferResult};
use crate::p2p::base_id::BaseIdGenerator;
use crate::p2p::binary_header::{BinaryHeader, FLAG_BYE_ACK, FLAG_OLD_DATA, FLAG_OLD_NONE};
use crate::p2p::file_context::FileContext;
use crate::p2p::message::{MAX_DATA_LENGTH, P2pMessage};
use crate::p2p::slp::{
    CONTENT_TYPE_SESSION, EUF_GUID_FILE_TRANSFER, SlpBody, SlpRequest, SlpResponse,
};
use crate::sdk_error::SdkError;
use crate::session::outbound::Outbound;
use log::{debug, warn};
use rand::RngCore;
use rand::rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// How long `send_file` waits for a send channel to be attached.
const SEND_CHANNEL_WAIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq)]
enum TransferState {
    Pending,
    Running,
    Completed,
}

struct FileTransfer {
    peer: String,
    incoming: bool,
    started: bool,
    state: TransferState,
    file_name: String,
    file_size: u64,
    transferred: u64,
    path: Option<PathBuf>,
    branch: String,
    call_id: String,
}

/// Owns all file transfers of a session, keyed by P2P session ID.
///
/// A transfer leaves the map the moment it finishes, so late frames for
/// a canceled or completed transfer find nothing and are dropped.
pub(crate) struct FileTransferManager {
    user_email: String,
    event_tx: async_channel::Sender<Event>,
    outbound_tx: tokio::sync::watch::Sender<Option<Outbound>>,
    outbound_rx: tokio::sync::watch::Receiver<Option<Outbound>>,
    base_ids: BaseIdGenerator,
    transfers: Mutex<HashMap<u32, FileTransfer>>,
}

impl FileTransferManager {
    pub(crate) fn new(user_email: &str, event_tx: async_channel::Sender<Event>) -> Self {
        let (outbound_tx, outbound_rx) = tokio::sync::watch::channel(None);

        Self {
            user_email: user_email.to_string(),
            event_tx,
            outbound_tx,
            outbound_rx,
            base_ids: BaseIdGenerator::new(),
            transfers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn attach(&self, outbound: Outbound) {
        let _ = self.outbound_tx.send(Some(outbound));
    }

    async fn channel(&self) -> Result<Outbound, SdkError> {
        let mut outbound_rx = self.outbound_rx.clone();
        let outbound = tokio::time::timeout(
            SEND_CHANNEL_WAIT,
            outbound_rx.wait_for(|outbound| outbound.is_some()),
        )
        .await
        .or(Err(SdkError::CouldNotGetTransferChannel))?
        .or(Err(SdkError::CouldNotGetTransferChannel))?;

        outbound
            .clone()
            .ok_or(SdkError::CouldNotGetTransferChannel)
    }

    pub(crate) fn has(&self, session_id: u32) -> bool {
        self.transfers
            .lock()
            .map(|transfers| transfers.contains_key(&session_id))
            .unwrap_or(false)
    }

    /// Sends an SLP payload, split into windows when it does not fit in
    /// one message. Every window shares the identifier.
    async fn send_slp(
        &self,
        outbound: &Outbound,
        peer: &str,
        header_session_id: u32,
        payload: Vec<u8>,
    ) {
        let identifier = self.base_ids.next();
        let unique_id = rng().next_u32();
        let total_size = payload.len() as u64;
        let mut offset = 0u64;

        loop {
            let length = (total_size - offset).min(MAX_DATA_LENGTH as u64) as u32;
            let message = P2pMessage::new(
                BinaryHeader {
                    session_id: header_session_id,
                    identifier,
                    offset,
                    total_size,
                    length,
                    flag: FLAG_OLD_NONE,
                    ack_identifier: unique_id,
                    ack_unique_id: 0,
                    ack_data_size: 0,
                },
                payload.clone(),
                0,
            );

            match message.to_outgoing(peer) {
                Ok(outgoing) => {
                    if outbound.send(outgoing).await.is_err() {
                        warn!("Could not queue SLP message");
                        return;
                    }
                }

                Err(error) => {
                    warn!("Could not build SLP message: {error}");
                    return;
                }
            }

            offset += length as u64;
            if offset >= total_size {
                return;
            }
        }
    }

    /// Registers an incoming invitation, acks it and surfaces it as an
    /// event. The transfer stays pending until accepted or refused.
    pub(crate) async fn on_invite(&self, message: &P2pMessage, request: &SlpRequest) {
        let peer = request.from.clone();
        let Some(session_id) = request.body.get_u32("SessionID") else {
            warn!("File transfer invite without a session ID");
            return;
        };

        let context = request
            .body
            .get("Context")
            .and_then(|context| FileContext::decode(context).ok());

        let Some(context) = context else {
            warn!("File transfer invite with an invalid context");
            if let Ok(outbound) = self.channel().await {
                let decline = SlpResponse::decline_to(request).to_bytes();
                self.send_slp(&outbound, &peer, 0, decline).await;
            }

            return;
        };

        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.insert(
                session_id,
                FileTransfer {
                    peer: peer.clone(),
                    incoming: true,
                    started: false,
                    state: TransferState::Pending,
                    file_name: context.file_name.clone(),
                    file_size: context.file_size,
                    transferred: 0,
                    path: None,
                    branch: request.branch.clone(),
                    call_id: request.call_id.clone(),
                },
            );
        }

        if let Ok(outbound) = self.channel().await {
            let ack = P2pMessage::ack_of(message, self.base_ids.next());
            match ack.to_outgoing(&peer) {
                Ok(outgoing) => {
                    let _ = outbound.send(outgoing).await;
                }

                Err(error) => warn!("Could not build P2P ack: {error}"),
            }
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferRequest {
                session_id,
                email: peer,
                file_name: context.file_name,
                file_size: context.file_size,
            })
            .await;
    }

    /// Accepts a pending incoming transfer, saving the file at `path`.
    pub(crate) async fn accept(&self, session_id: u32, path: &Path) -> Result<(), SdkError> {
        let outbound = self.channel().await?;

        let (peer, branch, call_id) = {
            let mut transfers = self
                .transfers
                .lock()
                .or(Err(SdkError::TransferNotFound))?;

            let transfer = transfers
                .get_mut(&session_id)
                .ok_or(SdkError::TransferNotFound)?;

            if !transfer.incoming || transfer.state != TransferState::Pending {
                return Err(SdkError::InvalidTransferState);
            }

            transfer.path = Some(path.to_path_buf());
            transfer.state = TransferState::Running;
            transfer.started = true;

            (
                transfer.peer.clone(),
                transfer.branch.clone(),
                transfer.call_id.clone(),
            )
        };

        let mut body = SlpBody::new();
        body.set("SessionID", &session_id.to_string());

        let ok = SlpResponse {
            status_code: 200,
            reason: "OK".to_string(),
            to: peer.clone(),
            from: self.user_email.clone(),
            branch,
            cseq: 1,
            call_id,
            max_forwards: 0,
            content_type: CONTENT_TYPE_SESSION.to_string(),
            body,
        }
        .to_bytes();

        self.send_slp(&outbound, &peer, 0, ok).await;

        let _ = self
            .event_tx
            .send(Event::FileTransferStarted { session_id })
            .await;

        Ok(())
    }

    /// Refuses a pending incoming transfer with a 603 Decline.
    pub(crate) async fn refuse(&self, session_id: u32) -> Result<(), SdkError> {
        let outbound = self.channel().await?;

        let (peer, branch, call_id) = {
            let mut transfers = self
                .transfers
                .lock()
                .or(Err(SdkError::TransferNotFound))?;

            let transfer = transfers
                .get(&session_id)
                .ok_or(SdkError::TransferNotFound)?;

            if !transfer.incoming || transfer.state != TransferState::Pending {
                return Err(SdkError::InvalidTransferState);
            }

            let fields = (
                transfer.peer.clone(),
                transfer.branch.clone(),
                transfer.call_id.clone(),
            );

            transfers.remove(&session_id);
            fields
        };

        let mut body = SlpBody::new();
        body.set("SessionID", &session_id.to_string());

        let decline = SlpResponse {
            status_code: 603,
            reason: "Decline".to_string(),
            to: peer.clone(),
            from: self.user_email.clone(),
            branch,
            cseq: 1,
            call_id,
            max_forwards: 0,
            content_type: CONTENT_TYPE_SESSION.to_string(),
            body,
        }
        .to_bytes();

        self.send_slp(&outbound, &peer, 0, decline).await;

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: TransferResult::Refused,
            })
            .await;

        Ok(())
    }

    /// Cancels a transfer. A pending incoming transfer is declined; a
    /// running one, or anything we are sending, gets a BYE. Canceling a
    /// transfer that is already gone does nothing.
    pub(crate) async fn cancel(&self, session_id: u32) -> Result<(), SdkError> {
        if !self.has(session_id) {
            return Ok(());
        }

        let outbound = self.channel().await?;

        let (peer, branch, call_id, decline) = {
            let mut transfers = self
                .transfers
                .lock()
                .or(Err(SdkError::TransferNotFound))?;

            let Some(transfer) = transfers.get(&session_id) else {
                return Ok(());
            };

            let fields = (
                transfer.peer.clone(),
                transfer.branch.clone(),
                transfer.call_id.clone(),
                transfer.incoming && !transfer.started,
            );

            transfers.remove(&session_id);
            fields
        };

        if decline {
            let mut body = SlpBody::new();
            body.set("SessionID", &session_id.to_string());

            let decline = SlpResponse {
                status_code: 603,
                reason: "Decline".to_string(),
                to: peer.clone(),
                from: self.user_email.clone(),
                branch,
                cseq: 1,
                call_id,
                max_forwards: 0,
                content_type: CONTENT_TYPE_SESSION.to_string(),
                body,
            }
            .to_bytes();

            self.send_slp(&outbound, &peer, 0, decline).await;
        } else {
            let bye = SlpRequest::bye(&peer, &self.user_email, &branch, &call_id).to_bytes();
            self.send_slp(&outbound, &peer, session_id, bye).await;
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: TransferResult::Canceled,
            })
            .await;

        Ok(())
    }

    /// Invites a contact to receive a file. The transfer starts once the
    /// peer answers 200 OK.
    pub(crate) async fn send_file(&self, peer: &str, path: &Path) -> Result<u32, SdkError> {
        let outbound = self.channel().await?;

        let metadata = tokio::fs::metadata(path)
            .await
            .or(Err(SdkError::FileAccessError))?;

        if !metadata.is_file() {
            return Err(SdkError::FileAccessError);
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(SdkError::InvalidArgument)?;

        let file_size = metadata.len();
        let session_id = rng().next_u32() / 2 + 1;
        let context = FileContext::new(&file_name, file_size).encode();

        let mut body = SlpBody::new();
        body.set("EUF-GUID", EUF_GUID_FILE_TRANSFER);
        body.set("SessionID", &session_id.to_string());
        body.set("AppID", "2");
        body.set("Context", &context);

        let request = SlpRequest::invite(peer, &self.user_email, CONTENT_TYPE_SESSION, body);

        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.insert(
                session_id,
                FileTransfer {
                    peer: peer.to_string(),
                    incoming: false,
                    started: false,
                    state: TransferState::Pending,
                    file_name,
                    file_size,
                    transferred: 0,
                    path: Some(path.to_path_buf()),
                    branch: request.branch.clone(),
                    call_id: request.call_id.clone(),
                },
            );
        }

        self.send_slp(&outbound, peer, 0, request.to_bytes()).await;
        Ok(session_id)
    }

    /// Handles a 200 OK answering one of our invitations by starting the
    /// data loop. Returns whether the response belonged to a transfer.
    pub(crate) async fn on_ok(self: &Arc<Self>, response: &SlpResponse) -> bool {
        let Some(session_id) = response.body.get_u32("SessionID") else {
            return false;
        };

        let (peer, path, file_size) = {
            let Ok(mut transfers) = self.transfers.lock() else {
                return false;
            };

            let Some(transfer) = transfers.get_mut(&session_id) else {
                return false;
            };

            if transfer.incoming {
                warn!("200 OK for a transfer the peer is sending");
                return true;
            }

            if transfer.state != TransferState::Pending {
                return true;
            }

            transfer.state = TransferState::Running;
            transfer.started = true;

            (
                transfer.peer.clone(),
                transfer.path.clone(),
                transfer.file_size,
            )
        };

        let Some(path) = path else {
            return true;
        };

        let _ = self
            .event_tx
            .send(Event::FileTransferStarted { session_id })
            .await;

        let manager = self.clone();
        tokio::spawn(async move {
            let Ok(outbound) = manager.channel().await else {
                return;
            };

            manager
                .run_send_loop(outbound, session_id, peer, path, file_size)
                .await;
        });

        true
    }

    /// Streams the file as DATA messages, sending the next chunk only
    /// once the server acknowledges the previous one.
    async fn run_send_loop(
        &self,
        outbound: Outbound,
        session_id: u32,
        peer: String,
        path: PathBuf,
        file_size: u64,
    ) {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(_) => {
                self.fail(session_id, &peer).await;
                return;
            }
        };

        let identifier = self.base_ids.next();
        let unique_id = rng().next_u32();
        let mut offset = 0u64;

        while offset < file_size {
            if !self.has(session_id) {
                // Canceled mid transfer
                return;
            }

            let length = (file_size - offset).min(MAX_DATA_LENGTH as u64) as usize;
            let mut chunk = vec![0u8; length];
            if file.read_exact(&mut chunk).await.is_err() {
                self.fail(session_id, &peer).await;
                return;
            }

            let message = P2pMessage::new(
                BinaryHeader {
                    session_id,
                    identifier,
                    offset,
                    total_size: file_size,
                    length: length as u32,
                    flag: FLAG_OLD_DATA,
                    ack_identifier: unique_id,
                    ack_unique_id: 0,
                    ack_data_size: 0,
                },
                chunk,
                1,
            );

            let outgoing = match message.to_outgoing(&peer) {
                Ok(outgoing) => outgoing,
                Err(_) => {
                    self.fail(session_id, &peer).await;
                    return;
                }
            };

            // Recorded before the ack so a BYE racing in right after the
            // last chunk still sees the transfer as complete
            if let Ok(mut transfers) = self.transfers.lock() {
                if let Some(transfer) = transfers.get_mut(&session_id) {
                    transfer.transferred = offset + length as u64;
                    if transfer.transferred >= file_size {
                        transfer.state = TransferState::Completed;
                    }
                }
            }

            if outbound.send_awaiting_ack(outgoing).await.is_err() {
                if self.has(session_id) {
                    self.fail(session_id, &peer).await;
                }

                return;
            }

            offset += length as u64;

            if !self.has(session_id) {
                // The peer closed the call first and already reported it
                return;
            }

            let _ = self
                .event_tx
                .send(Event::FileTransferProgress {
                    session_id,
                    transferred: offset,
                    file_size,
                })
                .await;
        }

        if let Ok(mut transfers) = self.transfers.lock() {
            if transfers.remove(&session_id).is_none() {
                return;
            }
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: TransferResult::Good,
            })
            .await;
    }

    /// Appends a DATA message to the file being received. The last
    /// chunk is acked, answered with a BYE and surfaced as a finished
    /// event, all exactly once.
    pub(crate) async fn process_data(&self, message: &P2pMessage) -> bool {
        let session_id = message.header.session_id;

        let fields = {
            let Ok(transfers) = self.transfers.lock() else {
                return false;
            };

            let Some(transfer) = transfers.get(&session_id) else {
                return false;
            };

            if !transfer.incoming || transfer.state != TransferState::Running {
                debug!("P2P data for a transfer that is not running");
                return true;
            }

            (
                transfer.peer.clone(),
                transfer.path.clone(),
                transfer.file_size,
                transfer.branch.clone(),
                transfer.call_id.clone(),
            )
        };

        let (peer, path, file_size, branch, call_id) = fields;
        let Some(path) = path else {
            return true;
        };

        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .await?;

            file.write_all(&message.body).await
        }
        .await;

        if written.is_err() {
            self.fail(session_id, &peer).await;
            return true;
        }

        let transferred = {
            let Ok(mut transfers) = self.transfers.lock() else {
                return true;
            };

            let Some(transfer) = transfers.get_mut(&session_id) else {
                return true;
            };

            transfer.transferred += message.header.length as u64;
            transfer.transferred
        };

        let _ = self
            .event_tx
            .send(Event::FileTransferProgress {
                session_id,
                transferred,
                file_size,
            })
            .await;

        if transferred >= file_size {
            if let Ok(mut transfers) = self.transfers.lock() {
                if let Some(transfer) = transfers.get_mut(&session_id) {
                    transfer.state = TransferState::Completed;
                }
            }

            if let Ok(outbound) = self.channel().await {
                let ack = P2pMessage::ack_of(message, self.base_ids.next());
                match ack.to_outgoing(&peer) {
                    Ok(outgoing) => {
                        let _ = outbound.send(outgoing).await;
                    }

                    Err(error) => warn!("Could not build P2P ack: {error}"),
                }

                let bye = SlpRequest::bye(&peer, &self.user_email, &branch, &call_id).to_bytes();
                self.send_slp(&outbound, &peer, session_id, bye).await;
            }

            if let Ok(mut transfers) = self.transfers.lock() {
                transfers.remove(&session_id);
            }

            let _ = self
                .event_tx
                .send(Event::FileTransferFinished {
                    session_id,
                    result: TransferResult::Good,
                })
                .await;
        }

        true
    }

    /// Handles a 603 Decline answering one of our invitations.
    pub(crate) async fn on_decline(&self, response: &SlpResponse) -> bool {
        let Some(session_id) = response.body.get_u32("SessionID") else {
            return false;
        };

        {
            let Ok(mut transfers) = self.transfers.lock() else {
                return false;
            };

            if transfers.remove(&session_id).is_none() {
                return false;
            }
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: TransferResult::Refused,
            })
            .await;

        true
    }

    /// Handles a BYE closing a transfer. The BYE is acked; a transfer
    /// that had not completed counts as canceled by the peer.
    pub(crate) async fn on_bye(&self, message: &P2pMessage) -> bool {
        let session_id = message.header.session_id;

        let (peer, completed) = {
            let Ok(mut transfers) = self.transfers.lock() else {
                return false;
            };

            let Some(transfer) = transfers.remove(&session_id) else {
                return false;
            };

            (transfer.peer, transfer.state == TransferState::Completed)
        };

        if let Ok(outbound) = self.channel().await {
            let mut ack = P2pMessage::ack_of(message, self.base_ids.next());
            ack.header.flag = FLAG_BYE_ACK;

            match ack.to_outgoing(&peer) {
                Ok(outgoing) => {
                    let _ = outbound.send(outgoing).await;
                }

                Err(error) => warn!("Could not build P2P ack: {error}"),
            }
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: if completed {
                    TransferResult::Good
                } else {
                    TransferResult::Canceled
                },
            })
            .await;

        true
    }

    /// Ends a transfer that hit a file error: BYE to the peer, finished
    /// event, entry removed.
    async fn fail(&self, session_id: u32, peer: &str) {
        let removed = {
            let Ok(mut transfers) = self.transfers.lock() else {
                return;
            };

            transfers.remove(&session_id)
        };

        let Some(transfer) = removed else {
            return;
        };

        if let Ok(outbound) = self.channel().await {
            let bye = SlpRequest::bye(
                peer,
                &self.user_email,
                &transfer.branch,
                &transfer.call_id,
            )
            .to_bytes();

            self.send_slp(&outbound, peer, session_id, bye).await;
        }

        let _ = self
            .event_tx
            .send(Event::FileTransferFinished {
                session_id,
                result: TransferResult::FileError,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::transaction::TransactionId;
    use crate::internal_event::InternalEvent;
    use crate::p2p::binary_header::FLAG_ACK;
    use crate::p2p::slp::SlpMessage;
    use crate::session::outbound::SendJob;
    use tokio::sync::{broadcast, mpsc};

    const USER: &str = "me@example.com";
    const PEER: &str = "peer@example.com";

    struct Fixture {
        manager: Arc<FileTransferManager>,
        queue_rx: mpsc::Receiver<SendJob>,
        event_rx: async_channel::Receiver<Event>,
        internal_tx: broadcast::Sender<InternalEvent>,
    }

    fn fixture() -> Fixture {
        let (event_tx, event_rx) = async_channel::unbounded();
        let (queue_tx, queue_rx) = mpsc::channel(64);
        let (internal_tx, _) = broadcast::channel::<InternalEvent>(64);

        let outbound = Outbound::new(
            queue_tx,
            Arc::new(TransactionId::new()),
            internal_tx.clone(),
        );

        let manager = Arc::new(FileTransferManager::new(USER, event_tx));
        manager.attach(outbound);

        Fixture {
            manager,
            queue_rx,
            event_rx,
            internal_tx,
        }
    }

    async fn next_sent(queue_rx: &mut mpsc::Receiver<SendJob>) -> (P2pMessage, u64) {
        let SendJob::Message(outgoing) = queue_rx.recv().await.unwrap() else {
            panic!("sender shut down mid test");
        };

        let tr_id = outgoing.tr_id.unwrap();
        let (destination, message, _) =
            P2pMessage::from_mime_payload(outgoing.chunk.as_deref().unwrap()).unwrap();
        assert_eq!(destination, PEER);
        (message, tr_id)
    }

    fn peer_invite(session_id: u32, file_name: &str, file_size: u64) -> (P2pMessage, SlpRequest) {
        let mut body = SlpBody::new();
        body.set("EUF-GUID", EUF_GUID_FILE_TRANSFER);
        body.set("SessionID", &session_id.to_string());
        body.set("AppID", "2");
        body.set("Context", &FileContext::new(file_name, file_size).encode());

        let request = SlpRequest::invite(USER, PEER, CONTENT_TYPE_SESSION, body);
        let payload = request.to_bytes();
        let message = P2pMessage::new(
            BinaryHeader {
                session_id: 0,
                identifier: 700,
                offset: 0,
                total_size: payload.len() as u64,
                length: payload.len() as u32,
                flag: FLAG_OLD_NONE,
                ack_identifier: 7,
                ack_unique_id: 0,
                ack_data_size: 0,
            },
            payload,
            0,
        );

        (message, request)
    }

    #[tokio::test]
    async fn sender_streams_chunks_as_acks_arrive() {
        let mut fixture = fixture();

        let path = std::env::temp_dir().join("msnp_core_sender_test.bin");
        tokio::fs::write(&path, vec![9u8; 3000]).await.unwrap();

        let session_id = fixture.manager.send_file(PEER, &path).await.unwrap();

        let (invite, _) = next_sent(&mut fixture.queue_rx).await;
        assert_eq!(invite.header.flag, FLAG_OLD_NONE);
        let SlpMessage::Request(request) = SlpMessage::parse(&invite.body).unwrap() else {
            panic!("expected an INVITE");
        };
        assert_eq!(request.method, "INVITE");
        let context = FileContext::decode(request.body.get("Context").unwrap()).unwrap();
        assert_eq!(context.file_size, 3000);

        let mut ok_body = SlpBody::new();
        ok_body.set("SessionID", &session_id.to_string());
        let ok = SlpResponse::ok_to(&request, ok_body);

        let manager = fixture.manager.clone();
        assert!(manager.on_ok(&ok).await);
        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferStarted { session_id }
        );

        let mut expected = [(0u64, 1202u32), (1202, 1202), (2404, 596)].into_iter();
        while let Some((offset, length)) = expected.next() {
            let (chunk, tr_id) = next_sent(&mut fixture.queue_rx).await;
            assert_eq!(chunk.header.flag, FLAG_OLD_DATA);
            assert_eq!(chunk.header.session_id, session_id);
            assert_eq!(chunk.header.offset, offset);
            assert_eq!(chunk.header.length, length);
            assert_eq!(chunk.header.total_size, 3000);
            assert_eq!(chunk.body.len(), length as usize);

            fixture
                .internal_tx
                .send(InternalEvent::ServerReply(format!("ACK {tr_id}")))
                .unwrap();

            assert_eq!(
                fixture.event_rx.recv().await.unwrap(),
                Event::FileTransferProgress {
                    session_id,
                    transferred: offset + length as u64,
                    file_size: 3000,
                }
            );
        }

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferFinished {
                session_id,
                result: TransferResult::Good,
            }
        );
        assert!(!fixture.manager.has(session_id));
    }

    #[tokio::test]
    async fn receiver_writes_chunks_and_closes_the_call() {
        let mut fixture = fixture();

        let (invite, request) = peer_invite(4500, "incoming.bin", 1500);
        fixture.manager.on_invite(&invite, &request).await;

        let (ack, _) = next_sent(&mut fixture.queue_rx).await;
        assert_eq!(ack.header.flag, FLAG_ACK);
        assert_eq!(ack.header.ack_identifier, invite.header.identifier);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferRequest {
                session_id: 4500,
                email: PEER.to_string(),
                file_name: "incoming.bin".to_string(),
                file_size: 1500,
            }
        );

        let path = std::env::temp_dir().join("msnp_core_receiver_test.bin");
        let _ = tokio::fs::remove_file(&path).await;
        fixture.manager.accept(4500, &path).await.unwrap();

        let (ok, _) = next_sent(&mut fixture.queue_rx).await;
        let SlpMessage::Response(response) = SlpMessage::parse(&ok.body).unwrap() else {
            panic!("expected a 200 OK");
        };
        assert_eq!(response.status_code, 200);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferStarted { session_id: 4500 }
        );

        let first = P2pMessage::new(
            BinaryHeader {
                session_id: 4500,
                identifier: 701,
                offset: 0,
                total_size: 1500,
                length: 1202,
                flag: FLAG_OLD_DATA,
                ack_identifier: 8,
                ack_unique_id: 0,
                ack_data_size: 0,
            },
            vec![5u8; 1202],
            1,
        );

        assert!(fixture.manager.process_data(&first).await);
        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferProgress {
                session_id: 4500,
                transferred: 1202,
                file_size: 1500,
            }
        );

        let mut second = first.clone();
        second.header.offset = 1202;
        second.header.length = 298;
        second.body = vec![6u8; 298];

        assert!(fixture.manager.process_data(&second).await);
        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferProgress {
                session_id: 4500,
                transferred: 1500,
                file_size: 1500,
            }
        );

        let (final_ack, _) = next_sent(&mut fixture.queue_rx).await;
        assert_eq!(final_ack.header.flag, FLAG_ACK);
        assert_eq!(final_ack.header.ack_identifier, second.header.identifier);

        let (bye, _) = next_sent(&mut fixture.queue_rx).await;
        let SlpMessage::Request(bye_request) = SlpMessage::parse(&bye.body).unwrap() else {
            panic!("expected a BYE");
        };
        assert_eq!(bye_request.method, "BYE");
        assert_eq!(bye_request.call_id, request.call_id);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferFinished {
                session_id: 4500,
                result: TransferResult::Good,
            }
        );

        let saved = tokio::fs::read(&path).await.unwrap();
        assert_eq!(saved.len(), 1500);
        assert!(!fixture.manager.has(4500));

        // Late data for the finished transfer finds nothing
        assert!(!fixture.manager.process_data(&second).await);
    }

    #[tokio::test]
    async fn refusing_a_pending_transfer_declines_it() {
        let mut fixture = fixture();

        let (invite, request) = peer_invite(4501, "unwanted.bin", 100);
        fixture.manager.on_invite(&invite, &request).await;
        let _ = next_sent(&mut fixture.queue_rx).await;
        let _ = fixture.event_rx.recv().await.unwrap();

        fixture.manager.refuse(4501).await.unwrap();

        let (decline, _) = next_sent(&mut fixture.queue_rx).await;
        let SlpMessage::Response(response) = SlpMessage::parse(&decline.body).unwrap() else {
            panic!("expected a decline");
        };
        assert_eq!(response.status_code, 603);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferFinished {
                session_id: 4501,
                result: TransferResult::Refused,
            }
        );
        assert!(!fixture.manager.has(4501));
    }

    #[tokio::test]
    async fn canceling_a_running_transfer_sends_a_bye() {
        let mut fixture = fixture();

        let (invite, request) = peer_invite(4502, "halfway.bin", 1500);
        fixture.manager.on_invite(&invite, &request).await;
        let _ = next_sent(&mut fixture.queue_rx).await;
        let _ = fixture.event_rx.recv().await.unwrap();

        let path = std::env::temp_dir().join("msnp_core_canceled_test.bin");
        let _ = tokio::fs::remove_file(&path).await;
        fixture.manager.accept(4502, &path).await.unwrap();
        let _ = next_sent(&mut fixture.queue_rx).await;
        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferStarted { session_id: 4502 }
        );

        fixture.manager.cancel(4502).await.unwrap();

        let (bye, _) = next_sent(&mut fixture.queue_rx).await;
        assert_eq!(bye.header.session_id, 4502);
        let SlpMessage::Request(bye_request) = SlpMessage::parse(&bye.body).unwrap() else {
            panic!("expected a BYE");
        };
        assert_eq!(bye_request.method, "BYE");
        assert_eq!(bye_request.call_id, request.call_id);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferFinished {
                session_id: 4502,
                result: TransferResult::Canceled,
            }
        );
        assert!(!fixture.manager.has(4502));

        // Data still in flight when the cancel went out finds nothing
        let late = P2pMessage::new(
            BinaryHeader {
                session_id: 4502,
                identifier: 702,
                offset: 0,
                total_size: 1500,
                length: 1202,
                flag: FLAG_OLD_DATA,
                ack_identifier: 9,
                ack_unique_id: 0,
                ack_data_size: 0,
            },
            vec![5u8; 1202],
            1,
        );

        assert!(!fixture.manager.process_data(&late).await);
        assert!(fixture.event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn canceling_an_unknown_transfer_is_a_no_op() {
        let fixture = fixture();
        fixture.manager.cancel(1).await.unwrap();
        assert!(fixture.event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_decline_finishes_the_sending_transfer() {
        let mut fixture = fixture();

        let path = std::env::temp_dir().join("msnp_core_declined_test.bin");
        tokio::fs::write(&path, vec![1u8; 10]).await.unwrap();

        let session_id = fixture.manager.send_file(PEER, &path).await.unwrap();
        let (invite, _) = next_sent(&mut fixture.queue_rx).await;
        let SlpMessage::Request(request) = SlpMessage::parse(&invite.body).unwrap() else {
            panic!("expected an INVITE");
        };

        let decline = SlpResponse::decline_to(&request);
        assert!(fixture.manager.on_decline(&decline).await);

        assert_eq!(
            fixture.event_rx.recv().await.unwrap(),
            Event::FileTransferFinished {
                session_id,
                result: TransferResult::Refused,
            }
        );
        assert!(!fixture.manager.has(session_id));
    }
}
