use crate::internal_event::InternalEvent;
use crate::p2p::binary_header::{BinaryHeader, FLAG_OLD_NONE};
use crate::p2p::duel::DuelManager;
use crate::p2p::file_transfer::FileTransferManager;
use crate::p2p::message::P2pMessage;
use crate::p2p::slp::{
    CONTENT_TYPE_SESSION, CONTENT_TYPE_TRANSFER, EUF_GUID_DISPLAY_PICTURE, EUF_GUID_FILE_TRANSFER,
    SlpMessage, SlpRequest, SlpResponse,
};
use crate::p2p_error::P2pError;
use crate::session::outbound::Outbound;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Demultiplexes incoming P2P traffic between the display picture
/// duels, the file transfers and the retrieval loops listening on the
/// internal channel.
pub(crate) struct P2pRouter {
    user_email: String,
    outbound: Outbound,
    duels: Arc<DuelManager>,
    transfers: Arc<FileTransferManager>,
    internal_tx: broadcast::Sender<InternalEvent>,
}

impl P2pRouter {
    pub(crate) fn new(
        user_email: &str,
        outbound: Outbound,
        duels: Arc<DuelManager>,
        transfers: Arc<FileTransferManager>,
        internal_tx: broadcast::Sender<InternalEvent>,
    ) -> Self {
        Self {
            user_email: user_email.to_string(),
            outbound,
            duels,
            transfers,
            internal_tx,
        }
    }

    /// Routes the MIME payload of a MSG command. Non P2P payloads are
    /// left alone; payloads addressed to someone else are dropped.
    pub(crate) async fn route(&self, sender: Option<&str>, payload: &[u8]) {
        let (destination, message, binary) = match P2pMessage::from_mime_payload(payload) {
            Ok(parsed) => parsed,
            Err(P2pError::NotP2p) => return,
            Err(error) => {
                warn!("Discarding P2P payload: {error}");
                return;
            }
        };

        if destination != self.user_email {
            debug!("P2P message for {destination} is not ours");
            return;
        }

        let peer = sender.unwrap_or_default().to_string();

        if message.header.is_ack() {
            if !self.duels.process(&message).await {
                let _ = self.internal_tx.send(InternalEvent::P2PAck {
                    peer,
                    message: binary,
                });
            }

            return;
        }

        if message.header.is_data() {
            if message.header.session_id != 0 && self.transfers.has(message.header.session_id) {
                self.transfers.process_data(&message).await;
                return;
            }

            let _ = self.internal_tx.send(InternalEvent::P2PData {
                peer,
                message: binary,
            });

            return;
        }

        // A four byte control body is the data preparation marker
        if message.header.is_control() && message.header.session_id != 0 && message.body.len() == 4
        {
            let _ = self.internal_tx.send(InternalEvent::P2PDataPreparation {
                peer,
                message: binary,
            });

            return;
        }

        match SlpMessage::parse(&message.body) {
            Ok(SlpMessage::Request(request)) => match request.method.as_str() {
                "INVITE" => {
                    if request.content_type == CONTENT_TYPE_TRANSFER {
                        // Direct connections are never negotiated
                        self.deny(&request.from, &message, &request).await;
                        return;
                    }

                    if request.content_type != CONTENT_TYPE_SESSION {
                        warn!("Invite with content type {}", request.content_type);
                        return;
                    }

                    match request.body.get("EUF-GUID") {
                        Some(EUF_GUID_DISPLAY_PICTURE) => {
                            self.duels.start_duel(&message, &request).await;
                        }

                        Some(EUF_GUID_FILE_TRANSFER) => {
                            self.transfers.on_invite(&message, &request).await;
                        }

                        other => warn!("Invite for an unsupported session kind: {other:?}"),
                    }
                }

                "BYE" => {
                    if !self.transfers.on_bye(&message).await {
                        let _ = self.internal_tx.send(InternalEvent::P2PBye {
                            peer,
                            message: binary,
                        });
                    }
                }

                method => debug!("Unhandled SLP method {method}"),
            },

            Ok(SlpMessage::Response(response)) => match response.status_code {
                200 => {
                    if !self.transfers.on_ok(&response).await {
                        let _ = self.internal_tx.send(InternalEvent::P2POk {
                            peer,
                            message: binary,
                        });
                    }
                }

                603 => {
                    if !self.transfers.on_decline(&response).await {
                        debug!("603 Decline matched no transfer");
                    }
                }

                code => debug!("Unhandled SLP status {code}"),
            },

            Err(error) => warn!("Could not parse SLP message: {error}"),
        }
    }

    async fn deny(&self, peer: &str, message: &P2pMessage, request: &SlpRequest) {
        let payload = SlpResponse::not_supported_to(request).to_bytes();
        let denial = P2pMessage::new(
            BinaryHeader {
                session_id: 0,
                identifier: message.header.identifier.wrapping_add(1),
                offset: 0,
                total_size: payload.len() as u64,
                length: payload.len() as u32,
                flag: FLAG_OLD_NONE,
                ack_identifier: message.header.ack_identifier,
                ack_unique_id: 0,
                ack_data_size: 0,
            },
            payload,
            0,
        );

        match denial.to_outgoing(peer) {
            Ok(outgoing) => {
                if self.outbound.send(outgoing).await.is_err() {
                    warn!("Could not queue direct connection denial");
                }
            }

            Err(error) => warn!("Could not build direct connection denial: {error}"),
        }
    }
}
