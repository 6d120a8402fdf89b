use crate::models::msn_object::MsnObject;
use crate::p2p::base_id::BaseIdGenerator;
use crate::p2p::binary_header::{BinaryHeader, FLAG_DATA, FLAG_NONE};
use crate::p2p::message::{MAX_DATA_LENGTH, P2pMessage};
use crate::p2p::slp::{SlpBody, SlpRequest, SlpResponse};
use crate::session::outbound::Outbound;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::{debug, warn};
use rand::RngCore;
use rand::rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A duel with no progress for this long is dropped.
const DUEL_TIMEOUT: Duration = Duration::from_secs(60);

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const CACHE_IDLE_LIMIT: Duration = Duration::from_secs(1200);

struct CachedPicture {
    data: Arc<Vec<u8>>,
    last_access: Instant,
}

/// The serving side of one display picture exchange, driven forward by
/// the peer acknowledging each message we send.
///
/// Step 1: invite acked and 200 OK sent. Step 2: data preparation sent.
/// Step 3: picture data streaming, waiting for the final ack.
struct Duel {
    /// Identifier of the last message sent; the peer acks it.
    base_id: u32,
    session_id: u32,
    peer: String,
    step: u8,
    /// Bumped on every transition so a stale timer cannot kill a duel
    /// that has moved on.
    generation: u32,
    picture: Arc<Vec<u8>>,
}

enum Transition {
    Mismatch,
    SendPreparation {
        peer: String,
        preparation: P2pMessage,
        session_id: u32,
        generation: u32,
    },
    StreamData {
        peer: String,
        identifier: u32,
        picture: Arc<Vec<u8>>,
        session_id: u32,
        generation: u32,
    },
    Done,
}

/// Owns the running duels and the cache of pictures they can serve.
pub(crate) struct DuelManager {
    outbound: Outbound,
    base_ids: BaseIdGenerator,
    duels: Mutex<Vec<Duel>>,
    pictures: Mutex<HashMap<String, CachedPicture>>,
    default_picture: Mutex<Option<(MsnObject, Arc<Vec<u8>>)>>,
}

impl DuelManager {
    pub(crate) fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            base_ids: BaseIdGenerator::new(),
            duels: Mutex::new(Vec::new()),
            pictures: Mutex::new(HashMap::new()),
            default_picture: Mutex::new(None),
        }
    }

    /// The user's own display picture, served when an invite asks for it.
    pub(crate) fn set_default_picture(&self, object: MsnObject, data: Vec<u8>) {
        if let Ok(mut default) = self.default_picture.lock() {
            *default = Some((object, Arc::new(data)));
        }
    }

    pub(crate) fn put_picture(&self, object: &MsnObject, data: Vec<u8>) {
        if let Ok(mut pictures) = self.pictures.lock() {
            pictures.insert(
                object.sha1d.clone(),
                CachedPicture {
                    data: Arc::new(data),
                    last_access: Instant::now(),
                },
            );
        }
    }

    fn picture_for(&self, object: &MsnObject) -> Option<Arc<Vec<u8>>> {
        if let Ok(mut pictures) = self.pictures.lock() {
            if let Some(cached) = pictures.get_mut(&object.sha1d) {
                cached.last_access = Instant::now();
                return Some(cached.data.clone());
            }
        }

        if let Ok(default) = self.default_picture.lock() {
            if let Some((default_object, data)) = default.as_ref() {
                if default_object.sha1d == object.sha1d {
                    return Some(data.clone());
                }
            }
        }

        None
    }

    /// Enters a duel for a display picture invitation: acks the invite,
    /// answers 200 OK and waits for the peer to ack that.
    pub(crate) async fn start_duel(
        self: &Arc<Self>,
        invite_message: &P2pMessage,
        request: &SlpRequest,
    ) {
        let peer = request.from.clone();
        let Some(session_id) = request.body.get_u32("SessionID") else {
            warn!("Display picture invite without a session ID");
            return;
        };

        let Some(context) = request.body.get("Context") else {
            warn!("Display picture invite without a context");
            return;
        };

        let Ok(context) = STANDARD.decode(context) else {
            warn!("Display picture invite with an unreadable context");
            return;
        };

        let object = match MsnObject::from_xml(&String::from_utf8_lossy(&context)) {
            Ok(object) => object,
            Err(error) => {
                warn!("Display picture invite context is not an msnobj: {error}");
                return;
            }
        };

        let Some(picture) = self.picture_for(&object) else {
            warn!("No picture matching the requested msnobj");
            return;
        };

        let ack = P2pMessage::ack_of(invite_message, self.base_ids.next());

        let mut body = SlpBody::new();
        body.set("SessionID", &session_id.to_string());
        let ok = SlpResponse::ok_to(request, body).to_bytes();

        let ok_identifier = self.base_ids.next();
        let ok_message = P2pMessage::new(
            BinaryHeader {
                session_id: 0,
                identifier: ok_identifier,
                offset: 0,
                total_size: ok.len() as u64,
                length: ok.len() as u32,
                flag: FLAG_NONE,
                ack_identifier: rng().next_u32(),
                ack_unique_id: 0,
                ack_data_size: 0,
            },
            ok,
            0,
        );

        {
            let Ok(mut duels) = self.duels.lock() else {
                return;
            };

            duels.retain(|duel| duel.session_id != session_id);
            duels.push(Duel {
                base_id: ok_identifier,
                session_id,
                peer: peer.clone(),
                step: 1,
                generation: 1,
                picture,
            });
        }

        self.send(&peer, &ack).await;
        self.send(&peer, &ok_message).await;
        self.arm_timer(session_id, 1);
    }

    /// Routes an incoming ack to its duel. Returns whether one claimed
    /// it. Anything unexpected aborts the duel it reached.
    pub(crate) async fn process(self: &Arc<Self>, message: &P2pMessage) -> bool {
        let transition = {
            let Ok(mut duels) = self.duels.lock() else {
                return false;
            };

            let Some(index) = duels.iter().position(|duel| {
                duel.base_id == message.header.ack_identifier
                    || (message.header.session_id != 0
                        && duel.session_id == message.header.session_id)
            }) else {
                return false;
            };

            let duel = &mut duels[index];
            if !message.header.is_ack()
                || message.header.ack_identifier != duel.base_id
                || (duel.step >= 2 && message.header.session_id != duel.session_id)
            {
                duels.remove(index);
                Transition::Mismatch
            } else {
                match duel.step {
                    1 => {
                        let identifier = self.base_ids.next();
                        duel.base_id = identifier;
                        duel.step = 2;
                        duel.generation += 1;

                        let preparation = P2pMessage::new(
                            BinaryHeader {
                                session_id: duel.session_id,
                                identifier,
                                offset: 0,
                                total_size: 4,
                                length: 4,
                                flag: FLAG_NONE,
                                ack_identifier: rng().next_u32(),
                                ack_unique_id: 0,
                                ack_data_size: 0,
                            },
                            vec![0; 4],
                            1,
                        );

                        Transition::SendPreparation {
                            peer: duel.peer.clone(),
                            preparation,
                            session_id: duel.session_id,
                            generation: duel.generation,
                        }
                    }

                    2 => {
                        let identifier = self.base_ids.next();
                        duel.base_id = identifier;
                        duel.step = 3;
                        duel.generation += 1;

                        Transition::StreamData {
                            peer: duel.peer.clone(),
                            identifier,
                            picture: duel.picture.clone(),
                            session_id: duel.session_id,
                            generation: duel.generation,
                        }
                    }

                    _ => {
                        duels.remove(index);
                        Transition::Done
                    }
                }
            }
        };

        match transition {
            Transition::Mismatch => {
                warn!("Unexpected P2P message ended a display picture duel");
            }

            Transition::SendPreparation {
                peer,
                preparation,
                session_id,
                generation,
            } => {
                self.send(&peer, &preparation).await;
                self.arm_timer(session_id, generation);
            }

            Transition::StreamData {
                peer,
                identifier,
                picture,
                session_id,
                generation,
            } => {
                self.arm_timer(session_id, generation);

                let manager = self.clone();
                tokio::spawn(async move {
                    let total_size = picture.len() as u64;
                    let mut offset = 0u64;

                    for chunk in picture.chunks(MAX_DATA_LENGTH) {
                        let data_message = P2pMessage::new(
                            BinaryHeader {
                                session_id,
                                identifier,
                                offset,
                                total_size,
                                length: chunk.len() as u32,
                                flag: FLAG_DATA,
                                ack_identifier: rng().next_u32(),
                                ack_unique_id: 0,
                                ack_data_size: 0,
                            },
                            chunk.to_vec(),
                            1,
                        );

                        offset += chunk.len() as u64;
                        manager.send(&peer, &data_message).await;
                    }
                });
            }

            Transition::Done => {
                debug!("Display picture duel finished");
            }
        }

        true
    }

    async fn send(&self, peer: &str, message: &P2pMessage) {
        match message.to_outgoing(peer) {
            Ok(outgoing) => {
                if self.outbound.send(outgoing).await.is_err() {
                    warn!("Could not queue P2P message");
                }
            }

            Err(error) => warn!("Could not build P2P message: {error}"),
        }
    }

    /// Drops the duel if it is still in the same generation once the
    /// timeout elapses.
    fn arm_timer(self: &Arc<Self>, session_id: u32, generation: u32) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DUEL_TIMEOUT).await;
            if let Ok(mut duels) = manager.duels.lock() {
                let before = duels.len();
                duels.retain(|duel| {
                    duel.session_id != session_id || duel.generation != generation
                });

                if duels.len() != before {
                    debug!("Display picture duel timed out");
                }
            }
        });
    }

    /// Evicts cached pictures nobody has asked about for a while.
    pub(crate) fn start_cache_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CACHE_SWEEP_INTERVAL).await;
                if let Ok(mut pictures) = manager.pictures.lock() {
                    pictures.retain(|_, cached| cached.last_access.elapsed() < CACHE_IDLE_LIMIT);
                }
            }
        })
    }

    #[cfg(test)]
    fn duel_count(&self) -> usize {
        self.duels.lock().map(|duels| duels.len()).unwrap_or(0)
    }
}
