pub(crate) mod outbound;

use crate::command::chain::MessageChain;
use crate::command::message::{IncomingMessage, MessageKind, OutgoingMessage};
use crate::command::recognizer::MessageRecognizer;
use crate::command::transaction::TransactionId;
use crate::event::Event;
use crate::event_handler::EventHandler;
use crate::internal_event::InternalEvent;
use crate::models::msn_object::MsnObject;
use crate::p2p::duel::DuelManager;
use crate::p2p::file_transfer::FileTransferManager;
use crate::p2p::retriever;
use crate::p2p::router::P2pRouter;
use crate::sdk_error::SdkError;
use crate::session::outbound::{Outbound, SendJob};
use log::{trace, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

/// A connection to an MSNP server: the socket, the tasks reading,
/// dispatching and writing messages, and the P2P managers hanging off
/// the dispatcher.
pub struct Session {
    user_email: String,
    event_tx: async_channel::Sender<Event>,
    event_rx: async_channel::Receiver<Event>,
    internal_tx: broadcast::Sender<InternalEvent>,
    outbound: Outbound,
    tr_id: Arc<TransactionId>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    outgoing_chain: Arc<StdMutex<MessageChain<OutgoingMessage>>>,
    incoming_chain: Arc<StdMutex<MessageChain<IncomingMessage>>>,
    duels: Arc<DuelManager>,
    transfers: Arc<FileTransferManager>,
    reader_task: JoinHandle<()>,
    cache_reaper: JoinHandle<()>,
    timeout_task: StdMutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Connects to the server, spawns the session tasks and returns a
    /// new instance. `user_email` is the address P2P traffic has to be
    /// addressed to.
    pub async fn connect(server: &str, port: &str, user_email: &str) -> Result<Self, SdkError> {
        let server_ip = lookup_host(format!("{server}:{port}"))
            .await
            .or(Err(SdkError::ResolutionError))?
            .next()
            .ok_or(SdkError::ResolutionError)?
            .ip()
            .to_string();

        let socket = TcpStream::connect(format!("{server_ip}:{port}"))
            .await
            .or(Err(SdkError::CouldNotConnectToServer))?;

        let (mut rd, wr) = socket.into_split();
        let writer = Arc::new(Mutex::new(wr));

        let (event_tx, event_rx) = async_channel::bounded::<Event>(32);
        let (send_tx, mut send_rx) = mpsc::channel::<SendJob>(16);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<IncomingMessage>(64);
        let (internal_tx, _) = broadcast::channel::<InternalEvent>(64);

        let tr_id = Arc::new(TransactionId::new());
        let outbound = Outbound::new(send_tx, tr_id.clone(), internal_tx.clone());

        let outgoing_chain = Arc::new(StdMutex::new(MessageChain::new()));
        let incoming_chain = Arc::new(StdMutex::new(MessageChain::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let duels = Arc::new(DuelManager::new(outbound.clone()));
        let cache_reaper = duels.start_cache_reaper();

        let transfers = Arc::new(FileTransferManager::new(user_email, event_tx.clone()));
        transfers.attach(outbound.clone());

        let router = P2pRouter::new(
            user_email,
            outbound.clone(),
            duels.clone(),
            transfers.clone(),
            internal_tx.clone(),
        );

        let reader_closing = closing.clone();
        let reader_event_tx = event_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut recognizer = MessageRecognizer::new();
            let mut buf = vec![0; 1664];

            loop {
                let error = match rd.read(&mut buf).await {
                    Ok(0) => "Connection closed by the server".to_string(),
                    Err(error) => error.to_string(),
                    Ok(received) => {
                        recognizer.push(&buf[..received]);
                        while let Some(message) = recognizer.recognize() {
                            if dispatch_tx.send(message).await.is_err() {
                                return;
                            }
                        }

                        continue;
                    }
                };

                // Losing the connection closes the session, but a local
                // close already fired its own event
                if !reader_closing.swap(true, Ordering::SeqCst) {
                    let _ = reader_event_tx.send(Event::TransportError(error)).await;
                    let _ = reader_event_tx.send(Event::Closed).await;
                }

                return;
            }
        });

        let dispatcher_event_tx = event_tx.clone();
        let dispatcher_internal_tx = internal_tx.clone();
        let dispatcher_outgoing_chain = outgoing_chain.clone();
        let dispatcher_incoming_chain = incoming_chain.clone();
        tokio::spawn(async move {
            // Keeps draining whatever the reader recognized, even after
            // the session starts closing
            while let Some(message) = dispatch_rx.recv().await {
                trace!("S: {}", message.first_line());

                if let Ok(mut chain) = dispatcher_incoming_chain.lock() {
                    chain.push(message.clone());
                }

                if let MessageKind::Error(code) = message.kind {
                    let request = message.tr_id.and_then(|tr_id| {
                        dispatcher_outgoing_chain
                            .lock()
                            .ok()
                            .and_then(|chain| chain.find_request(tr_id).cloned())
                    });

                    match request {
                        Some(request) => {
                            let _ = dispatcher_event_tx
                                .send(Event::ServerError { code, request })
                                .await;
                        }

                        None => warn!("Server error {code} with no matching request"),
                    }
                }

                if message.command == "MSG" {
                    if let Some(chunk) = &message.chunk {
                        router
                            .route(message.params.first().map(String::as_str), chunk)
                            .await;
                    }
                }

                let _ = dispatcher_internal_tx
                    .send(InternalEvent::ServerReply(message.first_line()));

                let _ = dispatcher_event_tx
                    .send(Event::MessageReceived(message))
                    .await;
            }
        });

        let sender_writer = writer.clone();
        let sender_event_tx = event_tx.clone();
        let sender_outgoing_chain = outgoing_chain.clone();
        tokio::spawn(async move {
            while let Some(job) = send_rx.recv().await {
                match job {
                    SendJob::Message(message) => {
                        let bytes = message.to_bytes();
                        let written = {
                            let mut writer = sender_writer.lock().await;
                            writer.write_all(&bytes).await
                        };

                        if let Err(error) = written {
                            warn!("Could not write to the socket: {error}");
                            let _ = sender_event_tx
                                .send(Event::TransportError(error.to_string()))
                                .await;

                            continue;
                        }

                        trace!("C: {}", message.first_line());
                        if let Ok(mut chain) = sender_outgoing_chain.lock() {
                            chain.push(message.clone());
                        }

                        let _ = sender_event_tx.send(Event::MessageSent(message)).await;
                    }

                    SendJob::Shutdown => {
                        let mut writer = sender_writer.lock().await;
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
        });

        let _ = event_tx.send(Event::Established).await;

        Ok(Self {
            user_email: user_email.to_string(),
            event_tx,
            event_rx,
            internal_tx,
            outbound,
            tr_id,
            writer,
            outgoing_chain,
            incoming_chain,
            duels,
            transfers,
            reader_task,
            cache_reaper,
            timeout_task: StdMutex::new(None),
            closing,
        })
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    /// Adds a new handler as a closure. Each handler runs on its own
    /// task, so one panicking does not take the session down.
    pub fn add_event_handler_closure<F>(&self, f: F)
    where
        F: Fn(Event) + Send + 'static,
    {
        let event_rx = self.event_rx.clone();
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                f(event);
            }
        });
    }

    /// Adds a new handler that implements the [EventHandler] trait.
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        let event_rx = self.event_rx.clone();
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                handler.handle(event).await;
            }
        });
    }

    /// Queues a message. The sender task assigns it to the socket in
    /// order; the returned transaction ID correlates any error reply.
    pub async fn send(&self, message: OutgoingMessage) -> Result<u64, SdkError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(SdkError::SessionClosed);
        }

        self.outbound.send(message).await
    }

    /// Writes a message on the calling task, bypassing the queue. The
    /// sent notification has fired by the time this returns.
    pub async fn send_blocking(&self, mut message: OutgoingMessage) -> Result<u64, SdkError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(SdkError::SessionClosed);
        }

        let tr_id = if message.supports_tr_id {
            let tr_id = self.tr_id.next();
            message.tr_id = Some(tr_id);
            tr_id
        } else {
            0
        };

        let bytes = message.to_bytes();

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_all(&bytes)
                .await
                .or(Err(SdkError::TransmittingError))?;

            writer.flush().await.or(Err(SdkError::TransmittingError))?;
        }

        trace!("C: {}", message.first_line());
        if let Ok(mut chain) = self.outgoing_chain.lock() {
            chain.push(message.clone());
        }

        self.event_tx
            .send(Event::MessageSent(message))
            .await
            .or(Err(SdkError::TransmittingError))?;

        Ok(tr_id)
    }

    /// The most recently sent message with this transaction ID.
    pub fn sent_request(&self, tr_id: u64) -> Option<OutgoingMessage> {
        self.outgoing_chain
            .lock()
            .ok()
            .and_then(|chain| chain.find_request(tr_id).cloned())
    }

    /// The most recently received message matching the predicate.
    pub fn received_message<F>(&self, predicate: F) -> Option<IncomingMessage>
    where
        F: Fn(&IncomingMessage) -> bool,
    {
        self.incoming_chain
            .lock()
            .ok()
            .and_then(|chain| chain.find(predicate).cloned())
    }

    /// Arms the session timeout, replacing any previous one. When it
    /// elapses a [SessionTimeout][Event::SessionTimeout] event fires; the
    /// socket stays open.
    pub fn set_session_timeout(&self, duration: Duration) {
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = event_tx.send(Event::SessionTimeout).await;
        });

        if let Ok(mut slot) = self.timeout_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    pub fn clear_session_timeout(&self) {
        if let Ok(mut slot) = self.timeout_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    /// Closes the session. Queued outgoing messages are flushed before
    /// the socket shuts down, already received messages keep being
    /// dispatched, and a [Closed][Event::Closed] event fires exactly
    /// once. Closing twice does nothing the second time.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        self.reader_task.abort();
        self.cache_reaper.abort();
        self.clear_session_timeout();

        let _ = self.outbound.shutdown().await;
        let _ = self.event_tx.send(Event::Closed).await;
    }

    /// Sets the user's own display picture, served to contacts who ask
    /// for it. Returns the msnobject describing it.
    pub fn set_display_picture(&self, data: Vec<u8>) -> MsnObject {
        let object = MsnObject::for_display_picture(&self.user_email, &data);
        self.duels.set_default_picture(object.clone(), data);
        object
    }

    /// Caches a picture so duels can serve it when its msnobject is
    /// requested.
    pub fn add_display_picture(&self, object: &MsnObject, data: Vec<u8>) {
        self.duels.put_picture(object, data);
    }

    /// Requests a contact's display picture and waits for the data.
    pub async fn request_display_picture(
        &self,
        email: &str,
        msn_object: &MsnObject,
    ) -> Result<Event, SdkError> {
        retriever::retrieve_display_picture(
            &self.outbound,
            &self.internal_tx,
            &self.user_email,
            email,
            msn_object,
        )
        .await
    }

    /// Invites a contact to receive a file. Returns the session ID the
    /// transfer events will carry.
    pub async fn send_file(&self, email: &str, path: &Path) -> Result<u32, SdkError> {
        self.transfers.send_file(email, path).await
    }

    /// Accepts a pending file transfer, saving it at `save_path`.
    pub async fn accept_file_transfer(
        &self,
        session_id: u32,
        save_path: &Path,
    ) -> Result<(), SdkError> {
        self.transfers.accept(session_id, save_path).await
    }

    /// Refuses a pending file transfer.
    pub async fn refuse_file_transfer(&self, session_id: u32) -> Result<(), SdkError> {
        self.transfers.refuse(session_id).await
    }

    /// Cancels a file transfer. Unknown session IDs are ignored.
    pub async fn cancel_file_transfer(&self, session_id: u32) -> Result<(), SdkError> {
        self.transfers.cancel(session_id).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.cache_reaper.abort();
        self.clear_session_timeout();
    }
}
