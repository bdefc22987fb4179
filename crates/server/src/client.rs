//! Per-connection client actor.
//!
//! Each session runs a read pump, a write pump, and whatever background
//! tasks its current state owns. The actor itself holds no transport
//! handle; the pumps own the socket halves, and the single-shot close
//! latch tears everything down exactly once no matter which side fails
//! first.

use crate::hub::{DbTx, Hub, SharedGameObjects, CHANNEL_CAPACITY};
use crate::states::ClientState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::packets::{Msg, Packet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

pub struct Client {
    id: OnceLock<u64>,
    hub: Arc<Hub>,
    db_tx: DbTx,
    state: Mutex<Option<ClientState>>,
    outbox_tx: StdMutex<Option<mpsc::Sender<Packet>>>,
    outbox_rx: StdMutex<Option<mpsc::Receiver<Packet>>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Client {
    pub fn new(hub: Arc<Hub>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let db_tx = hub.new_db_tx();
        Arc::new(Self {
            id: OnceLock::new(),
            hub,
            db_tx,
            state: Mutex::new(None),
            outbox_tx: StdMutex::new(Some(tx)),
            outbox_rx: StdMutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }

    /// The hub-assigned id; zero before [`Client::initialize`].
    pub fn id(&self) -> u64 {
        self.id.get().copied().unwrap_or(0)
    }

    /// Bind the hub-assigned id and enter the initial state.
    pub async fn initialize(self: &Arc<Self>, id: u64) {
        let _ = self.id.set(id);
        self.set_state(Some(ClientState::connected())).await;
    }

    pub fn db_tx(&self) -> &DbTx {
        &self.db_tx
    }

    pub fn shared_game_objects(&self) -> &SharedGameObjects {
        &self.hub.shared_game_objects
    }

    /// Route a message into the current state's handler and apply any
    /// transition the handler requests.
    pub async fn process_message(self: &Arc<Self>, sender_id: u64, msg: Msg) {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return;
        };
        if let Some(next) = state.handle_message(self, sender_id, msg).await {
            self.swap_state(&mut guard, Some(next)).await;
        }
    }

    /// Replace the current state, running the exit and enter hooks. A
    /// handler that wants to transition from inside a hub dispatch must
    /// call this on a fresh task instead of inline.
    pub async fn set_state(self: &Arc<Self>, next: Option<ClientState>) {
        let mut guard = self.state.lock().await;
        self.swap_state(&mut guard, next).await;
    }

    async fn swap_state(self: &Arc<Self>, guard: &mut Option<ClientState>, next: Option<ClientState>) {
        let prev_name = guard.as_ref().map_or("None", ClientState::name);
        let next_name = next.as_ref().map_or("None", ClientState::name);
        debug!("Client {}: switching from state {prev_name} to {next_name}", self.id());

        if let Some(mut old) = guard.take() {
            old.on_exit(self);
        }
        *guard = next;
        if let Some(state) = guard.as_mut() {
            state.on_enter(self).await;
        }
    }

    /// Queue a packet to this session's own socket, attributed to itself.
    /// Never blocks; a full outbox drops the packet.
    pub fn socket_send(&self, msg: Msg) {
        self.socket_send_as(msg, self.id());
    }

    /// Queue a packet to this session's own socket, attributed to another
    /// origin. Same overflow policy as [`Client::socket_send`].
    pub fn socket_send_as(&self, msg: Msg, sender_id: u64) {
        let guard = self.outbox_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            // Session already closed; late packets fall on the floor.
            return;
        };
        match tx.try_send(Packet::new(sender_id, msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                warn!("Client {}: send queue full, dropping {} packet", self.id(), packet.msg.name());
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Submit a packet to the hub for fan-out to every other session,
    /// attributed to this client. Never blocks; a full channel drops.
    pub fn broadcast(&self, msg: Msg) {
        match self.hub.broadcast_tx().try_send(Packet::new(self.id(), msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                warn!("Client {}: broadcast channel full, dropping {} packet", self.id(), packet.msg.name());
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Hand a message straight to a peer's state handler, attributed to
    /// this client. The peer's handler is expected to be non-blocking.
    pub async fn pass_to_peer(self: &Arc<Self>, msg: Msg, peer_id: u64) {
        if let Some(peer) = self.hub.clients.get(peer_id) {
            peer.process_message(self.id(), msg).await;
        }
    }

    /// Consume inbound frames until the transport fails or the session
    /// closes.
    pub async fn read_pump(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Binary(data))) => {
                        let mut packet = match Packet::decode(data) {
                            Ok(packet) => packet,
                            Err(e) => {
                                // Malformed frames are skipped, not fatal.
                                warn!("Client {}: error decoding frame: {e}", self.id());
                                continue;
                            }
                        };
                        // Clients may lazily omit their own id.
                        if packet.sender_id == 0 {
                            packet.sender_id = self.id();
                        }
                        self.process_message(packet.sender_id, packet.msg).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Client {}: websocket error: {e}", self.id());
                        break;
                    }
                },
                _ = self.close_signal.notified() => break,
            }
        }
        debug!("Client {}: closing read pump", self.id());
        self.close("read pump closed").await;
    }

    /// Drain the outbox into the socket, one frame per packet, until the
    /// outbox closes or a write fails.
    pub async fn write_pump(self: Arc<Self>, mut sink: SplitSink<WebSocket, Message>) {
        let rx = self.outbox_rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut rx) = rx else {
            warn!("Client {}: write pump already started once", self.id());
            return;
        };

        while let Some(packet) = rx.recv().await {
            let mut frame = packet.encode().to_vec();
            frame.push(b'\n');
            if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                warn!("Client {}: error writing {} packet: {e}", self.id(), packet.msg.name());
                break;
            }
        }
        debug!("Client {}: closing write pump", self.id());
        let _ = sink.close().await;
        self.close("write pump closed").await;
    }

    /// Tear the session down. Idempotent: only the first caller runs the
    /// shutdown sequence, and it never blocks on a full channel.
    pub async fn close(self: &Arc<Self>, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.broadcast(Msg::Disconnect(reason.to_string()));
        info!("Client {}: closing connection because: {reason}", self.id());

        self.set_state(None).await;

        match self.hub.unregister_tx().try_send(self.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(client)) => {
                warn!("Client {}: unregister channel full, forcing unregister in task", self.id());
                let hub = self.hub.clone();
                tokio::spawn(async move {
                    let _ = hub.unregister_tx().send(client).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }

        // Wake the read pump (the permit survives if it is mid-dispatch),
        // then drop the outbox sender so the write pump drains and exits.
        self.close_signal.notify_one();
        self.outbox_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Whether the close latch has fired.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn take_outbox(&self) -> Option<mpsc::Receiver<Packet>> {
        self.outbox_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
