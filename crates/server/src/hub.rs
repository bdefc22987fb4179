//! The hub: owner of shared world state and the broadcast fan-out.

use crate::client::Client;
use crate::db::Queries;
use crate::objects::{spawn_coords, SharedCollection, SharedPlayer, Spore};
use protocol::packets::Packet;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Number of spores seeded at world boot; also the denominator of the
/// shedding probability.
pub const MAX_SPORES: usize = 1000;

/// Capacity of the hub channels and of each client's outbox.
pub const CHANNEL_CAPACITY: usize = 256;

/// Process-wide game objects, created at hub init and dropped with it.
pub struct SharedGameObjects {
    pub players: SharedCollection<SharedPlayer>,
    pub spores: SharedCollection<Arc<Spore>>,
}

/// Per-connection database handle. The queries share the hub's pool; a
/// query in flight when the session's tasks are aborted is dropped with
/// them.
#[derive(Debug, Clone)]
pub struct DbTx {
    pub queries: Queries,
}

pub struct Hub {
    pub shared_game_objects: SharedGameObjects,
    /// Connected sessions, keyed by their assigned ids.
    pub clients: SharedCollection<Arc<Client>>,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    broadcast_tx: mpsc::Sender<Packet>,
    receivers: Mutex<Option<Receivers>>,
    queries: Queries,
}

struct Receivers {
    register_rx: mpsc::Receiver<Arc<Client>>,
    unregister_rx: mpsc::Receiver<Arc<Client>>,
    broadcast_rx: mpsc::Receiver<Packet>,
}

impl Hub {
    /// Create the hub and open the (lazy) database pool.
    pub fn new(database_url: &str) -> anyhow::Result<Arc<Self>> {
        let queries = Queries::connect_lazy(database_url)?;
        let (register_tx, register_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(CHANNEL_CAPACITY);

        Ok(Arc::new(Self {
            shared_game_objects: SharedGameObjects {
                players: SharedCollection::new(),
                spores: SharedCollection::with_capacity(MAX_SPORES),
            },
            clients: SharedCollection::new(),
            register_tx,
            unregister_tx,
            broadcast_tx,
            receivers: Mutex::new(Some(Receivers {
                register_rx,
                unregister_rx,
                broadcast_rx,
            })),
            queries,
        }))
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn new_db_tx(&self) -> DbTx {
        DbTx {
            queries: self.queries.clone(),
        }
    }

    pub(crate) fn broadcast_tx(&self) -> &mpsc::Sender<Packet> {
        &self.broadcast_tx
    }

    pub(crate) fn unregister_tx(&self) -> &mpsc::Sender<Arc<Client>> {
        &self.unregister_tx
    }

    /// Queue a session for (re-)registration. Never blocks.
    pub fn register(&self, client: Arc<Client>) {
        if self.register_tx.try_send(client).is_err() {
            warn!("Register channel full, dropping registration");
        }
    }

    /// Adopt a freshly upgraded websocket: build the actor, assign it an
    /// id, install the initial state, and start its pumps.
    pub async fn serve(self: &Arc<Self>, socket: axum::extract::ws::WebSocket) {
        use futures_util::StreamExt;

        let client = Client::new(self.clone());
        let id = self.clients.add(client.clone());
        client.initialize(id).await;
        info!("Client {id}: new connection");

        let (sink, stream) = socket.split();
        tokio::spawn(client.clone().write_pump(sink));
        tokio::spawn(client.read_pump(stream));
    }

    /// Seed the world, then multiplex register/unregister/broadcast events
    /// until the process ends.
    pub async fn run(self: Arc<Self>) {
        let receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut receivers) = receivers else {
            warn!("Hub is already running");
            return;
        };

        self.seed_spores();
        info!("Hub awaiting events");

        loop {
            tokio::select! {
                Some(client) = receivers.register_rx.recv() => {
                    self.clients.add_with_id(client.clone(), client.id());
                }
                Some(client) = receivers.unregister_rx.recv() => {
                    let id = client.id();
                    self.clients.remove(id);
                    // Drop the owning player entry if the state machine has
                    // not already done so.
                    self.shared_game_objects.players.remove(id);
                }
                Some(packet) = receivers.broadcast_rx.recv() => {
                    self.fan_out(packet).await;
                }
                else => break,
            }
        }
    }

    /// Dispatch a broadcast into every session except the originator.
    async fn fan_out(&self, packet: Packet) {
        let mut targets = Vec::new();
        self.clients.for_each(|id, client| {
            if id != packet.sender_id {
                targets.push(client.clone());
            }
        });
        for client in targets {
            client.process_message(packet.sender_id, packet.msg.clone()).await;
        }
    }

    fn seed_spores(&self) {
        let mut rng = rand::rng();
        let spores = &self.shared_game_objects.spores;
        for _ in 0..MAX_SPORES {
            let radius = rng.random_range(5.0..=15.0);
            let (x, y) = spawn_coords(radius, &self.shared_game_objects.players, None);
            spores.add(Arc::new(Spore {
                x,
                y,
                radius,
                dropped_by: None,
                dropped_at: Instant::now(),
            }));
        }
        info!("Seeded {} spores", spores.len());
    }
}
