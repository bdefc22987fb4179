//! Per-session state machine.
//!
//! States form a closed set; the client actor drives the enter/exit hooks
//! and message dispatch, and applies whatever transition a handler returns.

mod connected;
mod ingame;

pub use connected::Connected;
pub use ingame::InGame;

use crate::client::Client;
use crate::objects::Player;
use protocol::packets::Msg;
use std::sync::Arc;

/// The closed set of session states.
pub enum ClientState {
    Connected(Connected),
    InGame(InGame),
}

impl ClientState {
    /// The initial state of every fresh connection.
    pub fn connected() -> Self {
        Self::Connected(Connected::new())
    }

    pub fn in_game(player: Player) -> Self {
        Self::InGame(InGame::new(player))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "Connected",
            Self::InGame(_) => "InGame",
        }
    }

    pub async fn on_enter(&mut self, client: &Arc<Client>) {
        match self {
            Self::Connected(state) => state.on_enter(client),
            Self::InGame(state) => state.on_enter(client).await,
        }
    }

    pub fn on_exit(&mut self, client: &Arc<Client>) {
        match self {
            Self::Connected(state) => state.on_exit(client),
            Self::InGame(state) => state.on_exit(client),
        }
    }

    /// Handle one message attributed to `sender_id`. Returns the successor
    /// state when the handler requests an inline transition.
    pub async fn handle_message(
        &mut self,
        client: &Arc<Client>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        match self {
            Self::Connected(state) => state.handle_message(client, sender_id, msg).await,
            Self::InGame(state) => state.handle_message(client, sender_id, msg),
        }
    }
}
