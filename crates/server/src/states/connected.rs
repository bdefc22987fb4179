//! Initial session state: id handshake and authentication.

use crate::client::Client;
use crate::objects::Player;
use crate::states::ClientState;
use protocol::packets::{Credentials, Msg};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_USERNAME_LEN: usize = 20;

/// Freshly connected session waiting for a login or registration.
#[derive(Debug, Default)]
pub struct Connected;

impl Connected {
    pub fn new() -> Self {
        Self
    }

    pub fn on_enter(&mut self, client: &Arc<Client>) {
        // Tell the client which id the hub assigned to it.
        client.socket_send(Msg::Id(client.id()));
    }

    pub fn on_exit(&mut self, _client: &Arc<Client>) {}

    pub async fn handle_message(
        &mut self,
        client: &Arc<Client>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        if sender_id != client.id() {
            // Broadcasts from playing peers mean nothing before auth.
            return None;
        }
        match msg {
            Msg::LoginRequest(creds) => self.handle_login(client, creds).await,
            Msg::RegisterRequest(creds) => self.handle_register(client, creds).await,
            other => {
                debug!("Client {}: ignoring {} packet while connected", client.id(), other.name());
                None
            }
        }
    }

    async fn handle_login(&mut self, client: &Arc<Client>, creds: Credentials) -> Option<ClientState> {
        let username = creds.username.trim();
        let row = match client.db_tx().queries.player_by_username(username).await {
            Ok(row) => row,
            Err(e) => {
                warn!("Client {}: database error during login: {e}", client.id());
                client.socket_send(Msg::Deny("internal server error".into()));
                return None;
            }
        };

        let Some(row) = row else {
            client.socket_send(Msg::Deny("incorrect username or password".into()));
            return None;
        };
        if row.password_hash != hash_password(&creds.password) {
            client.socket_send(Msg::Deny("incorrect username or password".into()));
            return None;
        }

        info!("Client {}: {} logged in", client.id(), row.username);
        Some(ClientState::in_game(Player::new(
            row.id,
            row.username,
            row.best_score,
            random_color(),
        )))
    }

    async fn handle_register(&mut self, client: &Arc<Client>, creds: Credentials) -> Option<ClientState> {
        let username = creds.username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            client.socket_send(Msg::Deny(format!(
                "username must be between 1 and {MAX_USERNAME_LEN} characters"
            )));
            return None;
        }

        match client.db_tx().queries.player_by_username(username).await {
            Ok(Some(_)) => {
                client.socket_send(Msg::Deny("username is already taken".into()));
                None
            }
            Ok(None) => {
                match client
                    .db_tx()
                    .queries
                    .create_player(username, &hash_password(&creds.password))
                    .await
                {
                    Ok(row) => {
                        info!("Client {}: registered new player {}", client.id(), row.username);
                        Some(ClientState::in_game(Player::new(
                            row.id,
                            row.username,
                            row.best_score,
                            random_color(),
                        )))
                    }
                    Err(e) => {
                        warn!("Client {}: database error during registration: {e}", client.id());
                        client.socket_send(Msg::Deny("internal server error".into()));
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Client {}: database error during registration: {e}", client.id());
                client.socket_send(Msg::Deny("internal server error".into()));
                None
            }
        }
    }
}

/// Hex-encoded SHA-256 digest, the format the registration path stores.
fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

fn random_color() -> u32 {
    rand::rng().random_range(0x00_0000..=0xFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_is_stable_hex() {
        let a = hash_password("hunter2");
        let b = hash_password("hunter2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_password("hunter3"));
    }

    #[test]
    fn test_random_color_is_24_bit() {
        for _ in 0..100 {
            assert!(random_color() <= 0xFF_FFFF);
        }
    }
}
