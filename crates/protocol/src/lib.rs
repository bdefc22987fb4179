//! Shared wire protocol for the sporefall server.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - The packet envelope and message union shared with the game client

mod binary;
mod error;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;
