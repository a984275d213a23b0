//! WebSocket module for the live feed connection

mod client;
mod manager;

pub use client::FeedSocket;
pub use manager::WebSocketManager;
