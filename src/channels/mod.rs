//! Chat-platform boundary: the outbound `Transport` trait and its adapters.

pub mod discord;
pub mod memory;
pub mod transport;

pub use discord::DiscordTransport;
pub use memory::MemoryTransport;
pub use transport::*;
