pub mod connection_manager;
pub mod message_queue;

pub use connection_manager::*;
pub use message_queue::*;
