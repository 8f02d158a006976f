pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use self::config::*;
pub use errors::*;
pub use models::{InboundDelivery, RenderJob, RenderReply};
pub use traits::{AckChannel, BackendFactory, BrokerConnector, BrokerSession, RenderBackend};
