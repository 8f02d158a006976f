pub mod app_config;
pub mod broker;
pub mod observability;
pub mod queues;
pub mod renderer;

pub use app_config::AppConfig;
pub use broker::BrokerConfig;
pub use observability::ObservabilityConfig;
pub use queues::QueueTopologyConfig;
pub use renderer::{RendererBackendType, RendererConfig};
