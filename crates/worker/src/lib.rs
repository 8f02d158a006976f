//! 渲染器：句柄生命周期、编号分配与具体后端

#[cfg(feature = "chrome")]
pub mod chrome;
pub mod handle;
pub mod provider;

pub use handle::{RendererHandle, RendererId, RendererIdSequence};
pub use provider::{backend_factory_from_config, RendererProvider};
