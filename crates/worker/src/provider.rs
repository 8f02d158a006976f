use std::sync::Arc;

use kagami_core::{BackendFactory, RenderServerResult, RendererBackendType, RendererConfig};
use metrics::counter;
use tracing::{error, info};

use crate::handle::{RendererHandle, RendererIdSequence};

/// 按配置选择渲染器后端工厂
pub fn backend_factory_from_config(
    config: &RendererConfig,
) -> RenderServerResult<Arc<dyn BackendFactory>> {
    match config.backend {
        #[cfg(feature = "chrome")]
        RendererBackendType::Chrome => {
            info!("使用 Chrome 渲染器后端");
            Ok(Arc::new(crate::chrome::ChromeBackendFactory::new(
                config.clone(),
            )))
        }
        #[cfg(not(feature = "chrome"))]
        RendererBackendType::Chrome => Err(kagami_core::RenderServerError::Configuration(
            "渲染器后端 chrome 未编译进当前程序，请启用 chrome 特性".to_string(),
        )),
    }
}

/// 负责创建渲染器句柄：分配编号、构造后端、启动
#[derive(Clone)]
pub struct RendererProvider {
    factory: Arc<dyn BackendFactory>,
    sequence: RendererIdSequence,
}

impl RendererProvider {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self::with_sequence(factory, RendererIdSequence::new())
    }

    pub fn with_sequence(factory: Arc<dyn BackendFactory>, sequence: RendererIdSequence) -> Self {
        Self { factory, sequence }
    }

    /// 构造一个尚未启动的渲染器
    pub fn create(&self) -> RenderServerResult<RendererHandle> {
        let backend = self.factory.create_backend()?;
        Ok(RendererHandle::new(self.sequence.next_id(), backend))
    }

    /// 构造并启动渲染器，启动失败时句柄会在返回前被回收
    pub fn launch(&self) -> RenderServerResult<RendererHandle> {
        let mut handle = self.create()?;
        handle.initialize()?;
        Ok(handle)
    }

    /// 退出旧渲染器并创建替代者
    ///
    /// 新渲染器启动失败时仍然返回它：它会被判定为不健康，下一次渲染失败后再次被替换。
    pub fn replace(&self, mut old: RendererHandle) -> RenderServerResult<RendererHandle> {
        info!(renderer = %old, "渲染器状态异常，准备重建");
        old.shutdown();
        drop(old);
        counter!("kagami_renderer_recreated_total").increment(1);

        let mut handle = self.create()?;
        if let Err(e) = handle.initialize() {
            error!(renderer = %handle, error = %e, "新渲染器启动失败，将在下次失败后再次重建");
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for RendererProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererProvider")
            .field("sequence", &self.sequence)
            .finish()
    }
}
