use serde::{Deserialize, Serialize};

/// 渲染器后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RendererBackendType {
    #[default]
    Chrome,
}

impl std::fmt::Display for RendererBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RendererBackendType::Chrome => write!(f, "chrome"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: RendererBackendType,
    pub window_width: u32,
    pub window_height: u32,
    /// 页面导航完成后等待页面稳定的时间
    pub navigation_settle_ms: u64,
    /// 浏览器可执行文件路径，为空时自动查找
    pub chrome_path: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: RendererBackendType::Chrome,
            window_width: 1280,
            window_height: 720,
            navigation_settle_ms: 500,
            chrome_path: None,
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(anyhow::anyhow!("渲染窗口尺寸必须大于0"));
        }

        if let Some(path) = &self.chrome_path {
            if path.trim().is_empty() {
                return Err(anyhow::anyhow!("浏览器路径不能为空字符串"));
            }
        }

        Ok(())
    }
}
