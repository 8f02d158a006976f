//! 基于 headless Chrome 的渲染器后端
//!
//! 通过 Chrome DevTools Protocol 启动一个无头浏览器，使用单个标签页
//! 依次导航到目标链接并截取 PNG 图片。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions};
use kagami_core::{
    BackendFactory, RenderBackend, RenderServerError, RenderServerResult, RendererConfig,
};
use tracing::{debug, warn};

pub struct ChromeRenderer {
    config: RendererConfig,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            browser: None,
            tab: None,
        }
    }

    fn launch_options(&self) -> RenderServerResult<LaunchOptions<'static>> {
        LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((self.config.window_width, self.config.window_height)))
            // 默认 30 秒没有 CDP 消息就会断开浏览器；渲染服务器可能长时间空闲
            .idle_browser_timeout(Duration::MAX)
            .path(self.config.chrome_path.as_ref().map(PathBuf::from))
            .build()
            .map_err(|e| RenderServerError::RendererInit(format!("构建浏览器启动参数失败: {e}")))
    }

    /// 渲染失败后按浏览器是否还活着区分可挽回与不可挽回的错误
    fn classify_failure(&self, stage: &str, err: impl std::fmt::Display) -> RenderServerError {
        if self.is_healthy() {
            RenderServerError::RenderWarning(format!("{stage}: {err}"))
        } else {
            RenderServerError::RenderFatal(format!("{stage}，浏览器已失去响应: {err}"))
        }
    }
}

impl RenderBackend for ChromeRenderer {
    fn kind(&self) -> &'static str {
        "ChromeRenderer"
    }

    fn initialize(&mut self) -> RenderServerResult<()> {
        let browser = Browser::new(self.launch_options()?)
            .map_err(|e| RenderServerError::RendererInit(format!("启动浏览器失败: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| RenderServerError::RendererInit(format!("创建标签页失败: {e}")))?;

        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    fn render(&mut self, link: &str) -> RenderServerResult<Vec<u8>> {
        let tab = self
            .tab
            .clone()
            .ok_or_else(|| RenderServerError::RenderFatal("浏览器尚未启动".to_string()))?;

        tab.navigate_to(link)
            .map_err(|e| self.classify_failure("页面导航失败", e))?;
        tab.wait_until_navigated()
            .map_err(|e| self.classify_failure("等待页面加载失败", e))?;

        std::thread::sleep(Duration::from_millis(self.config.navigation_settle_ms));

        tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| self.classify_failure("截图失败", e))
    }

    fn is_healthy(&self) -> bool {
        match &self.browser {
            Some(browser) => browser.get_version().is_ok(),
            None => false,
        }
    }

    fn shutdown(&mut self) -> RenderServerResult<()> {
        if let Some(tab) = self.tab.take() {
            if let Err(e) = tab.close(false) {
                debug!("关闭标签页失败，浏览器可能已经退出: {e}");
            }
        }

        match self.browser.take() {
            // Browser 被丢弃时会结束浏览器进程
            Some(browser) => drop(browser),
            None => warn!("浏览器未在运行，跳过退出流程"),
        }
        Ok(())
    }
}

/// 每次调用创建一个新的 [`ChromeRenderer`]
pub struct ChromeBackendFactory {
    config: RendererConfig,
}

impl ChromeBackendFactory {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for ChromeBackendFactory {
    fn create_backend(&self) -> RenderServerResult<Box<dyn RenderBackend>> {
        Ok(Box::new(ChromeRenderer::new(self.config.clone())))
    }
}
