//! 渲染器句柄
//!
//! 包装一个有状态的渲染器后端实例，负责它的生命周期与健康判断：
//!
//! ```text
//! NotStarted --initialize()--> Started --shutdown()--> Exited
//! ```
//!
//! `initialize()` 无论成功与否都会把句柄标记为已启动；是否健康是派生属性，
//! 见 [`RendererHandle::ok`]。句柄被丢弃时如果还没有退出，会自动执行一次
//! `shutdown()`。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kagami_core::{RenderBackend, RenderServerResult};
use metrics::histogram;
use tracing::{error, info, warn};

/// 渲染器编号，在进程内单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(u64);

impl RendererId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 渲染器编号生成器，由创建方显式持有并传递
#[derive(Debug, Clone, Default)]
pub struct RendererIdSequence {
    last: Arc<AtomicU64>,
}

impl RendererIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> RendererId {
        RendererId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

pub struct RendererHandle {
    id: RendererId,
    backend: Box<dyn RenderBackend>,
    started: bool,
    exited: bool,
    last_render_begin: Option<DateTime<Utc>>,
}

impl RendererHandle {
    pub fn new(id: RendererId, backend: Box<dyn RenderBackend>) -> Self {
        Self {
            id,
            backend,
            started: false,
            exited: false,
            last_render_begin: None,
        }
    }

    pub fn id(&self) -> RendererId {
        self.id
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn last_render_begin(&self) -> Option<DateTime<Utc>> {
        self.last_render_begin
    }

    /// 启动渲染器后端
    ///
    /// 启动失败时错误原样返回给调用方，但句柄仍会被标记为已启动，
    /// 之后的健康检查会反映后端的真实状态。
    pub fn initialize(&mut self) -> RenderServerResult<()> {
        info!(renderer = %self, "渲染器开始启动");
        let result = self.backend.initialize();
        self.started = true;

        match &result {
            Ok(()) => info!(renderer = %self, "渲染器启动成功"),
            Err(e) => error!(renderer = %self, error = %e, "渲染器启动失败"),
        }
        result
    }

    pub fn render(&mut self, link: &str) -> RenderServerResult<Vec<u8>> {
        self.last_render_begin = Some(Utc::now());
        let begin = Instant::now();
        info!(renderer = %self, link, "渲染器开始渲染");

        let result = self.backend.render(link);
        let elapsed_ms = begin.elapsed().as_secs_f64() * 1000.0;
        histogram!("kagami_render_duration_ms").record(elapsed_ms);

        match &result {
            Ok(image) => info!(
                renderer = %self,
                link,
                bytes = image.len(),
                elapsed_ms,
                "渲染器渲染结束"
            ),
            Err(e) => warn!(renderer = %self, link, error = %e, elapsed_ms, "渲染器渲染失败"),
        }
        result
    }

    /// 渲染器当前是否可用
    ///
    /// 从未启动过的句柄视为可用，避免在它有机会运行之前就被判定为不健康；
    /// 已退出的句柄永远不可用。
    pub fn ok(&self) -> bool {
        !self.exited && (!self.started || self.backend.is_healthy())
    }

    /// 退出渲染器，不会返回错误
    ///
    /// 重复调用是调用方的问题，会记录警告，但仍然会再调用一次后端的退出流程。
    pub fn shutdown(&mut self) {
        if self.exited {
            warn!(
                renderer = %self,
                "渲染器已经是退出状态，但是退出方法被重复调用，仍然会尝试退出"
            );
        } else {
            info!(renderer = %self, "渲染器正在退出");
        }

        if let Err(e) = self.backend.shutdown() {
            warn!(renderer = %self, error = %e, "渲染器退出过程中发生错误，已忽略");
        }
        self.exited = true;
        info!(renderer = %self, "渲染器退出了");
    }
}

impl fmt::Display for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.backend.kind(), self.id)
    }
}

impl fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererHandle")
            .field("id", &self.id)
            .field("kind", &self.backend.kind())
            .field("started", &self.started)
            .field("exited", &self.exited)
            .field("last_render_begin", &self.last_render_begin)
            .finish()
    }
}

impl Drop for RendererHandle {
    fn drop(&mut self) {
        if !self.exited {
            warn!(renderer = %self, "渲染器未被显式回收，自动执行退出");
            self.shutdown();
        }
    }
}
