//! 渲染器后端接口定义
//!
//! 渲染器把网页渲染为图片。不同的后端（例如不同的浏览器引擎）实现同一组能力：
//!
//! - `initialize`: 启动后端，例如拉起一个浏览器进程
//! - `render`: 渲染链接并返回图片字节
//! - `is_healthy`: 后端当前是否还能继续工作
//! - `shutdown`: 尽力退出后端；资源已关闭时应当直接跳过而不是报错
//!
//! 渲染失败时，如果后端还能继续服务后续任务，应返回
//! [`RenderServerError::RenderWarning`](crate::RenderServerError::RenderWarning)；
//! 后端本身已不可用时返回
//! [`RenderServerError::RenderFatal`](crate::RenderServerError::RenderFatal)，
//! 并且之后 `is_healthy` 必须返回 false。
//!
//! 这些调用都是阻塞的，调用方负责把它们放到合适的线程上执行。

use crate::RenderServerResult;

pub trait RenderBackend: Send {
    /// 后端类型名，用于日志中的渲染器标识
    fn kind(&self) -> &'static str;

    fn initialize(&mut self) -> RenderServerResult<()>;

    fn render(&mut self, link: &str) -> RenderServerResult<Vec<u8>>;

    fn is_healthy(&self) -> bool;

    fn shutdown(&mut self) -> RenderServerResult<()>;
}

/// 创建渲染器后端实例
///
/// 每次替换渲染器都会调用一次，返回的后端尚未初始化。
pub trait BackendFactory: Send + Sync {
    fn create_backend(&self) -> RenderServerResult<Box<dyn RenderBackend>>;
}
