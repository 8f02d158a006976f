//! 渲染任务调度：单条消息的处理回调与服务器主循环

pub mod dispatcher;
pub mod server_loop;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use server_loop::ServerLoop;
