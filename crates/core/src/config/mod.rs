//! 配置管理
//!
//! 配置来源按优先级从低到高：内置默认值、TOML 配置文件、`KAGAMI_` 前缀的环境变量。
//!
//! ```toml
//! [broker]
//! host = "127.0.0.1"
//! port = 5672
//! account = "guest"
//! password = "guest"
//! vhost = "/"
//! retry_delay_seconds = 5
//!
//! [queues]
//! work_queue = "render"
//! dead_letter_exchange = "dlx"
//! dead_letter_queue = "render_dlx"
//! message_ttl_ms = 60000
//!
//! [renderer]
//! backend = "chrome"
//! window_width = 1280
//! window_height = 720
//!
//! [observability]
//! log_level = "info"
//! log_format = "pretty"
//! ```

pub mod models;

pub use models::*;
