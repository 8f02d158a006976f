pub mod broker;
pub mod render_backend;

pub use broker::*;
pub use render_backend::*;
