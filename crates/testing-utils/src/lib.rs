//! # Kagami Testing Utils
//!
//! Shared testing utilities for the render server workspace.
//! This crate provides in-memory test doubles for the broker seam and
//! the renderer backend so that the dispatch loop can be tested without
//! a running RabbitMQ broker or browser.
//!
//! ## Features
//!
//! - **Mock Render Backend**: scripted backend with a shared recorder that
//!   survives the backend being dropped
//! - **Recording Ack Channel**: records every ack, nack and reply
//! - **Scripted Broker Connector**: scripted connect failures and sessions
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! kagami-testing-utils = { path = "../testing-utils" }
//! ```

pub mod broker;
pub mod helpers;
pub mod renderer;

pub use broker::*;
pub use helpers::*;
pub use renderer::*;
