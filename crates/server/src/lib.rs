//! Tether Server - WebSocket endpoint for browser sessions
//!
//! Accepts browser connections, gives each one a [`Window`](tether_runtime::Window)
//! and hands it to the application callback:
//!
//! ```no_run
//! use tether_runtime::JsFunction;
//! use tether_server::{ServerConfig, serve};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! serve(&ServerConfig::default(), |window| async move {
//!     let _ = window.run(JsFunction::new("document.title = %1").arg("hello"));
//! })
//! .await
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod serve;
pub mod sessions;

pub use config::ServerConfig;
pub use serve::{CLIENT_PATH, WS_PATH, router, serve, serve_on};
pub use sessions::Sessions;
