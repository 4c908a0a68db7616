//! Development server with live reload for kiln.
//!
//! Serves the build output directory, watches source directories and pushes
//! reload or in-place asset replacement messages to connected browsers over
//! a WebSocket.

pub mod server;
pub mod watcher;
pub mod websocket;

pub use server::{DevServer, DevServerConfig, ServerError};
pub use watcher::{FileWatcher, WatchEvent};
pub use websocket::{client_script, inject_client, HmrHub, HmrMessage, CLIENT_PATH, WS_PATH};
