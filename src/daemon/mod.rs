//! Daemon module: the long-running indexing service.
//!
//! The daemon owns a [`ProjectRegistry`](crate::registry::ProjectRegistry)
//! and serves it over a Unix socket. Editor integrations and the CLI talk
//! to it with one JSON request per connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ctrlk serve                   │
//! │  - project registry                     │
//! │  - bulk indexer per project             │
//! │  - live-edit worker per project         │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ ctrlk-<uid>.sock
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           ctrlk CLI / editor            │
//! │  - sends JSON requests                  │
//! │  - receives JSON responses              │
//! └─────────────────────────────────────────┘
//! ```

pub mod protocol;
pub mod server;

pub use protocol::{Request, Response};
pub use server::{default_socket_path, is_daemon_running, process_request, send_request, start_daemon};
