//! HTTP plane shared by every subsystem.
//!
//! # Data Flow
//! ```text
//! Entry point listener (server.rs)
//!     → generation handler lookup (ArcSwap)
//!     → router dispatch / middleware chain / service pipeline
//!     → all expressed as `Handler` trait objects (handler.rs)
//! ```

pub mod handler;
pub mod server;

pub use handler::{Handler, HttpRequest, HttpResponse, SharedHandler};
pub use server::EntryPointServer;
