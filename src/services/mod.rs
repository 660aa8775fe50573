//! Client-facing services built around the [`Hub`].
//!
//! - `hub`: rotator registry and event fan-out
//! - `tcp`: GS232 emulation for tracking programs
//! - `ws`: JSON event stream and request channel
//! - `web`: HTTP API, also mounting the WebSocket endpoint
//!
//! All listeners share one `Arc<Hub>`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use rotator_hub::services::{build_router, run_tcp_server, Hub};
//!
//! let hub = Hub::new(EventSink::default(), config.ws.clone());
//! tokio::spawn(run_tcp_server(Arc::clone(&hub), &config.tcp));
//! let router = build_router(Arc::clone(&hub), &config.http);
//! ```

pub mod hub;
pub mod tcp;
pub mod web;
pub mod ws;

pub use hub::*;
pub use tcp::*;
pub use web::*;
pub use ws::*;
