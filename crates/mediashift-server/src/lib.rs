//! Mediashift: media conversion service with anti-fingerprint perturbation
//!
//! Ingests an artifact by URL or inline base64, re-encodes it through an
//! external transcoder with randomized parameters, and returns the local
//! path of the result. A per-device dual-TTL cache short-circuits repeat
//! requests.

pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod media;
pub mod pool;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;

pub use config::Config;
pub use state::{AppState, SharedState};
