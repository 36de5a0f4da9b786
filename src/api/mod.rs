//! SkyVault HTTP API: authenticated client, upload endpoints and server config

mod client;
mod media;
mod models;
mod system;

pub use client::ApiClient;
pub use media::MediaTransmitter;
pub use models::{ErrorBody, SystemConfig};
pub use system::fetch_upload_limits;
