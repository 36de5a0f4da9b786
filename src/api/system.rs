use chunk_upload::{TransmitError, UploadLimits};
use log::{info, warn};

use super::client::ApiClient;
use super::models::SystemConfig;

impl ApiClient {
    pub async fn system_config(&self) -> Result<SystemConfig, TransmitError> {
        self.get_json("system/config").await
    }
}

/// Upload limits reported by the server, or `fallback` if they cannot be used.
///
/// A zero chunk size, or a value too large to express in bytes, is treated
/// like a failed fetch. A zero direct threshold is honored and sends every
/// non-empty file through the chunked path.
pub async fn fetch_upload_limits(client: &ApiClient, fallback: UploadLimits) -> UploadLimits {
    match client.system_config().await {
        Ok(config) if config.max_chunk_size_mb > 0 => {
            match UploadLimits::checked_from_mb(
                config.max_direct_upload_size_mb,
                config.max_chunk_size_mb,
            ) {
                Some(limits) => {
                    info!(
                        "system_config: direct <= {}MB, chunk {}MB",
                        config.max_direct_upload_size_mb, config.max_chunk_size_mb
                    );
                    limits
                }
                None => {
                    warn!(
                        "system_config: limits {}MB / {}MB overflow, using defaults",
                        config.max_direct_upload_size_mb, config.max_chunk_size_mb
                    );
                    fallback
                }
            }
        }
        Ok(config) => {
            warn!(
                "system_config: chunk size {}MB is unusable, using defaults",
                config.max_chunk_size_mb
            );
            fallback
        }
        Err(err) => {
            warn!("system_config: fetch failed ({}), using defaults", err);
            fallback
        }
    }
}
