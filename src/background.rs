//! 暂存目录的周期清理任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::STAGING_SWEEP_INTERVAL_SECS;
use crate::upload::{UploadConfig, sweep_staging_dir};

/// 启动后台清理；`staging_ttl` 为零时不启动。
pub fn spawn_background_tasks(upload: Arc<UploadConfig>) {
    if upload.staging_ttl.is_zero() {
        debug!("staging sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STAGING_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match sweep_staging_dir(&upload.staging_dir, upload.staging_ttl).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "staging sweep finished"),
                Err(err) => warn!(error = %err, "staging sweep failed"),
            }
        }
    });
}
