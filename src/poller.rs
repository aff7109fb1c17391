//! Waiting for an asset to become downloadable.
use crate::client::Client;
use crate::error::{Error, Result};
use crate::http::HttpOps;
use crate::item::{Asset, AssetStatus, RetrievalHandle};
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq)]
pub struct PollPolicy {
    /// fixed pause between two status queries
    pub interval: Duration,
    /// status queries before giving up, at least one is always made
    pub max_attempts: u32,
    /// consecutive transient failures tolerated before the error is returned
    pub transient_retries: u32,
    /// lifetime of a retrieval handle when the service reports no expiry
    pub handle_ttl: chrono::Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
            transient_retries: 3,
            handle_ttl: chrono::Duration::hours(1),
        }
    }
}

async fn pause(interval: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

impl<H: HttpOps> Client<H> {
    /// Poll `asset` until it is active and return its retrieval handle.
    ///
    /// A `failed` status ends the wait right away. Auth and not-found errors are
    /// returned without retrying; transient ones are retried up to
    /// `policy.transient_retries` times in a row. Cancelling `cancel` aborts the
    /// wait between two polls and leaves the remote activation running.
    pub async fn wait_until_active(
        self: &Self,
        asset: &Asset,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<RetrievalHandle> {
        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            match self.refresh(asset).await {
                Ok(current) => {
                    failures = 0;
                    attempts += 1;
                    match current.status {
                        AssetStatus::Active => {
                            info!("asset {} active after {} polls", asset.name, attempts);
                            return current.retrieval_handle(Utc::now(), policy.handle_ttl);
                        }
                        AssetStatus::Failed => {
                            return Err(Error::ActivationFailed(asset.name.clone()));
                        }
                        AssetStatus::Inactive | AssetStatus::Activating => {
                            debug!(
                                "asset {} {:?} ({}/{})",
                                asset.name, current.status, attempts, policy.max_attempts
                            );
                            if attempts >= policy.max_attempts {
                                return Err(Error::Timeout {
                                    asset: asset.name.clone(),
                                    attempts,
                                });
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() && failures < policy.transient_retries => {
                    failures += 1;
                    warn!(
                        "polling {} failed, retry {}/{}: {}",
                        asset.name, failures, policy.transient_retries, e
                    );
                }
                Err(e) => return Err(e),
            }

            pause(policy.interval, cancel).await?;
        }
    }

    /// Look up the named asset of an item, activate it and wait for its handle.
    pub async fn retrieve(
        self: &Self,
        item_type: &str,
        item_id: &str,
        asset_name: &str,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<RetrievalHandle> {
        let asset = self.asset(item_type, item_id, asset_name).await?;
        self.activate(&asset).await?;
        self.wait_until_active(&asset, policy, cancel).await
    }
}
