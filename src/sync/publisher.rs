//! Retrying push of backends to the data plane.

use std::sync::Arc;

use crate::dataplane::DataPlane;
use crate::error::Result;
use crate::model::Backend;
use crate::observability::metrics;
use crate::resilience::Backoff;

/// Pushes backend sets with bounded exponential backoff.
pub struct DynamicPublisher {
    data_plane: Arc<dyn DataPlane>,
    backoff: Backoff,
}

impl DynamicPublisher {
    pub fn new(data_plane: Arc<dyn DataPlane>, backoff: Backoff) -> Self {
        Self {
            data_plane,
            backoff,
        }
    }

    /// Apply `backends`, retrying up to the configured attempt budget.
    ///
    /// Intermediate failures are logged as warnings; the last one is logged
    /// as an error and returned.
    pub async fn publish(&self, backends: &[Backend]) -> Result<()> {
        let attempts = self.backoff.attempts();
        let mut attempt = 1;
        loop {
            match self.data_plane.apply_dynamic_backends(backends).await {
                Ok(()) => {
                    metrics::record_dynamic_update("success");
                    if attempt > 1 {
                        tracing::info!(attempt, "Dynamic reconfiguration succeeded after retries");
                    } else {
                        tracing::debug!(backends = backends.len(), "Dynamic reconfiguration succeeded");
                    }
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    let delay = self.backoff.delay(attempt);
                    metrics::record_dynamic_update("retry");
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay = ?delay,
                        error = %e,
                        "Dynamic reconfiguration failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::record_dynamic_update("failure");
                    tracing::error!(
                        attempts,
                        error = %e,
                        "Dynamic reconfiguration failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::model::Configuration;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DataPlane for Flaky {
        async fn publish_full(&self, _config: &Configuration) -> Result<()> {
            Ok(())
        }

        async fn apply_dynamic_backends(&self, _backends: &[Backend]) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ControllerError::PublishFailure("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn render_and_syntax_check(&self, _config: &Configuration) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn backoff(retries: u32) -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            factor: 1.3,
            jitter: 0.1,
            retries,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let dp = Arc::new(Flaky { failures: 2, calls: AtomicU32::new(0) });
        let publisher = DynamicPublisher::new(dp.clone(), backoff(3));
        publisher.publish(&[]).await.unwrap();
        assert_eq!(dp.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let dp = Arc::new(Flaky { failures: 10, calls: AtomicU32::new(0) });
        let publisher = DynamicPublisher::new(dp.clone(), backoff(2));
        let err = publisher.publish(&[]).await.unwrap_err();
        assert!(matches!(err, ControllerError::PublishFailure(_)));
        assert_eq!(dp.calls.load(Ordering::SeqCst), 3);
    }
}
