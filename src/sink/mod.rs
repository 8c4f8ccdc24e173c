pub mod statsd;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::GaugeValue;

pub use statsd::StatsdClient;

/// Destination for gauge observations.
///
/// Implementations must accept concurrent callers: workers share one sink
/// behind an `Arc` without extra locking.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Sink name used in logs
    fn name(&self) -> &str;

    /// Record one gauge observation
    async fn gauge(&self, name: &str, value: GaugeValue) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::types::Gauge;

    /// Keeps every gauge it receives; optionally rejects one metric name
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        received: Mutex<Vec<Gauge>>,
        fail_on: Option<String>,
    }

    impl RecordingSink {
        pub(crate) fn failing_on(name: &str) -> Self {
            Self {
                received: Mutex::new(Vec::new()),
                fail_on: Some(name.to_string()),
            }
        }

        pub(crate) fn gauges(&self) -> Vec<Gauge> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn gauge(&self, name: &str, value: GaugeValue) -> Result<()> {
            if self.fail_on.as_deref() == Some(name) {
                anyhow::bail!("rejected {}", name);
            }
            self.received.lock().unwrap().push(Gauge {
                name: name.to_string(),
                value,
            });
            Ok(())
        }
    }
}
