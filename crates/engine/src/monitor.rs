use crate::cursor::BlockCursor;
use crate::error::EngineError;
use api_client::{ChainClient, HeadEvent};
use core_types::{BlockDetail, BlockNumber, FeeData};
use events::{AlertLevel, Envelope, EnvelopeSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Turns upstream head notifications into `BLOCK_DATA` envelopes.
///
/// Heads at or below the cursor are dropped silently. A head whose detail or
/// fee lookup fails is logged and skipped: there is no retry and no backfill,
/// and the next head resumes normal operation.
pub struct ChainHeadMonitor {
    client: Arc<dyn ChainClient>,
    sink: Arc<dyn EnvelopeSink>,
    cursor: Arc<BlockCursor>,
    request_timeout: Duration,
    /// Set while the upstream subscription is down, so the recovery can be announced.
    feed_lost: bool,
}

impl ChainHeadMonitor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        sink: Arc<dyn EnvelopeSink>,
        cursor: Arc<BlockCursor>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            sink,
            cursor,
            request_timeout,
            feed_lost: false,
        }
    }

    /// Consumes head events until the upstream channel closes.
    pub async fn run(mut self, mut heads: mpsc::Receiver<HeadEvent>) {
        tracing::info!(cursor = self.cursor.current(), "Chain head monitor started.");
        while let Some(event) = heads.recv().await {
            self.handle_event(event).await;
        }
        tracing::error!("Upstream head stream ended. No further BLOCK_DATA will be produced.");
    }

    pub async fn handle_event(&mut self, event: HeadEvent) {
        match event {
            HeadEvent::NewHead(number) => {
                if let Err(e) = self.process_head(number).await {
                    tracing::warn!(block = number, error = %e, "Failed to resolve block. Skipping.");
                }
            }
            HeadEvent::SubscriptionLost { reason, retry_in } => {
                // Systemic, unlike a single failed block. Clients get told.
                tracing::error!(
                    reason = %reason,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Upstream feed lost. BLOCK_DATA paused until it is restored."
                );
                if !self.feed_lost {
                    self.feed_lost = true;
                    self.sink
                        .publish(Envelope::alert(
                            AlertLevel::Warn,
                            format!("Upstream chain feed lost: {}", reason),
                        ))
                        .await;
                }
            }
            HeadEvent::Subscribed => {
                if self.feed_lost {
                    self.feed_lost = false;
                    tracing::info!("Upstream feed restored.");
                    self.sink
                        .publish(Envelope::alert(AlertLevel::Info, "Upstream chain feed restored"))
                        .await;
                } else {
                    tracing::debug!("Upstream subscription active.");
                }
            }
        }
    }

    /// Handles one head notification. Returns whether a `BLOCK_DATA` envelope was published.
    pub async fn process_head(&self, number: BlockNumber) -> Result<bool, EngineError> {
        if !self.cursor.is_fresh(number) {
            tracing::debug!(block = number, cursor = self.cursor.current(), "Discarding stale head.");
            return Ok(false);
        }

        let (block, fees) = self.resolve(number).await?;

        // A newer head may have been published while this one was in flight.
        if !self.cursor.advance(number) {
            tracing::debug!(block = number, "Head superseded while resolving.");
            return Ok(false);
        }

        tracing::info!(block = number, gas_price_gwei = %fees.gas_price_gwei(), "New block.");
        self.sink.publish(Envelope::block_data(&block, &fees)).await;
        Ok(true)
    }

    async fn resolve(&self, number: BlockNumber) -> Result<(BlockDetail, FeeData), EngineError> {
        let fetch = async {
            tokio::try_join!(self.client.get_block(number), self.client.get_fee_data())
        };
        let (block, fees) = tokio::time::timeout(self.request_timeout, fetch)
            .await
            .map_err(|_| EngineError::Timeout {
                block: number,
                after_ms: self.request_timeout.as_millis() as u64,
            })??;

        if block.number != number {
            return Err(EngineError::BlockMismatch {
                requested: number,
                received: block.number,
            });
        }
        Ok((block, fees))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::error::ApiError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use events::{EnvelopeType, Payload, RecordingSink};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Serves every block except the ones listed as failing.
    #[derive(Default)]
    struct MockChain {
        failing: HashSet<BlockNumber>,
        delay: Option<Duration>,
        calls: Mutex<Vec<BlockNumber>>,
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn get_block(&self, number: BlockNumber) -> Result<BlockDetail, ApiError> {
            self.calls.lock().unwrap().push(number);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(&number) {
                return Err(ApiError::BlockNotFound(number));
            }
            Ok(BlockDetail {
                number,
                timestamp: Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap(),
                base_fee_per_gas: Some(1_000_000_000),
            })
        }

        async fn get_fee_data(&self) -> Result<FeeData, ApiError> {
            Ok(FeeData { gas_price: 2_500_000_000 })
        }
    }

    fn monitor(chain: MockChain) -> (ChainHeadMonitor, Arc<RecordingSink>, Arc<BlockCursor>) {
        let sink = Arc::new(RecordingSink::new());
        let cursor = Arc::new(BlockCursor::new());
        let monitor = ChainHeadMonitor::new(
            Arc::new(chain),
            sink.clone(),
            cursor.clone(),
            Duration::from_secs(1),
        );
        (monitor, sink, cursor)
    }

    fn published_blocks(sink: &RecordingSink) -> Vec<BlockNumber> {
        sink.envelopes()
            .iter()
            .filter_map(|e| match e.payload() {
                Payload::BlockData(p) => Some(p.block_number),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn duplicates_and_out_of_order_heads_are_dropped() {
        let (monitor, sink, cursor) = monitor(MockChain::default());
        let (tx, rx) = mpsc::channel(16);
        for n in [5, 5, 7, 6, 8] {
            tx.send(HeadEvent::NewHead(n)).await.unwrap();
        }
        drop(tx);

        monitor.run(rx).await;

        assert_eq!(published_blocks(&sink), vec![5, 7, 8]);
        assert_eq!(cursor.current(), 8);
    }

    #[tokio::test]
    async fn stale_heads_do_not_hit_the_node() {
        let (monitor, _sink, _cursor) = monitor(MockChain::default());
        assert!(monitor.process_head(10).await.unwrap());
        assert!(!monitor.process_head(10).await.unwrap());
        assert!(!monitor.process_head(4).await.unwrap());
    }

    #[tokio::test]
    async fn failed_fetch_skips_block_without_advancing() {
        let chain = MockChain {
            failing: HashSet::from([7]),
            ..Default::default()
        };
        let (mut monitor, sink, cursor) = monitor(chain);

        for n in [6, 7, 8] {
            monitor.handle_event(HeadEvent::NewHead(n)).await;
        }

        assert_eq!(published_blocks(&sink), vec![6, 8]);
        assert_eq!(cursor.current(), 8);
        assert!(monitor.process_head(7).await.is_ok_and(|published| !published));
    }

    #[tokio::test]
    async fn payload_carries_resolved_fees() {
        let (monitor, sink, _cursor) = monitor(MockChain::default());
        monitor.process_head(42).await.unwrap();

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind(), EnvelopeType::BlockData);
        match envelopes[0].payload() {
            Payload::BlockData(p) => {
                assert_eq!(p.gas_price_gwei.to_string(), "2.5");
                assert_eq!(p.base_fee_gwei.map(|d| d.to_string()).as_deref(), Some("1"));
                assert_eq!(p.block_timestamp.timestamp(), 1_700_000_042);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_node_times_out() {
        let chain = MockChain {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (monitor, sink, cursor) = monitor(chain);

        let err = monitor.process_head(3).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { block: 3, .. }));
        assert!(sink.envelopes().is_empty());
        assert_eq!(cursor.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn head_superseded_in_flight_is_not_published() {
        let chain = MockChain {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let (monitor, sink, cursor) = monitor(chain);

        // Block 9 passes the freshness check, then block 10 lands while 9 is still resolving.
        let (published, _) = tokio::join!(monitor.process_head(9), async {
            cursor.advance(10);
        });

        assert!(!published.unwrap());
        assert!(sink.envelopes().is_empty());
        assert_eq!(cursor.current(), 10);
    }

    #[tokio::test]
    async fn feed_loss_and_recovery_are_announced_once() {
        let (mut monitor, sink, _cursor) = monitor(MockChain::default());
        let lost = || HeadEvent::SubscriptionLost {
            reason: "connection reset".to_string(),
            retry_in: Duration::from_secs(1),
        };

        monitor.handle_event(HeadEvent::Subscribed).await;
        monitor.handle_event(lost()).await;
        monitor.handle_event(lost()).await;
        monitor.handle_event(HeadEvent::Subscribed).await;

        let alerts: Vec<_> = sink
            .envelopes()
            .into_iter()
            .filter_map(|e| match e.payload() {
                Payload::Alert(a) => Some(a.level),
                _ => None,
            })
            .collect();
        assert_eq!(alerts, vec![AlertLevel::Warn, AlertLevel::Info]);
    }
}
