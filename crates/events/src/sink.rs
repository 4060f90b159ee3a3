use crate::messages::Envelope;
use async_trait::async_trait;
use std::sync::Mutex;

/// The single ingress for outbound envelopes.
///
/// Producers only ever see this trait; the broadcast hub implements it. A
/// publish never fails from the producer's point of view: delivery problems
/// are the sink's business.
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    async fn publish(&self, envelope: Envelope);
}

/// An in-memory sink that keeps every envelope it receives, in order.
/// Handy for exercising producers without a running server.
#[derive(Debug, Default)]
pub struct RecordingSink {
    envelopes: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EnvelopeSink for RecordingSink {
    async fn publish(&self, envelope: Envelope) {
        match self.envelopes.lock() {
            Ok(mut guard) => guard.push(envelope),
            Err(_) => tracing::error!("Recording sink lock poisoned; envelope dropped."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AlertLevel, EnvelopeType};

    #[tokio::test]
    async fn records_in_publish_order() {
        let sink = RecordingSink::new();
        sink.publish(Envelope::handshake()).await;
        sink.publish(Envelope::alert(AlertLevel::Info, "second")).await;

        let kinds: Vec<_> = sink.envelopes().iter().map(Envelope::kind).collect();
        assert_eq!(kinds, vec![EnvelopeType::System, EnvelopeType::Alert]);
    }
}
