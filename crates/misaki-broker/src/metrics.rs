use crate::queue::QueueDepth;
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters by queue and event
    pub messages_total: IntCounterVec,

    // Queue depth
    pub queue_visible: IntGaugeVec,
    pub queue_in_flight: IntGaugeVec,

    pub connections_open: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new(
                "misaki_messages_total",
                "Messages by queue and event (enqueued, duplicate, received, redelivered, deleted)",
            ),
            &["queue", "event"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let queue_visible = IntGaugeVec::new(
            Opts::new("misaki_queue_visible", "Messages waiting to be received"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_visible.clone()))?;

        let queue_in_flight = IntGaugeVec::new(
            Opts::new(
                "misaki_queue_in_flight",
                "Messages received but not yet deleted or expired",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(queue_in_flight.clone()))?;

        let connections_open =
            IntGauge::new("misaki_connections_open", "Open client connections")?;
        registry.register(Box::new(connections_open.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_total,
            queue_visible,
            queue_in_flight,
            connections_open,
        })
    }

    pub fn inc_messages(&self, queue: &str, event: &str) {
        self.messages_total.with_label_values(&[queue, event]).inc();
    }

    /// Update queue depth metrics
    pub fn update_queue_depth(&self, queue: &str, depth: QueueDepth) {
        self.queue_visible
            .with_label_values(&[queue])
            .set(depth.visible as i64);
        self.queue_in_flight
            .with_label_values(&[queue])
            .set(depth.in_flight as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
