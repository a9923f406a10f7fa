use prometheus::{
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub transition_rejections_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub settlement_events_total: IntCounterVec,
    pub events_published_total: IntCounter,
    pub driver_pending_settlement: GaugeVec,
    pub reminder_sweep_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Applied order transitions by target status"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let transition_rejections_total = IntCounterVec::new(
            Opts::new("transition_rejections_total", "Rejected order transitions by error code"),
            &["code"],
        )
        .expect("valid transition_rejections_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let settlement_events_total = IntCounterVec::new(
            Opts::new("settlement_events_total", "Card-payment ledger events by kind"),
            &["event"],
        )
        .expect("valid settlement_events_total metric");

        let events_published_total = IntCounter::new(
            "events_published_total",
            "Notifications published to the broadcast bus",
        )
        .expect("valid events_published_total metric");

        let driver_pending_settlement = GaugeVec::new(
            Opts::new(
                "driver_pending_settlement",
                "Amount a driver currently owes the platform",
            ),
            &["driver_id"],
        )
        .expect("valid driver_pending_settlement metric");

        let reminder_sweep_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "reminder_sweep_seconds",
            "Duration of settlement reminder sweeps in seconds",
        ))
        .expect("valid reminder_sweep_seconds metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(transition_rejections_total.clone()))
            .expect("register transition_rejections_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(settlement_events_total.clone()))
            .expect("register settlement_events_total");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(driver_pending_settlement.clone()))
            .expect("register driver_pending_settlement");
        registry
            .register(Box::new(reminder_sweep_seconds.clone()))
            .expect("register reminder_sweep_seconds");

        Self {
            registry,
            order_transitions_total,
            transition_rejections_total,
            assignments_total,
            settlement_events_total,
            events_published_total,
            driver_pending_settlement,
            reminder_sweep_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
