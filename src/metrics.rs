use crate::alerts::UsageReading;
use crate::now_unix;
use prometheus::core::Collector;
use prometheus::{
    opts, Counter, Encoder, Gauge, GaugeVec, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub diskwatch_disk_usage_percent: GaugeVec,
    pub diskwatch_host_up: GaugeVec,
    pub diskwatch_check_errors_total: IntCounterVec,
    pub diskwatch_alerts_total: IntCounterVec,
    pub diskwatch_alerts_suppressed_total: IntCounterVec,
    pub diskwatch_notifications_sent_total: IntCounterVec,
    pub diskwatch_delivery_errors_total: IntCounterVec,
    pub diskwatch_cycles_total: Counter,
    pub diskwatch_last_cycle_timestamp_seconds: Gauge,
    pub diskwatch_last_cycle_duration_seconds: Gauge,
    pub diskwatch_uptime_seconds: Gauge,
    pub diskwatch_scrape_count_total: Counter,
    pub diskwatch_hosts_configured: Gauge,
    pub diskwatch_channels_configured: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let diskwatch_disk_usage_percent = GaugeVec::new(
            opts!(
                "diskwatch_disk_usage_percent",
                "Last observed disk usage in percent by host and mount"
            ),
            &["host", "mount"],
        )?;
        let diskwatch_host_up = GaugeVec::new(
            opts!(
                "diskwatch_host_up",
                "1 if the last check of the host succeeded, 0 otherwise"
            ),
            &["host"],
        )?;
        let diskwatch_check_errors_total = IntCounterVec::new(
            opts!(
                "diskwatch_check_errors_total",
                "Failed host checks by host and error kind"
            ),
            &["host", "kind"],
        )?;
        let diskwatch_alerts_total = IntCounterVec::new(
            opts!(
                "diskwatch_alerts_total",
                "Alerts raised because usage crossed the threshold"
            ),
            &["host"],
        )?;
        let diskwatch_alerts_suppressed_total = IntCounterVec::new(
            opts!(
                "diskwatch_alerts_suppressed_total",
                "Alerts held back by the cooldown window"
            ),
            &["host"],
        )?;
        let diskwatch_notifications_sent_total = IntCounterVec::new(
            opts!(
                "diskwatch_notifications_sent_total",
                "Alert notifications delivered by channel"
            ),
            &["channel"],
        )?;
        let diskwatch_delivery_errors_total = IntCounterVec::new(
            opts!(
                "diskwatch_delivery_errors_total",
                "Alert notifications that failed to deliver by channel"
            ),
            &["channel"],
        )?;
        let diskwatch_cycles_total = Counter::with_opts(opts!(
            "diskwatch_cycles_total",
            "Completed passes over all configured hosts"
        ))?;
        let diskwatch_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "diskwatch_last_cycle_timestamp_seconds",
            "Unix timestamp of the last completed cycle"
        ))?;
        let diskwatch_last_cycle_duration_seconds = Gauge::with_opts(opts!(
            "diskwatch_last_cycle_duration_seconds",
            "Wall time of the last completed cycle"
        ))?;
        let diskwatch_uptime_seconds =
            Gauge::with_opts(opts!("diskwatch_uptime_seconds", "Daemon uptime in seconds"))?;
        let diskwatch_scrape_count_total = Counter::with_opts(opts!(
            "diskwatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let diskwatch_hosts_configured = Gauge::with_opts(opts!(
            "diskwatch_hosts_configured",
            "Number of hosts in the configuration"
        ))?;
        let diskwatch_channels_configured = Gauge::with_opts(opts!(
            "diskwatch_channels_configured",
            "Number of notification channels in the configuration"
        ))?;

        register(&registry, &diskwatch_disk_usage_percent)?;
        register(&registry, &diskwatch_host_up)?;
        register(&registry, &diskwatch_check_errors_total)?;
        register(&registry, &diskwatch_alerts_total)?;
        register(&registry, &diskwatch_alerts_suppressed_total)?;
        register(&registry, &diskwatch_notifications_sent_total)?;
        register(&registry, &diskwatch_delivery_errors_total)?;
        register(&registry, &diskwatch_cycles_total)?;
        register(&registry, &diskwatch_last_cycle_timestamp_seconds)?;
        register(&registry, &diskwatch_last_cycle_duration_seconds)?;
        register(&registry, &diskwatch_uptime_seconds)?;
        register(&registry, &diskwatch_scrape_count_total)?;
        register(&registry, &diskwatch_hosts_configured)?;
        register(&registry, &diskwatch_channels_configured)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            diskwatch_disk_usage_percent,
            diskwatch_host_up,
            diskwatch_check_errors_total,
            diskwatch_alerts_total,
            diskwatch_alerts_suppressed_total,
            diskwatch_notifications_sent_total,
            diskwatch_delivery_errors_total,
            diskwatch_cycles_total,
            diskwatch_last_cycle_timestamp_seconds,
            diskwatch_last_cycle_duration_seconds,
            diskwatch_uptime_seconds,
            diskwatch_scrape_count_total,
            diskwatch_hosts_configured,
            diskwatch_channels_configured,
        }))
    }

    pub fn set_configured(&self, hosts: usize, channels: usize) {
        self.diskwatch_hosts_configured.set(hosts as f64);
        self.diskwatch_channels_configured.set(channels as f64);
    }

    pub fn observe_reading(&self, reading: &UsageReading) {
        self.diskwatch_disk_usage_percent
            .with_label_values(&[&reading.host, &reading.mount_point])
            .set(f64::from(reading.used_percent));
        self.diskwatch_host_up
            .with_label_values(&[&reading.host])
            .set(1.0);
    }

    pub fn inc_check_error(&self, host: &str, kind: &str) {
        self.diskwatch_host_up.with_label_values(&[host]).set(0.0);
        self.diskwatch_check_errors_total
            .with_label_values(&[host, kind])
            .inc();
    }

    pub fn inc_alert(&self, host: &str) {
        self.diskwatch_alerts_total.with_label_values(&[host]).inc();
    }

    pub fn inc_alert_suppressed(&self, host: &str) {
        self.diskwatch_alerts_suppressed_total
            .with_label_values(&[host])
            .inc();
    }

    pub fn inc_notification_sent(&self, channel: &str) {
        self.diskwatch_notifications_sent_total
            .with_label_values(&[channel])
            .inc();
    }

    pub fn inc_delivery_error(&self, channel: &str) {
        self.diskwatch_delivery_errors_total
            .with_label_values(&[channel])
            .inc();
    }

    pub fn observe_cycle(&self, finished_at_unix: i64, duration_secs: f64) {
        self.diskwatch_cycles_total.inc();
        self.diskwatch_last_cycle_timestamp_seconds
            .set(finished_at_unix as f64);
        self.diskwatch_last_cycle_duration_seconds.set(duration_secs);
    }

    pub fn inc_scrape_count(&self) {
        self.diskwatch_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.diskwatch_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
