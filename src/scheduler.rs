use crate::alerts::{evaluate, AlertCooldown, UsageReading};
use crate::collectors::{CheckError, UsageSource};
use crate::config::{Config, Host};
use crate::metrics::Metrics;
use crate::notify::{AlertMessage, Notifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub hosts_checked: usize,
    pub check_failures: usize,
    pub alerts: usize,
    pub suppressed: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

/// Walks every host in order, one at a time, then sleeps for the interval.
pub struct Scheduler {
    cfg: Arc<Config>,
    hosts: Vec<Host>,
    source: Arc<dyn UsageSource>,
    notifiers: Vec<Notifier>,
    metrics: Arc<Metrics>,
    cooldown: AlertCooldown,
}

impl Scheduler {
    pub fn new(
        cfg: Arc<Config>,
        hosts: Vec<Host>,
        source: Arc<dyn UsageSource>,
        notifiers: Vec<Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let cooldown = AlertCooldown::new(cfg.alert_cooldown_secs);
        Self {
            cfg,
            hosts,
            source,
            notifiers,
            metrics,
            cooldown,
        }
    }

    /// Runs cycles until `iterations` is reached or shutdown is signalled.
    /// Returns the number of completed cycles.
    pub async fn run(&mut self, iterations: Option<u64>, mut shutdown: watch::Receiver<bool>) -> u64 {
        let interval = Duration::from_secs(self.cfg.interval_secs);
        let mut completed = 0_u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, abandoning current cycle");
                    break;
                }
                report = self.run_cycle() => report,
            };
            completed += 1;
            info!(
                cycle = completed,
                hosts_checked = report.hosts_checked,
                check_failures = report.check_failures,
                alerts = report.alerts,
                suppressed = report.suppressed,
                delivered = report.delivered,
                delivery_failures = report.delivery_failures,
                "check cycle finished"
            );

            if iterations.is_some_and(|n| completed >= n) {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping check loop");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        completed
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        for host in &self.hosts {
            report.hosts_checked += 1;
            let reading = match check_host(&self.source, host).await {
                Ok(reading) => reading,
                Err(err) => {
                    report.check_failures += 1;
                    self.metrics.inc_check_error(&host.name, err.kind());
                    warn!(
                        host = %host.name,
                        address = %host.address,
                        kind = err.kind(),
                        error = %err,
                        "disk check failed"
                    );
                    continue;
                }
            };

            self.metrics.observe_reading(&reading);
            debug!(
                host = %reading.host,
                mount = %reading.mount_point,
                used_percent = reading.used_percent,
                "disk usage read"
            );

            let Some(event) = evaluate(&reading, host.threshold_percent) else {
                continue;
            };
            report.alerts += 1;
            self.metrics.inc_alert(&host.name);
            warn!(
                host = %host.name,
                mount = %reading.mount_point,
                used_percent = reading.used_percent,
                threshold = host.threshold_percent,
                "disk usage above threshold"
            );

            if self.cooldown.is_suppressed(&event, reading.timestamp) {
                report.suppressed += 1;
                self.metrics.inc_alert_suppressed(&host.name);
                debug!(host = %host.name, "alert suppressed by cooldown");
                continue;
            }

            let message = AlertMessage::from_event(&event);
            let mut sent_any = self.notifiers.is_empty();
            for notifier in &self.notifiers {
                match notifier.send(&message).await {
                    Ok(()) => {
                        sent_any = true;
                        report.delivered += 1;
                        self.metrics.inc_notification_sent(notifier.label());
                    }
                    Err(err) => {
                        report.delivery_failures += 1;
                        self.metrics.inc_delivery_error(notifier.label());
                        error!(
                            channel = notifier.label(),
                            host = %host.name,
                            error = %err,
                            "alert delivery failed"
                        );
                    }
                }
            }
            if sent_any {
                self.cooldown.record_sent(&event, reading.timestamp);
            }
        }

        self.metrics
            .observe_cycle(crate::now_unix(), started.elapsed().as_secs_f64());
        report
    }
}

async fn check_host(
    source: &Arc<dyn UsageSource>,
    host: &Host,
) -> Result<UsageReading, CheckError> {
    let source = Arc::clone(source);
    let host = host.clone();
    tokio::task::spawn_blocking(move || source.read_usage(&host))
        .await
        .map_err(|err| CheckError::Worker(err.to_string()))?
}
