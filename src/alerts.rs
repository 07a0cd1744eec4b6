use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UsageReading {
    pub host: String,
    pub mount_point: String,
    pub used_percent: u8,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub host: String,
    pub reading: UsageReading,
    pub threshold: u8,
}

/// Fires when usage is strictly above the threshold.
pub fn evaluate(reading: &UsageReading, threshold: u8) -> Option<AlertEvent> {
    if reading.used_percent > threshold {
        Some(AlertEvent {
            host: reading.host.clone(),
            reading: reading.clone(),
            threshold,
        })
    } else {
        None
    }
}

/// Suppresses repeat alerts for a (host, mount) inside a fixed window.
/// A zero window lets every alert through and keeps no history.
#[derive(Debug, Default)]
pub struct AlertCooldown {
    window_secs: i64,
    last_sent: HashMap<(String, String), i64>,
}

impl AlertCooldown {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: i64::try_from(window_secs).unwrap_or(i64::MAX),
            last_sent: HashMap::new(),
        }
    }

    /// True when the same (host, mount) was delivered inside the window.
    pub fn is_suppressed(&self, event: &AlertEvent, now_unix: i64) -> bool {
        if self.window_secs == 0 {
            return false;
        }
        self.last_sent
            .get(&cooldown_key(event))
            .is_some_and(|last| now_unix.saturating_sub(*last) < self.window_secs)
    }

    /// Starts the window; only call once the alert actually went out.
    pub fn record_sent(&mut self, event: &AlertEvent, now_unix: i64) {
        if self.window_secs == 0 {
            return;
        }
        self.last_sent.insert(cooldown_key(event), now_unix);
    }
}

fn cooldown_key(event: &AlertEvent) -> (String, String) {
    (event.host.clone(), event.reading.mount_point.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(used_percent: u8) -> UsageReading {
        UsageReading {
            host: "web-1".to_string(),
            mount_point: "/".to_string(),
            used_percent,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn alerts_only_strictly_above_threshold() {
        for threshold in 0..=100_u8 {
            for used in 0..=100_u8 {
                let event = evaluate(&reading(used), threshold);
                if used > threshold {
                    let event = event.expect("usage above threshold must alert");
                    assert_eq!(event.threshold, threshold);
                    assert_eq!(event.reading.used_percent, used);
                } else {
                    assert!(event.is_none(), "{used}% vs {threshold}% must not alert");
                }
            }
        }
    }

    #[test]
    fn eighty_five_over_eighty_alerts() {
        let event = evaluate(&reading(85), 80).expect("alert");
        assert_eq!(event.host, "web-1");
        assert_eq!(event.reading.mount_point, "/");
    }

    #[test]
    fn sixty_under_eighty_is_quiet() {
        assert!(evaluate(&reading(60), 80).is_none());
    }

    #[test]
    fn zero_window_never_suppresses() {
        let mut cooldown = AlertCooldown::new(0);
        let event = evaluate(&reading(95), 80).expect("alert");
        cooldown.record_sent(&event, 10);
        assert!(!cooldown.is_suppressed(&event, 10));
        assert!(cooldown.last_sent.is_empty());
    }

    #[test]
    fn cooldown_suppresses_inside_window_and_refires_after() {
        let mut cooldown = AlertCooldown::new(300);
        let event = evaluate(&reading(95), 80).expect("alert");

        assert!(!cooldown.is_suppressed(&event, 1_000));
        cooldown.record_sent(&event, 1_000);
        assert!(cooldown.is_suppressed(&event, 1_060));
        assert!(cooldown.is_suppressed(&event, 1_299));
        assert!(!cooldown.is_suppressed(&event, 1_300));

        let mut other = event.clone();
        other.reading.mount_point = "/var".to_string();
        assert!(!cooldown.is_suppressed(&other, 1_060));
    }

    #[test]
    fn unrecorded_alert_is_not_suppressed() {
        let cooldown = AlertCooldown::new(300);
        let event = evaluate(&reading(95), 80).expect("alert");
        assert!(!cooldown.is_suppressed(&event, 1_000));
        assert!(!cooldown.is_suppressed(&event, 1_001));
    }
}
