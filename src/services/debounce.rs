use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::models::SharedStatus;
use crate::observability::metrics;

/// Suppresses repeated triggers of the same URL within a cooldown.
///
/// Owns `last_url`/`last_accept_time` of the shared status. Times are
/// monotonic offsets from the gate's creation, so wall-clock jumps can't
/// re-open or extend the window.
#[derive(Clone)]
pub struct DebounceGate {
    status: SharedStatus,
    cooldown: Duration,
    origin: Instant,
}

impl DebounceGate {
    pub fn new(status: SharedStatus, cooldown: Duration) -> Self {
        info!("🔄 DebounceGate initialized with cooldown: {:?}", cooldown);
        Self {
            status,
            cooldown,
            origin: Instant::now(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time since the gate was created.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn offer_now(&self, url: &str) -> bool {
        self.offer(url, self.elapsed())
    }

    /// Accepts iff `url` differs from the last accepted one or more than the
    /// cooldown has passed since that acceptance. Acceptance records
    /// `(url, now)`; rejection changes nothing.
    pub fn offer(&self, url: &str, now: Duration) -> bool {
        let cooldown = self.cooldown;
        let accepted = self.status.with_acceptance(|last_url, last_accept_time| {
            let is_new = url != last_url.as_str();
            let cooled_down = now.saturating_sub(*last_accept_time) > cooldown;
            if is_new || cooled_down {
                *last_url = url.to_string();
                *last_accept_time = now;
                true
            } else {
                false
            }
        });

        metrics::record_debounce(accepted);
        if accepted {
            debug!("✅ URL accepted at {:?}: {}", now, url);
        } else {
            debug!("⚠️ URL suppressed by cooldown: {}", url);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://www.fazenda.pr.gov.br/nfce/qrcode?p=1";

    fn gate() -> (DebounceGate, SharedStatus) {
        let status = SharedStatus::new();
        (DebounceGate::new(status.clone(), Duration::from_secs(4)), status)
    }

    #[test]
    fn test_same_url_accept_reject_accept() {
        let (gate, _) = gate();
        assert!(gate.offer(URL, Duration::from_secs(0)));
        assert!(!gate.offer(URL, Duration::from_secs(2)));
        assert!(gate.offer(URL, Duration::from_secs(5)));
    }

    #[test]
    fn test_cooldown_boundary_is_exclusive() {
        let (gate, _) = gate();
        assert!(gate.offer(URL, Duration::from_secs(10)));
        assert!(!gate.offer(URL, Duration::from_secs(14)));
        assert!(gate.offer(URL, Duration::from_millis(14_001)));
    }

    #[test]
    fn test_different_url_passes_inside_cooldown() {
        let (gate, _) = gate();
        assert!(gate.offer(URL, Duration::from_secs(0)));
        assert!(gate.offer("https://www.sefaz.example/nfce?p=2", Duration::from_secs(1)));
        // And the original is new again relative to the last accepted URL.
        assert!(gate.offer(URL, Duration::from_secs(2)));
    }

    #[test]
    fn test_rejection_leaves_state_untouched() {
        let (gate, status) = gate();
        gate.offer(URL, Duration::from_secs(1));
        gate.offer(URL, Duration::from_secs(3));

        let snapshot = status.snapshot();
        assert_eq!(snapshot.last_url, URL);
        assert_eq!(snapshot.last_accept_time, Duration::from_secs(1));
    }

    #[test]
    fn test_offer_now_uses_monotonic_clock() {
        let (gate, _) = gate();
        assert!(gate.offer_now(URL));
        assert!(!gate.offer_now(URL));
    }
}
