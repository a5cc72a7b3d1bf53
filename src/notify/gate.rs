//! Duplicate-send suppression.
//!
//! A repeat send to the same recipient inside the cooldown is acknowledged as a
//! success without transmitting. Timestamps are recorded only after a transmission
//! succeeds. State is per process and is lost on restart.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;

/// Outcome of consulting the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No recent send; go ahead and transmit.
    Transmit,
    /// A send succeeded `since` ago; acknowledge without transmitting.
    Suppress { since: Duration },
}

/// Recipient to last successful send time, with a fixed cooldown.
#[derive(Debug)]
pub struct SendGate {
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl SendGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, recipient: &str) -> GateDecision {
        self.check_at(recipient, Instant::now())
    }

    pub fn check_at(&self, recipient: &str, now: Instant) -> GateDecision {
        let key = normalize(recipient);
        match self.lock().get(&key) {
            Some(&last) => {
                let since = now.saturating_duration_since(last);
                if since < self.cooldown {
                    GateDecision::Suppress { since }
                } else {
                    GateDecision::Transmit
                }
            }
            None => GateDecision::Transmit,
        }
    }

    /// Record a successful transmission. Concurrent records for one recipient are
    /// last-write-wins.
    pub fn record(&self, recipient: &str) {
        self.record_at(recipient, Instant::now());
    }

    pub fn record_at(&self, recipient: &str, now: Instant) {
        self.lock().insert(normalize(recipient), now);
    }

    /// Drop entries whose cooldown has elapsed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, last| now.saturating_duration_since(*last) < self.cooldown);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, remaining = map.len(), "Swept send gate");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A poisoned map only ever holds timestamps; keep using it.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.last_sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalize(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(15);

    #[test]
    fn first_send_transmits() {
        let gate = SendGate::new(COOLDOWN);
        assert_eq!(gate.check("a@x.com"), GateDecision::Transmit);
    }

    #[test]
    fn repeat_inside_cooldown_is_suppressed() {
        let gate = SendGate::new(COOLDOWN);
        let t0 = Instant::now();
        gate.record_at("a@x.com", t0);

        let decision = gate.check_at("A@X.com ", t0 + Duration::from_secs(5));
        assert_eq!(decision, GateDecision::Suppress { since: Duration::from_secs(5) });
        assert_eq!(gate.check_at("a@x.com", t0 + COOLDOWN), GateDecision::Transmit);
    }

    #[test]
    fn recipients_do_not_interfere() {
        let gate = SendGate::new(COOLDOWN);
        let t0 = Instant::now();
        gate.record_at("a@x.com", t0);
        assert_eq!(gate.check_at("b@x.com", t0), GateDecision::Transmit);
    }

    #[test]
    fn checking_alone_records_nothing() {
        let gate = SendGate::new(COOLDOWN);
        gate.check("a@x.com");
        assert!(gate.is_empty());
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let gate = SendGate::new(COOLDOWN);
        let t0 = Instant::now();
        gate.record_at("old@x.com", t0);
        gate.record_at("new@x.com", t0 + Duration::from_secs(10));

        assert_eq!(gate.sweep_at(t0 + Duration::from_secs(16)), 1);
        assert_eq!(gate.len(), 1);
        assert!(matches!(
            gate.check_at("new@x.com", t0 + Duration::from_secs(16)),
            GateDecision::Suppress { .. }
        ));
    }
}
