use tracing::debug;

/// Decision returned by the alert policy after a tick's activity verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    /// At least one table changed. Counter is back at zero.
    Active,
    /// No table changed and alerts remain (1-based attempt number).
    Alert { attempt: u32 },
    /// No table changed and every alert for this spell has been sent.
    Exhausted,
}

/// Consecutive-inactivity counter for the watchdog.
///
/// Counts how many alerts have gone out since the database last showed
/// activity. Any active tick resets the count, so alerts never accumulate
/// across separate quiet spells.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    max_tries: u32,
    consecutive_inactive: u32,
}

impl AlertPolicy {
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries,
            consecutive_inactive: 0,
        }
    }

    /// Evaluate one tick's activity verdict.
    ///
    /// `Active` resets the counter. `Alert` leaves it untouched: call
    /// [`AlertPolicy::record_alert`] once the notification has gone out.
    /// `Exhausted` means the counter already reached `max_tries`.
    pub fn evaluate(&mut self, activity: bool) -> AlertDecision {
        if activity {
            self.consecutive_inactive = 0;
            return AlertDecision::Active;
        }

        if self.consecutive_inactive < self.max_tries {
            AlertDecision::Alert {
                attempt: self.consecutive_inactive + 1,
            }
        } else {
            debug!(max_tries = self.max_tries, "no alerts left for this quiet spell");
            AlertDecision::Exhausted
        }
    }

    /// Count an alert that was delivered for the current quiet spell.
    pub fn record_alert(&mut self) {
        self.consecutive_inactive = self.consecutive_inactive.saturating_add(1);
    }

    /// Number of consecutive inactive ticks that produced an alert.
    pub fn consecutive_inactive(&self) -> u32 {
        self.consecutive_inactive
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evaluate and, on `Alert`, record it the way the watchdog does.
    fn step(policy: &mut AlertPolicy, activity: bool) -> AlertDecision {
        let decision = policy.evaluate(activity);
        if let AlertDecision::Alert { .. } = decision {
            policy.record_alert();
        }
        decision
    }

    #[test]
    fn test_active_tick_returns_active() {
        let mut policy = AlertPolicy::new(2);
        assert_eq!(policy.evaluate(true), AlertDecision::Active);
        assert_eq!(policy.consecutive_inactive(), 0);
    }

    #[test]
    fn test_inactive_tick_alerts_without_committing() {
        let mut policy = AlertPolicy::new(2);
        assert_eq!(policy.evaluate(false), AlertDecision::Alert { attempt: 1 });
        // Not counted until the alert is recorded
        assert_eq!(policy.consecutive_inactive(), 0);
        policy.record_alert();
        assert_eq!(policy.consecutive_inactive(), 1);
    }

    #[test]
    fn test_exhausted_after_max_tries() {
        let mut policy = AlertPolicy::new(2);
        assert_eq!(step(&mut policy, false), AlertDecision::Alert { attempt: 1 });
        assert_eq!(step(&mut policy, false), AlertDecision::Alert { attempt: 2 });
        assert_eq!(step(&mut policy, false), AlertDecision::Exhausted);
        // Exhaustion does not move the counter
        assert_eq!(policy.consecutive_inactive(), 2);
    }

    #[test]
    fn test_activity_resets_from_any_value() {
        let mut policy = AlertPolicy::new(5);
        for _ in 0..4 {
            step(&mut policy, false);
        }
        assert_eq!(policy.consecutive_inactive(), 4);

        assert_eq!(step(&mut policy, true), AlertDecision::Active);
        assert_eq!(policy.consecutive_inactive(), 0);

        // A fresh spell starts counting from one again
        assert_eq!(step(&mut policy, false), AlertDecision::Alert { attempt: 1 });
    }

    #[test]
    fn test_activity_resets_after_exhaustion() {
        let mut policy = AlertPolicy::new(1);
        step(&mut policy, false);
        assert_eq!(policy.evaluate(false), AlertDecision::Exhausted);
        assert_eq!(policy.evaluate(true), AlertDecision::Active);
        assert_eq!(policy.consecutive_inactive(), 0);
    }

    #[test]
    fn test_zero_max_tries_exhausts_immediately() {
        let mut policy = AlertPolicy::new(0);
        assert_eq!(policy.evaluate(false), AlertDecision::Exhausted);
    }

    #[test]
    fn test_counter_tracks_min_of_run_length_and_max_tries() {
        for max_tries in 0..4u32 {
            for run in 0..6u32 {
                let mut policy = AlertPolicy::new(max_tries);
                let mut exhausted_at = None;
                for k in 1..=run {
                    if step(&mut policy, false) == AlertDecision::Exhausted {
                        exhausted_at.get_or_insert(k);
                    }
                }
                assert_eq!(policy.consecutive_inactive(), run.min(max_tries));
                // Exhaustion first happens on the tick after max_tries alerts
                let expected = (run > max_tries).then_some(max_tries + 1);
                assert_eq!(exhausted_at, expected, "max_tries={max_tries} run={run}");
            }
        }
    }

    #[test]
    fn test_accessors() {
        let policy = AlertPolicy::new(3);
        assert_eq!(policy.max_tries(), 3);
        assert_eq!(policy.consecutive_inactive(), 0);
    }
}
