//! Connectivity state machine and reconnect backoff policy.

use std::time::Duration;

/// Where the client stands with respect to the broker.
///
/// ```text
/// Down ──link_up──▶ LinkUp ──connect_ok──▶ Connected
///   ▲                 │                        │
///   │                 └──connect_fail──▶ Down  │
///   │                                          │
///   └──────────teardown──── Failing ◀──timeout─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// No network link, no session.
    #[default]
    Down,
    /// Link associated, MQTT session not yet established.
    LinkUp,
    /// CONNACK received, session live.
    Connected,
    /// A timeout or wire fault was detected; teardown in progress.
    Failing,
}

impl ConnectivityState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events driving [`ConnectivityState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    LinkUp,
    ConnectOk,
    ConnectFail,
    Timeout,
    Teardown,
}

/// The supervisor's view of the connection lifecycle. Transitions not in the
/// diagram leave the state unchanged (events can race teardown).
#[derive(Debug, Clone, Default)]
pub struct ConnectivityMachine {
    state: ConnectivityState,
}

impl ConnectivityMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn apply(&mut self, event: ConnectivityEvent) -> ConnectivityState {
        use ConnectivityEvent as E;
        use ConnectivityState as S;
        self.state = match (self.state, event) {
            (S::Down, E::LinkUp) => S::LinkUp,
            (S::LinkUp, E::ConnectOk) => S::Connected,
            (S::LinkUp, E::ConnectFail) => S::Down,
            (S::Connected | S::LinkUp, E::Timeout) => S::Failing,
            (_, E::Teardown) => S::Down,
            (state, _) => state,
        };
        self.state
    }
}

/// Backoff policy for the reconnect loop. `max_attempts` of `None` retries
/// indefinitely, which is the supervisor's default posture.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        let multiplier = self.backoff_factor.powi(attempt.try_into().unwrap_or(i32::MAX));
        let delay_ms = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut machine = ConnectivityMachine::new();
        assert_eq!(machine.state(), ConnectivityState::Down);

        assert_eq!(
            machine.apply(ConnectivityEvent::LinkUp),
            ConnectivityState::LinkUp
        );
        assert_eq!(
            machine.apply(ConnectivityEvent::ConnectOk),
            ConnectivityState::Connected
        );
        assert!(machine.state().is_connected());
    }

    #[test]
    fn failure_cycle() {
        let mut machine = ConnectivityMachine::new();
        machine.apply(ConnectivityEvent::LinkUp);
        machine.apply(ConnectivityEvent::ConnectOk);

        assert_eq!(
            machine.apply(ConnectivityEvent::Timeout),
            ConnectivityState::Failing
        );
        assert_eq!(
            machine.apply(ConnectivityEvent::Teardown),
            ConnectivityState::Down
        );
    }

    #[test]
    fn connect_fail_returns_to_down() {
        let mut machine = ConnectivityMachine::new();
        machine.apply(ConnectivityEvent::LinkUp);
        assert_eq!(
            machine.apply(ConnectivityEvent::ConnectFail),
            ConnectivityState::Down
        );
    }

    #[test]
    fn stray_events_are_inert() {
        let mut machine = ConnectivityMachine::new();
        assert_eq!(
            machine.apply(ConnectivityEvent::ConnectOk),
            ConnectivityState::Down
        );
        assert_eq!(
            machine.apply(ConnectivityEvent::Timeout),
            ConnectivityState::Down
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: None,
        };
        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(config.calculate_delay(4), Duration::from_secs(16));
        assert_eq!(config.calculate_delay(5), Duration::from_secs(30));
        assert_eq!(config.calculate_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn unbounded_retry_by_default() {
        let config = ReconnectConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(1_000_000));
    }

    #[test]
    fn bounded_retry() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }
}
