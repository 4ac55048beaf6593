use serde::Serialize;
use std::fmt;

/// État du canal télémétrie (une seule instance par canal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    ReconnectPending,
}

/// Événements de cycle de vie, seule source de transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    ConnectRequested,
    Opened,
    /// Fermeture non demandée par nous
    Closed,
    Failed,
    RetryElapsed,
    TornDown,
}

impl ConnectionState {
    /// Transition pure; les couples invalides laissent l'état inchangé
    pub fn next(self, event: Lifecycle) -> ConnectionState {
        use ConnectionState::*;
        match (self, event) {
            (_, Lifecycle::TornDown) => Closed,
            (Closed, Lifecycle::ConnectRequested) => Connecting,
            (ReconnectPending, Lifecycle::RetryElapsed) => Connecting,
            (Connecting, Lifecycle::Opened) => Open,
            (Connecting, Lifecycle::Failed | Lifecycle::Closed) => ReconnectPending,
            (Open, Lifecycle::Failed | Lifecycle::Closed) => ReconnectPending,
            (state, _) => state,
        }
    }

    /// true quand la transition programme une nouvelle tentative
    pub fn schedules_reconnect(self, event: Lifecycle) -> bool {
        self != ConnectionState::ReconnectPending
            && self.next(event) == ConnectionState::ReconnectPending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::ReconnectPending => "reconnect_pending",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::Lifecycle;

    #[test]
    fn test_happy_path() {
        let s = Closed.next(Lifecycle::ConnectRequested);
        assert_eq!(s, Connecting);
        assert_eq!(s.next(Lifecycle::Opened), Open);
    }

    #[test]
    fn test_loss_then_retry() {
        assert_eq!(Open.next(Lifecycle::Closed), ReconnectPending);
        assert_eq!(Open.next(Lifecycle::Failed), ReconnectPending);
        assert_eq!(Connecting.next(Lifecycle::Failed), ReconnectPending);
        assert_eq!(ReconnectPending.next(Lifecycle::RetryElapsed), Connecting);
    }

    #[test]
    fn test_one_reconnect_per_close() {
        assert!(Open.schedules_reconnect(Lifecycle::Closed));
        assert!(Connecting.schedules_reconnect(Lifecycle::Failed));
        // un second signal de perte pendant l'attente ne programme rien de plus
        assert!(!ReconnectPending.schedules_reconnect(Lifecycle::Failed));
        assert!(!Open.schedules_reconnect(Lifecycle::Opened));
    }

    #[test]
    fn test_teardown_always_closes() {
        for s in [Connecting, Open, Closed, ReconnectPending] {
            assert_eq!(s.next(Lifecycle::TornDown), Closed);
        }
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        assert_eq!(Closed.next(Lifecycle::Opened), Closed);
        assert_eq!(Open.next(Lifecycle::RetryElapsed), Open);
        assert_eq!(Closed.next(Lifecycle::RetryElapsed), Closed);
        assert_eq!(Open.next(Lifecycle::ConnectRequested), Open);
    }
}
