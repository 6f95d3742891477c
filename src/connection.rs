use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Control-plane send the endpoint must perform after a tick.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum TickAction {
    /// register with the matchmaking server
    SendRegister,
    /// punch/keep-alive toward the current remote endpoint
    SendPunch,
}

/// Liveness and discovery state machine.
///
/// Time is supplied exclusively through [`on_tick`](Self::on_tick) - the
///  tracker never reads a clock, so tests drive it with plain numbers. The
///  receive path reports evidence of a reachable peer via
///  [`on_liveness`](Self::on_liveness) and learns the peer's address via
///  [`on_answer`](Self::on_answer); both are stamped with the most recent
///  tick time.
pub struct ConnectionTracker {
    use_rendezvous: bool,
    register_interval: Duration,
    heartbeat_interval: Duration,
    connection_timeout: Duration,

    connected: bool,
    remote: Option<SocketAddr>,
    now: Duration,
    last_received_heartbeat: Option<Duration>,
    last_sent_heartbeat: Option<Duration>,
    last_register: Option<Duration>,
}

impl ConnectionTracker {
    pub fn new(
        use_rendezvous: bool,
        static_remote: Option<SocketAddr>,
        register_interval: Duration,
        heartbeat_interval: Duration,
        connection_timeout: Duration,
    ) -> ConnectionTracker {
        ConnectionTracker {
            use_rendezvous,
            register_interval,
            heartbeat_interval,
            connection_timeout,
            connected: false,
            remote: static_remote,
            now: Duration::ZERO,
            last_received_heartbeat: None,
            last_sent_heartbeat: None,
            last_register: None,
        }
    }

    /// Advances the state machine to `now` and reports the control send that
    ///  is due, if any. The very first tick fires immediately rather than
    ///  waiting out a full interval.
    pub fn on_tick(&mut self, now: Duration) -> Option<TickAction> {
        self.now = now;

        if !self.use_rendezvous {
            // a static peer needs no discovery: the path is assumed usable
            // and punches degrade to pure keep-alive
            self.connected = true;
            if self.remote.is_some() && Self::due(self.last_sent_heartbeat, self.heartbeat_interval, now) {
                self.last_sent_heartbeat = Some(now);
                return Some(TickAction::SendPunch);
            }
            return None;
        }

        if self.connected && self.liveness_expired(now) {
            debug!("no liveness signal for {:?}, connection considered dead", self.connection_timeout);
            self.connected = false;
        }

        if self.connected {
            if self.remote.is_some() && Self::due(self.last_sent_heartbeat, self.heartbeat_interval, now) {
                self.last_sent_heartbeat = Some(now);
                return Some(TickAction::SendPunch);
            }
        } else if Self::due(self.last_register, self.register_interval, now) {
            self.last_register = Some(now);
            return Some(TickAction::SendRegister);
        }

        None
    }

    /// A data-plane fragment or punch arrived: the peer is reachable.
    pub fn on_liveness(&mut self) {
        self.last_received_heartbeat = Some(self.now);
        if !self.connected {
            debug!("peer is reachable, connection established");
        }
        self.connected = true;
    }

    /// Matchmaking answer: from now on, sends go to `remote`.
    pub fn on_answer(&mut self, remote: SocketAddr) {
        debug!("remote endpoint is {}", remote);
        self.remote = Some(remote);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn liveness_expired(&self, now: Duration) -> bool {
        match self.last_received_heartbeat {
            Some(last) => now > last + self.connection_timeout,
            None => false,
        }
    }

    fn due(last: Option<Duration>, interval: Duration, now: Duration) -> bool {
        match last {
            Some(last) => now > last + interval,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER_INTERVAL: Duration = Duration::from_secs(2);
    const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
    const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

    fn remote() -> SocketAddr {
        "10.0.0.5:7000".parse().unwrap()
    }

    fn rendezvous_tracker() -> ConnectionTracker {
        ConnectionTracker::new(true, None, REGISTER_INTERVAL, HEARTBEAT_INTERVAL, CONNECTION_TIMEOUT)
    }

    fn static_tracker() -> ConnectionTracker {
        ConnectionTracker::new(false, Some(remote()), REGISTER_INTERVAL, HEARTBEAT_INTERVAL, CONNECTION_TIMEOUT)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_first_tick_registers_immediately() {
        let mut tracker = rendezvous_tracker();
        assert_eq!(tracker.on_tick(Duration::ZERO), Some(TickAction::SendRegister));
        assert!(!tracker.is_connected());
    }

    #[test]
    fn test_register_repeats_on_interval_while_disconnected() {
        let mut tracker = rendezvous_tracker();
        assert_eq!(tracker.on_tick(secs(0)), Some(TickAction::SendRegister));
        assert_eq!(tracker.on_tick(secs(1)), None);
        assert_eq!(tracker.on_tick(secs(2)), None); // interval not yet exceeded
        assert_eq!(tracker.on_tick(secs(3)), Some(TickAction::SendRegister));
    }

    #[test]
    fn test_liveness_connects_and_punches_start() {
        let mut tracker = rendezvous_tracker();
        tracker.on_tick(secs(0));
        tracker.on_answer(remote());
        tracker.on_liveness();

        assert!(tracker.is_connected());
        assert_eq!(tracker.on_tick(secs(1)), Some(TickAction::SendPunch));
    }

    #[test]
    fn test_punches_within_timeout_keep_connected() {
        let mut tracker = rendezvous_tracker();
        tracker.on_tick(secs(0));
        tracker.on_answer(remote());
        tracker.on_liveness();

        for t in 1..10 {
            tracker.on_tick(secs(t));
            tracker.on_liveness();
            assert!(tracker.is_connected());
        }
    }

    #[test]
    fn test_silent_gap_disconnects_and_registration_resumes() {
        let mut tracker = rendezvous_tracker();
        tracker.on_tick(secs(0));
        tracker.on_answer(remote());
        tracker.on_liveness(); // last liveness at t=0

        assert!(matches!(tracker.on_tick(secs(4)), Some(TickAction::SendPunch)));
        assert!(tracker.is_connected());

        let action = tracker.on_tick(secs(6)); // 6 > 0 + 5
        assert!(!tracker.is_connected());
        assert_eq!(action, Some(TickAction::SendRegister));
    }

    #[test]
    fn test_punch_suppressed_without_remote_endpoint() {
        let mut tracker = rendezvous_tracker();
        tracker.on_tick(secs(0));
        tracker.on_liveness(); // connected, but no answer was seen yet

        assert_eq!(tracker.on_tick(secs(1)), None);
    }

    #[test]
    fn test_static_peer_is_connected_from_first_tick() {
        let mut tracker = static_tracker();
        assert!(!tracker.is_connected());

        assert_eq!(tracker.on_tick(Duration::ZERO), Some(TickAction::SendPunch));
        assert!(tracker.is_connected());
        assert_eq!(tracker.remote(), Some(remote()));
    }

    #[test]
    fn test_static_peer_keeps_punching_without_any_inbound_traffic() {
        let mut tracker = static_tracker();
        assert_eq!(tracker.on_tick(secs(0)), Some(TickAction::SendPunch));
        assert_eq!(tracker.on_tick(secs(1)), None);
        assert_eq!(tracker.on_tick(secs(3)), Some(TickAction::SendPunch));

        // far beyond the timeout: still connected, still punching
        assert_eq!(tracker.on_tick(secs(60)), Some(TickAction::SendPunch));
        assert!(tracker.is_connected());
    }

    #[test]
    fn test_registration_stops_once_connected() {
        let mut tracker = rendezvous_tracker();
        assert_eq!(tracker.on_tick(secs(0)), Some(TickAction::SendRegister));
        tracker.on_answer(remote());
        tracker.on_liveness();

        for t in 1..5 {
            assert_ne!(tracker.on_tick(secs(t)), Some(TickAction::SendRegister));
            tracker.on_liveness();
        }
    }
}
