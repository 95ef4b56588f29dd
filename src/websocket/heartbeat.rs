/// What to do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Ping,
    TimedOut,
}

/// Liveness of one connection: a ping is only sent once the previous one was
/// answered, and a tick with the previous ping unanswered ends the connection.
#[derive(Debug)]
pub struct Liveness {
    alive: bool,
}

impl Liveness {
    pub fn new() -> Self {
        Self { alive: true }
    }

    /// A pong arrived.
    pub fn acknowledge(&mut self) {
        self.alive = true;
    }

    pub fn beat(&mut self) -> Beat {
        if !self.alive {
            return Beat::TimedOut;
        }
        self.alive = false;
        Beat::Ping
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_peer_times_out_on_second_tick() {
        let mut liveness = Liveness::new();
        assert_eq!(liveness.beat(), Beat::Ping);
        assert_eq!(liveness.beat(), Beat::TimedOut);
    }

    #[test]
    fn answering_peer_stays_alive() {
        let mut liveness = Liveness::new();
        for _ in 0..5 {
            assert_eq!(liveness.beat(), Beat::Ping);
            liveness.acknowledge();
        }
    }
}
