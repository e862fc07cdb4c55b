use tracing::{
    debug,
    trace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundState {
    #[default]
    Idle,
    DrawPending,
    /// Transient: reverts to `Idle` once taken with
    /// [`RoundTransitionDetector::take_completion`].
    JustCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    DrawStarted,
    DrawCompleted,
}

/// Edge detector over the contract's "draw pending" flag. Polls and event
/// driven refreshes both report through [`observe`](Self::observe).
#[derive(Debug, Default)]
pub struct RoundTransitionDetector {
    previous: Option<bool>,
    draw_in_flight: bool,
    state: RoundState,
    /// Set on the falling edge, cleared only by `take_completion`.
    unclaimed_completion: bool,
}

impl RoundTransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn draw_in_flight(&self) -> bool {
        self.draw_in_flight
    }

    pub fn observe(&mut self, draw_pending: bool) -> Transition {
        let Some(previous) = self.previous.replace(draw_pending) else {
            trace!(draw_pending, "seeding round baseline");
            return Transition::None;
        };
        match (previous, draw_pending) {
            (false, true) => {
                debug!("draw started");
                self.draw_in_flight = true;
                self.state = RoundState::DrawPending;
                Transition::DrawStarted
            }
            (true, false) if self.draw_in_flight => {
                debug!("draw completed");
                self.draw_in_flight = false;
                self.state = RoundState::JustCompleted;
                self.unclaimed_completion = true;
                Transition::DrawCompleted
            }
            (true, false) => {
                trace!("draw finished without an observed start; ignoring");
                self.state = RoundState::Idle;
                Transition::None
            }
            _ => Transition::None,
        }
    }

    /// A failed read leaves the detector untouched.
    pub fn observe_read<E>(&mut self, read: &Result<bool, E>) -> Transition {
        match read {
            Ok(draw_pending) => self.observe(*draw_pending),
            Err(_) => Transition::None,
        }
    }

    /// Consumes a pending completion. True at most once per completed round,
    /// even when the next draw has already started.
    pub fn take_completion(&mut self) -> bool {
        if !self.unclaimed_completion {
            return false;
        }
        self.unclaimed_completion = false;
        if self.state == RoundState::JustCompleted {
            self.state = RoundState::Idle;
        }
        true
    }
}
