//! Session State Machine
//!
//! Defines the lifecycle phases of a display session and the valid
//! transitions between them.

/// Lifecycle phase of the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

/// Events that can trigger phase transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `start_up()` called
    StartRequested,
    /// Connection manager reached `Connected`
    ChannelOpened,
    /// Connection manager reached `Failed`
    ConnectFailed,
    /// `shutdown()` called, or a restart began
    StopRequested,
    /// Every component has been released
    Released,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Phase changed
    Success(SessionPhase),
    /// Event accepted but the phase stays as it is
    Unchanged(SessionPhase),
    /// Event makes no sense in the current phase
    Invalid { from: SessionPhase, event: SessionEvent },
}

/// The session phase state machine
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    current: SessionPhase,
}

impl SessionStateMachine {
    /// Create a new state machine in Stopped phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current phase
    pub fn phase(&self) -> SessionPhase {
        self.current
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        use SessionEvent::*;
        use SessionPhase::*;

        let next = match (self.current, &event) {
            (Stopped, StartRequested) => Starting,

            // Lifecycle commands are idempotent
            (Starting | Running, StartRequested) => return TransitionResult::Unchanged(self.current),
            (Stopped | Stopping, StopRequested) => return TransitionResult::Unchanged(self.current),

            (Starting, ChannelOpened) => Running,

            // No automatic retry; the caller decides whether to stop
            (Starting, ConnectFailed) => return TransitionResult::Unchanged(Starting),

            (Starting | Running, StopRequested) => Stopping,
            (Stopping, Released) => Stopped,

            _ => {
                return TransitionResult::Invalid {
                    from: self.current,
                    event,
                }
            }
        };

        self.current = next;
        TransitionResult::Success(next)
    }
}

/// Check if a transition from one phase to another is generally valid
pub fn is_valid_transition(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Stopped, Starting) => true,
        (Starting, Running) => true,
        (Starting | Running, Stopping) => true,
        (Stopping, Stopped) => true,
        _ => false,
    }
}
