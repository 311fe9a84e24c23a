//! Link Channel State Machine
//!
//! Models the lifecycle of one rover channel as a pure transition function,
//! so teardown idempotence and retry scheduling are testable without I/O.

use std::time::Duration;

/// Delay policy between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay after every drop; used by command and video channels
    Fixed(Duration),
    /// Doubling delay up to a cap, reset after a successful open; used by
    /// the dispatch subscription
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay for the first retry after a drop
    pub fn initial_delay(&self) -> Duration {
        match self {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Backoff { initial, .. } => *initial,
        }
    }

    /// Delay for the retry following one that waited `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        match self {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Backoff { max, .. } => std::cmp::min(current * 2, *max),
        }
    }
}

/// Lifecycle state of one link channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No channel; a retry may be pending
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Channel up, cadences running
    Connected,
    /// Explicitly torn down; absorbs all further events
    Released,
}

/// Events that drive the channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Owner asked for the channel to come up
    ConnectRequested,
    /// A connect attempt produced a live channel
    ChannelOpened,
    /// The channel dropped, or a connect attempt failed
    ChannelClosed,
    /// The scheduled reconnect delay elapsed
    RetryTimerFired,
    /// Owner released the session
    Released,
}

/// Side effects the session driver must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start a connect attempt
    OpenChannel,
    /// Send the converge-to-stop twist and start both periodic senders
    StartCadences,
    /// Stop both periodic senders
    StopCadences,
    /// Arm the reconnect timer
    ScheduleRetry(Duration),
    /// Disarm a pending reconnect timer
    CancelRetry,
    /// Drop any held decoded video frame
    DropVideoState,
}

/// State machine for one link channel
#[derive(Debug)]
pub struct LinkMachine {
    state: LinkState,
    policy: ReconnectPolicy,
    retry_delay: Duration,
    retry_pending: bool,
}

impl LinkMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            policy,
            retry_delay: policy.initial_delay(),
            retry_pending: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Apply one event and return the effects the driver must perform
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        use LinkEvent::*;
        use LinkState::*;

        match (self.state, event) {
            // Released absorbs everything: a close racing a release must not
            // schedule a retry, and a second release has no effect.
            (LinkState::Released, _) => Vec::new(),

            (Disconnected, ConnectRequested) => {
                self.state = Connecting;
                vec![Effect::OpenChannel]
            }
            (Disconnected, RetryTimerFired) if self.retry_pending => {
                self.retry_pending = false;
                self.state = Connecting;
                vec![Effect::OpenChannel]
            }
            (Disconnected, LinkEvent::Released) => {
                self.state = LinkState::Released;
                if self.retry_pending {
                    self.retry_pending = false;
                    vec![Effect::CancelRetry]
                } else {
                    Vec::new()
                }
            }

            (Connecting, ChannelOpened) => {
                self.state = Connected;
                self.retry_delay = self.policy.initial_delay();
                vec![Effect::StartCadences]
            }
            // Failed connect attempt
            (Connecting, ChannelClosed) => {
                self.state = Disconnected;
                vec![self.schedule_retry()]
            }
            (Connecting, LinkEvent::Released) => {
                self.state = LinkState::Released;
                Vec::new()
            }

            (Connected, ChannelClosed) => {
                self.state = Disconnected;
                vec![
                    Effect::StopCadences,
                    Effect::DropVideoState,
                    self.schedule_retry(),
                ]
            }
            (Connected, LinkEvent::Released) => {
                self.state = LinkState::Released;
                vec![Effect::StopCadences, Effect::DropVideoState]
            }

            // Stale or duplicate event
            _ => Vec::new(),
        }
    }

    fn schedule_retry(&mut self) -> Effect {
        let delay = self.retry_delay;
        self.retry_delay = self.policy.next_delay(delay);
        self.retry_pending = true;
        Effect::ScheduleRetry(delay)
    }
}
