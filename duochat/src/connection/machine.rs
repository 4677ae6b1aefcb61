//! Sans-IO connection state machine.
//!
//! [`ConnectionMachine`] owns the connection state, the retry policy and the
//! pending-send queue, but performs no I/O. Each input returns the list of
//! [`Action`]s the driver must carry out (dial, arm a timer, write a frame),
//! which keeps every transition testable without a runtime.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use duochat_proto::frame::{ChatFrame, CloseCode};

/// Lifecycle state of the persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel. Initial state, and terminal after an explicit close.
    Disconnected,
    /// Dialing.
    Connecting,
    /// Open and able to carry frames.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// When to retry after an abnormal close.
///
/// The default is a fixed 3000 ms delay, retried forever.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub retry_delay: Duration,
    /// Growth factor per consecutive failure. `1.0` keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Consecutive failures before giving up. `0` means never.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(3000),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `retry_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.retry_delay.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_delay.max(self.retry_delay);
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    #[must_use]
    pub const fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start dialing the channel.
    Connect,
    /// Arm the retry timer.
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
        /// Consecutive failure count this retry follows.
        attempt: u32,
    },
    /// Disarm the retry timer.
    CancelRetry,
    /// Write a frame to the open channel.
    Transmit(ChatFrame),
    /// Close the channel (or abandon the dial) with this code.
    Close {
        /// Close status code.
        code: CloseCode,
        /// Human-readable reason.
        reason: String,
    },
    /// Retries are exhausted; stay disconnected.
    GiveUp {
        /// Consecutive failures.
        attempts: u32,
    },
}

/// What happened to a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Content was empty after trimming; nothing happened.
    Ignored,
    /// The frame will be written immediately.
    Transmitted,
    /// The frame is queued until the channel opens.
    Queued,
}

/// Connection state, retry bookkeeping and the pending-send queue.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    failures: u32,
    retry_armed: bool,
    gave_up: bool,
    pending: VecDeque<ChatFrame>,
}

impl ConnectionMachine {
    /// A disconnected machine with `policy`.
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            failures: 0,
            retry_armed: false,
            gave_up: false,
            pending: VecDeque::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a retry timer is armed.
    #[must_use]
    pub const fn retry_armed(&self) -> bool {
        self.retry_armed
    }

    /// Consecutive failed attempts since the last successful open.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Frames waiting for the channel to open.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// `Disconnected -> Connecting`. A no-op in any other state.
    ///
    /// An armed retry timer is cancelled in favor of dialing now. Opening
    /// after the policy gave up starts a fresh retry budget.
    pub fn open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        let mut actions = Vec::with_capacity(2);
        if self.retry_armed {
            self.retry_armed = false;
            actions.push(Action::CancelRetry);
        }
        if self.gave_up {
            self.gave_up = false;
            self.failures = 0;
        }
        self.state = ConnectionState::Connecting;
        actions.push(Action::Connect);
        actions
    }

    /// `Connecting -> Connected`: resets the failure count and flushes the
    /// pending queue in order.
    ///
    /// A dial that completes after the machine left `Connecting` is closed
    /// straight away.
    pub fn on_opened(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return vec![Action::Close {
                code: CloseCode::NORMAL,
                reason: "connection no longer wanted".to_string(),
            }];
        }
        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.pending.drain(..).map(Action::Transmit).collect()
    }

    /// The channel closed, or the dial failed, with `code`.
    ///
    /// A normal close (1000) leaves the machine disconnected with no retry.
    /// Any other code counts as a failure and arms exactly one retry timer,
    /// unless one is already armed or the policy is exhausted.
    pub fn on_closed(&mut self, code: CloseCode) -> Vec<Action> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Disconnected;

        if code.is_normal() {
            return Vec::new();
        }

        self.failures = self.failures.saturating_add(1);
        if self.policy.is_exhausted(self.failures) {
            self.gave_up = true;
            return vec![Action::GiveUp {
                attempts: self.failures,
            }];
        }
        if self.retry_armed {
            return Vec::new();
        }
        self.retry_armed = true;
        vec![Action::ScheduleRetry {
            delay: self.policy.delay_for(self.failures),
            attempt: self.failures,
        }]
    }

    /// The retry timer fired: `Disconnected -> Connecting`.
    pub fn on_retry_fired(&mut self) -> Vec<Action> {
        if !self.retry_armed {
            return Vec::new();
        }
        self.retry_armed = false;
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::Connect]
    }

    /// Explicit close: `-> Disconnected` with the normal-closure code.
    ///
    /// Cancels any armed retry and discards the pending queue. This is the
    /// only transition that stops automatic retries.
    pub fn close(&mut self, reason: &str) -> Vec<Action> {
        let mut actions = Vec::with_capacity(2);
        if self.retry_armed {
            self.retry_armed = false;
            actions.push(Action::CancelRetry);
        }
        if self.state != ConnectionState::Disconnected {
            actions.push(Action::Close {
                code: CloseCode::NORMAL,
                reason: reason.to_string(),
            });
        }
        self.state = ConnectionState::Disconnected;
        self.pending.clear();
        actions
    }

    /// Puts frames that were accepted but never written back at the head
    /// of the pending queue, ahead of anything queued since. They go out
    /// on the next connect.
    pub fn requeue(&mut self, frames: impl IntoIterator<Item = ChatFrame>) {
        let mut frames: Vec<ChatFrame> = frames.into_iter().collect();
        if frames.is_empty() || self.state == ConnectionState::Connected {
            return;
        }
        frames.extend(self.pending.drain(..));
        self.pending = frames.into();
    }

    /// Accepts an outbound frame.
    ///
    /// Frames whose content is blank are ignored. While connected the frame
    /// is transmitted at once; otherwise it is queued and the channel is
    /// opened.
    pub fn send(&mut self, frame: ChatFrame) -> (SendDisposition, Vec<Action>) {
        if frame.content.trim().is_empty() {
            return (SendDisposition::Ignored, Vec::new());
        }
        if self.state == ConnectionState::Connected {
            return (SendDisposition::Transmitted, vec![Action::Transmit(frame)]);
        }
        self.pending.push_back(frame);
        (SendDisposition::Queued, self.open())
    }
}
