//! Connection state machine for the push channel.
//!
//! Pure transition logic: events in, commands out. The driver in
//! `channel.rs` owns the socket and the timer and executes the commands in
//! the order they are returned.
//!
//! ```text
//!            Opened               Closed / Errored
//! Connecting ───────► Connected ───────────────────► Disconnected
//!     ▲   │                                             │   ▲
//!     │   └──────────── Closed / Errored ───────────────┘   │
//!     │                                                     │
//!     └────────────────────── TimerFired ───────────────────┘
//!
//! any state ── Stop ──► Stopped (terminal)
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::message::PushMessage;

/// Fixed delay between a lost connection and the next attempt.
/// No backoff and no retry ceiling: the channel only affects latency, never
/// correctness, so it keeps trying at a steady pace.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport finished its handshake.
    Opened,
    /// A text frame arrived.
    Message(String),
    Closed,
    Errored,
    /// The pending reconnect timer elapsed.
    TimerFired,
    /// Explicit teardown.
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OpenSocket,
    Dispatch(PushMessage),
    ScheduleReconnect(Duration),
    CancelReconnect,
    CloseSocket,
}

pub struct ChannelMachine {
    state: ChannelState,
    reconnect_delay: Duration,
    timer_pending: bool,
    failed_attempts: u32,
}

impl ChannelMachine {
    /// A new machine starts in `Connecting`; call `start` for the first
    /// `OpenSocket` command.
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ChannelState::Connecting,
            reconnect_delay,
            timer_pending: false,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    /// Connection attempts that failed since the channel was last connected.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn start(&self) -> Vec<Command> {
        match self.state {
            ChannelState::Connecting => vec![Command::OpenSocket],
            _ => Vec::new(),
        }
    }

    pub fn handle(&mut self, event: ChannelEvent) -> Vec<Command> {
        use ChannelState::*;

        match (self.state, event) {
            (Stopped, _) => Vec::new(),

            (_, ChannelEvent::Stop) => {
                self.state = Stopped;
                let mut commands = Vec::with_capacity(2);
                // Timer first, so nothing can reopen the socket after close
                if self.timer_pending {
                    self.timer_pending = false;
                    commands.push(Command::CancelReconnect);
                }
                commands.push(Command::CloseSocket);
                info!("Realtime channel stopped");
                commands
            }

            (Connecting, ChannelEvent::Opened) => {
                self.state = Connected;
                self.failed_attempts = 0;
                info!("Realtime channel connected");
                Vec::new()
            }

            (Connected, ChannelEvent::Message(text)) => match PushMessage::parse(&text) {
                Ok(message) => vec![Command::Dispatch(message)],
                Err(error) => {
                    debug!(error = %error, "Dropping malformed push message");
                    Vec::new()
                }
            },

            (previous @ (Connecting | Connected), ChannelEvent::Closed | ChannelEvent::Errored) => {
                self.state = Disconnected;
                let mut commands = vec![Command::CloseSocket];
                if !self.timer_pending {
                    self.timer_pending = true;
                    commands.push(Command::ScheduleReconnect(self.reconnect_delay));
                }

                let delay_ms = self.reconnect_delay.as_millis() as u64;
                if previous == Connected {
                    warn!(delay_ms, "Realtime channel lost, reconnecting");
                } else {
                    self.failed_attempts += 1;
                    // Only the first failure of an outage is worth a warning
                    if self.failed_attempts == 1 {
                        warn!(delay_ms, "Realtime connect failed, retrying");
                    } else {
                        debug!(delay_ms, attempts = self.failed_attempts, "Realtime connect failed again");
                    }
                }
                commands
            }

            (Disconnected, ChannelEvent::TimerFired) if self.timer_pending => {
                self.timer_pending = false;
                self.state = Connecting;
                debug!("Reconnect timer fired");
                vec![Command::OpenSocket]
            }

            (state, event) => {
                debug!(state = ?state, event = ?event, "Ignoring channel event");
                Vec::new()
            }
        }
    }
}
