//! Presence state machine.
//!
//! Each poll compares a fresh probe result with the recorded state. Only a
//! change fires: the state flips, one signal byte goes to the
//! microcontroller, and a [`Transition`] is returned. Unchanged results do
//! nothing, so repeated "absent" or "present" readings never re-signal.
//!
//! Signal writes are best effort. A failed write is logged and the state
//! still flips; nothing is re-sent until the next real transition.

use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::device::PresenceProbe;
use crate::serial::LineLink;
use crate::tracing::{format_timestamp, prelude::*};

/// Byte sent when the phone goes away ("asleep").
pub const SIGNAL_ABSENT: u8 = b'0';

/// Byte sent when the phone comes back ("awake").
pub const SIGNAL_PRESENT: u8 = b'1';

/// When the current disconnect started.
#[derive(Debug, Clone, Copy)]
struct DisconnectStamp {
    wall: OffsetDateTime,
    mono: Instant,
}

/// Recorded presence plus the start of the current disconnect, if any.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    present: bool,
    disconnected: Option<DisconnectStamp>,
}

impl ConnectionState {
    /// The state the monitor starts in without a startup probe: present.
    pub fn assumed_present() -> Self {
        Self::starting(true)
    }

    pub fn starting(present: bool) -> Self {
        Self {
            present,
            disconnected: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn disconnected_at(&self) -> Option<OffsetDateTime> {
        self.disconnected.map(|d| d.wall)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::assumed_present()
    }
}

/// A presence change observed by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Disconnected {
        port: String,
        at: OffsetDateTime,
    },
    Reconnected {
        port: String,
        at: OffsetDateTime,
        /// How long the phone was away; `None` if the disconnect time was
        /// never recorded (the monitor started in the absent state).
        asleep_for: Option<Duration>,
    },
}

/// Owns the presence state; the only thing that mutates it.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    state: ConnectionState,
}

impl ConnectionMonitor {
    pub fn new(state: ConnectionState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Probe once and act on any change.
    pub async fn poll<P, L>(
        &mut self,
        probe: &P,
        link: &mut L,
    ) -> Option<Transition>
    where
        P: PresenceProbe + ?Sized,
        L: LineLink + ?Sized,
    {
        let present = probe.is_present().await;
        self.observe(present, link).await
    }

    /// Apply one probe result.
    pub async fn observe<L>(
        &mut self,
        present: bool,
        link: &mut L,
    ) -> Option<Transition>
    where
        L: LineLink + ?Sized,
    {
        match (self.state.present, present) {
            (true, false) => {
                let stamp = DisconnectStamp {
                    wall: crate::tracing::now(),
                    mono: Instant::now(),
                };
                self.state.present = false;
                self.state.disconnected = Some(stamp);
                signal(link, SIGNAL_ABSENT).await;

                info!(
                    port = %link.port(),
                    "iPhone disconnected at {}",
                    format_timestamp(stamp.wall)
                );
                Some(Transition::Disconnected {
                    port: link.port().to_string(),
                    at: stamp.wall,
                })
            }
            (false, true) => {
                self.state.present = true;
                signal(link, SIGNAL_PRESENT).await;

                let asleep_for =
                    self.state.disconnected.take().map(|d| d.mono.elapsed());
                match asleep_for {
                    Some(d) => info!(
                        port = %link.port(),
                        "iPhone reconnected. Sleep duration: {}",
                        format_duration(d)
                    ),
                    None => info!(port = %link.port(), "iPhone reconnected."),
                }
                Some(Transition::Reconnected {
                    port: link.port().to_string(),
                    at: crate::tracing::now(),
                    asleep_for,
                })
            }
            _ => None,
        }
    }
}

async fn signal<L: LineLink + ?Sized>(link: &mut L, byte: u8) {
    if let Err(e) = link.write_byte(byte).await {
        warn!(error = %e, "Failed to signal {:?} to microcontroller", byte as char);
    }
}

/// H:MM:SS, matching how durations read in the log.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
