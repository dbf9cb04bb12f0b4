//! Startup handshake with the microcontroller.
//!
//! Opening the port resets most boards, so the host waits a settle delay and
//! then runs a fixed exchange before trusting the link:
//!
//! ```text
//! MCU  -> host   "READY\n"
//! host -> MCU    'A'
//! MCU  -> host   "Connection confirmed\n"
//! ```
//!
//! Both waits share a single deadline. Lines that don't match what the
//! current state expects are logged and ignored. Any failure here is fatal
//! to startup.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::config::{HandshakeConfig, SerialConfig};
use crate::error::{self, Result};
use crate::serial::{LineLink, SerialLink};
use crate::tracing::prelude::*;

/// Line announcing the microcontroller is up.
pub const READY: &str = "READY";

/// Line confirming the acknowledgment was received.
pub const CONFIRMED: &str = "Connection confirmed";

/// Acknowledgment byte sent after READY.
pub const ACK: u8 = b'A';

/// Handshake state. Failure is not a state; it is the `Err` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Opening,
    AwaitReady,
    SendAck,
    AwaitConfirm,
    Established,
}

/// Where a handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    AwaitReady,
    SendAck,
    AwaitConfirm,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::AwaitReady => write!(f, "ready signal"),
            HandshakePhase::SendAck => write!(f, "acknowledgment"),
            HandshakePhase::AwaitConfirm => write!(f, "connection confirmation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("timed out after {elapsed:?} waiting for {phase}")]
    Timeout {
        phase: HandshakePhase,
        elapsed: Duration,
    },

    #[error("link failure during {phase}: {source}")]
    Link {
        phase: HandshakePhase,
        #[source]
        source: Box<error::Error>,
    },
}

impl HandshakeError {
    pub fn phase(&self) -> HandshakePhase {
        match self {
            HandshakeError::Timeout { phase, .. }
            | HandshakeError::Link { phase, .. } => *phase,
        }
    }
}

/// Open the port and verify the microcontroller on it.
pub async fn connect(
    serial: &SerialConfig,
    config: &HandshakeConfig,
) -> Result<SerialLink> {
    info!("Attempting to connect to {}...", serial.port);
    let mut link = SerialLink::open(serial)?;
    verify(&mut link, config).await?;
    Ok(link)
}

/// Run the handshake on an open link, closing it if the handshake fails.
pub async fn verify<L>(link: &mut L, config: &HandshakeConfig) -> Result<()>
where
    L: LineLink + ?Sized,
{
    if let Err(e) = establish(link, config).await {
        error!("Handshake on {} failed: {}", link.port(), e);
        link.close();
        return Err(e.into());
    }
    Ok(())
}

/// Drive the handshake from `Opening` to `Established`.
///
/// The deadline is the settle delay plus `deadline_secs`, so the waiting
/// phases always get the full configured budget.
pub async fn establish<L>(
    link: &mut L,
    config: &HandshakeConfig,
) -> std::result::Result<(), HandshakeError>
where
    L: LineLink + ?Sized,
{
    let started = Instant::now();
    let deadline = started + config.settle_delay() + config.deadline();

    let mut state = HandshakeState::Opening;
    loop {
        trace!(?state, "Handshake step");
        state = match state {
            HandshakeState::Opening => {
                debug!("Waiting {:?} for board reset", config.settle_delay());
                time::sleep(config.settle_delay()).await;
                info!("Connected to microcontroller.");
                info!(
                    "Waiting for ready signal... ({} second timeout)",
                    config.deadline().as_secs()
                );
                info!("Please reset the microcontroller now if needed...");
                HandshakeState::AwaitReady
            }
            HandshakeState::AwaitReady => {
                let poll = config.ready_poll();
                let phase = HandshakePhase::AwaitReady;
                await_line(link, READY, phase, poll, started, deadline).await?;
                HandshakeState::SendAck
            }
            HandshakeState::SendAck => {
                info!("Sending acknowledgment...");
                link.write_byte(ACK)
                    .await
                    .map_err(|e| HandshakeError::Link {
                        phase: HandshakePhase::SendAck,
                        source: Box::new(e),
                    })?;
                HandshakeState::AwaitConfirm
            }
            HandshakeState::AwaitConfirm => {
                let poll = config.confirm_poll();
                let phase = HandshakePhase::AwaitConfirm;
                await_line(link, CONFIRMED, phase, poll, started, deadline)
                    .await?;
                HandshakeState::Established
            }
            HandshakeState::Established => {
                info!("Microcontroller connection established and verified!");
                return Ok(());
            }
        };
    }
}

// Poll until `expected` arrives or the shared deadline passes.
async fn await_line<L>(
    link: &mut L,
    expected: &str,
    phase: HandshakePhase,
    poll: Duration,
    started: Instant,
    deadline: Instant,
) -> std::result::Result<(), HandshakeError>
where
    L: LineLink + ?Sized,
{
    let link_err = |e: error::Error| HandshakeError::Link {
        phase,
        source: Box::new(e),
    };

    while Instant::now() < deadline {
        if !link.has_pending_line().map_err(link_err)? {
            time::sleep_until((Instant::now() + poll).min(deadline)).await;
            continue;
        }

        let line = match time::timeout_at(deadline, link.read_line()).await {
            Ok(line) => line.map_err(link_err)?,
            Err(_) => break,
        };
        info!("Received: {}", line);
        if line == expected {
            return Ok(());
        }
        debug!("Ignoring unexpected line while waiting for {}", phase);
    }

    warn!("Timeout waiting for {}", phase);
    Err(HandshakeError::Timeout {
        phase,
        elapsed: Instant::now() - started,
    })
}
