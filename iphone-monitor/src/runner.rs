//! The monitoring loop.
//!
//! [`MonitorContext`] bundles everything one monitor needs: the probe, the
//! verified link, the presence state machine, and loop timing. It is built
//! once after the handshake and torn down when [`MonitorContext::run`]
//! returns, which always closes the link exactly once.
//!
//! Each cycle polls the state machine and then drains one relayed line. A
//! panic inside a cycle is caught and logged, and the loop carries on after a
//! backoff. Only the stop token ends the loop.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::device::PresenceProbe;
use crate::monitor::{ConnectionMonitor, ConnectionState, Transition};
use crate::relay;
use crate::serial::LineLink;
use crate::tracing::prelude::*;

/// Counters from a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub transitions: u64,
}

pub struct MonitorContext<P, L: LineLink> {
    probe: P,
    link: L,
    monitor: ConnectionMonitor,
    config: MonitorConfig,
}

impl<P, L> MonitorContext<P, L>
where
    P: PresenceProbe,
    L: LineLink,
{
    /// Build the context.
    ///
    /// Unless `probe_on_start` is set, the phone is assumed present, so the
    /// first poll reports a disconnect if it is actually absent.
    pub async fn new(probe: P, link: L, config: MonitorConfig) -> Self {
        let state = if config.probe_on_start {
            let present = probe.is_present().await;
            info!(present, "Initial iPhone presence probed");
            ConnectionState::starting(present)
        } else {
            ConnectionState::assumed_present()
        };

        Self {
            probe,
            link,
            monitor: ConnectionMonitor::new(state),
            config,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn state(&self) -> &ConnectionState {
        self.monitor.state()
    }

    /// One poll-then-relay cycle.
    pub async fn cycle(&mut self) -> Option<Transition> {
        let transition = self.monitor.poll(&self.probe, &mut self.link).await;
        relay::drain(&mut self.link).await;
        transition
    }

    /// Loop until `shutdown` is cancelled, then close the link.
    pub async fn run(&mut self, shutdown: CancellationToken) -> RunSummary {
        info!("Starting iPhone monitoring...");
        let mut summary = RunSummary::default();

        while !shutdown.is_cancelled() {
            let outcome = AssertUnwindSafe(self.cycle()).catch_unwind().await;
            let pause = match outcome {
                Ok(transition) => {
                    summary.cycles += 1;
                    summary.transitions += u64::from(transition.is_some());
                    self.config.poll_interval()
                }
                Err(panic) => {
                    summary.failed_cycles += 1;
                    let message = panic_message(panic.as_ref());
                    error!("Error in monitoring loop: {}", message);
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(pause) => {}
            }
        }

        info!("Monitoring stopped.");
        self.link.close();
        summary
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
