//! Scripted stand-ins for the serial link and the USB probe.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::device::PresenceProbe;
use crate::error::{Error, Result};
use crate::serial::LineLink;

/// Link whose inbound lines become readable at scripted offsets from
/// creation, measured on the tokio clock.
pub(crate) struct ScriptedLink {
    started: Instant,
    incoming: VecDeque<(Duration, String)>,
    pub written: Vec<u8>,
    pub fail_writes: bool,
    pub fail_pending: bool,
    pub fail_reads: bool,
    pub closes: usize,
    open: bool,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            incoming: VecDeque::new(),
            written: Vec::new(),
            fail_writes: false,
            fail_pending: false,
            fail_reads: false,
            closes: 0,
            open: true,
        }
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        let mut link = Self::new();
        for line in lines {
            link.push_line_at(Duration::ZERO, line);
        }
        link
    }

    pub fn push_line_at(&mut self, offset: Duration, line: &str) {
        self.incoming.push_back((offset, line.to_string()));
    }

    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }

    fn ready(&self) -> bool {
        self.incoming
            .front()
            .is_some_and(|(offset, _)| self.started + *offset <= Instant::now())
    }
}

#[async_trait]
impl LineLink for ScriptedLink {
    fn port(&self) -> &str {
        "scripted"
    }

    fn has_pending_line(&self) -> Result<bool> {
        if self.fail_pending {
            return Err(Error::Io(io::Error::other("scripted read failure")));
        }
        Ok(self.ready())
    }

    async fn read_line(&mut self) -> Result<String> {
        if self.fail_reads {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "scripted read failure",
            )));
        }
        if self.ready() {
            if let Some((_, line)) = self.incoming.pop_front() {
                return Ok(line);
            }
        }
        time::sleep(Duration::from_secs(1)).await;
        Ok(String::new())
    }

    async fn write_byte(&mut self, byte: u8) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        self.written.push(byte);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes += 1;
        }
    }
}

/// Probe reporting whatever the test last set, counting calls.
#[derive(Clone)]
pub(crate) struct ScriptedProbe {
    present: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(present: bool) -> Self {
        Self {
            present: Arc::new(AtomicBool::new(present)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceProbe for ScriptedProbe {
    async fn is_present(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.present.load(Ordering::SeqCst)
    }
}
