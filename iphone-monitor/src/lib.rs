//! Watch for an iPhone on USB and relay its presence to a microcontroller.
//!
//! The microcontroller is reached over a line-oriented serial link. Before
//! monitoring starts, [`handshake`] verifies that the far end is alive. The
//! [`runner`] then polls the [`device`] probe once per cycle, turns presence
//! changes into single-byte signals via [`monitor`], and forwards anything the
//! microcontroller prints via [`relay`].

pub mod config;
pub mod device;
pub mod error;
pub mod handshake;
pub mod monitor;
pub mod relay;
pub mod runner;
pub mod serial;
pub mod tracing;

#[cfg(test)]
pub(crate) mod test_support;
