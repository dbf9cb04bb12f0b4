//! iPhone presence detection over USB.
//!
//! A phone counts as present when a device with Apple's vendor ID and one of
//! the known iPhone product IDs is enumerated *and* its active configuration
//! descriptor can be read. Phones caught mid-transition (locking, switching
//! modes) enumerate without a readable configuration, and are treated as
//! absent.
//!
//! The probe never fails: a missing USB backend or any error from it reads as
//! "not present".

use async_trait::async_trait;
use std::sync::Arc;

use crate::tracing::prelude::*;

/// Vendor and product IDs identifying the tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_ids: &'static [u16],
}

impl DeviceIdentity {
    /// Whether a VID/PID pair is the tracked device.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && self.product_ids.contains(&product_id)
    }
}

/// Apple's USB vendor ID.
pub const APPLE_VENDOR_ID: u16 = 0x05ac;

/// iPhone product IDs across models and USB modes.
pub const IPHONE_PRODUCT_IDS: [u16; 18] = [
    0x12a8, 0x12aa, 0x12ab, 0x12ac, 0x12ad, 0x12ae, 0x12af, 0x12b0, 0x12b1,
    0x12b2, 0x12b3, 0x12b4, 0x12b5, 0x12b6, 0x12b7, 0x12b8, 0x12b9, 0x12ba,
];

pub const IPHONE: DeviceIdentity = DeviceIdentity {
    vendor_id: APPLE_VENDOR_ID,
    product_ids: &IPHONE_PRODUCT_IDS,
};

/// Something that can answer "is the phone there right now?".
///
/// Implementations must not fail; errors read as absent.
#[async_trait]
pub trait PresenceProbe: Send + Sync {
    async fn is_present(&self) -> bool;
}

/// A USB bus that can be enumerated.
pub trait UsbBus: Send + Sync + 'static {
    type Device: UsbCandidate;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>>;
}

/// One enumerated USB device.
pub trait UsbCandidate {
    /// (vendor ID, product ID) from the device descriptor.
    fn ids(&self) -> rusb::Result<(u16, u16)>;

    /// Read the active configuration descriptor, discarding it.
    fn check_active_configuration(&self) -> rusb::Result<()>;
}

impl UsbBus for rusb::Context {
    type Device = rusb::Device<rusb::Context>;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>> {
        use rusb::UsbContext;
        Ok(UsbContext::devices(self)?.iter().collect())
    }
}

impl<T: rusb::UsbContext> UsbCandidate for rusb::Device<T> {
    fn ids(&self) -> rusb::Result<(u16, u16)> {
        let desc = self.device_descriptor()?;
        Ok((desc.vendor_id(), desc.product_id()))
    }

    fn check_active_configuration(&self) -> rusb::Result<()> {
        self.active_config_descriptor().map(|_| ())
    }
}

/// Presence probe backed by a USB bus.
///
/// `bus` is `None` when the USB backend could not be initialized, in which
/// case every probe reports absent.
pub struct DeviceProbe<B> {
    bus: Option<Arc<B>>,
    identity: DeviceIdentity,
}

// Manual impl: cloning shares the bus, so B itself need not be Clone.
impl<B> Clone for DeviceProbe<B> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            identity: self.identity,
        }
    }
}

impl DeviceProbe<rusb::Context> {
    /// Create a probe on the system's libusb context.
    ///
    /// Failure to create the context is logged once here and leaves the probe
    /// permanently reporting absent.
    pub fn system() -> Self {
        match rusb::Context::new() {
            Ok(context) => {
                let v = rusb::version();
                info!(
                    "USB backend initialized (libusb {}.{}.{})",
                    v.major(),
                    v.minor(),
                    v.micro()
                );
                Self::new(Some(context), IPHONE)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Could not initialize USB backend; iPhone detection disabled."
                );
                Self::new(None, IPHONE)
            }
        }
    }
}

impl<B: UsbBus> DeviceProbe<B> {
    pub fn new(bus: Option<B>, identity: DeviceIdentity) -> Self {
        Self {
            bus: bus.map(Arc::new),
            identity,
        }
    }

    pub fn has_backend(&self) -> bool {
        self.bus.is_some()
    }

    /// Blocking presence check.
    pub fn probe_blocking(&self) -> bool {
        let Some(bus) = &self.bus else {
            return false;
        };

        let devices = match bus.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Error checking iPhone connection.");
                return false;
            }
        };

        for device in devices {
            let (vid, pid) = match device.ids() {
                Ok(ids) => ids,
                Err(e) => {
                    trace!(error = %e, "Skipping device without descriptor.");
                    continue;
                }
            };
            if !self.identity.matches(vid, pid) {
                continue;
            }
            match device.check_active_configuration() {
                Ok(()) => return true,
                Err(e) => {
                    debug!(
                        "Device {:04x}:{:04x} enumerated but not configurable: {}",
                        vid, pid, e
                    );
                }
            }
        }

        false
    }
}

#[async_trait]
impl<B: UsbBus> PresenceProbe for DeviceProbe<B> {
    async fn is_present(&self) -> bool {
        let probe = self.clone();
        match tokio::task::spawn_blocking(move || probe.probe_blocking()).await {
            Ok(present) => present,
            Err(e) => {
                warn!(error = %e, "USB probe task failed.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[derive(Clone)]
    struct FakeDevice {
        vid: u16,
        pid: u16,
        configurable: bool,
    }

    impl UsbCandidate for FakeDevice {
        fn ids(&self) -> rusb::Result<(u16, u16)> {
            Ok((self.vid, self.pid))
        }

        fn check_active_configuration(&self) -> rusb::Result<()> {
            if self.configurable {
                Ok(())
            } else {
                Err(rusb::Error::NotFound)
            }
        }
    }

    struct FakeBus(rusb::Result<Vec<FakeDevice>>);

    impl UsbBus for FakeBus {
        type Device = FakeDevice;

        fn devices(&self) -> rusb::Result<Vec<FakeDevice>> {
            self.0.clone()
        }
    }

    fn probe_with(devices: Vec<FakeDevice>) -> DeviceProbe<FakeBus> {
        DeviceProbe::new(Some(FakeBus(Ok(devices))), IPHONE)
    }

    fn device(vid: u16, pid: u16, configurable: bool) -> FakeDevice {
        FakeDevice { vid, pid, configurable }
    }

    #[test]
    fn test_identity_table() {
        assert_eq!(IPHONE.vendor_id, 0x05ac);
        assert_eq!(IPHONE.product_ids.len(), 18);
        assert_eq!(IPHONE.product_ids.first(), Some(&0x12a8));
        assert_eq!(IPHONE.product_ids.last(), Some(&0x12ba));
        // 0x12a9 is absent from the table
        assert!(!IPHONE.product_ids.contains(&0x12a9));
    }

    #[test]
    fn test_every_accepted_product_is_present() {
        for &pid in IPHONE.product_ids {
            let probe = probe_with(vec![device(APPLE_VENDOR_ID, pid, true)]);
            assert!(probe.probe_blocking(), "product {:04x} should be present", pid);
        }
    }

    #[test_case(APPLE_VENDOR_ID, 0x12a9 ; "gap in apple table")]
    #[test_case(APPLE_VENDOR_ID, 0x1460 ; "other apple product")]
    #[test_case(0x18d1, 0x12a8 ; "iphone pid under other vendor")]
    #[test_case(0x0403, 0x6001 ; "ftdi adapter")]
    fn test_unmatched_device_is_absent(vid: u16, pid: u16) {
        let probe = probe_with(vec![device(vid, pid, true)]);
        assert!(!probe.probe_blocking());
    }

    #[test]
    fn test_unconfigurable_candidate_is_skipped() {
        let probe = probe_with(vec![device(APPLE_VENDOR_ID, 0x12a8, false)]);
        assert!(!probe.probe_blocking());

        // A later configurable match still counts
        let probe = probe_with(vec![
            device(APPLE_VENDOR_ID, 0x12a8, false),
            device(APPLE_VENDOR_ID, 0x12b0, true),
        ]);
        assert!(probe.probe_blocking());
    }

    #[test]
    fn test_enumeration_error_reads_absent() {
        let probe = DeviceProbe::new(Some(FakeBus(Err(rusb::Error::Io))), IPHONE);
        assert!(!probe.probe_blocking());
    }

    #[test]
    fn test_missing_backend_reads_absent() {
        let probe = DeviceProbe::<FakeBus>::new(None, IPHONE);
        assert!(!probe.has_backend());
        assert!(!probe.probe_blocking());
    }

    #[tokio::test]
    async fn test_async_probe_matches_blocking() {
        let probe = probe_with(vec![device(APPLE_VENDOR_ID, 0x12ba, true)]);
        assert!(probe.is_present().await);

        let probe = probe_with(vec![]);
        assert!(!probe.is_present().await);
    }
}
