//! HID transport seam.
//!
//! The daemon talks to hardware through the [`HidTransport`] / [`HidHandle`]
//! trait pair so the poll engine can run against the `hidapi` backend in
//! production and scripted fixtures in tests. The contract mirrors a standard
//! blocking HID stack: enumerate by vendor/product pair, open by path, write
//! full reports, read with a bounded timeout.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use log::warn;
use thiserror::Error;

use crate::error::PodError;

/// Backend-reported failure of a handle operation. The device session folds
/// these into its own failure classification.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportFault(pub String);

/// Blocking HID transport: enumeration and open-by-path.
pub trait HidTransport {
    /// Enumeration paths of every connected device matching the pair.
    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> Vec<String>;

    /// Open a device by enumeration path.
    fn open(&mut self, path: &str) -> Result<Box<dyn HidHandle>, PodError>;
}

/// An open device handle. Dropping the handle closes the device.
pub trait HidHandle {
    /// Write one full report; returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportFault>;

    /// Bounded-timeout read. `Ok(0)` means the timeout elapsed with no data.
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportFault>;

    /// Product string, if the device reports one.
    fn product_string(&self) -> Option<String>;

    /// Manufacturer string, if the device reports one.
    fn manufacturer_string(&self) -> Option<String>;

    /// Serial number, if the device reports one.
    fn serial_number(&self) -> Option<String>;
}

/// Production transport over the `hidapi` backend.
pub struct HidapiTransport {
    api: HidApi,
}

impl HidapiTransport {
    /// Initializes the hidapi backend. Failure here is fatal to the daemon.
    pub fn new() -> Result<Self, PodError> {
        let api = HidApi::new().map_err(|e| PodError::TransportInit(e.to_string()))?;
        Ok(Self { api })
    }
}

impl HidTransport for HidapiTransport {
    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> Vec<String> {
        // Refresh so repeated scans observe hotplug changes.
        if let Err(e) = self.api.refresh_devices() {
            warn!("device enumeration refresh failed: {e}");
        }
        self.api
            .device_list()
            .filter(|info| info.vendor_id() == vendor_id && info.product_id() == product_id)
            .map(|info| info.path().to_string_lossy().into_owned())
            .collect()
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn HidHandle>, PodError> {
        let open_err = |reason: String| PodError::Open {
            path: path.to_string(),
            reason,
        };
        let cpath = CString::new(path).map_err(|e| open_err(e.to_string()))?;
        let device = self
            .api
            .open_path(&cpath)
            .map_err(|e| open_err(e.to_string()))?;
        // The session issues its own bounded-timeout reads.
        if let Err(e) = device.set_blocking_mode(true) {
            warn!("{path}: failed to set blocking mode: {e}");
        }
        Ok(Box::new(HidapiHandle { device }))
    }
}

struct HidapiHandle {
    device: HidDevice,
}

impl HidHandle for HidapiHandle {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportFault> {
        self.device
            .write(data)
            .map_err(|e| TransportFault(e.to_string()))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportFault> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| TransportFault(e.to_string()))
    }

    fn product_string(&self) -> Option<String> {
        self.device.get_product_string().ok().flatten()
    }

    fn manufacturer_string(&self) -> Option<String> {
        self.device.get_manufacturer_string().ok().flatten()
    }

    fn serial_number(&self) -> Option<String> {
        self.device.get_serial_number_string().ok().flatten()
    }
}
