//! Device discovery.
//!
//! A scan pass enumerates every transport device matching the configured
//! vendor/product pair and opens the ones not already tracked. Discovery is
//! idempotent: an already-open path is never reopened, and a candidate that
//! fails to open is logged and skipped without aborting the rest of the
//! pass.

use log::{info, warn};

use crate::device::PodRecord;
use crate::error::PodError;
use crate::eventbus::EventDispatcher;
use crate::registry::Registry;
use crate::transport::HidTransport;

/// One enumeration pass. Returns the paths newly opened by this pass.
pub fn scan(
    transport: &mut dyn HidTransport,
    registry: &mut Registry,
    dispatcher: &mut EventDispatcher,
    vendor_id: u16,
    product_id: u16,
) -> Vec<String> {
    let mut opened = Vec::new();
    for path in transport.enumerate(vendor_id, product_id) {
        if registry.contains(&path) {
            continue;
        }
        match open_pod(transport, registry, dispatcher, &path) {
            Ok(()) => opened.push(path),
            Err(e) => warn!("skipping device: {e}"),
        }
    }
    opened
}

/// Opens a device by path, registers it, and fires `onDeviceAdded`.
///
/// The added event fires only after the record is registered, so the handler
/// always sees a complete, queryable device.
pub fn open_pod(
    transport: &mut dyn HidTransport,
    registry: &mut Registry,
    dispatcher: &mut EventDispatcher,
    path: &str,
) -> Result<(), PodError> {
    if registry.contains(path) {
        return Err(PodError::DuplicatePath(path.to_string()));
    }
    let handle = transport.open(path)?;
    let mut record = PodRecord::new(path.to_string(), handle);
    let binding = dispatcher.bind(&record);
    record.set_binding(binding);
    let record = registry.add(record)?;
    info!(
        "opened device {path} ({})",
        record.product().unwrap_or("unknown product")
    );
    dispatcher.device_added(record);
    Ok(())
}
