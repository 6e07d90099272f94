//! Open-device records and the per-device update/send session.
//!
//! A [`PodRecord`] owns the transport handle for one device and carries the
//! identity the handler host sees (`path`, optional product / manufacturer /
//! serial strings). The session methods drive the device through one
//! command/response exchange at a time and classify every I/O failure.
//!
//! Failure policy is fail-fast: the first classified failure marks the record
//! `removal_pending` and the poll loop removes it within the same tick.
//! Nothing is retried.

use std::fmt;

use crate::error::{IoFailure, PodError};
use crate::eventbus::BindingId;
use crate::protocol::{self, LedAux, READ_TIMEOUT_MS, RESPONSE_LEN};
use crate::transport::HidHandle;

const UPDATE_FRAME: [u8; RESPONSE_LEN] = [protocol::CMD_UPDATE, 0, 0, 0, 0, 0, 0, 0];

/// One tracked pod: an open transport handle plus the identity exposed to
/// handlers.
pub struct PodRecord {
    path: String,
    handle: Box<dyn HidHandle>,
    product: Option<String>,
    manufacturer: Option<String>,
    serial: Option<String>,
    removal_pending: bool,
    binding: BindingId,
}

impl fmt::Debug for PodRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodRecord")
            .field("path", &self.path)
            .field("product", &self.product)
            .field("manufacturer", &self.manufacturer)
            .field("serial", &self.serial)
            .field("removal_pending", &self.removal_pending)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl PodRecord {
    /// Wraps a freshly opened handle. Identity strings are fetched
    /// opportunistically; a retrieval failure leaves the field absent.
    pub(crate) fn new(path: String, handle: Box<dyn HidHandle>) -> Self {
        let product = handle.product_string();
        let manufacturer = handle.manufacturer_string();
        let serial = handle.serial_number();
        Self {
            path,
            handle,
            product,
            manufacturer,
            serial,
            removal_pending: false,
            binding: BindingId::UNBOUND,
        }
    }

    /// Enumeration path; unique among tracked devices and stable for the
    /// record's lifetime.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// True once a session failure has scheduled this record for removal.
    pub fn removal_pending(&self) -> bool {
        self.removal_pending
    }

    /// Host correlation token for this device's callbacks.
    pub fn binding(&self) -> BindingId {
        self.binding
    }

    pub(crate) fn set_binding(&mut self, binding: BindingId) {
        self.binding = binding;
    }

    /// One update cycle: write the fixed update command, then one
    /// bounded-timeout read of the response frame.
    ///
    /// `Ok(Some(frame))` is an update report carrying the expected echo tag.
    /// `Ok(None)` is a well-formed frame with some other tag; those are
    /// dropped as protocol no-ops, without an event or a failure. Any
    /// classified I/O failure marks the record for removal and is returned
    /// for the caller to log.
    pub(crate) fn poll_update(&mut self) -> Result<Option<[u8; RESPONSE_LEN]>, IoFailure> {
        let report = self.exchange(&UPDATE_FRAME)?;
        if report[0] == protocol::CMD_UPDATE {
            Ok(Some(report))
        } else {
            Ok(None)
        }
    }

    /// Sends an arbitrary command with up to 7 payload bytes and returns the
    /// raw 8-byte response frame, uninterpreted.
    ///
    /// Unlike [`poll_update`](Self::poll_update), every failure here surfaces
    /// to the caller as well as marking the record for removal, so an
    /// invoking handler can react. A record already pending removal refuses
    /// the command.
    pub fn send(&mut self, cmd: u8, data: &[u8]) -> Result<[u8; RESPONSE_LEN], PodError> {
        if self.removal_pending {
            return Err(PodError::Detached(self.path.clone()));
        }
        let frame = protocol::encode_command(cmd, data)?;
        Ok(self.exchange(&frame)?)
    }

    fn exchange(&mut self, frame: &[u8; RESPONSE_LEN]) -> Result<[u8; RESPONSE_LEN], IoFailure> {
        let result = self.exchange_inner(frame);
        if result.is_err() {
            self.removal_pending = true;
        }
        result
    }

    fn exchange_inner(
        &mut self,
        frame: &[u8; RESPONSE_LEN],
    ) -> Result<[u8; RESPONSE_LEN], IoFailure> {
        match self.handle.write(frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => {
                return Err(IoFailure::WriteFailed(format!(
                    "wrote {n} of {} bytes",
                    frame.len()
                )))
            }
            Err(e) => return Err(IoFailure::WriteFailed(e.to_string())),
        }

        let mut buf = [0u8; RESPONSE_LEN];
        match self.handle.read_timeout(&mut buf, READ_TIMEOUT_MS) {
            Ok(0) => Err(IoFailure::ReadTimeout),
            Ok(n) if n != RESPONSE_LEN => Err(IoFailure::ShortRead {
                got: n,
                expected: RESPONSE_LEN,
            }),
            Ok(_) => Ok(buf),
            Err(e) => Err(IoFailure::TransportError(e.to_string())),
        }
    }

    // Typed wrappers over `send` for the known firmware command set. The
    // response frames come back raw except where a decode is unambiguous.

    /// Sounds the buzzer.
    pub fn beep(
        &mut self,
        tone_frequency: u8,
        tone_level: u8,
        duration: u8,
    ) -> Result<[u8; RESPONSE_LEN], PodError> {
        self.send(protocol::CMD_BEEP, &[tone_frequency, tone_level, duration])
    }

    /// Sets the encoder scale (100 or 200 counts per turn) and the mute flag.
    pub fn configure(&mut self, scale: u16, mute: bool) -> Result<[u8; RESPONSE_LEN], PodError> {
        let flags = if scale == 100 { 0x02 } else { 0x00 } | u8::from(mute);
        self.send(protocol::CMD_CONFIGURE, &[flags])
    }

    /// Drives the LED and auxiliary output lines.
    pub fn led_aux_control(&mut self, lines: LedAux) -> Result<[u8; RESPONSE_LEN], PodError> {
        self.send(protocol::CMD_LED_AUX, &[lines.bits()])
    }

    /// Requests the identity report. `Ok(None)` means the device answered
    /// with something other than an identity frame.
    pub fn identity(&mut self) -> Result<Option<String>, PodError> {
        let report = self.send(protocol::CMD_IDENTIFY, &[])?;
        Ok(protocol::decode_id_string(&report))
    }

    /// Resets the device.
    pub fn reset(&mut self) -> Result<[u8; RESPONSE_LEN], PodError> {
        self.send(protocol::CMD_RESET, &[])
    }

    /// Firmware version, e.g. `1.07`. The device reports it as a
    /// little-endian hundredths count.
    pub fn firmware_version(&mut self) -> Result<f32, PodError> {
        let report = self.send(protocol::CMD_VERSION, &[])?;
        Ok(f32::from(u16::from_le_bytes([report[1], report[2]])) / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_record, update_frame, ReadScript, WriteScript};

    #[test]
    fn update_returns_report_with_matching_echo_tag() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame(update_frame(10, 0x03)));

        let report = record.poll_update().unwrap();
        assert_eq!(report, Some([b'u', 0x0a, 0x00, 0x03, 0, 0, 0, 0]));
        assert!(!record.removal_pending());
        // The update command frame goes out zero-padded.
        assert_eq!(dev.borrow().written[0], vec![b'u', 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn update_silently_drops_mismatched_echo_tag() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([b'=', b'K', b'P', b'O', b'D', 0, 0, 0]));

        let report = record.poll_update().unwrap();
        assert_eq!(report, None);
        assert!(!record.removal_pending());
    }

    #[test]
    fn read_timeout_classifies_and_marks_removal() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut().reads.push_back(ReadScript::Timeout);

        let err = record.poll_update().unwrap_err();
        assert_eq!(err, IoFailure::ReadTimeout);
        assert!(record.removal_pending());
    }

    #[test]
    fn short_read_classifies_and_marks_removal() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Short(vec![1, 2, 3, 4, 5]));

        let err = record.poll_update().unwrap_err();
        assert_eq!(
            err,
            IoFailure::ShortRead {
                got: 5,
                expected: 8
            }
        );
        assert!(record.removal_pending());
    }

    #[test]
    fn read_error_classifies_as_transport_failure() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Fail("device unplugged".into()));

        let err = record.poll_update().unwrap_err();
        assert_eq!(err, IoFailure::TransportError("device unplugged".into()));
        assert!(record.removal_pending());
    }

    #[test]
    fn short_write_classifies_as_write_failure() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut().writes.push_back(WriteScript::Short(3));

        let err = record.poll_update().unwrap_err();
        assert!(matches!(err, IoFailure::WriteFailed(_)));
        assert!(record.removal_pending());
    }

    #[test]
    fn write_error_classifies_as_write_failure() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .writes
            .push_back(WriteScript::Fail("pipe stalled".into()));

        let err = record.poll_update().unwrap_err();
        assert_eq!(err, IoFailure::WriteFailed("pipe stalled".into()));
        assert!(record.removal_pending());
    }

    #[test]
    fn send_returns_raw_frame_and_pads_payload() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([0x5a, 1, 0, 0, 0, 0, 0, 0]));

        let report = record.beep(3, 2, 5).unwrap();
        assert_eq!(report, [0x5a, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(dev.borrow().written[0], vec![0x5a, 3, 2, 5, 0, 0, 0, 0]);
    }

    #[test]
    fn send_surfaces_failure_to_the_caller() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut().reads.push_back(ReadScript::Timeout);

        let err = record.send(0x5a, &[1]).unwrap_err();
        assert!(matches!(err, PodError::Io(IoFailure::ReadTimeout)));
        assert!(record.removal_pending());
    }

    #[test]
    fn send_refuses_a_record_pending_removal() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut().reads.push_back(ReadScript::Timeout);
        let _ = record.poll_update();
        assert!(record.removal_pending());

        let writes_before = dev.borrow().written.len();
        let err = record.send(0x5a, &[1]).unwrap_err();
        assert!(matches!(err, PodError::Detached(_)));
        assert_eq!(dev.borrow().written.len(), writes_before);
    }

    #[test]
    fn send_rejects_oversized_payload_without_io() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        let err = record.send(0x01, &[0; 8]).unwrap_err();
        assert!(matches!(err, PodError::PayloadTooLong { .. }));
        assert!(dev.borrow().written.is_empty());
        assert!(!record.removal_pending());
    }

    #[test]
    fn identity_decodes_the_id_string() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([b'=', b'K', b'P', b'O', b'D', 0, 0, 0]));

        assert_eq!(record.identity().unwrap().as_deref(), Some("KPOD"));
        assert_eq!(dev.borrow().written[0][0], b'=');
    }

    #[test]
    fn firmware_version_is_reported_in_hundredths() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([b'v', 107, 0, 0, 0, 0, 0, 0]));

        let version = record.firmware_version().unwrap();
        assert!((version - 1.07).abs() < 1e-6);
    }

    #[test]
    fn configure_folds_scale_and_mute_into_flags() {
        let (mut record, dev) = mock_record("/dev/hidraw0");
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([0x43, 0, 0, 0, 0, 0, 0, 0]));
        dev.borrow_mut()
            .reads
            .push_back(ReadScript::Frame([0x43, 0, 0, 0, 0, 0, 0, 0]));

        record.configure(100, true).unwrap();
        record.configure(200, false).unwrap();
        let written = &dev.borrow().written;
        assert_eq!(written[0][1], 0x03);
        assert_eq!(written[1][1], 0x00);
    }
}
