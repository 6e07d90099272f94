//! The poll loop: fixed-rate updates, interleaved rescans, same-tick
//! removal.
//!
//! Everything runs on one logical thread. The only suspension points are the
//! bounded-timeout transport reads and the inter-tick sleep; registry
//! mutation, I/O, and event dispatch are strictly sequential, so no locking
//! is involved. Cancellation is cooperative and checked once per tick
//! boundary; an in-flight read completes or times out before shutdown
//! proceeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::error::PodError;
use crate::eventbus::{EventDispatcher, HandlerHost};
use crate::registry::{Cursor, Registry};
use crate::scanner;
use crate::transport::HidTransport;

/// Cooperative cancellation token. Setting it stops the poll loop at the
/// next tick boundary; the registry is drained before `run` returns.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Operational parameters of the poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// USB vendor id to scan for.
    pub vendor_id: u16,
    /// USB product id to scan for.
    pub product_id: u16,
    /// Open exactly this device at startup instead of scanning; the loop
    /// exits when it disconnects.
    pub device_path: Option<String>,
    /// Sleep between ticks.
    pub update_interval: Duration,
    /// Target interval between rescans; zero disables periodic scanning.
    pub scan_interval: Duration,
}

/// Outcome of one tick over the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The explicitly configured device disconnected; the daemon is done.
    Exit,
}

/// The device lifecycle manager: owns the transport, the registry, and the
/// dispatcher, and drives every open device through fixed-rate update
/// cycles.
pub struct PodManager {
    transport: Box<dyn HidTransport>,
    registry: Registry,
    dispatcher: EventDispatcher,
    settings: PollSettings,
}

impl PodManager {
    pub fn new(
        transport: Box<dyn HidTransport>,
        host: Box<dyn HandlerHost>,
        settings: PollSettings,
    ) -> Self {
        Self {
            transport,
            registry: Registry::new(),
            dispatcher: EventDispatcher::new(host),
            settings,
        }
    }

    /// Number of currently open devices.
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    /// Opens the explicitly configured device path, if one is set. Failure
    /// here is fatal, unlike a skipped scan candidate.
    pub fn open_configured(&mut self) -> Result<(), PodError> {
        if let Some(path) = self.settings.device_path.clone() {
            scanner::open_pod(
                self.transport.as_mut(),
                &mut self.registry,
                &mut self.dispatcher,
                &path,
            )?;
        }
        Ok(())
    }

    /// One immediate scan pass. Returns the newly opened paths.
    pub fn scan_now(&mut self) -> Vec<String> {
        scanner::scan(
            self.transport.as_mut(),
            &mut self.registry,
            &mut self.dispatcher,
            self.settings.vendor_id,
            self.settings.product_id,
        )
    }

    /// Drives every currently tracked device through one update cycle,
    /// removing any that failed within the same tick.
    pub fn tick(&mut self) -> Result<TickOutcome, PodError> {
        let cursor = self.registry.cursor();
        self.update_pass(cursor)
    }

    fn update_pass(&mut self, mut cursor: Cursor) -> Result<TickOutcome, PodError> {
        let single_device = self.settings.device_path.is_some();
        while let Some(path) = cursor.next(&self.registry) {
            // A record already pending removal (e.g. a handler's send failed
            // during its added-dispatch) gets no further I/O.
            if let Some(record) = self
                .registry
                .get_mut(&path)
                .filter(|r| !r.removal_pending())
            {
                match record.poll_update() {
                    Ok(Some(report)) => self.dispatcher.update_report(record, &report),
                    Ok(None) => {}
                    Err(failure) => error!("{path}: {failure}"),
                }
            }

            let pending = self
                .registry
                .get(&path)
                .is_some_and(|r| r.removal_pending());
            if pending {
                self.remove_pod(&path)?;
                if single_device {
                    info!("device {path} disconnected, exiting");
                    return Ok(TickOutcome::Exit);
                }
            }
        }
        Ok(TickOutcome::Continue)
    }

    /// Runs the poll loop until the token is cancelled or, in single-device
    /// mode, until the configured device disconnects. Every device still
    /// open on the way out is closed through the normal removal sequence.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<(), PodError> {
        self.open_configured()?;

        let scan_period = self.scan_period_ticks();
        let mut scan_countdown = 0u64;

        while !cancel.is_cancelled() {
            // Snapshot before the rescan: devices a scan adds are first
            // updated on the following tick.
            let cursor = self.registry.cursor();

            if let Some(period) = scan_period {
                if scan_countdown == 0 {
                    self.scan_now();
                    // Integer approximation of the rescan cadence; drift is
                    // accepted rather than corrected.
                    scan_countdown = period;
                } else {
                    scan_countdown -= 1;
                }
            }

            if self.update_pass(cursor)? == TickOutcome::Exit {
                return Ok(());
            }

            thread::sleep(self.settings.update_interval);
        }

        self.drain();
        Ok(())
    }

    /// Rescan period in ticks, or `None` when scanning is disabled (zero
    /// interval, or a fixed device path).
    fn scan_period_ticks(&self) -> Option<u64> {
        if self.settings.device_path.is_some() || self.settings.scan_interval.is_zero() {
            return None;
        }
        let update_ms = self.settings.update_interval.as_millis().max(1);
        Some((self.settings.scan_interval.as_millis() / update_ms) as u64)
    }

    /// The removal sequence: fire `onDeviceRemoved`, detach from the
    /// registry, release the transport handle, release the host binding.
    fn remove_pod(&mut self, path: &str) -> Result<(), PodError> {
        if let Some(record) = self.registry.get_mut(path) {
            self.dispatcher.device_removed(record);
        }
        let record = self.registry.remove(path)?;
        let binding = record.binding();
        drop(record);
        self.dispatcher.unbind(binding);
        info!("closed device {path}");
        Ok(())
    }

    /// Closes every remaining device through the normal removal sequence.
    fn drain(&mut self) {
        for path in self.registry.paths() {
            if let Err(e) = self.remove_pod(&path) {
                error!("failed to close {path}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::CallbackHost;
    use crate::test_utils::MockTransport;

    fn settings() -> PollSettings {
        PollSettings {
            vendor_id: 0x04d8,
            product_id: 0xf12d,
            device_path: None,
            update_interval: Duration::from_millis(5),
            scan_interval: Duration::from_millis(1000),
        }
    }

    #[test]
    fn cancel_token_flips_once_set() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.clone().cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn scan_period_is_the_integer_tick_ratio() {
        let transport = MockTransport::new();
        let manager = PodManager::new(
            Box::new(transport),
            Box::new(CallbackHost::new()),
            settings(),
        );
        assert_eq!(manager.scan_period_ticks(), Some(200));
    }

    #[test]
    fn zero_scan_interval_disables_scanning() {
        let transport = MockTransport::new();
        let mut cfg = settings();
        cfg.scan_interval = Duration::ZERO;
        let manager = PodManager::new(Box::new(transport), Box::new(CallbackHost::new()), cfg);
        assert_eq!(manager.scan_period_ticks(), None);
    }

    #[test]
    fn fixed_device_path_disables_scanning() {
        let transport = MockTransport::new();
        let mut cfg = settings();
        cfg.device_path = Some("/dev/hidraw0".into());
        let manager = PodManager::new(Box::new(transport), Box::new(CallbackHost::new()), cfg);
        assert_eq!(manager.scan_period_ticks(), None);
    }

    #[test]
    fn open_configured_is_fatal_when_the_device_is_missing() {
        let transport = MockTransport::new();
        let mut cfg = settings();
        cfg.device_path = Some("/dev/hidraw0".into());
        let mut manager = PodManager::new(Box::new(transport), Box::new(CallbackHost::new()), cfg);
        let err = manager.open_configured().unwrap_err();
        assert!(matches!(err, PodError::Open { .. }));
    }
}
