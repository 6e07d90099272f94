//! Event dispatch to the external handler host.
//!
//! Lifecycle events (`onDeviceAdded` / `onDeviceRemoved`) are fleet-level
//! handlers looked up by name; `onUpdateReport` is bound to the specific
//! device. That asymmetry is part of the contract: add/remove describe the
//! fleet, update describes one instance.
//!
//! A missing handler is a no-op. A failing handler is logged with its
//! identity and device context and never interrupts the poll loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::warn;

use crate::device::PodRecord;
use crate::error::HandlerError;
use crate::protocol::RESPONSE_LEN;

/// Fleet-level handler name fired once per newly opened device.
pub const ON_DEVICE_ADDED: &str = "onDeviceAdded";
/// Fleet-level handler name fired once per removed device, before its
/// transport handle is released.
pub const ON_DEVICE_REMOVED: &str = "onDeviceRemoved";
/// Per-device handler name fired for each decoded update report.
pub const ON_UPDATE_REPORT: &str = "onUpdateReport";

/// Opaque token the host uses to correlate callbacks with one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u64);

impl BindingId {
    /// Placeholder before the host has bound the device.
    pub const UNBOUND: BindingId = BindingId(0);
}

/// Whether a dispatch found a handler to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled,
    NoHandler,
}

/// Capability interface to the external handler host.
///
/// The core hands the host plain [`PodRecord`]s; the host owns whatever
/// richer representation (scripting object, FFI value) its handler
/// environment expects and is responsible for marshaling.
pub trait HandlerHost {
    /// Creates the correlation binding for a newly opened device.
    fn bind(&mut self, pod: &PodRecord) -> BindingId;

    /// Releases a binding after the device is gone.
    fn unbind(&mut self, binding: BindingId);

    /// Invokes a fleet-level handler by name, if one is registered.
    fn call_fleet(&mut self, name: &str, pod: &mut PodRecord)
        -> Result<Dispatched, HandlerError>;

    /// Invokes the update handler bound to this device, if any.
    fn call_update(
        &mut self,
        pod: &mut PodRecord,
        report: &[u8; RESPONSE_LEN],
    ) -> Result<Dispatched, HandlerError>;
}

/// Delivers lifecycle and update events to the handler host, containing
/// handler failures so they never abort the tick in progress.
pub struct EventDispatcher {
    host: Box<dyn HandlerHost>,
}

impl EventDispatcher {
    pub fn new(host: Box<dyn HandlerHost>) -> Self {
        Self { host }
    }

    pub fn bind(&mut self, pod: &PodRecord) -> BindingId {
        self.host.bind(pod)
    }

    pub fn unbind(&mut self, binding: BindingId) {
        self.host.unbind(binding);
    }

    pub fn device_added(&mut self, pod: &mut PodRecord) {
        self.fleet(ON_DEVICE_ADDED, pod);
    }

    pub fn device_removed(&mut self, pod: &mut PodRecord) {
        self.fleet(ON_DEVICE_REMOVED, pod);
    }

    pub fn update_report(&mut self, pod: &mut PodRecord, report: &[u8; RESPONSE_LEN]) {
        if let Err(e) = self.host.call_update(pod, report) {
            warn!("{ON_UPDATE_REPORT} handler failed for {}: {e}", pod.path());
        }
    }

    fn fleet(&mut self, name: &str, pod: &mut PodRecord) {
        if let Err(e) = self.host.call_fleet(name, pod) {
            warn!("{name} handler failed for {}: {e}", pod.path());
        }
    }
}

type FleetHandler = Box<dyn FnMut(&mut PodRecord) -> Result<(), HandlerError>>;
type UpdateHandler = Rc<RefCell<dyn FnMut(&mut PodRecord, &[u8; RESPONSE_LEN]) -> Result<(), HandlerError>>>;

/// Closure-registry host: the built-in stand-in for an embedded handler
/// environment. Fleet handlers are keyed by name; the update handler
/// installed via [`on_update`](Self::on_update) is attached to every device
/// bound afterwards.
///
/// Single-threaded by design, like the rest of the daemon.
#[derive(Default)]
pub struct CallbackHost {
    next_binding: u64,
    fleet: HashMap<String, FleetHandler>,
    update_template: Option<UpdateHandler>,
    bound: HashMap<BindingId, UpdateHandler>,
}

impl CallbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fleet-level handler under `name` (usually
    /// [`ON_DEVICE_ADDED`] or [`ON_DEVICE_REMOVED`]).
    pub fn on_fleet(
        &mut self,
        name: &str,
        handler: impl FnMut(&mut PodRecord) -> Result<(), HandlerError> + 'static,
    ) {
        self.fleet.insert(name.to_string(), Box::new(handler));
    }

    /// Installs the update handler attached to every subsequently bound
    /// device.
    pub fn on_update(
        &mut self,
        handler: impl FnMut(&mut PodRecord, &[u8; RESPONSE_LEN]) -> Result<(), HandlerError> + 'static,
    ) {
        self.update_template = Some(Rc::new(RefCell::new(handler)));
    }
}

impl HandlerHost for CallbackHost {
    fn bind(&mut self, _pod: &PodRecord) -> BindingId {
        self.next_binding += 1;
        let id = BindingId(self.next_binding);
        if let Some(template) = &self.update_template {
            self.bound.insert(id, template.clone());
        }
        id
    }

    fn unbind(&mut self, binding: BindingId) {
        self.bound.remove(&binding);
    }

    fn call_fleet(
        &mut self,
        name: &str,
        pod: &mut PodRecord,
    ) -> Result<Dispatched, HandlerError> {
        match self.fleet.get_mut(name) {
            Some(handler) => handler(pod).map(|()| Dispatched::Handled),
            None => Ok(Dispatched::NoHandler),
        }
    }

    fn call_update(
        &mut self,
        pod: &mut PodRecord,
        report: &[u8; RESPONSE_LEN],
    ) -> Result<Dispatched, HandlerError> {
        match self.bound.get(&pod.binding()) {
            Some(handler) => {
                let mut handler = handler.borrow_mut();
                (&mut *handler)(pod, report).map(|()| Dispatched::Handled)
            }
            None => Ok(Dispatched::NoHandler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_record;

    #[test]
    fn missing_handler_is_a_no_op() {
        let mut host = CallbackHost::new();
        let (mut pod, _dev) = mock_record("/dev/hidraw0");
        let result = host.call_fleet(ON_DEVICE_ADDED, &mut pod).unwrap();
        assert_eq!(result, Dispatched::NoHandler);
    }

    #[test]
    fn fleet_handler_receives_the_device() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut host = CallbackHost::new();
        let log = seen.clone();
        host.on_fleet(ON_DEVICE_ADDED, move |pod| {
            log.borrow_mut().push(pod.path().to_string());
            Ok(())
        });

        let (mut pod, _dev) = mock_record("/dev/hidraw0");
        let result = host.call_fleet(ON_DEVICE_ADDED, &mut pod).unwrap();
        assert_eq!(result, Dispatched::Handled);
        assert_eq!(seen.borrow().as_slice(), ["/dev/hidraw0"]);
    }

    #[test]
    fn bindings_are_unique_and_update_handlers_follow_them() {
        let count = Rc::new(RefCell::new(0));
        let mut host = CallbackHost::new();
        let calls = count.clone();
        host.on_update(move |_pod, _report| {
            *calls.borrow_mut() += 1;
            Ok(())
        });

        let (mut a, _da) = mock_record("/dev/hidraw0");
        let (mut b, _db) = mock_record("/dev/hidraw1");
        let bind_a = host.bind(&a);
        let bind_b = host.bind(&b);
        assert_ne!(bind_a, bind_b);
        a.set_binding(bind_a);
        b.set_binding(bind_b);

        let frame = [b'u', 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(host.call_update(&mut a, &frame).unwrap(), Dispatched::Handled);
        assert_eq!(host.call_update(&mut b, &frame).unwrap(), Dispatched::Handled);
        assert_eq!(*count.borrow(), 2);

        host.unbind(bind_a);
        assert_eq!(
            host.call_update(&mut a, &frame).unwrap(),
            Dispatched::NoHandler
        );
    }

    #[test]
    fn device_bound_before_template_has_no_update_handler() {
        let mut host = CallbackHost::new();
        let (mut pod, _dev) = mock_record("/dev/hidraw0");
        let binding = host.bind(&pod);
        pod.set_binding(binding);
        host.on_update(|_pod, _report| Ok(()));

        let frame = [b'u', 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            host.call_update(&mut pod, &frame).unwrap(),
            Dispatched::NoHandler
        );
    }

    #[test]
    fn dispatcher_contains_handler_failures() {
        let mut host = CallbackHost::new();
        host.on_fleet(ON_DEVICE_ADDED, |_pod| {
            Err(HandlerError::new("handler blew up"))
        });
        let mut dispatcher = EventDispatcher::new(Box::new(host));

        let (mut pod, _dev) = mock_record("/dev/hidraw0");
        // Logged, not propagated; the dispatcher stays usable.
        dispatcher.device_added(&mut pod);
        dispatcher.device_removed(&mut pod);
    }
}
