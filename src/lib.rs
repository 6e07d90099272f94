//! podd — a daemon for USB HID control pods.
//!
//! Discovers pods by vendor/product id, drives each open device through a
//! fixed-rate update cycle over an 8-byte command/report protocol, and
//! dispatches lifecycle and update events to user-registered handlers.
//!
//! The crate is single-threaded and cooperative throughout: one poll loop
//! owns every device, and cancellation is a token checked at tick
//! boundaries.

pub mod config;
pub mod device;
pub mod error;
pub mod eventbus;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod test_utils;
pub mod transport;

pub use config::Config;
pub use device::PodRecord;
pub use error::{HandlerError, IoFailure, PodError};
pub use eventbus::{BindingId, CallbackHost, EventDispatcher, HandlerHost};
pub use manager::{CancelToken, PodManager, PollSettings, TickOutcome};
pub use registry::Registry;
