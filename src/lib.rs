//! Transport-agnostic decoder for scuba dive computers that store logged
//! dives in an onboard ring buffer (Oceanic/Aeris VTPro family, Suunto 2
//! family, Uwatec Aladin/Memomouse).
//!
//! The crate owns no serial/IrDA/USB-HID bindings; callers implement the
//! [`transport`] traits for their platform and hand a boxed transport to
//! the backend constructor they want (e.g.
//! [`oceanic::vtpro::VtproDevice::open`]). From there, every backend is
//! driven through the common [`device::Device`] trait.

#![deny(missing_docs, missing_debug_implementations)]

#[allow(dead_code)]
pub(crate) mod util;

mod errors;
pub use errors::{Error, Result};

pub mod primitives;

pub mod buffer;
pub use buffer::DynamicBuffer;

pub mod event;
pub use event::{Event, EventListener};

pub mod device;
pub use device::{downcast_mut, BackendId, Cancellation, Device, DiveCallback};

pub mod transport;

pub mod oceanic;
pub mod suunto;
pub mod aladin;
