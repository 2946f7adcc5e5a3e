//! IrDA socket primitives required from a collaborator, plus the
//! process-wide init/cleanup lifecycle the IrDA subsystem needs.
//!
//! The platform difference the source absorbs here — Windows reports
//! discovered devices as `numDevice` entries with a big-endian device id,
//! Linux reports a `len`-prefixed list with little-endian hints — is a
//! concern of whatever concrete transport a caller plugs in; this trait
//! only describes the shape both expose once normalised.

use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::errors::Result;

/// A 32-bit IrDA endpoint (device) address.
pub type IrdaAddress = u32;

/// One entry from an IrDA discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrdaDevice {
    /// The device's IrDA address.
    pub address: IrdaAddress,
    /// The device's advertised service/device name hint, if any.
    pub name: Option<String>,
}

/// An IrDA socket transport.
pub trait IrdaTransport {
    /// Set the read timeout, in milliseconds.
    fn set_timeout(&mut self, timeout_ms: i32) -> Result<()>;

    /// Discover nearby IrDA devices.
    ///
    /// The source retries up to 4 times with 1 s pacing between attempts,
    /// treating "no devices found" as a condition to retry rather than an
    /// error; callers implementing this trait should do the same internally
    /// so that, from the engine's point of view, `discover` either returns
    /// a non-empty list or a genuine transport error.
    fn discover(&mut self) -> Result<Vec<IrdaDevice>>;

    /// Connect to `address` on the named IAS service.
    fn connect_name(&mut self, address: IrdaAddress, service: &str) -> Result<()>;

    /// Connect to `address` on a specific LSAP-SEL.
    fn connect_lsap(&mut self, address: IrdaAddress, lsap: u8) -> Result<()>;

    /// True if there is data available to read without blocking.
    fn available(&mut self) -> Result<bool>;

    /// Read up to `buf.len()` bytes, returning the number read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning the number of bytes actually written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Release the socket.
    fn close(&mut self) -> Result<()>;
}

lazy_static! {
    /// Process-wide count of live [`IrdaGuard`]s. The first guard created
    /// performs the platform's one-time IrDA/Winsock init; the last one
    /// dropped tears it down. Modeled as a reference-counted lifecycle hook
    /// per the design notes' treatment of the source's process-wide globals.
    static ref IRDA_REFCOUNT: Mutex<usize> = Mutex::new(0);
}

/// RAII guard around the process-wide IrDA subsystem lifecycle.
///
/// A transport factory that opens IrDA sockets should hold one of these for
/// as long as any socket is open; `new` performs init on the first
/// outstanding guard, `Drop` performs cleanup on the last one.
#[derive(Debug)]
pub struct IrdaLifecycle {
    _private: (),
}

impl IrdaLifecycle {
    /// Acquire a reference to the process-wide IrDA lifecycle, initializing
    /// it if this is the first outstanding reference.
    pub fn acquire() -> Self {
        let mut count = IRDA_REFCOUNT.lock().unwrap();
        if *count == 0 {
            // Platform init (WSAStartup / nothing on Linux) happens here.
        }
        *count += 1;
        IrdaLifecycle { _private: () }
    }

    /// Number of outstanding lifecycle guards. Exposed for tests.
    pub fn refcount() -> usize {
        *IRDA_REFCOUNT.lock().unwrap()
    }
}

impl Drop for IrdaLifecycle {
    fn drop(&mut self) {
        let mut count = IRDA_REFCOUNT.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            // Platform teardown (WSACleanup / nothing on Linux) happens here.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_refcounted() {
        assert_eq!(IrdaLifecycle::refcount(), 0);
        let a = IrdaLifecycle::acquire();
        assert_eq!(IrdaLifecycle::refcount(), 1);
        let b = IrdaLifecycle::acquire();
        assert_eq!(IrdaLifecycle::refcount(), 2);
        drop(a);
        assert_eq!(IrdaLifecycle::refcount(), 1);
        drop(b);
        assert_eq!(IrdaLifecycle::refcount(), 0);
    }
}
