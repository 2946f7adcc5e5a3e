//! The polymorphic device surface every backend implements, and the
//! cancellation flag shared between a device and whatever thread calls
//! `cancel()` on it.
//!
//! The source models backends with a C vtable (`device_backend_t`) plus a
//! pointer-equality "is this my backend" guard before every method body.
//! Per the design notes, this is modeled here as a capability-set trait
//! (`Device`) dispatched by the Rust type system for ordinary calls, and an
//! opaque `BackendId` token (compared, never downcast through a pointer
//! cast) for the handful of backend-specific extension functions — e.g.
//! `oceanic::vtpro::keepalive` — that take a type-erased `&mut dyn Device`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::DynamicBuffer;
use crate::errors::{Error, Result};
use crate::event::{Event, EventListener};

/// Opaque identity token naming a concrete backend. Two devices compare
/// equal under this token iff they were produced by the same `open(...)`
/// family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendId(pub &'static str);

/// Cancellation flag shared between a device and any thread that wants to
/// abort it. This is the only piece of state in the crate that is visible
/// across threads; every long-running loop checks it at its head.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Create a fresh, not-yet-cancelled flag.
    pub fn new() -> Self {
        Cancellation(Arc::new(AtomicBool::new(false)))
    }

    /// Set the flag. Safe to call from any thread, at any time.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once `cancel()` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(Error::Cancelled)` if the flag is set, otherwise `Ok(())`.
    /// Call at the head of every retry/page/poll loop.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// `(raw dive bytes, fingerprint bytes)` handed to a `foreach` sink for each
/// dive, newest first. Returning `false` stops the traversal early (without
/// being an error).
pub type DiveCallback<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

/// The operations common to every dive-computer backend.
///
/// Only `set_fingerprint`, `foreach` and `close` are mandatory; `version`,
/// `read` and `write` default to `Err(Error::Unsupported)` exactly as the
/// source's vtable entries default to `NULL` for backends that don't
/// support them (e.g. Aladin has no addressable `read`/`write`, only a
/// whole-memory `dump`).
pub trait Device {
    /// Identity token for this backend, used by extension functions that
    /// need to verify a type-erased handle before downcasting.
    fn backend_id(&self) -> BackendId;

    /// Upcast to `Any` so backend-specific extension functions can
    /// `downcast_mut` after checking [`Device::backend_id`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// This device's cancellation flag.
    fn cancellation(&self) -> &Cancellation;

    /// Replace the event listener used for progress/devinfo/clock/wait
    /// notifications.
    fn set_listener(&mut self, listener: Box<dyn EventListener>);

    /// Total size, in bytes, of the device's flat memory image. Used by the
    /// default `dump` driver; backends without an addressable memory image
    /// (none currently) would return 0 and override `dump` instead.
    fn memory_size(&self) -> u32;

    /// Preferred chunk size, in bytes, for successive `read` calls inside
    /// the default `dump` driver.
    fn chunk_size(&self) -> u32;

    /// Seed the fingerprint used to cut off `foreach` traversal early.
    /// `data` must be empty (clears the fingerprint) or exactly the
    /// backend's fingerprint length; anything else is `Error::Invalid`.
    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()>;

    /// Read the backend's version/identification block into `out`.
    fn version(&mut self, out: &mut [u8]) -> Result<()> {
        let _ = out;
        Err(Error::Unsupported)
    }

    /// Read `out.len()` bytes starting at the flat address `addr`.
    fn read(&mut self, addr: u32, out: &mut [u8]) -> Result<()> {
        let _ = (addr, out);
        Err(Error::Unsupported)
    }

    /// Write `data` starting at the flat address `addr`.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let _ = (addr, data);
        Err(Error::Unsupported)
    }

    /// Fill `buffer` with the entire memory image.
    ///
    /// The default implementation repeatedly calls `read` with
    /// `chunk_size()`-sized requests until `memory_size()` is covered,
    /// emitting a `Progress` event after each chunk. Backends whose dump is
    /// not a simple `read` loop (Aladin, Memomouse) override this.
    fn dump(&mut self, buffer: &mut DynamicBuffer) -> Result<()> {
        let size = self.memory_size();
        let chunk = self.chunk_size();
        buffer.clear();
        buffer.resize(size as usize)?;

        let mut offset = 0u32;
        while offset < size {
            self.cancellation().check()?;
            let len = chunk.min(size - offset);
            let (_, tail) = buffer.get_data_mut().split_at_mut(offset as usize);
            let (dst, _) = tail.split_at_mut(len as usize);
            self.read(offset, dst)?;
            offset += len;
            self.emit(Event::Progress(crate::event::Progress {
                current: offset,
                maximum: size,
            }));
        }
        Ok(())
    }

    /// Stream every new dive (newest first) to `callback`, stopping early
    /// and returning `Ok(())` if `callback` returns `false`.
    fn foreach(&mut self, callback: &mut DiveCallback<'_>) -> Result<()>;

    /// Release the transport and any internal buffers. Always releases
    /// resources, even if a previous operation returned an error.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the cancellation flag, causing any in-flight or subsequent
    /// blocking operation to return `Error::Cancelled`.
    fn cancel(&self) {
        self.cancellation().cancel();
    }

    /// Emit an event to the current listener, if any.
    fn emit(&mut self, event: Event);
}

/// Downcast a type-erased device handle to a concrete backend, verifying
/// `backend_id()` first instead of relying on `Any`'s `TypeId` alone — two
/// backends compiled against different versions of the same type could
/// otherwise collide, and this keeps the failure mode identical to the
/// source's pointer-equality guard (`Error::TypeMismatch`, not a panic).
pub fn downcast_mut<'a, T: Device + 'static>(
    device: &'a mut dyn Device,
    expected: BackendId,
) -> Result<&'a mut T> {
    if device.backend_id() != expected {
        return Err(Error::TypeMismatch);
    }
    device
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or(Error::TypeMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_visible_across_clones() {
        let flag = Cancellation::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());
        clone.cancel();
        assert!(matches!(flag.check(), Err(Error::Cancelled)));
    }
}
