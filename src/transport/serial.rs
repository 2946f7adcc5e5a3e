//! Serial port primitives required from a collaborator.
//!
//! The crate defines this trait and ships no OS binding for it — opening an
//! actual `/dev/ttyUSB0` or `COM3` is out of scope (§1 Non-goals); callers
//! (or the `tests` mock) supply an implementation.

use crate::errors::Result;

/// Parity setting for a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Flow control setting for a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No hardware or software flow control.
    None,
    /// XON/XOFF software flow control.
    XonXoff,
    /// RTS/CTS hardware flow control.
    RtsCts,
}

/// Which queue(s) `flush` should discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushQueue {
    /// The input (receive) queue only.
    Input,
    /// The output (transmit) queue only.
    Output,
    /// Both queues.
    Both,
}

/// Line settings applied at `open` time, per §6's per-family baud/line
/// defaults table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate, in bits per second.
    pub baud: u32,
    /// Number of data bits (typically 8).
    pub data_bits: u8,
    /// Parity setting.
    pub parity: Parity,
    /// Number of stop bits (typically 1).
    pub stop_bits: u8,
    /// Flow control setting.
    pub flow_control: FlowControl,
}

/// A half-duplex or full-duplex serial transport.
///
/// `read`/`write` return the number of bytes actually transferred; a short
/// read caused by a timeout is distinguished from one caused by the peer
/// closing the connection via [`SerialTransport::last_read_was_timeout`].
pub trait SerialTransport {
    /// Apply `settings` to the already-open port.
    fn configure(&mut self, settings: LineSettings) -> Result<()>;

    /// Set the read timeout, in milliseconds. A negative value blocks
    /// forever.
    fn set_timeout(&mut self, timeout_ms: i32) -> Result<()>;

    /// Assert or deassert the DTR line.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Assert or deassert the RTS line.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Discard buffered bytes in `queue`.
    fn flush(&mut self, queue: FlushQueue) -> Result<()>;

    /// Block the calling thread for `ms` milliseconds.
    fn sleep(&mut self, ms: u32);

    /// Read up to `buf.len()` bytes, returning the number read. Returns
    /// fewer than `buf.len()` on timeout; see
    /// [`SerialTransport::last_read_was_timeout`] to distinguish that from
    /// EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// True if the most recent short `read` was caused by the configured
    /// timeout elapsing, rather than the peer closing the connection.
    fn last_read_was_timeout(&self) -> bool;

    /// Write `buf`, returning the number of bytes actually written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Release the port.
    fn close(&mut self) -> Result<()>;
}
