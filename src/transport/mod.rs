//! Transport primitives (§6) and the request/response framing shared by
//! every backend's "send a command, read an answer, verify it, retry on
//! recoverable failure" loop (§4.E).

pub mod hid;
pub mod irda;
pub mod serial;

pub use hid::UsbHidTransport;
pub use irda::{IrdaDevice, IrdaLifecycle, IrdaTransport};
pub use serial::{FlowControl, FlushQueue, LineSettings, Parity, SerialTransport};

use crate::device::Cancellation;
use crate::errors::{Error, Result};

/// Single-byte acknowledgement the Oceanic VTPro family (and others) send
/// after a successfully received command.
pub const ACK: u8 = 0x5A;

/// Single-byte negative-acknowledgement sent when a command was received
/// corrupted; the sender should resend.
pub const NAK: u8 = 0xA5;

/// Maximum number of times a single logical transfer is retried after a
/// recoverable (`Timeout`/`Protocol`) failure before the error is surfaced
/// to the caller.
pub const MAXRETRIES: u32 = 2;

/// Run `attempt` up to `MAXRETRIES + 1` times, retrying only on
/// [`Error::is_retryable`] errors, checking `cancellation` at the head of
/// every attempt.
///
/// This is the generic shape of `oceanic_vtpro_transfer` and
/// `suunto_common2_transfer` in the original source: both wrap a
/// family-specific exchange in an identical "retry on TIMEOUT/PROTOCOL,
/// bail on anything else" loop.
pub fn transfer_with_retry<T>(
    cancellation: &Cancellation,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut retries = 0;
    loop {
        cancellation.check()?;
        match attempt() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                if retries >= MAXRETRIES {
                    return Err(e);
                }
                retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write `command` in full to `port`, returning `Error::Io` on a short
/// write (there is no partial-write recovery at this layer).
pub fn write_command(port: &mut dyn SerialTransport, command: &[u8]) -> Result<()> {
    let n = port.write(command)?;
    if n != command.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "short write while sending command",
        )));
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes from `port`, distinguishing a
/// timeout-induced short read (`Error::Timeout`) from an EOF-induced one
/// (`Error::Io`).
pub fn read_exact(port: &mut dyn SerialTransport, buf: &mut [u8]) -> Result<()> {
    let n = port.read(buf)?;
    if n != buf.len() {
        return if port.last_read_was_timeout() {
            Err(Error::Timeout)
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read while receiving answer",
            )))
        };
    }
    Ok(())
}

/// Send `command`, then read and verify a single trailing `ACK`/`NAK` byte.
/// Used by the Oceanic VTPro family before reading the rest of an answer.
pub fn send_and_await_ack(port: &mut dyn SerialTransport, command: &[u8]) -> Result<()> {
    write_command(port, command)?;
    let mut response = [NAK];
    read_exact(port, &mut response)?;
    if response[0] != ACK {
        return Err(Error::Protocol("unexpected ACK/NAK byte".into()));
    }
    Ok(())
}

#[cfg(test)]
pub mod mock {
    //! An in-memory [`SerialTransport`] used by the engine tests in
    //! `oceanic`, `suunto` and `aladin` (component M, test tooling).

    use super::*;
    use std::collections::VecDeque;

    /// A scripted serial transport: each call to `expect_write` registers
    /// the bytes a caller must write next, paired with the bytes `read`
    /// should hand back afterwards (or a forced timeout).
    #[derive(Debug, Default)]
    pub struct ScriptedSerial {
        steps: VecDeque<Step>,
        pending_read: VecDeque<u8>,
        timed_out: bool,
    }

    #[derive(Debug)]
    enum Step {
        Expect { write: Vec<u8>, reply: Reply },
    }

    #[derive(Debug)]
    enum Reply {
        Bytes(Vec<u8>),
        Timeout,
    }

    impl ScriptedSerial {
        /// Create an empty script.
        pub fn new() -> Self {
            ScriptedSerial::default()
        }

        /// Queue an expectation: the next `write` must equal `write`
        /// exactly, after which `read` calls drain `reply`.
        pub fn expect(&mut self, write: &[u8], reply: &[u8]) -> &mut Self {
            self.steps.push_back(Step::Expect {
                write: write.to_vec(),
                reply: Reply::Bytes(reply.to_vec()),
            });
            self
        }

        /// Queue an expectation where the device never answers.
        pub fn expect_timeout(&mut self, write: &[u8]) -> &mut Self {
            self.steps.push_back(Step::Expect {
                write: write.to_vec(),
                reply: Reply::Timeout,
            });
            self
        }

        /// Pre-load bytes for `read` to hand back with no preceding
        /// `write`, for backends (Aladin) that receive unsolicited data.
        pub fn queue_bytes(&mut self, bytes: &[u8]) -> &mut Self {
            self.pending_read.extend(bytes.iter().copied());
            self
        }
    }

    impl SerialTransport for ScriptedSerial {
        fn configure(&mut self, _settings: LineSettings) -> Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout_ms: i32) -> Result<()> {
            Ok(())
        }

        fn set_dtr(&mut self, _level: bool) -> Result<()> {
            Ok(())
        }

        fn set_rts(&mut self, _level: bool) -> Result<()> {
            Ok(())
        }

        fn flush(&mut self, _queue: FlushQueue) -> Result<()> {
            Ok(())
        }

        fn sleep(&mut self, _ms: u32) {}

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.pending_read.is_empty() {
                return Ok(0);
            }
            let mut n = 0;
            for slot in buf.iter_mut() {
                match self.pending_read.pop_front() {
                    Some(b) => {
                        *slot = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn last_read_was_timeout(&self) -> bool {
            self.timed_out
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Expect { write, reply }) => {
                    assert_eq!(write, buf, "unexpected command written to mock transport");
                    self.timed_out = false;
                    match reply {
                        Reply::Bytes(bytes) => self.pending_read.extend(bytes),
                        Reply::Timeout => self.timed_out = true,
                    }
                    Ok(buf.len())
                }
                None => panic!("mock transport received unexpected write: {:?}", buf),
            }
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn retry_succeeds_within_budget() {
        let cancellation = Cancellation::new();
        let mut attempts = 0;
        let result: Result<()> = transfer_with_retry(&cancellation, || {
            attempts += 1;
            if attempts <= MAXRETRIES {
                Err(Error::Protocol("garbage".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(attempts, MAXRETRIES + 1);
    }

    #[test]
    fn retry_exhausts_budget() {
        let cancellation = Cancellation::new();
        let mut attempts = 0;
        let result: Result<()> = transfer_with_retry(&cancellation, || {
            attempts += 1;
            Err(Error::Timeout)
        });
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(attempts, MAXRETRIES + 1);
    }

    #[test]
    fn retry_observes_cancellation_before_first_attempt() {
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut attempts = 0;
        let result: Result<()> = transfer_with_retry(&cancellation, || {
            attempts += 1;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts, 0);
    }
}
