//! Oceanic VTPro-family device driver: command framing, model
//! identification and the `Device` trait impl, layered over the pure
//! traversal engine in the parent module.
//!
//! Grounded on `oceanic_vtpro_device_open`/`oceanic_vtpro_transfer` in
//! `oceanic_vtpro.c`: a packet is `command ++ params`, answered with a
//! single `ACK`/`NAK` byte followed (for read commands) by the requested
//! bytes and a trailing nibble-sum checksum byte.

use std::any::Any;

use log::{debug, warn};

use crate::device::{BackendId, Cancellation, Device, DiveCallback as DeviceDiveCallback};
use crate::errors::{Error, Result};
use crate::event::{Event, EventListener, NullListener};
use crate::oceanic::{self, MemoryLayout, PageSource, PtModeGlobal, PtModeLogbook};
use crate::primitives::{pattern_match, sum_nibbles, u16_le, Ring};
use crate::transport::{transfer_with_retry, LineSettings, Parity, SerialTransport};

/// Identifier this family reports through [`Device::backend_id`].
pub const BACKEND_ID: BackendId = BackendId("oceanic::vtpro");

const CMD_INIT: u8 = 0x55;
const CMD_QUIT: u8 = 0x98;
const CMD_VERSION: u8 = 0x72;
const CMD_READ: u8 = 0xB1;
const CMD_CALIBRATE: u8 = 0x18;
const ANSWER_SIZE: usize = 16;
const PAGE_SIZE: u32 = 0x10;
const NORMAL_TIMEOUT_MS: i32 = 3_000;
const CALIBRATION_TIMEOUT_MS: i32 = 9_000;

/// Known VTPro-family model identities, matched against the 16-byte
/// concatenation of the two identification pages (`'\0'` wildcards per the
/// open question in SPEC_FULL.md §9).
struct ModelSpec {
    pattern: &'static [u8; ANSWER_SIZE],
    layout: MemoryLayout,
}

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        pattern: b"VTPRO\0\0r\0\0\0\0\0\0\0\0",
        layout: MemoryLayout {
            logbook: Ring::new(0x0240, 0x0440),
            profile: Ring::new(0x0440, 0x8000),
            page_size: PAGE_SIZE,
            multipage: 8,
            pt_mode_global: PtModeGlobal::FirstLast,
            pt_mode_logbook: PtModeLogbook::Packed12,
            memory_size: 0x8000,
        },
    },
    ModelSpec {
        pattern: b"VERSA\0\0r\0\0\0\0\0\0\0\0",
        layout: MemoryLayout {
            logbook: Ring::new(0x0240, 0x0440),
            profile: Ring::new(0x0440, 0x10000),
            page_size: PAGE_SIZE,
            multipage: 8,
            pt_mode_global: PtModeGlobal::BeginEnd,
            pt_mode_logbook: PtModeLogbook::Padded16,
            memory_size: 0x10000,
        },
    },
];

/// An open connection to an Oceanic VTPro-family dive computer.
#[allow(missing_debug_implementations)]
pub struct VtproDevice {
    port: Box<dyn SerialTransport>,
    layout: MemoryLayout,
    fingerprint: Vec<u8>,
    cancellation: Cancellation,
    listener: Box<dyn EventListener>,
}

impl VtproDevice {
    /// Open `port`, apply the family's line settings, and identify the
    /// concrete model from its two identification pages.
    pub fn open(mut port: Box<dyn SerialTransport>) -> Result<Self> {
        port.configure(LineSettings {
            baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: crate::transport::FlowControl::None,
        })?;
        port.set_dtr(true)?;
        port.set_rts(true)?;
        port.sleep(100);
        port.set_timeout(NORMAL_TIMEOUT_MS)?;

        let cancellation = Cancellation::new();
        let mut identity = [0u8; ANSWER_SIZE];
        transfer_with_retry(&cancellation, || {
            Self::transfer_raw(&mut *port, CMD_INIT, &[], &mut identity[..8])
        })?;
        transfer_with_retry(&cancellation, || {
            Self::transfer_raw(&mut *port, CMD_VERSION, &[], &mut identity[8..])
        })?;

        let model = MODELS
            .iter()
            .find(|m| pattern_match(m.pattern, &identity))
            .ok_or_else(|| Error::Protocol("unrecognised VTPro-family identity string".into()))?;

        debug!("oceanic vtpro: identified model, memsize={}", model.layout.memory_size);

        Ok(VtproDevice {
            port,
            layout: model.layout,
            fingerprint: Vec::new(),
            cancellation,
            listener: Box::new(NullListener),
        })
    }

    /// Run one command/answer exchange: write `command ++ params`, await
    /// `ACK`, read `out.len()` bytes plus a trailing checksum byte and
    /// verify it.
    fn transfer_raw(port: &mut dyn SerialTransport, command: u8, params: &[u8], out: &mut [u8]) -> Result<()> {
        let mut packet = Vec::with_capacity(1 + params.len());
        packet.push(command);
        packet.extend_from_slice(params);
        crate::transport::write_command(port, &packet)?;

        let mut ack = [0u8];
        crate::transport::read_exact(port, &mut ack)?;
        if ack[0] != crate::transport::ACK {
            warn!("oceanic vtpro: device answered with NAK");
            return Err(Error::Protocol("device answered with NAK".into()));
        }

        crate::transport::read_exact(port, out)?;
        let mut checksum = [0u8];
        crate::transport::read_exact(port, &mut checksum)?;
        if sum_nibbles(out, 0) != checksum[0] {
            return Err(Error::Protocol("checksum mismatch in VTPro answer".into()));
        }
        Ok(())
    }

    fn pointers(&mut self) -> Result<(u16, u16)> {
        let mut page = [0u8; ANSWER_SIZE];
        let cancellation = self.cancellation.clone();
        let port = &mut *self.port;
        transfer_with_retry(&cancellation, || {
            Self::transfer_raw(port, CMD_READ, &[0x04], &mut page)
        })?;
        Ok((u16_le(&page[0..2]), u16_le(&page[2..4])))
    }

    /// Run the device's pressure-sensor calibration cycle.
    ///
    /// Calibration takes longer than a normal command round-trip, so the
    /// read timeout is raised for its duration and restored on every exit
    /// path (§5 "Timeouts").
    pub fn calibrate(&mut self) -> Result<()> {
        self.port.set_timeout(CALIBRATION_TIMEOUT_MS)?;
        let result = transfer_with_retry(&self.cancellation.clone(), || {
            Self::transfer_raw(&mut *self.port, CMD_CALIBRATE, &[], &mut [])
        });
        self.port.set_timeout(NORMAL_TIMEOUT_MS)?;
        result
    }
}

struct PortPageSource<'a> {
    port: &'a mut dyn SerialTransport,
    cancellation: Cancellation,
}

impl<'a> PageSource for PortPageSource<'a> {
    fn read_page(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        let cancellation = self.cancellation.clone();
        let port = &mut *self.port;
        let params = [(address & 0xFF) as u8, ((address >> 8) & 0xFF) as u8];
        transfer_with_retry(&cancellation, || {
            VtproDevice::transfer_raw(port, CMD_READ, &params, out)
        })
    }
}

impl Device for VtproDevice {
    fn backend_id(&self) -> BackendId {
        BACKEND_ID
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    fn set_listener(&mut self, listener: Box<dyn EventListener>) {
        self.listener = listener;
    }

    fn memory_size(&self) -> u32 {
        self.layout.memory_size
    }

    fn chunk_size(&self) -> u32 {
        self.layout.page_size * self.layout.multipage
    }

    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        if !data.is_empty() && data.len() as u32 != self.layout.page_size / 2 {
            return Err(Error::Invalid("fingerprint has the wrong length".into()));
        }
        self.fingerprint = data.to_vec();
        Ok(())
    }

    fn read(&mut self, addr: u32, out: &mut [u8]) -> Result<()> {
        let cancellation = self.cancellation.clone();
        let params = [(addr & 0xFF) as u8, ((addr >> 8) & 0xFF) as u8];
        let port = &mut *self.port;
        transfer_with_retry(&cancellation, || {
            VtproDevice::transfer_raw(port, CMD_READ, &params, out)
        })
    }

    fn foreach(&mut self, callback: &mut DeviceDiveCallback<'_>) -> Result<()> {
        let (first, last) = self.pointers()?;
        let layout = self.layout;
        let fingerprint = self.fingerprint.clone();
        let cancellation = self.cancellation.clone();
        let mut source = PortPageSource {
            port: &mut *self.port,
            cancellation: cancellation.clone(),
        };
        oceanic::foreach(&layout, first, last, &fingerprint, &cancellation, &mut source, callback)
    }

    fn close(&mut self) -> Result<()> {
        let _ = crate::transport::write_command(&mut *self.port, &[CMD_QUIT]);
        self.port.close()
    }

    fn cancel(&self) {
        self.cancellation.cancel();
    }

    fn emit(&mut self, event: Event) {
        self.listener.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedSerial;

    #[test]
    fn model_patterns_have_expected_length() {
        for model in MODELS {
            assert_eq!(model.pattern.len(), ANSWER_SIZE);
        }
    }

    #[test]
    fn open_rejects_unrecognised_identity() {
        let garbage = [0xAAu8; 8];
        let checksum = sum_nibbles(&garbage, 0);
        let mut init_answer = vec![crate::transport::ACK];
        init_answer.extend_from_slice(&garbage);
        init_answer.push(checksum);
        let mut version_answer = vec![crate::transport::ACK];
        version_answer.extend_from_slice(&garbage);
        version_answer.push(checksum);

        let mut mock = ScriptedSerial::new();
        mock.expect(&[CMD_INIT], &init_answer)
            .expect(&[CMD_VERSION], &version_answer);

        let result = VtproDevice::open(Box::new(mock));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
