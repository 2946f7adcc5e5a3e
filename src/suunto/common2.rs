//! Suunto 2-family device driver (Vyper 2, Cobra 2, D9, …): half-duplex
//! serial framing plus the `Device` trait impl over the linked-list engine
//! in the parent module.
//!
//! Grounded on `suunto_common2_device_open`/`suunto_common2_transfer` in
//! `suunto_common2.c`: the line is half-duplex, so RTS is toggled to
//! switch between sending a command and receiving its answer.

use std::any::Any;

use log::debug;

use crate::device::{BackendId, Cancellation, Device, DiveCallback as DeviceDiveCallback};
use crate::errors::{Error, Result};
use crate::event::{Event, EventListener, NullListener};
use crate::suunto::{self, MemorySource, HEADER_ADDRESS};
use crate::transport::{transfer_with_retry, LineSettings, Parity, SerialTransport};

/// Identifier this family reports through [`Device::backend_id`].
pub const BACKEND_ID: BackendId = BackendId("suunto::common2");

const CMD_VERSION: u8 = 0x0F;
const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;

/// An open connection to a Suunto 2-family dive computer.
#[allow(missing_debug_implementations)]
pub struct Common2Device {
    port: Box<dyn SerialTransport>,
    model: u8,
    memory_size: u32,
    fingerprint: Vec<u8>,
    cancellation: Cancellation,
    listener: Box<dyn EventListener>,
}

impl Common2Device {
    /// Open `port`, apply the family's half-duplex line settings, and read
    /// the version block to discover the model byte.
    pub fn open(mut port: Box<dyn SerialTransport>, memory_size: u32) -> Result<Self> {
        port.configure(LineSettings {
            baud: 2400,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: crate::transport::FlowControl::None,
        })?;
        port.set_timeout(3_000)?;

        let cancellation = Cancellation::new();
        let mut version = [0u8; 4];
        transfer(&cancellation, &mut *port, CMD_VERSION, &[], &mut version)?;
        let model = version[0];
        debug!("suunto common2: opened, model=0x{:02x}", model);

        Ok(Common2Device {
            port,
            model,
            memory_size,
            fingerprint: Vec::new(),
            cancellation,
            listener: Box::new(NullListener),
        })
    }
}

/// Toggle RTS to switch direction, send `command ++ params`, then read
/// `out.len()` bytes back.
fn transfer(
    cancellation: &Cancellation,
    port: &mut dyn SerialTransport,
    command: u8,
    params: &[u8],
    out: &mut [u8],
) -> Result<()> {
    transfer_with_retry(cancellation, || {
        port.set_rts(true)?;
        let mut packet = Vec::with_capacity(1 + params.len());
        packet.push(command);
        packet.extend_from_slice(params);
        crate::transport::write_command(port, &packet)?;
        port.set_rts(false)?;
        crate::transport::read_exact(port, out)
    })
}

struct PortMemorySource<'a> {
    port: &'a mut dyn SerialTransport,
    cancellation: Cancellation,
}

impl<'a> MemorySource for PortMemorySource<'a> {
    fn read_bytes(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
        let params = [(address & 0xFF) as u8, ((address >> 8) & 0xFF) as u8];
        transfer(&self.cancellation, self.port, CMD_READ, &params, out)
    }
}

impl Device for Common2Device {
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
        self.memory_size
    }

    fn chunk_size(&self) -> u32 {
        suunto::SZ_PACKET
    }

    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        if !data.is_empty() && data.len() != suunto::FINGERPRINT_LEN {
            return Err(Error::Invalid("fingerprint has the wrong length".into()));
        }
        self.fingerprint = data.to_vec();
        Ok(())
    }

    fn read(&mut self, addr: u32, out: &mut [u8]) -> Result<()> {
        let params = [(addr & 0xFF) as u8, ((addr >> 8) & 0xFF) as u8];
        transfer(&self.cancellation, &mut *self.port, CMD_READ, &params, out)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut params = vec![(addr & 0xFF) as u8, ((addr >> 8) & 0xFF) as u8];
        params.extend_from_slice(data);
        transfer(&self.cancellation, &mut *self.port, CMD_WRITE, &params, &mut [])
    }

    fn foreach(&mut self, callback: &mut DeviceDiveCallback<'_>) -> Result<()> {
        let mut header = [0u8; 8];
        self.read(HEADER_ADDRESS, &mut header)?;

        let model = self.model;
        let memory_size = self.memory_size;
        let fingerprint = self.fingerprint.clone();
        let cancellation = self.cancellation.clone();
        let mut source = PortMemorySource {
            port: &mut *self.port,
            cancellation: cancellation.clone(),
        };
        suunto::foreach(&header, model, memory_size, &fingerprint, &cancellation, &mut source, callback)
    }

    fn close(&mut self) -> Result<()> {
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
    fn open_reads_model_byte_from_version_block() {
        let mut mock = ScriptedSerial::new();
        mock.expect(&[CMD_VERSION], &[0x15, 0x00, 0x00, 0x00]);
        let device = Common2Device::open(Box::new(mock), 0x4000).unwrap();
        assert_eq!(device.model, 0x15);
    }
}
