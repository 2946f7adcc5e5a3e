//! Aladin and Memomouse device drivers: preamble sync, whole-memory dump,
//! and the `Device` trait impl over the extraction engine in the parent
//! module.

use std::any::Any;

use log::warn;

use crate::aladin::{self, AladinFamily, Dive};
use crate::buffer::DynamicBuffer;
use crate::device::{BackendId, Cancellation, Device, DiveCallback};
use crate::errors::{Error, Result};
use crate::event::{Event, EventListener, NullListener, Progress};
use crate::transport::{FlowControl, LineSettings, Parity, SerialTransport};

/// Identifier the Aladin reports through [`Device::backend_id`].
pub const ALADIN_BACKEND_ID: BackendId = BackendId("aladin::aladin");
/// Identifier the Memomouse reports through [`Device::backend_id`].
pub const MEMOMOUSE_BACKEND_ID: BackendId = BackendId("aladin::memomouse");

/// Shared driver for both Aladin and Memomouse: the only difference
/// between the two backends is `family` and the reported `backend_id`.
#[allow(missing_debug_implementations)]
pub struct AladinDevice {
    port: Box<dyn SerialTransport>,
    family: AladinFamily,
    backend_id: BackendId,
    image: Vec<u8>,
    watermark: Option<u32>,
    cancellation: Cancellation,
    listener: Box<dyn EventListener>,
}

impl AladinDevice {
    /// Open `port` as an Aladin, applying its line settings.
    pub fn open_aladin(port: Box<dyn SerialTransport>) -> Result<Self> {
        Self::open(port, aladin::ALADIN, ALADIN_BACKEND_ID, 19200, true, false)
    }

    /// Open `port` as a Memomouse, applying its line settings.
    pub fn open_memomouse(port: Box<dyn SerialTransport>) -> Result<Self> {
        Self::open(port, aladin::MEMOMOUSE, MEMOMOUSE_BACKEND_ID, 19200, true, false)
    }

    fn open(
        mut port: Box<dyn SerialTransport>,
        family: AladinFamily,
        backend_id: BackendId,
        baud: u32,
        dtr: bool,
        rts: bool,
    ) -> Result<Self> {
        port.configure(LineSettings {
            baud,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        })?;
        port.set_dtr(dtr)?;
        port.set_rts(rts)?;
        port.set_timeout(3_000)?;

        Ok(AladinDevice {
            port,
            family,
            backend_id,
            image: Vec::new(),
            watermark: None,
            cancellation: Cancellation::new(),
            listener: Box::new(NullListener),
        })
    }

    /// Set the timestamp watermark (§4.H): traversal stops as soon as a
    /// dive's timestamp is at or below this value.
    pub fn set_timestamp_watermark(&mut self, watermark: Option<u32>) {
        self.watermark = watermark;
    }

    /// Synchronise on the preamble, then read a fixed-size image.
    ///
    /// Grounded on `uwatec_aladin_device_dump` in `uwatec_aladin.c`: the
    /// device streams `0x55` bytes until it is ready, followed by a single
    /// `0x00`; a false start (scenario 6) is any other byte seen before
    /// that `0x00`, which resets the match and emits a `Waiting` event.
    fn sync_preamble(&mut self) -> Result<()> {
        let mut run = 0usize;
        loop {
            self.cancellation.check()?;
            let mut byte = [0u8];
            crate::transport::read_exact(&mut *self.port, &mut byte)?;
            match byte[0] {
                0x55 => run += 1,
                0x00 if run >= 3 => return Ok(()),
                _ => {
                    if run > 0 {
                        warn!("aladin: preamble false start, resynchronising");
                        self.listener.on_event(Event::Waiting);
                    }
                    run = 0;
                }
            }
        }
    }
}

impl Device for AladinDevice {
    fn backend_id(&self) -> BackendId {
        self.backend_id
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
        self.family.image_size as u32
    }

    fn chunk_size(&self) -> u32 {
        self.family.image_size as u32
    }

    fn set_fingerprint(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            self.watermark = None;
            return Ok(());
        }
        if data.len() != 4 {
            return Err(Error::Invalid("Aladin fingerprint must be a 4-byte timestamp".into()));
        }
        self.watermark = Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
        Ok(())
    }

    fn dump(&mut self, buffer: &mut DynamicBuffer) -> Result<()> {
        self.sync_preamble()?;
        let mut raw = vec![0u8; self.family.image_size];
        crate::transport::read_exact(&mut *self.port, &mut raw)?;
        aladin::validate_dump(&self.family, &mut raw)?;

        let mut listener_events = Vec::new();
        aladin::emit_clock_sample(&raw, 0, &mut |e| listener_events.push(e));
        for event in listener_events {
            self.listener.on_event(event);
        }
        self.listener.on_event(Event::Progress(Progress {
            current: raw.len() as u32,
            maximum: raw.len() as u32,
        }));

        self.image = raw.clone();
        buffer.clear();
        buffer.append(&raw)?;
        Ok(())
    }

    fn foreach(&mut self, callback: &mut DiveCallback<'_>) -> Result<()> {
        if self.image.is_empty() {
            let mut scratch = DynamicBuffer::new(self.family.image_size);
            self.dump(&mut scratch)?;
        }
        let image = self.image.clone();
        let cancellation = self.cancellation.clone();
        let watermark = self.watermark;
        aladin::extract_dives(&image, &cancellation, watermark, &mut |dive: &Dive| {
            callback(&dive.as_bytes(), &dive.timestamp.to_le_bytes())
        })
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
    fn preamble_resynchronises_after_false_start() {
        let mut mock = ScriptedSerial::new();
        mock.queue_bytes(&[0x55, 0x55, 0x12, 0x55, 0x55, 0x55, 0x00]);
        let mut device = AladinDevice::open_aladin(Box::new(mock)).unwrap();
        assert!(device.sync_preamble().is_ok());
    }
}
