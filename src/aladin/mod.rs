//! Uwatec Aladin / Memomouse engine (§4.H): a single-shot whole-memory
//! dump followed by a post-hoc scan that reconstructs individual dives out
//! of a 37-slot logbook and a profile ring embedded in the same image.
//!
//! Aladin and Memomouse share this extraction shape (`extract_dives` in
//! the original source); they differ only in how the image reaches the
//! host (self-clocked preamble vs. a host-initiated handshake) and in
//! whether the payload needs bit-reversal, captured here as an
//! [`AladinFamily`] descriptor.

pub mod device;

use crate::device::Cancellation;
use crate::errors::{Error, Result};
use crate::event::{ClockSample, Event};
use crate::primitives::{reverse_bits, reverse_bytes, sum16};

/// Magic byte sequence the Aladin sends before a dump; the self-clocked
/// preamble sync (concrete scenario 6) watches for this exact run.
pub const PREAMBLE: [u8; 4] = [0x55, 0x55, 0x55, 0x00];

/// Number of logbook slots in the image; `ndives` is clamped to this even
/// though the field is documented as buggy (§9 open questions).
pub const MAX_DIVES: usize = 37;

const LOGBOOK_OFFSET: usize = 0x0000;
const LOGBOOK_SLOT_SIZE: usize = 0x2F;
const NDIVES_OFFSET: usize = LOGBOOK_OFFSET + MAX_DIVES * LOGBOOK_SLOT_SIZE;
const EOL_OFFSET: usize = NDIVES_OFFSET + 1;
const EOP_OFFSET: usize = EOL_OFFSET + 1;
const PROFILE_OFFSET: usize = EOP_OFFSET + 2;

/// Checksum flavour a family's dump trailer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Trailing little-endian `sum16` over the payload.
    Sum16,
}

/// Per-family geometry and quirks shared by the Aladin/Memomouse
/// extraction logic.
#[derive(Debug, Clone, Copy)]
pub struct AladinFamily {
    /// Total image size, including the trailing checksum.
    pub image_size: usize,
    /// Whether the payload arrives bit-reversed (Aladin: yes, Memomouse: no).
    pub bit_reverse: bool,
    /// Checksum flavour validating the dump.
    pub checksum: ChecksumKind,
}

/// The Aladin proper: self-clocked preamble, bit-reversed payload.
pub const ALADIN: AladinFamily = AladinFamily {
    image_size: 2050,
    bit_reverse: true,
    checksum: ChecksumKind::Sum16,
};

/// Memomouse: host-initiated handshake, payload already in normal bit order.
pub const MEMOMOUSE: AladinFamily = AladinFamily {
    image_size: 2050,
    bit_reverse: false,
    checksum: ChecksumKind::Sum16,
};

/// One reconstructed dive: header fields plus its profile bytes.
#[derive(Debug, Clone)]
pub struct Dive {
    /// Device serial number, read from the image header.
    pub serial: u32,
    /// Dive/mode type byte from the logbook slot.
    pub dive_type: u8,
    /// Raw logbook slot bytes for this dive.
    pub logbook: Vec<u8>,
    /// Profile bytes for this dive, oldest-to-newest within the dive.
    pub profile: Vec<u8>,
    /// Dive timestamp, already converted from the device's big-endian
    /// on-the-wire representation to a little-endian in-memory value.
    pub timestamp: u32,
}

impl Dive {
    /// Concatenate `[logbook || profile]`, the shape handed to a
    /// [`crate::device::DiveCallback`].
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = self.logbook.clone();
        out.extend_from_slice(&self.profile);
        out
    }
}

/// Verify and, for bit-reversed families, normalise a freshly received
/// dump in place. `raw` must be exactly `family.image_size` bytes,
/// trailing `sum16` included.
pub fn validate_dump(family: &AladinFamily, raw: &mut [u8]) -> Result<()> {
    if raw.len() != family.image_size {
        return Err(Error::Protocol("unexpected Aladin/Memomouse dump length".into()));
    }
    if family.bit_reverse {
        reverse_bits(raw);
    }
    let (payload, trailer) = raw.split_at(raw.len() - 2);
    let expected = sum16(payload, 0);
    let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
    match family.checksum {
        ChecksumKind::Sum16 if expected != actual => {
            Err(Error::Protocol("Aladin/Memomouse dump checksum mismatch".into()))
        }
        ChecksumKind::Sum16 => Ok(()),
    }
}

/// Decode the device-clock counter embedded in the payload and emit a
/// [`Event::Clock`] sample pairing it with the host time at which the
/// preamble completed.
pub fn emit_clock_sample(image: &[u8], host_ticks: i64, emit: &mut dyn FnMut(Event)) {
    let device_ticks = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
    emit(Event::Clock(ClockSample {
        host_ticks,
        device_ticks,
    }));
}

/// Walk the `ndives`-slot logbook newest-to-oldest, assembling each dive's
/// profile out of the ring at `PROFILE_OFFSET..eop`, and call `sink` for
/// each one until `watermark` (if any) is reached.
///
/// `watermark` mirrors the caller-supplied timestamp in §4.H: traversal
/// stops, without error, once a dive's timestamp is `<= watermark`.
pub fn extract_dives(
    image: &[u8],
    cancellation: &Cancellation,
    watermark: Option<u32>,
    sink: &mut dyn FnMut(&Dive) -> bool,
) -> Result<()> {
    let ndives = (image[NDIVES_OFFSET] as usize).min(MAX_DIVES);
    let eol = image[EOL_OFFSET] as usize % MAX_DIVES.max(1);
    let eop = u16::from_le_bytes([image[EOP_OFFSET], image[EOP_OFFSET + 1]]) as usize;
    let profile_ring = &image[PROFILE_OFFSET..];
    let profile_len = profile_ring.len();

    let mut cursor = eop;
    for i in 0..ndives {
        cancellation.check()?;
        let slot = (eol + MAX_DIVES - i) % MAX_DIVES;
        let logbook = image[LOGBOOK_OFFSET + slot * LOGBOOK_SLOT_SIZE
            ..LOGBOOK_OFFSET + (slot + 1) * LOGBOOK_SLOT_SIZE]
            .to_vec();

        // Search backward from `cursor` for the 0xFF start marker that
        // delimits this dive's profile within the ring.
        let mut start = cursor;
        let mut len = 0usize;
        loop {
            if len >= profile_len {
                return Err(Error::Protocol(
                    "Aladin profile ring has no 0xFF start marker".into(),
                ));
            }
            let probe = (start + profile_len - 1) % profile_len;
            if profile_ring[probe] == 0xFF {
                start = probe;
                break;
            }
            start = probe;
            len += 1;
        }

        let mut profile = Vec::with_capacity(len);
        let mut p = (start + 1) % profile_len;
        while p != cursor {
            profile.push(profile_ring[p]);
            p = (p + 1) % profile_len;
        }

        let mut timestamp_be = [logbook[2], logbook[3], logbook[4], logbook[5]];
        reverse_bytes(&mut timestamp_be);
        let timestamp = u32::from_le_bytes(timestamp_be);

        if let Some(watermark) = watermark {
            if timestamp <= watermark {
                return Ok(());
            }
        }

        let dive = Dive {
            serial: u32::from_le_bytes([image[0], image[1], image[2], image[3]]),
            dive_type: logbook[0],
            logbook,
            profile,
            timestamp,
        };

        if !sink(&dive) {
            return Ok(());
        }

        cursor = start;
    }

    Ok(())
}
