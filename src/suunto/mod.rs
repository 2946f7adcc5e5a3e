//! Suunto 2-family ring-buffer engine (§4.G): a doubly linked list of dive
//! blocks stored contiguously in the profile ring, walked newest-first from
//! a header pointer.

pub mod common2;

use crate::device::Cancellation;
use crate::errors::{Error, Result};
use crate::primitives::u16_le;

/// Header layout, fixed at address `0x0190` in every Suunto 2-family
/// memory image.
pub const HEADER_ADDRESS: u32 = 0x0190;
/// `[RB_PROFILE_BEGIN, RB_PROFILE_END)` lower bound.
pub const PROFILE_BEGIN: u32 = 0x019A;
/// Maximum bytes requested per transport read.
pub const SZ_PACKET: u32 = 0x78;
/// Minimum read size some firmware requires even when fewer bytes remain.
pub const SZ_MINIMUM: u32 = 8;
/// Default fingerprint offset within a dive block.
pub const FP_OFFSET: u32 = 0x15;
/// Fingerprint length, per `suunto_common2.c`.
pub const FINGERPRINT_LEN: usize = 5;

/// Reads raw bytes out of the device's flat memory image, backed by the
/// real transport in `common2` and by a byte slice in tests.
pub trait MemorySource {
    /// Read `out.len()` bytes starting at flat address `address`.
    fn read_bytes(&mut self, address: u32, out: &mut [u8]) -> Result<()>;
}

/// `(dive block bytes, fingerprint bytes)` newest-first, per dive.
pub type DiveCallback<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

/// Parsed `(last, count, end, begin)` header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Address of the newest dive block.
    pub last: u16,
    /// Number of dive blocks currently stored.
    pub count: u16,
    /// End of the profile ring's occupied region.
    pub end: u16,
    /// Start of the profile ring's occupied region.
    pub begin: u16,
}

impl Header {
    fn parse(bytes: &[u8; 8]) -> Self {
        Header {
            last: u16_le(&bytes[0..2]),
            count: u16_le(&bytes[2..4]),
            end: u16_le(&bytes[4..6]),
            begin: u16_le(&bytes[6..8]),
        }
    }
}

/// Model-dependent fingerprint offset: `FP_OFFSET`, shifted by 6 for
/// model `0x15`.
pub fn fingerprint_offset(model: u8) -> u32 {
    if model == 0x15 {
        FP_OFFSET + 6
    } else {
        FP_OFFSET
    }
}

/// Walk the linked list starting at `header.last`, following `prev`
/// pointers, calling `sink` newest-first.
///
/// Each block is stored contiguously with the next-newer one, so its
/// length falls directly out of the continuity check: a block's `next`
/// field names the address of the block processed immediately before it
/// (or `header.end` for the newest block), and that address minus the
/// block's own start is its length.
///
/// Grounded on `suunto_common2_device_foreach` in `suunto_common2.c`.
pub fn foreach(
    header_bytes: &[u8; 8],
    model: u8,
    memory_size: u32,
    fingerprint: &[u8],
    cancellation: &Cancellation,
    source: &mut dyn MemorySource,
    sink: &mut DiveCallback<'_>,
) -> Result<()> {
    let header = Header::parse(header_bytes);
    let profile_end = memory_size - 2;
    let fp_offset = fingerprint_offset(model) as usize;

    let mut remaining = header.count;
    let mut next_expected = header.end as u32;
    let mut current = header.last as u32;

    while remaining > 0 {
        cancellation.check()?;
        if !(PROFILE_BEGIN..profile_end).contains(&current) {
            return Err(Error::Protocol("suunto dive pointer out of range".into()));
        }

        let head_len = SZ_MINIMUM.max(4);
        let mut head = vec![0u8; head_len as usize];
        source.read_bytes(current, &mut head)?;
        let prev = u16_le(&head[0..2]);
        let next = u16_le(&head[2..4]);

        if next as u32 != next_expected {
            return Err(Error::Protocol(
                "suunto dive block continuity check failed".into(),
            ));
        }

        let block_len = if next as u32 >= current {
            next as u32 - current
        } else {
            (profile_end - current) + (next as u32 - PROFILE_BEGIN)
        };

        let mut block = vec![0u8; block_len as usize];
        let mut filled = head_len.min(block_len);
        block[..filled as usize].copy_from_slice(&head[..filled as usize]);
        let mut addr = current + filled;
        while filled < block_len {
            cancellation.check()?;
            if addr >= profile_end {
                addr = PROFILE_BEGIN + (addr - profile_end);
            }
            let len = SZ_PACKET.min(block_len - filled);
            source.read_bytes(addr, &mut block[filled as usize..(filled + len) as usize])?;
            filled += len;
            addr += len;
        }

        if !fingerprint.is_empty()
            && fp_offset + fingerprint.len() <= block.len()
            && block[fp_offset..fp_offset + fingerprint.len()] == *fingerprint
        {
            return Ok(());
        }

        let fp_out = if fp_offset + FINGERPRINT_LEN <= block.len() {
            block[fp_offset..fp_offset + FINGERPRINT_LEN].to_vec()
        } else {
            Vec::new()
        };
        if !sink(&block, &fp_out) {
            return Ok(());
        }

        next_expected = current;
        current = prev as u32;
        remaining -= 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SliceSource {
        image: Vec<u8>,
    }

    impl MemorySource for SliceSource {
        fn read_bytes(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
            let start = address as usize;
            out.copy_from_slice(&self.image[start..start + out.len()]);
            Ok(())
        }
    }

    fn block(prev: u16, next: u16, len: usize) -> Vec<u8> {
        let mut b = vec![0x00u8; len];
        b[0..2].copy_from_slice(&prev.to_le_bytes());
        b[2..4].copy_from_slice(&next.to_le_bytes());
        b
    }

    #[test]
    fn walks_three_chained_dives_newest_first() {
        let addr_c = PROFILE_BEGIN as u16; // oldest, len 0x80
        let addr_b = addr_c + 0x80; // len 0x120
        let addr_a = addr_b + 0x120; // newest, len 0x260
        let header_end = addr_a + 0x260;

        let mut image = vec![0u8; (header_end as u32 + 2) as usize];
        let a = block(addr_b, header_end, 0x260);
        let b = block(addr_c, addr_a, 0x120);
        let c = block(addr_c, addr_b, 0x80);

        image[addr_a as usize..addr_a as usize + a.len()].copy_from_slice(&a);
        image[addr_b as usize..addr_b as usize + b.len()].copy_from_slice(&b);
        image[addr_c as usize..addr_c as usize + c.len()].copy_from_slice(&c);

        let mut header = [0u8; 8];
        header[0..2].copy_from_slice(&addr_a.to_le_bytes());
        header[2..4].copy_from_slice(&3u16.to_le_bytes());
        header[4..6].copy_from_slice(&header_end.to_le_bytes());
        header[6..8].copy_from_slice(&addr_c.to_le_bytes());

        let memory_size = image.len() as u32 + 2;
        let cancellation = Cancellation::new();
        let mut source = SliceSource { image };
        let mut seen = Vec::new();
        let result = foreach(
            &header,
            0x00,
            memory_size,
            &[],
            &cancellation,
            &mut source,
            &mut |dive, _fp| {
                seen.push(dive.len());
                true
            },
        );
        assert!(result.is_ok());
        assert_eq!(seen, vec![0x260, 0x120, 0x80]);
    }

    #[test]
    fn cancellation_observed_before_any_read() {
        let mut header = [0u8; 8];
        header[2..4].copy_from_slice(&1u16.to_le_bytes());
        header[0..2].copy_from_slice(&(PROFILE_BEGIN as u16).to_le_bytes());
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut source = SliceSource {
            image: vec![0u8; 0x2400],
        };
        let result = foreach(&header, 0x00, 0x2400, &[], &cancellation, &mut source, &mut |_, _| true);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
