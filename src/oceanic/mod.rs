//! Oceanic/Aeris VTPro-family ring-buffer engine (§4.F, the hardest
//! subsystem: minimise bytes transferred while enumerating new dives
//! newest-first out of a logbook ring plus a profile ring).
//!
//! This module holds the pure, transport-agnostic traversal logic; `vtpro`
//! wires it to a [`SerialTransport`](crate::transport::SerialTransport).

pub mod vtpro;

use crate::device::Cancellation;
use crate::errors::{Error, Result};
use crate::primitives::{is_equal, u16_le, Ring};

/// Interpretation of the two ring pointers read from the device's pointers
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtModeGlobal {
    /// `first`/`last` name the first and last logbook entry.
    FirstLast,
    /// `first`/`last` name the ring's begin and end cursors directly.
    BeginEnd,
}

/// Packing of the profile-pointer pair inside a logbook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtModeLogbook {
    /// Two 12-bit pointers packed into 3 bytes starting at entry offset 5.
    Packed12,
    /// Two 16-bit page-count pointers at entry offsets 4 and 6.
    Padded16,
}

/// Fixed per-model geometry, analogous to `oceanic_common_layout_t` in the
/// original source.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    /// Logbook ring `[rb_logbook_begin, rb_logbook_end)`.
    pub logbook: Ring,
    /// Profile ring `[rb_profile_begin, rb_profile_end)`.
    pub profile: Ring,
    /// Device read granularity, in bytes. 16 for every known VTPro model.
    pub page_size: u32,
    /// Number of pages fetched per transport read when possible.
    pub multipage: u32,
    /// Interpretation of the two global ring pointers.
    pub pt_mode_global: PtModeGlobal,
    /// Packing of the profile-pointer pair inside a logbook entry.
    pub pt_mode_logbook: PtModeLogbook,
    /// Total addressable memory, used to pick the pointer mask below.
    pub memory_size: u32,
}

impl MemoryLayout {
    fn logbook_entry_size(&self) -> u32 {
        self.page_size / 2
    }

    fn pointer_mask(&self) -> u16 {
        if self.memory_size > 64 * 1024 {
            0x1FFF
        } else {
            0x0FFF
        }
    }

    /// Extract `(profile_first, profile_last)` from a single logbook entry,
    /// per the `pt_mode_logbook` packing (§4.F pointer extraction table).
    fn entry_pointers(&self, entry: &[u8]) -> (u32, u32) {
        match self.pt_mode_logbook {
            PtModeLogbook::Packed12 => {
                let mask = self.pointer_mask();
                let first = u16_le(&entry[5..7]) & mask;
                let last = (u16_le(&entry[6..8]) >> 4) & mask;
                (
                    self.profile.lo + first as u32,
                    self.profile.lo + last as u32,
                )
            }
            PtModeLogbook::Padded16 => {
                let mask = self.pointer_mask();
                let first = (u16_le(&entry[4..6]) & mask) as u32 * self.page_size;
                let last = (u16_le(&entry[6..8]) & mask) as u32 * self.page_size;
                (self.profile.lo + first, self.profile.lo + last)
            }
        }
    }
}

/// Reads page-granular chunks out of the device's flat memory image.
/// Implemented by `vtpro::VtproDevice` over the real transport, and by a
/// plain byte-slice in the unit tests below.
pub trait PageSource {
    /// Read `out.len()` bytes starting at flat address `address`.
    fn read_page(&mut self, address: u32, out: &mut [u8]) -> Result<()>;
}

/// `(raw entry+profile bytes, fingerprint bytes)` newest-first, per dive.
pub type DiveCallback<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

/// Translate a ring address into an index into a buffer that starts at
/// `origin` and may wrap around the ring (used only in the `full` case).
fn ring_index(ring: Ring, origin: u32, addr: u32) -> usize {
    let origin = if origin == ring.hi { ring.lo } else { origin };
    let addr = if addr == ring.hi { ring.lo } else { addr };
    ring.distance(origin, addr, false) as usize
}

/// Enumerate new dives in `[first, last)` against `layout`, calling `sink`
/// newest-first. `fingerprint` (possibly empty) ends the traversal as soon
/// as a logbook entry's leading bytes match it.
///
/// Grounded on `oceanic_common_device_foreach` / `dive_read` in
/// `oceanic_common.c`; see SPEC_FULL.md §4.F for the numbered steps this
/// follows.
pub fn foreach(
    layout: &MemoryLayout,
    first: u16,
    last: u16,
    fingerprint: &[u8],
    cancellation: &Cancellation,
    source: &mut dyn PageSource,
    sink: &mut DiveCallback<'_>,
) -> Result<()> {
    let first = first as u32;
    let last = last as u32;
    let logbook = layout.logbook;
    let profile = layout.profile;
    let unit = layout.logbook_entry_size();

    if !logbook.contains(first) || !logbook.contains(last) {
        return Ok(());
    }

    // Step 2 — normalise to begin/end/size.
    let (begin, end, size) = match layout.pt_mode_global {
        PtModeGlobal::FirstLast => {
            let end = logbook.increment(last, unit);
            let size = logbook.distance(first, last, false) + unit;
            (first, end, size)
        }
        PtModeGlobal::BeginEnd => {
            let mut size = logbook.distance(first, last, false);
            if first == last {
                size = logbook.len();
            }
            (first, last, size)
        }
    };
    let full = size == logbook.len();

    // Step 3 — page alignment.
    let p = layout.page_size;
    let (page_begin, page_end, page_size) = if full {
        let pe = Ring::ceil(end, p);
        (pe, pe, size)
    } else {
        let pb = Ring::floor(begin, p);
        let pe = Ring::ceil(end, p);
        (pb, pe, size + (begin - pb) + (pe - end))
    };

    if page_size == 0 {
        return Ok(());
    }

    // Step 4 — backward page read loop. Each chunk is clipped to
    // `[logbook.lo, ...)` so a single read never straddles the physical
    // wrap point; the linear buffer ends up holding the whole requested
    // span starting at buffer index 0 = `page_end`, wrapping through
    // `logbook.hi` back down to `logbook.lo`.
    let mut buffer = vec![0u8; page_size as usize];
    let chunk_max = layout.page_size * layout.multipage;
    let mut written = 0u32;
    let mut address = page_end;
    while written < page_size {
        cancellation.check()?;
        let mut len = chunk_max.min(page_size - written);
        if address == logbook.lo {
            address = logbook.hi;
        }
        len = len.min(address - logbook.lo);
        if len == 0 {
            return Err(Error::Protocol("oceanic logbook ring under-ran".into()));
        }
        let new_address = address - len;
        let dst_offset = (page_size - written - len) as usize;
        source.read_page(new_address, &mut buffer[dst_offset..dst_offset + len as usize])?;
        written += len;
        address = new_address;
    }

    // Step 5 — full-ring wrap-page fix-up. When the logbook is full, buffer
    // index 0 holds `page_end`, not `begin`: the oldest entries (starting
    // at `begin`) sit wherever `ring_index(logbook, page_end, begin)` lands,
    // which is at the tail of the buffer whenever `end` isn't page-aligned
    // (the newest entry's trailing bytes and the oldest entry's leading
    // bytes then share that one physical page). Rotating the buffer left by
    // that offset puts `begin` back at index 0, restoring chronological
    // order; this is a no-op (`shift == 0`) in the aligned case, matching
    // the source's `memmove` fix-up at `oceanic_common.c:328-345`.
    if full {
        let shift = ring_index(logbook, page_begin, begin);
        buffer.rotate_left(shift);
    }

    // Step 6 — entry scan. A full ring has no page-alignment slack: every
    // byte in the buffer is a live entry, so the scan runs over the whole
    // buffer rather than the distance-derived offsets the non-full branch
    // uses, matching `oceanic_common.c:281-286`'s hardcoded `begin = 0`,
    // `end = rb_logbook_page_size` for the full case.
    let (end_index, lower_bound) = if full {
        (page_size as usize, 0)
    } else {
        (ring_index(logbook, page_begin, end), (begin - page_begin) as usize)
    };
    let mut current = end_index;
    let mut begin_buf = lower_bound;
    while current > lower_bound {
        current -= unit as usize;
        let entry = &buffer[current..current + unit as usize];
        if is_equal(entry, 0xFF) {
            begin_buf = current + unit as usize;
            break;
        }
        if !fingerprint.is_empty()
            && fingerprint.len() <= unit as usize
            && entry[..fingerprint.len()] == *fingerprint
        {
            begin_buf = current + unit as usize;
            break;
        }
        begin_buf = current;
    }

    if begin_buf >= end_index {
        return Ok(());
    }

    // Step 7 — profile retrieval bounds.
    let first_entry = &buffer[begin_buf..begin_buf + unit as usize];
    let last_entry = &buffer[end_index - unit as usize..end_index];
    let (profile_first, _) = layout.entry_pointers(first_entry);
    let (_, profile_last) = layout.entry_pointers(last_entry);
    let profile_end_addr = profile.increment(profile_last, layout.page_size);
    let _profile_size = profile.distance(profile_first, profile_last, false) + layout.page_size;

    // Step 8 — backward dive-by-dive profile read.
    let mut previous_first = profile_end_addr;
    let mut entry_index = end_index;
    while entry_index > begin_buf {
        cancellation.check()?;
        entry_index -= unit as usize;
        let entry = buffer[entry_index..entry_index + unit as usize].to_vec();
        let (entry_first, entry_last) = layout.entry_pointers(&entry);
        let entry_end = profile.increment(entry_last, layout.page_size);
        if entry_end != previous_first {
            return Err(Error::Protocol(
                "oceanic profile entries are not contiguous".into(),
            ));
        }
        let entry_size = profile.distance(entry_first, entry_last, false) + layout.page_size;

        let mut dive = vec![0u8; (unit + entry_size) as usize];
        dive[..unit as usize].copy_from_slice(&entry);
        let mut remaining = entry_size;
        let mut addr = entry_end;
        while remaining > 0 {
            cancellation.check()?;
            let mut len = (layout.page_size * layout.multipage).min(remaining);
            if addr == profile.lo {
                addr = profile.hi;
            }
            len = len.min(addr - profile.lo);
            if len == 0 {
                return Err(Error::Protocol("oceanic profile ring under-ran".into()));
            }
            let new_addr = addr - len;
            let dst = unit as usize + (remaining - len) as usize;
            source.read_page(new_addr, &mut dive[dst..dst + len as usize])?;
            remaining -= len;
            addr = new_addr;
        }

        let fingerprint_out = dive[..unit as usize].to_vec();
        if !sink(&dive, &fingerprint_out) {
            return Ok(());
        }
        previous_first = entry_first;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SliceSource {
        image: Vec<u8>,
    }

    impl PageSource for SliceSource {
        fn read_page(&mut self, address: u32, out: &mut [u8]) -> Result<()> {
            let start = address as usize;
            out.copy_from_slice(&self.image[start..start + out.len()]);
            Ok(())
        }
    }

    fn layout() -> MemoryLayout {
        MemoryLayout {
            logbook: Ring::new(0x240, 0x440),
            profile: Ring::new(0x440, 0x8000),
            page_size: 0x10,
            multipage: 1,
            pt_mode_global: PtModeGlobal::FirstLast,
            pt_mode_logbook: PtModeLogbook::Packed12,
            memory_size: 0x8000,
        }
    }

    #[test]
    fn empty_logbook_short_circuits() {
        let layout = layout();
        let cancellation = Cancellation::new();
        let mut source = SliceSource {
            image: vec![0u8; 0x8000],
        };
        let mut calls = 0;
        let result = foreach(
            &layout,
            0xFFFF,
            0xFFFF,
            &[],
            &cancellation,
            &mut source,
            &mut |_, _| {
                calls += 1;
                true
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls, 0);
    }

    #[test]
    fn cancellation_observed_before_any_read() {
        let layout = layout();
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut source = SliceSource {
            image: vec![0u8; 0x8000],
        };
        let result = foreach(&layout, 0x240, 0x438, &[], &cancellation, &mut source, &mut |_, _| true);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    // Packed12 is 2 bytes-1-nibble short of 2 full u16s: entry[5] holds
    // `first`'s low byte, entry[6] splits between `first`'s high nibble and
    // `last`'s low nibble, entry[7] holds `last`'s high byte. Inverse of
    // `MemoryLayout::entry_pointers`'s `Packed12` branch.
    fn pack_packed12(first: u16, last: u16) -> (u8, u8, u8) {
        let b5 = (first & 0xFF) as u8;
        let b6 = (((first >> 8) & 0xF) | ((last & 0xF) << 4)) as u8;
        let b7 = ((last >> 4) & 0xFF) as u8;
        (b5, b6, b7)
    }

    // Writes `data` starting at `addr`, wrapping around `ring` one byte at a
    // time so a write can straddle `ring.hi`/`ring.lo` the same way a real
    // entry can once the ring is full and unaligned.
    fn write_ring(image: &mut [u8], ring: Ring, addr: u32, data: &[u8]) {
        let mut a = addr;
        for &b in data {
            image[a as usize] = b;
            a += 1;
            if a == ring.hi {
                a = ring.lo;
            }
        }
    }

    // A full, unaligned logbook ring (8 entries of 8 bytes each, `begin`
    // offset by 4 bytes from `logbook.lo`, matching spec scenario 2's
    // `first=0x244` shape) chained to a profile ring of 8 single-page
    // dives. Exercises the step 5 rotate, the step 6 full-case scan bounds,
    // and newest-first/continuity (P4).
    fn unaligned_full_layout_and_image() -> (MemoryLayout, u32, u32, Vec<u8>) {
        let logbook = Ring::new(0x240, 0x280); // 0x40 = 8 entries * 8 bytes
        let profile = Ring::new(0x280, 0x300); // 0x80 = 8 dives * 16 bytes
        let layout = MemoryLayout {
            logbook,
            profile,
            page_size: 0x10,
            multipage: 1,
            pt_mode_global: PtModeGlobal::FirstLast,
            pt_mode_logbook: PtModeLogbook::Packed12,
            memory_size: 0x400,
        };

        let unit = layout.logbook_entry_size();
        let ndives = 8u32;
        let first = 0x244u32;
        // distance(first, last, false) + unit == logbook.len() (full), so
        // distance(first, last, false) == logbook.len() - unit.
        let last = logbook.increment(first, logbook.len() - unit);

        let mut image = vec![0u8; 0x300];
        for i in 0..ndives {
            let addr = logbook.increment(first, i * unit);
            let (b5, b6, b7) = pack_packed12((i * 16) as u16, (i * 16) as u16);
            let mut entry = vec![0u8; unit as usize];
            entry[5] = b5;
            entry[6] = b6;
            entry[7] = b7;
            write_ring(&mut image, logbook, addr, &entry);

            let profile_addr = profile.lo + i * 16;
            for b in &mut image[profile_addr as usize..(profile_addr + 16) as usize] {
                *b = i as u8;
            }
        }

        (layout, first, last, image)
    }

    #[test]
    fn full_unaligned_ring_streams_all_dives_newest_first() {
        let (layout, first, last, image) = unaligned_full_layout_and_image();
        let cancellation = Cancellation::new();
        let mut source = SliceSource { image };
        let mut seen = Vec::new();
        let result = foreach(
            &layout,
            first as u16,
            last as u16,
            &[],
            &cancellation,
            &mut source,
            &mut |dive, fingerprint| {
                seen.push((dive[8], fingerprint.to_vec()));
                true
            },
        );
        assert!(result.is_ok());
        // 8 dives, newest (index 7) first, each identified by its profile's
        // tag byte — continuity would have errored out if the rotate or the
        // scan bounds were wrong.
        assert_eq!(seen.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(), vec![7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn fingerprint_cuts_off_at_previously_seen_dive() {
        let (layout, first, last, image) = unaligned_full_layout_and_image();
        let cancellation = Cancellation::new();

        let mut source = SliceSource { image: image.clone() };
        let mut seen = Vec::new();
        foreach(&layout, first as u16, last as u16, &[], &cancellation, &mut source, &mut |dive, fp| {
            seen.push((dive[8], fp.to_vec()));
            true
        })
        .unwrap();
        let newest_fingerprint = seen[0].1.clone();

        let mut source = SliceSource { image };
        let mut calls = 0;
        let result = foreach(
            &layout,
            first as u16,
            last as u16,
            &newest_fingerprint,
            &cancellation,
            &mut source,
            &mut |_, _| {
                calls += 1;
                true
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls, 0);
    }
}
