//! A growable byte buffer, owned by the caller across a `dump` or `foreach`
//! call and by the engines internally while they reassemble ring-buffer
//! pages into linear dive records.

use crate::errors::{Error, Result};

/// Growable byte buffer with size tracked separately from capacity.
///
/// Mirrors `dc_buffer_t` in the original source: `clear` drops the size back
/// to zero but keeps the allocation, `reserve` grows capacity without
/// touching size, `resize` grows (or truncates) and sets the size, `append`
/// copies bytes in and grows geometrically if needed.
#[derive(Debug, Clone, Default)]
pub struct DynamicBuffer {
    data: Vec<u8>,
}

impl DynamicBuffer {
    /// Create an empty buffer that has pre-allocated space for at least
    /// `capacity_hint` bytes.
    pub fn new(capacity_hint: usize) -> Self {
        DynamicBuffer {
            data: Vec::with_capacity(capacity_hint),
        }
    }

    /// Drop the size back to zero; the underlying allocation is retained.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Ensure the buffer can hold at least `n` bytes without reallocating,
    /// without changing the current size.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if n > self.data.len() {
            self.data.try_reserve(n - self.data.len()).map_err(|_| Error::Memory)?;
        }
        Ok(())
    }

    /// Grow or truncate the buffer to exactly `n` bytes. New bytes (when
    /// growing) are zero-filled.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        self.data.try_reserve(n.saturating_sub(self.data.len())).map_err(|_| Error::Memory)?;
        self.data.resize(n, 0);
        Ok(())
    }

    /// Append `bytes` to the end of the buffer, growing capacity
    /// geometrically as needed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.data.try_reserve(bytes.len()).map_err(|_| Error::Memory)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Borrow the buffer's current contents.
    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    /// Mutably borrow the buffer's current contents.
    pub fn get_data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Current size of the buffer, in bytes.
    pub fn get_size(&self) -> usize {
        self.data.len()
    }

    /// Release the buffer's allocation.
    pub fn free(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_retains_capacity() {
        let mut buf = DynamicBuffer::new(16);
        buf.append(&[1, 2, 3]).unwrap();
        let cap_before = buf.data.capacity();
        buf.clear();
        assert_eq!(buf.get_size(), 0);
        assert_eq!(buf.data.capacity(), cap_before);
    }

    #[test]
    fn resize_zero_extends() {
        let mut buf = DynamicBuffer::new(0);
        buf.resize(4).unwrap();
        assert_eq!(buf.get_data(), &[0, 0, 0, 0]);
        buf.resize(2).unwrap();
        assert_eq!(buf.get_data(), &[0, 0]);
    }

    #[test]
    fn append_accumulates() {
        let mut buf = DynamicBuffer::new(0);
        buf.append(&[1, 2]).unwrap();
        buf.append(&[3]).unwrap();
        assert_eq!(buf.get_data(), &[1, 2, 3]);
    }
}
