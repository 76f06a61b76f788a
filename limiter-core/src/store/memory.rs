use super::ByteStore;

/// Address outside the backing array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfBounds {
    pub address: u16,
}

/// RAM-backed byte store, erased to `0xFF` like a fresh EEPROM.
#[derive(Clone, Debug)]
pub struct MemoryStore<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> MemoryStore<N> {
    #[must_use]
    pub const fn erased() -> Self {
        Self { bytes: [0xFF; N] }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn span(&self, address: u16, len: usize) -> Result<core::ops::Range<usize>, OutOfBounds> {
        let start = usize::from(address);
        let end = start.checked_add(len).filter(|end| *end <= N);
        end.map(|end| start..end).ok_or(OutOfBounds { address })
    }
}

impl<const N: usize> Default for MemoryStore<N> {
    fn default() -> Self {
        Self::erased()
    }
}

impl<const N: usize> ByteStore for MemoryStore<N> {
    type Error = OutOfBounds;

    fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let span = self.span(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[span]);
        Ok(())
    }

    fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        let span = self.span(address, data.len())?;
        self.bytes[span].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_accesses_past_the_end() {
        let mut store = MemoryStore::<4>::erased();
        assert_eq!(store.write_bytes(3, &[1, 2]), Err(OutOfBounds { address: 3 }));
        assert_eq!(store.write_bytes(2, &[1, 2]), Ok(()));
        assert_eq!(store.as_bytes(), &[0xFF, 0xFF, 1, 2]);
    }
}
