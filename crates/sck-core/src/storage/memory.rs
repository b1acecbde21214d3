use super::{PersistentStore, Scope, check_bounds};
use crate::error::StorageError;

/// RAM-backed [`PersistentStore`].
///
/// Starts out in the erased state (all `0xFF`), like a blank EEPROM. Used by
/// the simulator and by tests.
pub struct MemoryStore<const INTERNAL: usize, const EXTERNAL: usize> {
    internal: [u8; INTERNAL],
    external: [u8; EXTERNAL],
    writes: u32,
}

impl<const INTERNAL: usize, const EXTERNAL: usize> MemoryStore<INTERNAL, EXTERNAL> {
    pub const fn new() -> Self {
        Self {
            internal: [0xFF; INTERNAL],
            external: [0xFF; EXTERNAL],
            writes: 0,
        }
    }

    /// Number of write calls served so far.
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    fn region(&mut self, scope: Scope) -> &mut [u8] {
        match scope {
            Scope::Internal => &mut self.internal,
            Scope::External => &mut self.external,
        }
    }
}

impl<const INTERNAL: usize, const EXTERNAL: usize> Default for MemoryStore<INTERNAL, EXTERNAL> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const INTERNAL: usize, const EXTERNAL: usize> PersistentStore
    for MemoryStore<INTERNAL, EXTERNAL>
{
    async fn read(&mut self, scope: Scope, address: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.capacity(scope), address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.region(scope)[start..start + buf.len()]);
        Ok(())
    }

    async fn write(&mut self, scope: Scope, address: u32, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(self.capacity(scope), address, data.len())?;
        let start = address as usize;
        self.region(scope)[start..start + data.len()].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn capacity(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Internal => INTERNAL as u32,
            Scope::External => EXTERNAL as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_fresh_store_reads_erased() {
        let mut store = MemoryStore::<16, 64>::new();
        let value = block_on(store.read_u32(Scope::Internal, 0)).unwrap();
        assert_eq!(value, u32::MAX);
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut store = MemoryStore::<16, 64>::new();
        block_on(store.write_u32(Scope::Internal, 4, 56)).unwrap();
        assert_eq!(block_on(store.read_u32(Scope::Internal, 4)).unwrap(), 56);
        assert_eq!(block_on(store.read_u32(Scope::External, 4)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_out_of_range_access_is_rejected() {
        let mut store = MemoryStore::<16, 64>::new();
        let result = block_on(store.write(Scope::Internal, 14, &[0; 4]));
        assert_eq!(result, Err(StorageError::OutOfRange { address: 14, len: 4 }));
        assert_eq!(store.write_count(), 0);
    }
}
