//! Keeps text arguments at stable addresses while native code may read them.

use std::collections::HashMap;
use std::ffi::{CString, NulError};
use std::sync::{Arc, Mutex};

use crate::sync::lock;

/// Registry of NUL-terminated copies of text arguments.
///
/// The registry owns the storage. Callers hold a [`PinnedText`] lease and the
/// entry is released when the lease drops, which happens once the call request
/// carrying it has executed and been discarded.
#[derive(Debug, Default)]
pub struct PinnedStrings {
    entries: Mutex<HashMap<usize, CString>>,
}

impl PinnedStrings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `text` into the registry and returns a lease on its address.
    pub fn pin(self: &Arc<Self>, text: &str) -> Result<PinnedText, NulError> {
        let owned = CString::new(text)?;
        // The heap buffer does not move when the CString is moved into the map.
        let address = owned.as_ptr() as usize;
        lock(&self.entries).insert(address, owned);
        Ok(PinnedText {
            address,
            registry: Arc::clone(self),
        })
    }

    /// Returns the text pinned at `address`, if that entry is still live.
    pub fn contents(&self, address: usize) -> Option<String> {
        lock(&self.entries)
            .get(&address)
            .map(|value| value.to_string_lossy().into_owned())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    fn release(&self, address: usize) {
        lock(&self.entries).remove(&address);
    }
}

/// Lease on one pinned text value.
#[derive(Debug)]
pub struct PinnedText {
    address: usize,
    registry: Arc<PinnedStrings>,
}

impl PinnedText {
    pub fn address(&self) -> usize {
        self.address
    }

    /// The word pushed onto the native stack for this text.
    pub fn word(&self) -> u64 {
        self.address as u64
    }
}

impl Drop for PinnedText {
    fn drop(&mut self) {
        self.registry.release(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_text_lives_until_lease_drops() {
        let pins = Arc::new(PinnedStrings::new());
        let lease = pins.pin("LITERAL_STRING").unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(
            pins.contents(lease.address()).as_deref(),
            Some("LITERAL_STRING")
        );

        let address = lease.address();
        drop(lease);
        assert!(pins.is_empty());
        assert_eq!(pins.contents(address), None);
    }

    #[test]
    fn identical_text_gets_distinct_entries() {
        let pins = Arc::new(PinnedStrings::new());
        let first = pins.pin("same").unwrap();
        let second = pins.pin("same").unwrap();
        assert_ne!(first.address(), second.address());
        drop(first);
        assert_eq!(pins.contents(second.address()).as_deref(), Some("same"));
    }

    #[test]
    fn interior_nul_is_rejected() {
        let pins = Arc::new(PinnedStrings::new());
        assert!(pins.pin("bad\0text").is_err());
        assert!(pins.is_empty());
    }
}
