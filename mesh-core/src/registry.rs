//! File registry: which attached weak-peer offers which filenames.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

/// Super-peer index of attached weak-peers, keyed by their listening address.
/// Entries are best-effort and may briefly lag the weak-peer's disk.
#[derive(Debug, Default, Clone)]
pub struct FileRegistry {
    peers: BTreeMap<SocketAddr, BTreeSet<String>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a weak-peer's whole file set. Registering again overwrites.
    pub fn register<I>(&mut self, peer: SocketAddr, files: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.peers.insert(peer, files.into_iter().collect());
    }

    /// Remove a weak-peer. Returns false if it was not registered.
    pub fn unregister(&mut self, peer: &SocketAddr) -> bool {
        self.peers.remove(peer).is_some()
    }

    /// Add filenames to a weak-peer's set, creating the entry if needed.
    pub fn add<I>(&mut self, peer: SocketAddr, files: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.peers.entry(peer).or_default().extend(files);
    }

    /// Remove filenames from a weak-peer's set. Unknown peers and filenames are ignored.
    pub fn delete<'a, I>(&mut self, peer: &SocketAddr, files: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        if let Some(set) = self.peers.get_mut(peer) {
            for f in files {
                set.remove(f);
            }
        }
    }

    /// First weak-peer (lowest address) offering `filename`.
    pub fn find(&self, filename: &str) -> Option<SocketAddr> {
        self.peers
            .iter()
            .find(|(_, files)| files.contains(filename))
            .map(|(peer, _)| *peer)
    }

    pub fn files_of(&self, peer: &SocketAddr) -> Option<&BTreeSet<String>> {
        self.peers.get(peer)
    }

    /// Union of all registered filenames, deduplicated and sorted.
    pub fn list(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.peers.values().flatten().collect();
        all.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_then_unregister_leaves_no_entry() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt"]));
        assert!(reg.unregister(&addr(7001)));
        assert!(reg.files_of(&addr(7001)).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt"]));
        assert!(!reg.unregister(&addr(7002)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_twice_keeps_one_entry() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt", "b.txt"]));
        reg.register(addr(7001), names(&["a.txt", "b.txt"]));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.files_of(&addr(7001)).unwrap().len(), 2);
    }

    #[test]
    fn register_overwrites_previous_set() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt", "b.txt"]));
        reg.register(addr(7001), names(&["c.txt"]));
        assert_eq!(reg.list(), names(&["c.txt"]));
    }

    #[test]
    fn add_existing_and_delete_missing_change_nothing() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt", "b.txt"]));
        let before = reg.files_of(&addr(7001)).cloned();
        reg.add(addr(7001), names(&["a.txt"]));
        reg.delete(&addr(7001), &names(&["zzz.txt"]));
        reg.delete(&addr(7999), &names(&["a.txt"]));
        assert_eq!(reg.files_of(&addr(7001)).cloned(), before);
        assert!(reg.files_of(&addr(7999)).is_none());
    }

    #[test]
    fn add_and_delete_mutate_incrementally() {
        let mut reg = FileRegistry::new();
        reg.add(addr(7001), names(&["a.txt"]));
        reg.add(addr(7001), names(&["b.txt"]));
        reg.delete(&addr(7001), &names(&["a.txt"]));
        assert_eq!(reg.find("a.txt"), None);
        assert_eq!(reg.find("b.txt"), Some(addr(7001)));
    }

    #[test]
    fn list_is_deduplicated_union() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7001), names(&["a.txt", "b.txt"]));
        reg.register(addr(7002), names(&["b.txt", "c.txt"]));
        assert_eq!(reg.list(), names(&["a.txt", "b.txt", "c.txt"]));
    }

    #[test]
    fn find_is_deterministic() {
        let mut reg = FileRegistry::new();
        reg.register(addr(7002), names(&["shared.bin"]));
        reg.register(addr(7001), names(&["shared.bin"]));
        assert_eq!(reg.find("shared.bin"), Some(addr(7001)));
        assert_eq!(reg.find("nope"), None);
    }
}
