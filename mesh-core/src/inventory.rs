//! Weak-peer file inventory: on-disk snapshot, and what the super-peer has been told.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::protocol::Message;

/// Files that changed between the last synced set and the current disk snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncDelta {
    pub fn between(old: &BTreeSet<String>, new: &BTreeSet<String>) -> Self {
        Self {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// `add` / `delete` messages for the non-empty halves of this delta.
    pub fn messages(&self, peer: SocketAddr) -> Vec<Message> {
        let mut out = Vec::new();
        if !self.added.is_empty() {
            out.push(Message::Add {
                peer,
                files: self.added.clone(),
            });
        }
        if !self.removed.is_empty() {
            out.push(Message::Delete {
                peer,
                files: self.removed.clone(),
            });
        }
        out
    }
}

/// Local file set of one weak-peer.
#[derive(Debug, Default)]
pub struct FileInventory {
    files: BTreeSet<String>,
    synced: BTreeSet<String>,
}

impl FileInventory {
    pub fn new(files: BTreeSet<String>) -> Self {
        Self {
            files,
            synced: BTreeSet::new(),
        }
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains(filename)
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    /// Replace the disk snapshot. Returns what the super-peer has not been told yet.
    pub fn refresh(&mut self, current: BTreeSet<String>) -> SyncDelta {
        self.files = current;
        SyncDelta::between(&self.synced, &self.files)
    }

    /// Record that a delta reached the super-peer.
    pub fn mark_synced(&mut self, delta: &SyncDelta) {
        for f in &delta.removed {
            self.synced.remove(f);
        }
        self.synced.extend(delta.added.iter().cloned());
    }

    /// `register` message for the full snapshot.
    pub fn register_message(&self, peer: SocketAddr) -> Message {
        Message::Register {
            peer,
            files: self.files.iter().cloned().collect(),
        }
    }

    /// Record that the full snapshot was registered.
    pub fn mark_registered(&mut self) {
        self.synced = self.files.clone();
    }
}

/// A plain filename that cannot escape the shared directory.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:7001".parse().unwrap()
    }

    #[test]
    fn refresh_reports_added_and_removed() {
        let mut inv = FileInventory::new(set(&["a.txt", "b.txt"]));
        inv.mark_registered();
        let delta = inv.refresh(set(&["b.txt", "c.txt"]));
        assert_eq!(delta.added, vec!["c.txt".to_string()]);
        assert_eq!(delta.removed, vec!["a.txt".to_string()]);
        assert!(inv.contains("c.txt"));
        assert!(!inv.contains("a.txt"));
    }

    #[test]
    fn unchanged_directory_gives_empty_delta() {
        let mut inv = FileInventory::new(set(&["a.txt"]));
        inv.mark_registered();
        let delta = inv.refresh(set(&["a.txt"]));
        assert!(delta.is_empty());
        assert!(delta.messages(peer()).is_empty());
    }

    #[test]
    fn unsynced_delta_is_reported_again() {
        let mut inv = FileInventory::new(set(&[]));
        inv.mark_registered();
        let first = inv.refresh(set(&["new.txt"]));
        assert_eq!(first.added.len(), 1);
        // Push failed, nothing marked: next refresh repeats it.
        let second = inv.refresh(set(&["new.txt"]));
        assert_eq!(first, second);
        inv.mark_synced(&second);
        assert!(inv.refresh(set(&["new.txt"])).is_empty());
    }

    #[test]
    fn delta_messages_are_add_then_delete() {
        let delta = SyncDelta::between(&set(&["old"]), &set(&["new"]));
        let msgs = delta.messages(peer());
        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[0], Message::Add { files, .. } if files == &vec!["new".to_string()]));
        assert!(matches!(&msgs[1], Message::Delete { files, .. } if files == &vec!["old".to_string()]));
    }

    #[test]
    fn register_message_carries_snapshot() {
        let inv = FileInventory::new(set(&["b", "a"]));
        assert_eq!(
            inv.register_message(peer()),
            Message::Register {
                peer: peer(),
                files: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn plain_filename_checks() {
        assert!(is_plain_filename("report.pdf"));
        assert!(is_plain_filename(".hidden"));
        assert!(!is_plain_filename(""));
        assert!(!is_plain_filename(".."));
        assert!(!is_plain_filename("../etc/passwd"));
        assert!(!is_plain_filename("dir/file"));
        assert!(!is_plain_filename("dir\\file"));
    }
}
