//! Cookie jar abstraction and a simple in-memory implementation.
//!
//! A **cookie jar** holds all cookies for one origin partition. It is shared by
//! every execution context of that origin (documents, workers, and the network
//! stack that fills it from `Set-Cookie` headers).
//!
//! This module defines the [`CookieJar`] trait and a reference implementation,
//! [`DefaultCookieJar`], which stores cookies **in memory only**.
//!
//! ## Versioning
//! Every mutation bumps a monotonic version counter. The change notifier
//! compares versions to skip re-diffing when nothing happened.
//!
//! ## Notes & limitations
//! - The jar performs no validation; that is the job of the write validator.
//!   The jar is a dumb keyed collection plus expiry bookkeeping.
//! - This module is **not** internally synchronized. Use it via a
//!   `CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>`.
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::engine::cookies::cookies::{CookieJarHandle, CookieKey, CookieRecord};

/// Outcome of a single [`CookieJar::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JarWrite {
    Inserted,
    Replaced(CookieRecord),
    /// The written record had already expired; the previous record was removed.
    Removed(CookieRecord),
    /// An expired record was written and nothing matched its key.
    Unchanged,
}

impl JarWrite {
    pub fn changed(&self) -> bool {
        !matches!(self, JarWrite::Unchanged)
    }
}

/// A cookie jar keeps the cookies for one single origin partition.
pub trait CookieJar: Send + Sync {
    /// Monotonic counter, bumped by every mutation.
    fn version(&self) -> u64;

    /// Number of records, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &CookieKey) -> Option<&CookieRecord>;

    fn contains(&self, key: &CookieKey) -> bool {
        self.get(key).is_some()
    }

    /// Iterates all records in no particular order.
    fn iter(&self) -> Box<dyn Iterator<Item = &CookieRecord> + '_>;

    /// Inserts or replaces the record with the same [`CookieKey`].
    ///
    /// A replaced record keeps its creation order. A record that is already
    /// expired at `now_millis` is not stored; it deletes whatever had its key.
    fn upsert(&mut self, record: CookieRecord, now_millis: i64) -> JarWrite;

    /// Removes the record with `key`, if any.
    fn remove(&mut self, key: &CookieKey) -> Option<CookieRecord>;

    /// Removes every record that has expired at `now_millis` and returns them.
    fn sweep_expired(&mut self, now_millis: i64) -> Vec<CookieRecord>;

    /// Removes all records.
    fn clear(&mut self);
}

/// Default in-memory cookie jar.
#[derive(Debug, Clone, Default)]
pub struct DefaultCookieJar {
    entries: BTreeMap<CookieKey, CookieRecord>,
    version: u64,
    next_creation: u64,
}

impl DefaultCookieJar {
    /// Creates an empty in-memory cookie jar.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

impl From<DefaultCookieJar> for CookieJarHandle {
    fn from(jar: DefaultCookieJar) -> Self {
        Arc::new(RwLock::new(jar))
    }
}

impl CookieJar for DefaultCookieJar {
    fn version(&self) -> u64 {
        self.version
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, key: &CookieKey) -> Option<&CookieRecord> {
        self.entries.get(key)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &CookieRecord> + '_> {
        Box::new(self.entries.values())
    }

    fn upsert(&mut self, mut record: CookieRecord, now_millis: i64) -> JarWrite {
        let key = record.key();

        if record.is_expired(now_millis) {
            return match self.entries.remove(&key) {
                Some(old) => {
                    self.bump();
                    JarWrite::Removed(old)
                }
                None => JarWrite::Unchanged,
            };
        }

        let version = self.bump();
        record.last_modified = version;

        match self.entries.get(&key) {
            Some(existing) => {
                record.creation_order = existing.creation_order;
                let old = self.entries.insert(key, record);
                old.map_or(JarWrite::Inserted, JarWrite::Replaced)
            }
            None => {
                record.creation_order = self.next_creation;
                self.next_creation += 1;
                self.entries.insert(key, record);
                JarWrite::Inserted
            }
        }
    }

    fn remove(&mut self, key: &CookieKey) -> Option<CookieRecord> {
        let old = self.entries.remove(key)?;
        self.bump();
        Some(old)
    }

    fn sweep_expired(&mut self, now_millis: i64) -> Vec<CookieRecord> {
        let expired: Vec<CookieKey> = self
            .entries
            .values()
            .filter(|c| c.is_expired(now_millis))
            .map(CookieRecord::key)
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        self.bump();
        expired.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::CookieDomain;

    fn rec(name: &str, value: &str, path: &str) -> CookieRecord {
        CookieRecord::new(name, value, CookieDomain::HostOnly("example.org".into()), path)
    }

    #[test]
    fn upsert_replaces_in_place_and_keeps_creation_order() {
        let mut jar = DefaultCookieJar::new();
        assert_eq!(jar.upsert(rec("a", "1", "/"), 0), JarWrite::Inserted);
        assert_eq!(jar.upsert(rec("b", "1", "/"), 0), JarWrite::Inserted);
        let v = jar.version();

        let write = jar.upsert(rec("a", "2", "/"), 0);
        assert!(matches!(write, JarWrite::Replaced(ref old) if old.value == "1"));
        assert_eq!(jar.len(), 2);
        assert_eq!(jar.version(), v + 1);

        let a = jar.get(&rec("a", "", "/").key()).unwrap();
        assert_eq!(a.value, "2");
        assert_eq!(a.creation_order, 0);
        assert_eq!(a.last_modified, v + 1);
    }

    #[test]
    fn same_name_different_path_is_a_different_record() {
        let mut jar = DefaultCookieJar::new();
        jar.upsert(rec("a", "1", "/"), 0);
        jar.upsert(rec("a", "2", "/docs/"), 0);
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn expired_upsert_removes_existing_record() {
        let mut jar = DefaultCookieJar::new();
        jar.upsert(rec("a", "1", "/"), 0);

        let mut gone = rec("a", "", "/");
        gone.expires = Some(0);
        assert!(matches!(jar.upsert(gone.clone(), 10), JarWrite::Removed(_)));
        assert!(jar.is_empty());

        // Nothing left to remove: no version bump
        let v = jar.version();
        assert_eq!(jar.upsert(gone, 10), JarWrite::Unchanged);
        assert_eq!(jar.version(), v);
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let mut jar = DefaultCookieJar::new();
        let mut short = rec("short", "1", "/");
        short.expires = Some(100);
        jar.upsert(short, 0);
        jar.upsert(rec("session", "1", "/"), 0);

        assert!(jar.sweep_expired(50).is_empty());
        let v = jar.version();

        let swept = jar.sweep_expired(100);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].name, "short");
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.version(), v + 1);
    }

    #[test]
    fn handle_is_shared() {
        let handle: CookieJarHandle = DefaultCookieJar::new().into();
        let other = handle.clone();
        handle.write().unwrap().upsert(rec("a", "1", "/"), 0);
        assert_eq!(other.read().unwrap().len(), 1);
        assert!(Arc::ptr_eq(&handle, &other));
    }
}
