//! In-memory ordered store with snapshot-isolated transactions. This is the
//! reference implementation of the [`Store`]/[`Txn`] contract; everything in
//! the crate is tested against it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use anyhow::bail;
use tracing::debug;

use super::readset::ReadSet;
use super::{ConflictError, RangeOptions, Store, Txn};

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    // Commit version that last wrote each key, for conflict checks.
    modified: BTreeMap<Vec<u8>, u64>,
    version: u64,
}

/// Cheaply cloneable handle to a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Rc<RefCell<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        (*self.inner).borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed contents, in key order.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        (*self.inner)
            .borrow()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Store for MemStore {
    type Txn = MemTxn;

    fn begin(&self) -> MemTxn {
        let inner = (*self.inner).borrow();
        MemTxn {
            store: self.inner.clone(),
            snapshot: inner.data.clone(),
            start_version: inner.version,
            reads: ReadSet::new(),
            writes: BTreeMap::new(),
        }
    }
}

/// A transaction against [`MemStore`]. Reads see the snapshot taken at
/// `begin` plus this transaction's own writes. Dropping without committing
/// discards the writes.
#[derive(Debug)]
pub struct MemTxn {
    store: Rc<RefCell<Inner>>,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    start_version: u64,
    reads: ReadSet,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
}

fn bound_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

// BTreeMap::range panics on inverted bounds; an inverted range reads as
// empty instead.
fn is_empty_range(lower: &Bound<&[u8]>, upper: &Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (
            Bound::Included(lo) | Bound::Excluded(lo),
            Bound::Included(hi) | Bound::Excluded(hi),
        ) => {
            if lo > hi {
                return true;
            }
            if lo == hi {
                return !matches!(
                    (lower, upper),
                    (Bound::Included(_), Bound::Included(_))
                );
            }
            false
        }
    }
}

impl Txn for MemTxn {
    fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.reads.add_point(key);
        if let Some(v) = self.writes.get(key) {
            return Ok(Some(v.clone()));
        }
        Ok(self.snapshot.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.writes.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn range(&mut self, opts: &RangeOptions) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.reads.add_range(&opts.lower, &opts.upper);

        let lower = bound_slice(&opts.lower);
        let upper = bound_slice(&opts.upper);
        if is_empty_range(&lower, &upper) {
            return Ok(Vec::new());
        }

        // Own writes shadow the snapshot.
        // TODO: apply the limit while merging instead of materializing the
        // whole range first.
        let mut merged: BTreeMap<&[u8], &[u8]> = self
            .snapshot
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        for (k, v) in self.writes.range::<[u8], _>((lower, upper)) {
            merged.insert(k.as_slice(), v.as_slice());
        }

        let take = opts.limit.unwrap_or(usize::MAX);
        let out: Vec<(Vec<u8>, Vec<u8>)> = if opts.reverse {
            merged
                .iter()
                .rev()
                .take(take)
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect()
        } else {
            merged
                .iter()
                .take(take)
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect()
        };
        Ok(out)
    }

    fn commit(self) -> anyhow::Result<()> {
        let mut inner = (*self.store).borrow_mut();

        // First committer wins: a key committed after our snapshot that we
        // read or wrote invalidates us.
        for (key, version) in inner.modified.iter() {
            if *version > self.start_version
                && (self.reads.contains(key) || self.writes.contains_key(key))
            {
                let key = String::from_utf8_lossy(key).into_owned();
                debug!(key = %key, "commit lost to a concurrent transaction");
                bail!(ConflictError { key });
            }
        }

        inner.version += 1;
        let version = inner.version;
        for (key, value) in self.writes {
            inner.data.insert(key.clone(), value);
            inner.modified.insert(key, version);
        }
        Ok(())
    }
}
