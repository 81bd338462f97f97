//! The ordered-store contract the allocator runs against, and a reference
//! in-memory implementation ([`mem::MemStore`]) with snapshot-isolated
//! transactions.

use std::ops::Bound;

use thiserror::Error;

use crate::encoding::{prefix_successor, KeyEncoding, KeyWriter, ValueEncoding};

pub mod mem;
mod readset;

/// Commit-time conflict: some key this transaction read or wrote was
/// committed by another transaction after this one began. Callers retry from
/// scratch; the next id may have advanced.
#[derive(Debug, Error)]
#[error("transaction conflict: {key:?} was committed concurrently")]
pub struct ConflictError {
    pub key: String,
}

/// A bounded range read over physical keys.
#[derive(Debug, Clone)]
pub struct RangeOptions {
    pub lower: Bound<Vec<u8>>,
    pub upper: Bound<Vec<u8>>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl RangeOptions {
    pub fn span(lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        RangeOptions {
            lower,
            upper,
            reverse: false,
            limit: None,
        }
    }

    /// Everything starting with `prefix`, upper-bounded by its successor.
    pub fn prefix(prefix: &[u8]) -> Self {
        let upper = match prefix_successor(prefix) {
            Some(s) => Bound::Excluded(s),
            None => Bound::Unbounded,
        };
        Self::span(Bound::Included(prefix.to_vec()), upper)
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// An open transaction: reads observe a consistent snapshot plus the
/// transaction's own writes; nothing is visible to others until `commit`.
/// Dropping without committing aborts.
pub trait Txn {
    fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()>;
    fn range(&mut self, opts: &RangeOptions) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn commit(self) -> anyhow::Result<()>
    where
        Self: Sized;

    fn get_with<K, V>(&mut self, keys: &K, values: &V, key: &str) -> anyhow::Result<Option<V::Value>>
    where
        K: KeyEncoding,
        V: ValueEncoding,
        Self: Sized,
    {
        // TODO: thread a reusable KeyWriter through instead of allocating one
        // per call.
        let mut kw = KeyWriter::new();
        kw.reserve(keys.estimate_size(key));
        keys.encode(&mut kw, key)?;
        match self.get(kw.as_slice())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(values.decode(&bytes)?)),
        }
    }

    fn put_with<K, V>(
        &mut self,
        keys: &K,
        values: &V,
        key: &str,
        value: &V::Value,
    ) -> anyhow::Result<()>
    where
        K: KeyEncoding,
        V: ValueEncoding,
        Self: Sized,
    {
        let mut kw = KeyWriter::new();
        kw.reserve(keys.estimate_size(key));
        keys.encode(&mut kw, key)?;
        self.put(kw.as_slice(), &values.encode(value)?)
    }
}

pub trait Store {
    type Txn: Txn;

    fn begin(&self) -> Self::Txn;
}
