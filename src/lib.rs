//! Namespace-scoped monotonic ids on an ordered key-value store.
//!
//! Ids are strictly increasing positive integers per namespace, and the key
//! codec packs them so that byte order over stored keys equals numeric id
//! order: `/sensors/9` sorts before `/sensors/10`.
//!
//! ```
//! use subid::{MemStore, SubAllocator};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = MemStore::new();
//! let ids = SubAllocator::new(store);
//!
//! assert_eq!(ids.put("/sensors", b"first reading")?, 1);
//! assert_eq!(ids.put("/sensors", b"second reading")?, 2);
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod encoding;
pub mod store;

pub use alloc::{next_id, SubAllocator};
pub use encoding::{
    prefix_successor, CodecError, IdKeyCodec, Json, KeyEncoding, KeyReader, KeyWriter, PlainKeys,
    RawBytes, ValueEncoding,
};
pub use store::{mem::MemStore, ConflictError, RangeOptions, Store, Txn};
