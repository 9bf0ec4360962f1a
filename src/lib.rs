//! `intbtree`: a persistent, on-disk B-tree mapping 32-bit integer keys to
//! 32-bit integer values.
//!
//! The crate is split the way its antecedent splits storage from engine: a
//! narrow [`store`] module owns nothing but fixed-width cell I/O against a
//! file (or, for tests and in-process embedding, memory), and [`btree`] owns
//! every piece of domain logic — node encoding, search, insert with
//! splitting, delete with rotation/merge rebalancing, and the tail-relocation
//! compaction that keeps the backing file densely packed. See `DESIGN.md` for
//! the open-question resolutions this rewrite made where the source left
//! behavior ambiguous or buggy.
#[macro_use]
mod errors;
pub mod btree;
pub mod store;

pub use btree::Tree;
pub use errors::Error;
pub use store::{FileStore, MemStore, RecordStore};
