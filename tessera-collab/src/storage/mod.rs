//! Durable store implementations.
//!
//! ```text
//! ┌────────────────┐          ┌──────────────────────────────────┐
//! │ MemoryStore    │          │ RocksStore                       │
//! │ (tests, demos) │          │ CF "shapes", LZ4-compressed JSON  │
//! └────────────────┘          └──────────────────────────────────┘
//! ```
//!
//! Both keep a change feed of the full record set for
//! [`DurableStore::subscribe`](crate::channel::DurableStore::subscribe).

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};
