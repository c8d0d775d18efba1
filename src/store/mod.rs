//! Local store abstraction.
//!
//! The durable, keyed Local Store is an external collaborator: the host
//! supplies whatever persistence it has (SQLite, IndexedDB bridge, files).
//! The core only needs the operations in [`LocalStore`]. The
//! [`InMemoryStore`] is a complete reference implementation used by tests and
//! by hosts that accept losing state on restart.

pub mod traits;
pub mod memory;

pub use traits::{LocalStore, StoreError};
pub use memory::InMemoryStore;
