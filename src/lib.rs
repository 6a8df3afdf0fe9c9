//! A generic, single-threaded, in-memory hash table with prime-sized buckets and ordered
//! (link-ring) iteration.
//!
//! This is the container that backs symbol tables, parameter maps, hash joins, and cursor indexes
//! throughout the kernel it was factored out of. See [`HashTable`] for the entry point; the
//! collaborators it is built from — the prime table, named memory handles, the combined
//! bucket/ring storage block, and the cursor/iterator family — are exposed as separate modules so
//! each can be used (and tested) independently of the table body that composes them.

#[macro_use]
extern crate slog;
#[macro_use]
extern crate quick_error;

mod error;
mod iter;
mod memory;
mod node;
mod prime;
mod storage;
mod table;

pub use error::{Error, StateCode};
pub use iter::{Cursor, Iter, IterMut};
pub use memory::MemoryHandle;
pub use node::Entry;
pub use prime::round_up_prime;
pub use table::HashTable;
