//! Aegis Storage - Ordered Map Engine
//!
//! Embedded ordered key-value engine underneath the historian stores. It
//! provides named sorted maps over order-preserving byte keys, lazy range
//! cursors, an engine-wide undo journal for snapshot/rollback, and a single
//! checksummed storage file per database.
//!
//! Key Features:
//! - Order-preserving key encodings (varints, timestamps, strings, floats)
//! - Typed sorted maps with floor/ceiling/higher/lower navigation and rank
//! - Batched range cursors that never hold a lock between batches
//! - Write envelopes with rollback to a version marker
//! - Commit, backup and restore of the whole map set
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod backend;
pub mod codec;
pub mod encoding;
pub mod image;
pub mod map;
pub mod transaction;

pub use backend::{MapStore, StorageStats};
pub use codec::{BincodeCodec, MapKey, ValueCodec};
pub use map::{Cursor, KeyCursor, SortedMap};
pub use transaction::{Envelope, Journal, JournalStats};
