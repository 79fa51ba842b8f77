//! KeyCodec (C1): logical-key encoding and the hashing it's built on.

pub mod codec;
pub mod hash;

pub use codec::{LogicalKey, ValueCategory};
pub use hash::{hash_bytes, hash_seeded, key_hash};
