//! Entity input: where bytes come from, how they become characters, and the
//! stack of nested entities the parser reads through.

mod encoding;
pub(crate) mod manager;
pub mod source;
pub(crate) mod spooler;

pub use encoding::{probe, BaseEncoding, Probe};
pub use source::{
    resolve_system_id, EntitySource, EntitySourceRef, FileEntitySource, MemEntitySource,
};
pub use spooler::{CHAR_CHUNK_SIZE, RAW_CHUNK_SIZE};
