//! Storage backends.
//!
//! [`MemoryStorage`] is the ephemeral, session-scoped store credentials live
//! in. [`FileStorage`] is a durable store; the session layer only ever reads
//! it once, to migrate credentials left behind by older clients.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;
