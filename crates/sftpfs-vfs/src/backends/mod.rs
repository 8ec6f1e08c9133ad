//! VFS backend implementations.

mod memory;

pub use memory::MemoryBackend;
