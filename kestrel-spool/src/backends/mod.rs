mod file;
mod memory;

pub use file::FilePendingStore;
pub use memory::MemoryPendingStore;
