mod durable;
mod in_memory;
mod store;

pub use durable::SledLogStore;
pub use in_memory::InMemoryLogStore;
pub use store::LogStore;
pub use store::StoreError;
