pub mod cache;
pub mod factory;
pub mod fs_store;
pub mod sled_store;
pub mod store;

pub use cache::*;
pub use factory::{create_in_memory_store, create_store};
pub use fs_store::FsModelStore;
pub use sled_store::SledModelStore;
pub use store::*;
