pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{ErrorCategory, StoreError};
pub use memory::MemoryStore;
pub use traits::{DynStore, Store, StoreExt};
pub use types::{LabelSelector, StoredObject};
