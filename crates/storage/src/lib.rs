mod error;
mod ext;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use ext::StorageExt;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{Document, Record, RecordKind, Versioned};
pub use traits::MarketStorage;
