pub mod error;
pub mod in_memory_store;
pub mod sqlite_store;
pub mod store;
pub mod unavailable_store;

pub use error::{StoreError, StoreResult};
pub use in_memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{AnonymousChatLog, BoxFuture, OwnershipRecord, SessionRecord, Store, UserRecord};
pub use unavailable_store::UnavailableStore;
