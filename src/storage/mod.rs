mod kv;
mod schema;
mod types;

pub use kv::{KeyValueStore, MemoryKeyValueStore, LIKES_KEY, USER_TOKEN_KEY};
pub use schema::Database;
pub use types::{DatabaseError, PersistenceError};
