pub mod backend;
pub mod fs;
pub mod memory;
pub mod session;

pub use backend::{StorageBackend, StoreError, StoreResult};
pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use session::{
    CALLBACK_CHANNEL_KEY, CLICK_ID_KEY, FIRST_SESSION_KEY, NullFields, SESSION_KEY, Scope,
    SessionRecord, SessionStore, WriteTarget, merge_record,
};
