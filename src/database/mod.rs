pub mod document;
pub mod memory;
pub mod postgres;
pub mod store;

pub use document::{typed_id, Document, DocumentError, IdRef};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use store::{DocumentStore, StoreError, Update, UpdateResult};
