pub mod db;
pub mod error;
pub mod id;
pub mod memory;
pub mod model;

pub use db::{Document, OpenMode, ScopeMode, UnitOfWork};
pub use error::{DbError, DbResult};
pub use id::{ObjectId, TagId};
pub use memory::MemoryDocument;
pub use model::*;
