//! Host document boundary.
//!
//! Every read or write of host objects happens inside a scoped `UnitOfWork`
//! obtained from a `Document`. Objects are resolved by value: callers read a
//! copy, modify it, and `put` it back. A write scope that is dropped without
//! `commit` discards everything written through it.

use crate::error::{DbError, DbResult};
use crate::id::ObjectId;
use crate::model::{BlockDefinition, BlockInstance, DbObject, Entity, Layer};

/// Whether a unit of work may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Read,
    Write,
}

/// Intent when resolving a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ForRead,
    ForWrite,
}

/// A host document that hands out units of work.
pub trait Document: Send + Sync {
    /// Open a new scope. Scopes are not shared across logical operations.
    fn begin(&self, mode: ScopeMode) -> Box<dyn UnitOfWork + '_>;
}

/// A scoped, atomic session against the document's object store.
pub trait UnitOfWork {
    fn mode(&self) -> ScopeMode;

    /// Resolve a handle to a copy of its object.
    ///
    /// # Errors
    /// `NotFound` for stale handles, `ReadOnlyScope` for `ForWrite` in a
    /// read scope.
    fn resolve(&self, id: ObjectId, mode: OpenMode) -> DbResult<DbObject>;

    /// Objects owned by `owner` (definition geometry, drawing-space entities),
    /// in insertion order.
    fn owned(&self, owner: ObjectId) -> DbResult<Vec<ObjectId>>;

    /// Replace an existing object.
    fn put(&mut self, id: ObjectId, object: DbObject) -> DbResult<()>;

    /// Create a new object owned by `owner`.
    fn append(&mut self, owner: ObjectId, object: DbObject) -> DbResult<ObjectId>;

    /// Erase an object and everything it owns.
    fn erase(&mut self, id: ObjectId) -> DbResult<()>;

    /// The drawing space new on-canvas entities are appended to.
    fn model_space(&self) -> ObjectId;

    /// Layer lookup by name (case-insensitive).
    fn layer_id(&self, name: &str) -> Option<ObjectId>;

    fn add_layer(&mut self, layer: Layer) -> DbResult<ObjectId>;

    /// Make every write of this scope durable.
    ///
    /// # Errors
    /// `CommitFailed` if the host rejects the scope; nothing is kept.
    fn commit(self: Box<Self>) -> DbResult<()>;

    // ─── Typed helpers ───────────────────────────────────────────────────

    fn instance(&self, id: ObjectId, mode: OpenMode) -> DbResult<BlockInstance> {
        match self.resolve(id, mode)? {
            DbObject::Instance(inst) => Ok(inst),
            other => Err(wrong_type(id, "block instance", &other)),
        }
    }

    fn definition(&self, id: ObjectId) -> DbResult<BlockDefinition> {
        match self.resolve(id, OpenMode::ForRead)? {
            DbObject::Definition(def) => Ok(def),
            other => Err(wrong_type(id, "block definition", &other)),
        }
    }

    fn entity(&self, id: ObjectId) -> DbResult<Entity> {
        match self.resolve(id, OpenMode::ForRead)? {
            DbObject::Entity(ent) => Ok(ent),
            other => Err(wrong_type(id, "entity", &other)),
        }
    }

    fn put_instance(&mut self, id: ObjectId, instance: BlockInstance) -> DbResult<()> {
        self.put(id, DbObject::Instance(instance))
    }
}

fn wrong_type(id: ObjectId, expected: &'static str, found: &DbObject) -> DbError {
    DbError::WrongType {
        id,
        expected,
        found: found.kind_name(),
    }
}
