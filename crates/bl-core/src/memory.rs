//! In-process `Document` implementation.
//!
//! Objects live in a `StableDiGraph` whose edges go from owner → owned
//! (definition → geometry, model space → placed entities). A single mutex
//! serializes units of work; a write scope snapshots the store when it opens
//! and restores the snapshot if it is dropped without a successful commit.

use crate::db::{Document, OpenMode, ScopeMode, UnitOfWork};
use crate::error::{DbError, DbResult};
use crate::id::ObjectId;
use crate::model::*;
use parking_lot::{Mutex, MutexGuard};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct Record {
    id: ObjectId,
    object: DbObject,
}

#[derive(Debug, Clone)]
struct Store {
    graph: StableDiGraph<Record, ()>,

    /// Handle → graph slot. Slots may be reused after erase; handles never are.
    index: HashMap<ObjectId, NodeIndex>,

    /// Upper-cased layer name → layer handle.
    layers: HashMap<String, ObjectId>,

    next_id: u64,
    model_space: ObjectId,
}

impl Store {
    fn new() -> Self {
        let mut store = Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            layers: HashMap::new(),
            next_id: 1,
            model_space: ObjectId::from_raw(0),
        };
        store.model_space = store.insert(
            None,
            DbObject::Definition(BlockDefinition {
                name: "*Model_Space".to_string(),
                base_point: Point3::ORIGIN,
            }),
        );
        store.insert_layer(Layer::new("0"));
        store
    }

    fn insert(&mut self, owner: Option<NodeIndex>, object: DbObject) -> ObjectId {
        let id = ObjectId::from_raw(self.next_id);
        self.next_id += 1;
        let idx = self.graph.add_node(Record { id, object });
        if let Some(owner) = owner {
            self.graph.add_edge(owner, idx, ());
        }
        self.index.insert(id, idx);
        id
    }

    fn insert_layer(&mut self, layer: Layer) -> ObjectId {
        let key = layer.name.to_uppercase();
        if let Some(&existing) = self.layers.get(&key) {
            return existing;
        }
        let id = self.insert(None, DbObject::Layer(layer));
        self.layers.insert(key, id);
        id
    }

    fn slot(&self, id: ObjectId) -> DbResult<NodeIndex> {
        self.index.get(&id).copied().ok_or(DbError::NotFound(id))
    }

    fn get(&self, id: ObjectId) -> DbResult<&DbObject> {
        let idx = self.slot(id)?;
        Ok(&self.graph[idx].object)
    }

    fn owned(&self, owner: ObjectId) -> DbResult<Vec<ObjectId>> {
        let idx = self.slot(owner)?;
        let mut ids: Vec<ObjectId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|child| self.graph[child].id)
            .collect();
        // Handles are monotonic, so sorting restores insertion order.
        ids.sort();
        Ok(ids)
    }

    fn replace(&mut self, id: ObjectId, object: DbObject) -> DbResult<()> {
        let idx = self.slot(id)?;
        let current = &mut self.graph[idx].object;
        if std::mem::discriminant(current) != std::mem::discriminant(&object) {
            return Err(DbError::WrongType {
                id,
                expected: current.kind_name(),
                found: object.kind_name(),
            });
        }
        *current = object;
        Ok(())
    }

    fn erase(&mut self, id: ObjectId) -> DbResult<()> {
        let root = self.slot(id)?;
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            stack.extend(
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .collect::<Vec<_>>(),
            );
            if let Some(record) = self.graph.remove_node(idx) {
                self.index.remove(&record.id);
                if matches!(record.object, DbObject::Layer(_)) {
                    self.layers.retain(|_, layer_id| *layer_id != record.id);
                }
            }
        }
        Ok(())
    }
}

/// A thread-safe, in-memory host document.
pub struct MemoryDocument {
    store: Mutex<Store>,
    fail_next_commit: AtomicBool,
}

impl MemoryDocument {
    /// An empty document with a model space and layer `0`.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::new()),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    // ─── Host-side setup ─────────────────────────────────────────────────

    /// Create a block definition owning the given geometry.
    pub fn add_definition(
        &self,
        name: &str,
        entities: impl IntoIterator<Item = Entity>,
    ) -> ObjectId {
        let mut store = self.store.lock();
        let def = store.insert(
            None,
            DbObject::Definition(BlockDefinition {
                name: name.to_string(),
                base_point: Point3::ORIGIN,
            }),
        );
        let def_idx = store.index[&def];
        for entity in entities {
            store.insert(Some(def_idx), DbObject::Entity(entity));
        }
        def
    }

    /// Place an instance in model space.
    pub fn insert_instance(&self, instance: BlockInstance) -> ObjectId {
        let mut store = self.store.lock();
        let ms = store.index[&store.model_space];
        store.insert(Some(ms), DbObject::Instance(instance))
    }

    /// Erase an object outside any unit of work. Returns false if it was
    /// already gone.
    pub fn erase(&self, id: ObjectId) -> bool {
        self.store.lock().erase(id).is_ok()
    }

    /// Make the next write-scope commit fail (one shot).
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    // ─── Inspection ──────────────────────────────────────────────────────

    pub fn contains(&self, id: ObjectId) -> bool {
        self.store.lock().index.contains_key(&id)
    }

    pub fn instance(&self, id: ObjectId) -> Option<BlockInstance> {
        match self.store.lock().get(id) {
            Ok(DbObject::Instance(inst)) => Some(inst.clone()),
            _ => None,
        }
    }

    pub fn entity(&self, id: ObjectId) -> Option<Entity> {
        match self.store.lock().get(id) {
            Ok(DbObject::Entity(ent)) => Some(ent.clone()),
            _ => None,
        }
    }

    /// Entities placed directly in model space (not instances).
    pub fn model_space_entities(&self) -> Vec<(ObjectId, Entity)> {
        let store = self.store.lock();
        let ids = store.owned(store.model_space).unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| match store.get(id) {
                Ok(DbObject::Entity(ent)) => Some((id, ent.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn layer(&self, name: &str) -> Option<Layer> {
        let store = self.store.lock();
        let id = store.layers.get(&name.to_uppercase())?;
        match store.get(*id) {
            Ok(DbObject::Layer(layer)) => Some(layer.clone()),
            _ => None,
        }
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl Document for MemoryDocument {
    fn begin(&self, mode: ScopeMode) -> Box<dyn UnitOfWork + '_> {
        let guard = self.store.lock();
        let backup = (mode == ScopeMode::Write).then(|| guard.clone());
        Box::new(MemoryUnit {
            doc: self,
            guard,
            backup,
            mode,
            committed: false,
        })
    }
}

struct MemoryUnit<'a> {
    doc: &'a MemoryDocument,
    guard: MutexGuard<'a, Store>,
    /// Snapshot restored on drop unless committed. `None` for read scopes.
    backup: Option<Store>,
    mode: ScopeMode,
    committed: bool,
}

impl MemoryUnit<'_> {
    fn ensure_writable(&self) -> DbResult<()> {
        match self.mode {
            ScopeMode::Write => Ok(()),
            ScopeMode::Read => Err(DbError::ReadOnlyScope),
        }
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn mode(&self) -> ScopeMode {
        self.mode
    }

    fn resolve(&self, id: ObjectId, mode: OpenMode) -> DbResult<DbObject> {
        if mode == OpenMode::ForWrite {
            self.ensure_writable()?;
        }
        self.guard.get(id).cloned()
    }

    fn owned(&self, owner: ObjectId) -> DbResult<Vec<ObjectId>> {
        self.guard.owned(owner)
    }

    fn put(&mut self, id: ObjectId, object: DbObject) -> DbResult<()> {
        self.ensure_writable()?;
        self.guard.replace(id, object)
    }

    fn append(&mut self, owner: ObjectId, object: DbObject) -> DbResult<ObjectId> {
        self.ensure_writable()?;
        let owner_idx = self.guard.slot(owner)?;
        Ok(self.guard.insert(Some(owner_idx), object))
    }

    fn erase(&mut self, id: ObjectId) -> DbResult<()> {
        self.ensure_writable()?;
        self.guard.erase(id)
    }

    fn model_space(&self) -> ObjectId {
        self.guard.model_space
    }

    fn layer_id(&self, name: &str) -> Option<ObjectId> {
        self.guard.layers.get(&name.to_uppercase()).copied()
    }

    fn add_layer(&mut self, layer: Layer) -> DbResult<ObjectId> {
        self.ensure_writable()?;
        Ok(self.guard.insert_layer(layer))
    }

    fn commit(mut self: Box<Self>) -> DbResult<()> {
        if self.mode == ScopeMode::Write && self.doc.fail_next_commit.swap(false, Ordering::SeqCst)
        {
            return Err(DbError::CommitFailed(
                "host rejected the unit of work".to_string(),
            ));
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.committed
            && let Some(backup) = self.backup.take()
        {
            log::debug!("rolling back uncommitted unit of work");
            *self.guard = backup;
        }
    }
}
