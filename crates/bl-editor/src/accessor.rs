//! Lookup-parameter and text-field access for one block instance.
//!
//! Every public method opens its own unit of work and is total: failures are
//! logged and degrade to an empty map, `false`, or `None`. The `pub(crate)`
//! helpers below work inside a caller's unit of work so the sync engine can
//! read and write within a single scope.

use bl_core::{
    BlockInstance, DbError, DbResult, Document, EntityKind, Extents, ObjectId, OpenMode,
    ParamType, ParamValue, Point3, ScopeMode, TextField, TypedParameter, UnitOfWork,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name → value view over an instance's fields and string-typed parameters.
///
/// Ordered by key so iteration (and therefore "last driver wins") is
/// deterministic.
pub type LookupParameterMap = BTreeMap<String, String>;

/// Outcome of writing a raw string into a typed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Converted to the parameter's runtime type.
    Coerced,
    /// Conversion failed; the raw text was stored instead.
    RawFallback,
    /// Parameter is read-only; nothing changed.
    Skipped,
}

/// Reads and writes lookup parameters and text fields of block instances.
#[derive(Clone)]
pub struct Accessor {
    doc: Arc<dyn Document>,
}

impl Accessor {
    pub fn new(doc: Arc<dyn Document>) -> Self {
        Self { doc }
    }

    /// Current lookup parameters: one entry per attribute definition in the
    /// block definition, plus one per string-typed parameter.
    pub fn get_lookup_parameters(&self, id: ObjectId) -> LookupParameterMap {
        let uow = self.doc.begin(ScopeMode::Read);
        uow.instance(id, OpenMode::ForRead)
            .and_then(|inst| lookup_parameters_of(&*uow, &inst))
            .unwrap_or_else(|err| {
                log::warn!("get_lookup_parameters({id}): {err}");
                LookupParameterMap::new()
            })
    }

    /// Write every entry of `params` to the matching field, and to the typed
    /// parameter of the same name. Returns false if the instance cannot be
    /// resolved or the unit of work fails to commit.
    pub fn set_lookup_parameters(&self, id: ObjectId, params: &LookupParameterMap) -> bool {
        let result = (|| -> DbResult<()> {
            let mut uow = self.doc.begin(ScopeMode::Write);
            let mut inst = uow.instance(id, OpenMode::ForWrite)?;
            for (key, value) in params {
                let tag = key.strip_prefix('@').unwrap_or(key);
                write_attribute(&mut inst, tag, value);
            }
            if let Some(list) = inst.parameters.as_mut() {
                for param in list.iter_mut() {
                    if let Some(raw) = params.get(&param.name) {
                        assign_parameter(param, raw);
                    }
                }
            }
            uow.put_instance(id, inst)?;
            uow.commit()
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("set_lookup_parameters({id}): {err}");
                false
            }
        }
    }

    /// Fields with `visible == true`, in instance order.
    pub fn get_visible_attributes(&self, id: ObjectId) -> Vec<TextField> {
        match self.read_instance(id) {
            Ok(inst) => inst.fields.into_iter().filter(|f| f.visible).collect(),
            Err(err) => {
                log::warn!("get_visible_attributes({id}): {err}");
                Vec::new()
            }
        }
    }

    pub fn get_attribute_value(&self, id: ObjectId, tag: &str) -> Option<String> {
        match self.read_instance(id) {
            Ok(inst) => inst.field(tag).map(|f| f.value.clone()),
            Err(err) => {
                log::warn!("get_attribute_value({id}, {tag}): {err}");
                None
            }
        }
    }

    /// Set the first field whose tag matches case-insensitively. Returns
    /// whether a field matched and the write was committed.
    pub fn set_attribute_value(&self, id: ObjectId, tag: &str, value: &str) -> bool {
        let result = (|| -> DbResult<bool> {
            let mut uow = self.doc.begin(ScopeMode::Write);
            let mut inst = uow.instance(id, OpenMode::ForWrite)?;
            if !write_attribute(&mut inst, tag, value) {
                return Ok(false);
            }
            uow.put_instance(id, inst)?;
            uow.commit()?;
            Ok(true)
        })();
        match result {
            Ok(found) => {
                if !found {
                    log::debug!("set_attribute_value({id}): no field `{tag}`");
                }
                found
            }
            Err(err) => {
                log::warn!("set_attribute_value({id}, {tag}): {err}");
                false
            }
        }
    }

    /// Interactive handles: the insertion point, every typed parameter's
    /// control points, then the corners of every visible field's extents.
    pub fn get_block_grips(&self, id: ObjectId) -> Vec<Point3> {
        match self.read_instance(id) {
            Ok(inst) => block_grips(&inst),
            Err(err) => {
                log::warn!("get_block_grips({id}): {err}");
                Vec::new()
            }
        }
    }

    /// Gate for lookup-editing UI: the instance has typed parameters and at
    /// least one lookup parameter.
    pub fn validate_lookup_support(&self, id: ObjectId) -> bool {
        let uow = self.doc.begin(ScopeMode::Read);
        let result = uow.instance(id, OpenMode::ForRead).and_then(|inst| {
            if !inst.is_dynamic() {
                return Ok(false);
            }
            Ok(!lookup_parameters_of(&*uow, &inst)?.is_empty())
        });
        result.unwrap_or_else(|err| {
            log::warn!("validate_lookup_support({id}): {err}");
            false
        })
    }

    /// Union of the extents of every geometric element in the instance's
    /// definition, in definition coordinates.
    pub fn get_block_bounds(&self, id: ObjectId) -> Option<Extents> {
        let uow = self.doc.begin(ScopeMode::Read);
        let result = uow
            .instance(id, OpenMode::ForRead)
            .and_then(|inst| definition_extents(&*uow, inst.definition));
        result.unwrap_or_else(|err| {
            log::warn!("get_block_bounds({id}): {err}");
            None
        })
    }

    fn read_instance(&self, id: ObjectId) -> DbResult<BlockInstance> {
        self.doc.begin(ScopeMode::Read).instance(id, OpenMode::ForRead)
    }
}

// ─── In-scope helpers ─────────────────────────────────────────────────────

pub(crate) fn lookup_parameters_of(
    uow: &dyn UnitOfWork,
    inst: &BlockInstance,
) -> DbResult<LookupParameterMap> {
    let mut map = LookupParameterMap::new();
    for entity_id in uow.owned(inst.definition)? {
        let entity = match uow.entity(entity_id) {
            Ok(entity) => entity,
            // Nested instances and other non-geometry objects.
            Err(DbError::WrongType { .. }) => continue,
            Err(err) => return Err(err),
        };
        if let EntityKind::AttributeDefinition { tag, default, .. } = entity.kind {
            let value = inst
                .field(&tag)
                .map(|f| f.value.clone())
                .unwrap_or(default);
            map.insert(tag, value);
        }
    }
    for param in inst.parameters() {
        if param.declared == ParamType::String {
            map.insert(param.name.clone(), param.value.to_string());
        }
    }
    Ok(map)
}

fn definition_extents(uow: &dyn UnitOfWork, definition: ObjectId) -> DbResult<Option<Extents>> {
    let mut bounds: Option<Extents> = None;
    for entity_id in uow.owned(definition)? {
        let entity = match uow.entity(entity_id) {
            Ok(entity) => entity,
            Err(DbError::WrongType { .. }) => {
                log::trace!("bounds of {definition}: skipping non-geometry {entity_id}");
                continue;
            }
            Err(err) => return Err(err),
        };
        if let Some(ext) = entity.extents() {
            bounds = Some(match bounds {
                Some(acc) => acc.union(&ext),
                None => ext,
            });
        }
    }
    Ok(bounds)
}

fn block_grips(inst: &BlockInstance) -> Vec<Point3> {
    let mut grips = vec![inst.position];
    for param in inst.parameters() {
        grips.extend(param.grips.iter().copied());
    }
    for field in inst.fields.iter().filter(|f| f.visible) {
        if let Some(ext) = field.extents {
            grips.extend(ext.corners());
        }
    }
    grips
}

/// Set a field's text. Returns false if no field matches `tag`.
pub(crate) fn write_attribute(inst: &mut BlockInstance, tag: &str, value: &str) -> bool {
    match inst.field_mut(tag) {
        Some(field) => {
            field.value = value.to_string();
            true
        }
        None => false,
    }
}

/// Store `raw` into a typed parameter, converting it to the parameter's
/// current runtime type. A failed conversion stores the raw text.
pub(crate) fn assign_parameter(param: &mut TypedParameter, raw: &str) -> Assignment {
    if param.read_only {
        log::debug!("parameter `{}` is read-only, skipped", param.name);
        return Assignment::Skipped;
    }
    match param.value.coerce_from(raw) {
        Some(value) => {
            param.value = value;
            Assignment::Coerced
        }
        None => {
            log::warn!(
                "parameter `{}`: {raw:?} is not a valid {:?}, storing raw text",
                param.name,
                param.value.param_type()
            );
            param.value = ParamValue::Text(raw.to_string());
            Assignment::RawFallback
        }
    }
}
