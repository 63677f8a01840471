//! Graphics synchronization engine: lookup parameters → instance state.
//!
//! Given an instance and a (possibly partial) parameter map, the engine
//! classifies every parameter name (see `classify`), derives the new scale
//! and position, and writes transform, text fields and typed parameters in a
//! single unit of work.
//!
//! Every request is recorded in a pending map keyed by instance, guarded by
//! one lock. A newer request for the same instance overwrites the older one.
//! The update itself runs synchronously inside the requesting call, so the
//! pending map reports the last *requested* state, not necessarily the last
//! *applied* one when two threads update the same instance at once.

use crate::accessor::{Accessor, Assignment, LookupParameterMap, assign_parameter, write_attribute};
use crate::classify::{ParamDriver, classify, parse_number, parse_offset};
use crate::config::{PositionMode, SyncConfig};
use bl_core::{
    BlockInstance, DbResult, Document, ObjectId, OpenMode, ParamValue, Point3, Scale3, ScopeMode,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The latest update requested for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct PendingUpdate {
    pub instance: ObjectId,
    pub parameters: LookupParameterMap,
    pub requested_at: DateTime<Utc>,
}

/// Point-in-time view of an instance's pending entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphicsUpdateStatus {
    pub is_updating: bool,
    /// Unix epoch when no entry exists.
    pub last_update_time: DateTime<Utc>,
    pub pending_parameters: LookupParameterMap,
}

/// Position and scale of an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Point3,
    pub scale: Scale3,
}

impl Transform {
    pub fn of(inst: &BlockInstance) -> Self {
        Self {
            position: inst.position,
            scale: inst.scale,
        }
    }

    pub fn lerp(self, other: Transform, t: f64) -> Transform {
        Transform {
            position: self.position.lerp(other.position, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }
}

/// Applies lookup parameters to block instances.
pub struct SyncEngine {
    doc: Arc<dyn Document>,
    accessor: Accessor,
    config: SyncConfig,
    pending: Mutex<HashMap<ObjectId, PendingUpdate>>,
}

impl SyncEngine {
    pub fn new(doc: Arc<dyn Document>) -> Self {
        Self::with_config(doc, SyncConfig::default())
    }

    pub fn with_config(doc: Arc<dyn Document>, config: SyncConfig) -> Self {
        Self {
            accessor: Accessor::new(doc.clone()),
            doc,
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Accessor sharing this engine's document.
    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    /// Clamp bounds, position mode and driver keywords in effect.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ─── Updates ─────────────────────────────────────────────────────────

    /// Record and apply an update. With `None`, the instance's current lookup
    /// parameters are re-applied. Returns false if the instance is gone or
    /// the write fails.
    pub fn update_graphics(&self, id: ObjectId, parameters: Option<&LookupParameterMap>) -> bool {
        if let Err(err) = self.doc.begin(ScopeMode::Read).instance(id, OpenMode::ForRead) {
            log::warn!("update_graphics({id}): {err}");
            return false;
        }
        let parameters = match parameters {
            Some(p) => p.clone(),
            None => self.accessor.get_lookup_parameters(id),
        };
        let update = self.enqueue(id, parameters);
        self.execute_update(id, &update, None)
    }

    /// Reach `target` with an eased transition of scale and position over
    /// `duration`, then apply the full update. The pending entry is recorded
    /// before the first frame. A zero duration, a zero frame interval in the
    /// config, or a target equal to the current transform applies
    /// immediately.
    pub fn smooth_update_graphics(
        &self,
        id: ObjectId,
        target: &LookupParameterMap,
        duration: Duration,
    ) -> bool {
        let frame = Duration::from_millis(self.config.smooth_frame_ms);
        if duration.is_zero() || frame.is_zero() {
            return self.update_graphics(id, Some(target));
        }

        let start = match self.doc.begin(ScopeMode::Read).instance(id, OpenMode::ForRead) {
            Ok(inst) => inst,
            Err(err) => {
                log::warn!("smooth_update_graphics({id}): {err}");
                return false;
            }
        };
        let from = Transform::of(&start);
        let to = Transform {
            position: self.calculate_new_position(&start, target),
            scale: self.calculate_new_scale(&start, target),
        };
        let update = self.enqueue(id, target.clone());

        if from != to {
            let frames = (duration.as_millis() / frame.as_millis()).max(1);
            for step in 1..frames {
                let t = ease_in_out(step as f64 / frames as f64);
                if let Err(err) = self.apply_frame(id, from.lerp(to, t)) {
                    log::warn!("smooth_update_graphics({id}) frame {step}: {err}");
                    return false;
                }
                std::thread::sleep(frame);
            }
        }

        self.execute_update(id, &update, Some(to))
    }

    /// Apply the same parameters to each instance independently. Returns the
    /// number of instances updated.
    pub fn update_multiple_blocks(&self, ids: &[ObjectId], parameters: &LookupParameterMap) -> usize {
        ids.iter()
            .filter(|&&id| self.update_graphics(id, Some(parameters)))
            .count()
    }

    /// Uniform scale 1, visible fields emptied, typed parameters zeroed
    /// (string and distance types only).
    pub fn reset_to_default(&self, id: ObjectId) -> bool {
        let result = (|| -> DbResult<()> {
            let mut uow = self.doc.begin(ScopeMode::Write);
            let mut inst = uow.instance(id, OpenMode::ForWrite)?;
            inst.scale = Scale3::uniform(1.0);
            for field in inst.fields.iter_mut().filter(|f| f.visible) {
                field.value.clear();
            }
            if let Some(params) = inst.parameters.as_mut() {
                for param in params.iter_mut().filter(|p| !p.read_only) {
                    if let Some(zero) = ParamValue::zero_for(param.declared) {
                        param.value = zero;
                    }
                }
            }
            uow.put_instance(id, inst)?;
            uow.commit()
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("reset_to_default({id}): {err}");
                false
            }
        }
    }

    // ─── Pending map ─────────────────────────────────────────────────────

    /// Snapshot of the pending entry for `id`, or the default status if none.
    pub fn get_update_status(&self, id: ObjectId) -> GraphicsUpdateStatus {
        match self.pending.lock().get(&id) {
            Some(update) => GraphicsUpdateStatus {
                is_updating: true,
                last_update_time: update.requested_at,
                pending_parameters: update.parameters.clone(),
            },
            None => GraphicsUpdateStatus::default(),
        }
    }

    /// Drop every pending entry. Instances keep their applied state.
    pub fn clear_update_queue(&self) {
        self.pending.lock().clear();
    }

    /// Number of instances with a pending entry.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ─── Calculations ────────────────────────────────────────────────────

    /// Scale after applying the scale drivers in `parameters`.
    ///
    /// Each driver starts from the instance's current scale; the last one
    /// that parses wins. Values are clamped to the configured range. A value
    /// that is not a number leaves the scale unchanged.
    pub fn calculate_new_scale(&self, inst: &BlockInstance, parameters: &LookupParameterMap) -> Scale3 {
        let mut scale = inst.scale;
        for (name, value) in parameters {
            if self.driver(inst, name) != ParamDriver::Scale {
                continue;
            }
            match parse_number(value) {
                Some(v) => {
                    let clamped = v.max(self.config.scale_min).min(self.config.scale_max);
                    scale = Scale3::uniform(clamped);
                }
                None => log::debug!("scale driver `{name}`: {value:?} is not a number"),
            }
        }
        scale
    }

    /// Position after applying the position drivers in `parameters`.
    ///
    /// In relative mode the parsed `x,y[,z]` is added to the current
    /// position, so re-applying the same map keeps moving the instance.
    pub fn calculate_new_position(
        &self,
        inst: &BlockInstance,
        parameters: &LookupParameterMap,
    ) -> Point3 {
        let mut position = inst.position;
        for (name, value) in parameters {
            if self.driver(inst, name) != ParamDriver::Position {
                continue;
            }
            let offset = parse_offset(value);
            position = match self.config.position_mode {
                PositionMode::Relative => inst.position + offset,
                PositionMode::Absolute => offset,
            };
        }
        position
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn driver(&self, inst: &BlockInstance, name: &str) -> ParamDriver {
        classify(name, &self.config.keywords, |n| inst.parameter(n).is_some())
    }

    fn enqueue(&self, id: ObjectId, parameters: LookupParameterMap) -> PendingUpdate {
        let update = PendingUpdate {
            instance: id,
            parameters,
            requested_at: Utc::now(),
        };
        self.pending.lock().insert(id, update.clone());
        update
    }

    fn execute_update(&self, id: ObjectId, update: &PendingUpdate, transform: Option<Transform>) -> bool {
        let result = (|| -> DbResult<()> {
            let mut uow = self.doc.begin(ScopeMode::Write);
            let mut inst = uow.instance(id, OpenMode::ForWrite)?;
            let target = transform.unwrap_or_else(|| Transform {
                position: self.calculate_new_position(&inst, &update.parameters),
                scale: self.calculate_new_scale(&inst, &update.parameters),
            });
            apply_transform(&mut inst, target);
            let fields = self.update_attributes(&mut inst, &update.parameters);
            let params = self.update_dynamic_properties(&mut inst, &update.parameters);
            uow.put_instance(id, inst)?;
            uow.commit()?;
            log::debug!("updated {id}: {fields} field(s), {params} parameter(s)");
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("update of {id} failed: {err}");
                false
            }
        }
    }

    fn apply_frame(&self, id: ObjectId, transform: Transform) -> DbResult<()> {
        let mut uow = self.doc.begin(ScopeMode::Write);
        let mut inst = uow.instance(id, OpenMode::ForWrite)?;
        apply_transform(&mut inst, transform);
        uow.put_instance(id, inst)?;
        uow.commit()
    }

    /// Write every parameter whose name (or `@`-stripped name) matches a
    /// field. Returns the number of fields written.
    fn update_attributes(&self, inst: &mut BlockInstance, parameters: &LookupParameterMap) -> usize {
        let mut written = 0;
        for (name, value) in parameters {
            let tag = match self.driver(inst, name) {
                ParamDriver::Field(tag) => tag,
                _ => name.clone(),
            };
            if write_attribute(inst, &tag, value) {
                written += 1;
            }
        }
        written
    }

    /// Write typed-parameter drivers, coercing to each parameter's runtime
    /// type. Returns the number of parameters written.
    fn update_dynamic_properties(
        &self,
        inst: &mut BlockInstance,
        parameters: &LookupParameterMap,
    ) -> usize {
        let mut written = 0;
        for (name, value) in parameters {
            if self.driver(inst, name) != ParamDriver::TypedParameter {
                continue;
            }
            if let Some(param) = inst.parameter_mut(name)
                && assign_parameter(param, value) != Assignment::Skipped
            {
                written += 1;
            }
        }
        written
    }
}

/// Move and scale an instance; field extents and parameter grips follow the
/// translation.
fn apply_transform(inst: &mut BlockInstance, target: Transform) {
    let delta = target.position - inst.position;
    inst.position = target.position;
    inst.scale = target.scale;
    if delta == Point3::ORIGIN {
        return;
    }
    for field in &mut inst.fields {
        if let Some(ext) = field.extents {
            field.extents = Some(ext.translate(delta));
        }
    }
    if let Some(params) = inst.parameters.as_mut() {
        for param in params.iter_mut() {
            for grip in param.grips.iter_mut() {
                *grip = *grip + delta;
            }
        }
    }
}

/// Smoothstep easing on `[0, 1]`.
fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
