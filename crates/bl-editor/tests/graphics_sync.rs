//! Integration tests: graphics sync engine (bl-editor ↔ bl-core).
//!
//! Drives the SyncEngine against an in-memory document, checking that
//! lookup parameters land on transforms, fields and typed parameters in
//! one committed unit of work.

use bl_core::{
    BlockInstance, Entity, EntityKind, Extents, MemoryDocument, ObjectId, ParamValue, Point3,
    Scale3, TextField, TypedParameter,
};
use bl_editor::{LookupParameterMap, SyncConfig, SyncEngine};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params(pairs: &[(&str, &str)]) -> LookupParameterMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn attdef(tag: &str, default: &str) -> Entity {
    Entity::new(EntityKind::AttributeDefinition {
        tag: tag.into(),
        default: default.into(),
        position: Point3::ORIGIN,
        height: 2.5,
    })
}

/// A gate valve definition with two attributes and a dynamic length.
fn valve_doc() -> (Arc<MemoryDocument>, ObjectId) {
    let doc = Arc::new(MemoryDocument::new());
    let def = doc.add_definition("GATE_VALVE", [attdef("SIZE", "DN50"), attdef("RATING", "PN16")]);
    let inst = BlockInstance::new(def, Point3::new(100.0, 50.0, 0.0))
        .with_field(TextField::new("SIZE", "DN50").with_extents(Extents::new(
            Point3::new(100.0, 52.0, 0.0),
            Point3::new(106.0, 54.5, 0.0),
        )))
        .with_field(TextField::new("RATING", "PN16"))
        .with_parameter(
            TypedParameter::new("Length", ParamValue::Distance(20.0))
                .with_grip(Point3::new(120.0, 50.0, 0.0)),
        )
        .with_parameter(TypedParameter::new("Material", ParamValue::Text("Steel".into())));
    let id = doc.insert_instance(inst);
    (doc, id)
}

// ─── Single instance ────────────────────────────────────────────────────

#[test]
fn lookup_row_applies_to_instance() {
    init_logging();
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc.clone());

    let row = params(&[
        ("@SIZE", "DN100"),
        ("RATING", "PN25"),
        ("Length", "32"),
        ("Material", "Brass"),
        ("Scale", "1.5"),
    ]);
    assert!(engine.update_graphics(id, Some(&row)));

    let inst = doc.instance(id).unwrap();
    assert_eq!(inst.field("SIZE").unwrap().value, "DN100");
    assert_eq!(inst.field("RATING").unwrap().value, "PN25");
    assert_eq!(inst.parameter("Length").unwrap().value, ParamValue::Distance(32.0));
    assert_eq!(
        inst.parameter("Material").unwrap().value,
        ParamValue::Text("Brass".into())
    );
    assert_eq!(inst.scale, Scale3::uniform(1.5));
    assert_eq!(inst.position, Point3::new(100.0, 50.0, 0.0));
}

#[test]
fn accessor_sees_engine_writes() {
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc);
    engine.update_graphics(id, Some(&params(&[("@SIZE", "DN150"), ("Material", "PVC")])));

    let current = engine.accessor().get_lookup_parameters(id);
    assert_eq!(current.get("SIZE").map(String::as_str), Some("DN150"));
    assert_eq!(current.get("Material").map(String::as_str), Some("PVC"));
}

#[test]
fn relative_offset_moves_fields_and_grips() {
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc.clone());
    let row = params(&[("Offset", "10,-5")]);

    assert!(engine.update_graphics(id, Some(&row)));
    assert!(engine.update_graphics(id, Some(&row)));

    let inst = doc.instance(id).unwrap();
    assert_eq!(inst.position, Point3::new(120.0, 40.0, 0.0));
    assert_eq!(
        inst.field("SIZE").unwrap().extents.unwrap().min,
        Point3::new(120.0, 42.0, 0.0)
    );
    let grips = engine.accessor().get_block_grips(id);
    assert_eq!(grips[0], Point3::new(120.0, 40.0, 0.0));
    assert_eq!(grips[1], Point3::new(140.0, 40.0, 0.0));
    assert_eq!(grips[2], Point3::new(120.0, 42.0, 0.0));
}

#[test]
fn unparsable_length_falls_back_to_text() {
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc.clone());
    assert!(engine.update_graphics(id, Some(&params(&[("Length", "long")]))));
    assert_eq!(
        doc.instance(id).unwrap().parameter("Length").unwrap().value,
        ParamValue::Text("long".into())
    );
}

#[test]
fn config_from_json_changes_clamp() {
    let (doc, id) = valve_doc();
    let config = SyncConfig::from_json(r#"{ "scale_max": 3.0 }"#).unwrap();
    let engine = SyncEngine::with_config(doc.clone(), config);
    engine.update_graphics(id, Some(&params(&[("scale", "8")])));
    assert_eq!(doc.instance(id).unwrap().scale, Scale3::uniform(3.0));
}

// ─── Batches ────────────────────────────────────────────────────────────

#[test]
fn batch_counts_only_successful_instances() {
    let (doc, a) = valve_doc();
    let def = doc.add_definition("PLAIN", []);
    let b = doc.insert_instance(BlockInstance::new(def, Point3::ORIGIN));
    let gone = doc.insert_instance(BlockInstance::new(def, Point3::ORIGIN));
    doc.erase(gone);

    let engine = SyncEngine::new(doc.clone());
    let row = params(&[("Scale", "2")]);
    assert_eq!(engine.update_multiple_blocks(&[a, gone, b], &row), 2);
    assert_eq!(doc.instance(a).unwrap().scale, Scale3::uniform(2.0));
    assert_eq!(doc.instance(b).unwrap().scale, Scale3::uniform(2.0));
    assert_eq!(engine.pending_count(), 2);
}

#[test]
fn empty_batch_updates_nothing() {
    let (doc, _) = valve_doc();
    let engine = SyncEngine::new(doc);
    assert_eq!(engine.update_multiple_blocks(&[], &params(&[("Scale", "2")])), 0);
    assert_eq!(engine.pending_count(), 0);
}

// ─── Concurrency ────────────────────────────────────────────────────────

#[test]
fn concurrent_updates_keep_one_pending_entry_per_instance() {
    init_logging();
    let (doc, id) = valve_doc();
    let def = doc.add_definition("PLAIN", []);
    let others: Vec<ObjectId> = (0..4)
        .map(|i| doc.insert_instance(BlockInstance::new(def, Point3::new(i as f64, 0.0, 0.0))))
        .collect();
    let engine = Arc::new(SyncEngine::new(doc.clone()));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let engine = Arc::clone(&engine);
            let mut targets = others.clone();
            targets.push(id);
            thread::spawn(move || {
                let material = format!("batch-{n}");
                let row = params(&[("Material", material.as_str()), ("Scale", "2")]);
                engine.update_multiple_blocks(&targets, &row)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
    assert_eq!(engine.pending_count(), 5);

    let status = engine.get_update_status(id);
    assert!(status.is_updating);
    let material = doc.instance(id).unwrap().parameter("Material").unwrap().value.clone();
    assert!(matches!(material, ParamValue::Text(ref s) if s.starts_with("batch-")));
}

// ─── Reset ──────────────────────────────────────────────────────────────

#[test]
fn reset_after_lookup() {
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc.clone());
    engine.update_graphics(id, Some(&params(&[("Scale", "4"), ("Length", "99")])));
    assert!(engine.reset_to_default(id));

    let inst = doc.instance(id).unwrap();
    assert_eq!(inst.scale, Scale3::uniform(1.0));
    assert_eq!(inst.field("SIZE").unwrap().value, "");
    assert_eq!(inst.parameter("Length").unwrap().value, ParamValue::Distance(0.0));
    assert_eq!(inst.parameter("Material").unwrap().value, ParamValue::Text(String::new()));
}

#[test]
fn reset_of_erased_instance_fails() {
    let (doc, id) = valve_doc();
    let engine = SyncEngine::new(doc.clone());
    doc.erase(id);
    assert!(!engine.reset_to_default(id));
}
