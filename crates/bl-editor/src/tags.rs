//! Annotation tags: on-canvas labels showing a parameter or action value
//! next to a block instance.
//!
//! Each tag is keyed by `(instance, name)` and remembers the handles of the
//! label entities it has drawn. A tag is either hidden (no handles) or
//! visible (handles tracked). Hiding erases every tracked label and clears
//! the set; re-rendering always hides first so a tag never owns two labels.
//!
//! Registration happens before the first render, so a render failure leaves
//! a registered tag with no label rather than a label with no tag.

use crate::config::TagStyle;
use bl_core::{
    DbError, DbObject, DbResult, Document, Entity, EntityKind, Layer, ObjectId, OpenMode, Point3,
    ScopeMode, TagId, UnitOfWork,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::Arc;

/// What a tag visualizes. Determines its vertical stacking offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagKind {
    Action,
    Parameter,
    Lookup,
}

/// A registered annotation tag.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub value: String,
    pub kind: TagKind,
    pub instance: ObjectId,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Label entities currently drawn for this tag.
    pub displayed: SmallVec<[ObjectId; 2]>,
}

impl Tag {
    /// Label content: `"{name}: {value}"`.
    pub fn label(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}

/// Owns the tag registry and the label entities drawn for it.
pub struct TagManager {
    doc: Arc<dyn Document>,
    style: TagStyle,
    tags: Vec<Tag>,
}

impl TagManager {
    pub fn new(doc: Arc<dyn Document>) -> Self {
        Self::with_style(doc, TagStyle::default())
    }

    pub fn with_style(doc: Arc<dyn Document>, style: TagStyle) -> Self {
        Self {
            doc,
            style,
            tags: Vec::new(),
        }
    }

    /// Placement and appearance used for every label.
    pub fn style(&self) -> &TagStyle {
        &self.style
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// The tag named `name` on `instance` (exact, case-sensitive name).
    pub fn tag(&self, instance: ObjectId, name: &str) -> Option<&Tag> {
        self.find(instance, name).map(|i| &self.tags[i])
    }

    /// Every tag of one instance, in creation order.
    pub fn tags_for(&self, instance: ObjectId) -> Vec<&Tag> {
        self.tags.iter().filter(|t| t.instance == instance).collect()
    }

    /// The whole registry, in creation order.
    pub fn all_tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Number of registered tags, visible or not.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Label anchor for a tag of `kind` on an instance at `origin`.
    pub fn tag_position(&self, origin: Point3, kind: TagKind) -> Point3 {
        let dy = match kind {
            TagKind::Action => self.style.action_y_offset,
            TagKind::Parameter => self.style.parameter_y_offset,
            TagKind::Lookup => self.style.lookup_y_offset,
        };
        Point3::new(origin.x + self.style.x_offset, origin.y + dy, origin.z)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Register a visible tag and draw it. If the instance already has a tag
    /// with this name, its value is updated instead. Returns `None` when the
    /// instance does not resolve.
    pub fn create_tag(
        &mut self,
        instance: ObjectId,
        name: &str,
        value: &str,
        kind: TagKind,
    ) -> Option<TagId> {
        if let Some(i) = self.find(instance, name) {
            let id = self.tags[i].id;
            self.update_tag_value(instance, name, value);
            return Some(id);
        }
        if let Err(err) = self.doc.begin(ScopeMode::Read).instance(instance, OpenMode::ForRead) {
            log::warn!("create_tag({instance}, {name}): {err}");
            return None;
        }

        let now = Utc::now();
        let tag = Tag {
            id: TagId::generate(),
            name: name.to_string(),
            value: value.to_string(),
            kind,
            instance,
            visible: true,
            created_at: now,
            last_modified: now,
            displayed: SmallVec::new(),
        };
        let id = tag.id;
        self.tags.push(tag);
        log::debug!("tag {id} created for {instance} ({name})");

        let idx = self.tags.len() - 1;
        self.display_tag(idx);
        Some(id)
    }

    /// Draw every visible tag of `instance`. Returns how many rendered.
    pub fn show_tags(&mut self, instance: ObjectId) -> usize {
        self.show_matching(|t| t.instance == instance)
    }

    pub fn show_all_tags(&mut self) -> usize {
        self.show_matching(|_| true)
    }

    /// Erase the labels of every tag of `instance`; tags stay registered.
    pub fn hide_tags(&mut self, instance: ObjectId) {
        self.hide_matching(|t| t.instance == instance);
    }

    pub fn hide_all_tags(&mut self) {
        self.hide_matching(|_| true);
    }

    pub fn update_tag_value(&mut self, instance: ObjectId, name: &str, value: &str) -> bool {
        let Some(i) = self.find(instance, name) else {
            log::debug!("update_tag_value: no tag `{name}` on {instance}");
            return false;
        };
        let tag = &mut self.tags[i];
        tag.value = value.to_string();
        tag.last_modified = Utc::now();
        self.refresh_at(i);
        true
    }

    pub fn rename_tag(&mut self, instance: ObjectId, old_name: &str, new_name: &str) -> bool {
        if old_name != new_name && self.find(instance, new_name).is_some() {
            log::warn!("rename_tag: `{new_name}` already exists on {instance}");
            return false;
        }
        let Some(i) = self.find(instance, old_name) else {
            log::debug!("rename_tag: no tag `{old_name}` on {instance}");
            return false;
        };
        let tag = &mut self.tags[i];
        tag.name = new_name.to_string();
        tag.last_modified = Utc::now();
        self.refresh_at(i);
        true
    }

    /// Hide then show one tag so its label matches its current state.
    pub fn refresh_tag_display(&mut self, instance: ObjectId, name: &str) -> bool {
        match self.find(instance, name) {
            Some(i) => self.refresh_at(i),
            None => false,
        }
    }

    /// Toggle a tag's visibility. Hiding erases its label immediately; if
    /// the erase fails the tag stays visible with its label tracked.
    pub fn set_tag_visible(&mut self, instance: ObjectId, name: &str, visible: bool) -> bool {
        let Some(i) = self.find(instance, name) else {
            return false;
        };
        if visible {
            self.tags[i].visible = true;
            return self.refresh_at(i);
        }
        if !self.hide_at(i) {
            return false;
        }
        self.tags[i].visible = false;
        true
    }

    /// Erase the tag's labels and drop it from the registry.
    pub fn remove_tag(&mut self, instance: ObjectId, name: &str) -> bool {
        let Some(i) = self.find(instance, name) else {
            return false;
        };
        if !self.hide_at(i) {
            return false;
        }
        let tag = self.tags.remove(i);
        log::debug!("tag {} removed", tag.id);
        true
    }

    /// Remove every tag of `instance`. Returns how many were removed.
    pub fn remove_tags_for(&mut self, instance: ObjectId) -> usize {
        self.remove_matching(|t| t.instance == instance)
    }

    /// Remove tags whose instance no longer resolves.
    pub fn purge_orphans(&mut self) -> usize {
        let orphans: Vec<ObjectId> = {
            let uow = self.doc.begin(ScopeMode::Read);
            let mut ids: Vec<ObjectId> = self
                .tags
                .iter()
                .map(|t| t.instance)
                .filter(|id| uow.instance(*id, OpenMode::ForRead).is_err())
                .collect();
            ids.dedup();
            ids
        };
        self.remove_matching(|t| orphans.contains(&t.instance))
    }

    /// Remove every tag.
    pub fn clear(&mut self) -> usize {
        self.remove_matching(|_| true)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn find(&self, instance: ObjectId, name: &str) -> Option<usize> {
        self.tags
            .iter()
            .position(|t| t.instance == instance && t.name == name)
    }

    fn show_matching(&mut self, pred: impl Fn(&Tag) -> bool) -> usize {
        let targets: Vec<usize> = (0..self.tags.len())
            .filter(|&i| pred(&self.tags[i]) && self.tags[i].visible)
            .collect();
        targets.into_iter().filter(|&i| self.refresh_at(i)).count()
    }

    fn hide_matching(&mut self, pred: impl Fn(&Tag) -> bool) {
        for i in 0..self.tags.len() {
            if pred(&self.tags[i]) {
                self.hide_at(i);
            }
        }
    }

    fn remove_matching(&mut self, pred: impl Fn(&Tag) -> bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.tags.len() {
            if pred(&self.tags[i]) && self.hide_at(i) {
                self.tags.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    fn refresh_at(&mut self, idx: usize) -> bool {
        if !self.hide_at(idx) {
            return false;
        }
        self.tags[idx].visible && self.display_tag(idx)
    }

    /// Erase every tracked label of the tag. Labels already gone are fine.
    /// On failure the handles are kept so a later hide can retry.
    fn hide_at(&mut self, idx: usize) -> bool {
        if self.tags[idx].displayed.is_empty() {
            return true;
        }
        let erased = erase_labels(&*self.doc, &self.tags[idx].displayed);
        match erased {
            Ok(()) => {
                self.tags[idx].displayed.clear();
                true
            }
            Err(err) => {
                log::warn!("hide tag {}: {err}", self.tags[idx].id);
                false
            }
        }
    }

    fn display_tag(&mut self, idx: usize) -> bool {
        let rendered = self.render_label(&self.tags[idx]);
        match rendered {
            Ok(handle) => {
                log::trace!("tag {} drawn as {handle}", self.tags[idx].id);
                self.tags[idx].displayed.push(handle);
                true
            }
            Err(err) => {
                log::warn!("display tag {}: {err}", self.tags[idx].id);
                false
            }
        }
    }

    fn render_label(&self, tag: &Tag) -> DbResult<ObjectId> {
        let mut uow = self.doc.begin(ScopeMode::Write);
        let inst = uow.instance(tag.instance, OpenMode::ForRead)?;
        let layer = get_or_create_tag_layer(&mut *uow, &self.style)?;
        let label = Entity::new(EntityKind::Text {
            content: tag.label(),
            position: self.tag_position(inst.position, tag.kind),
            height: self.style.text_height,
            color: self.style.color,
        })
        .on_layer(layer);
        let model_space = uow.model_space();
        let handle = uow.append(model_space, DbObject::Entity(label))?;
        uow.commit()?;
        Ok(handle)
    }
}

fn erase_labels(doc: &dyn Document, handles: &[ObjectId]) -> DbResult<()> {
    let mut uow = doc.begin(ScopeMode::Write);
    for &handle in handles {
        match uow.erase(handle) {
            Ok(()) | Err(DbError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    uow.commit()
}

/// Name of the tag layer, creating it (non-plottable) on first use.
fn get_or_create_tag_layer(uow: &mut dyn UnitOfWork, style: &TagStyle) -> DbResult<String> {
    if uow.layer_id(&style.layer).is_none() {
        let mut layer = Layer::new(style.layer.clone());
        layer.plottable = false;
        layer.color = style.color;
        uow.add_layer(layer)?;
        log::debug!("created tag layer `{}`", style.layer);
    }
    Ok(style.layer.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_core::{BlockInstance, MemoryDocument};
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<MemoryDocument>, TagManager, ObjectId) {
        let doc = Arc::new(MemoryDocument::new());
        let def = doc.add_definition("PUMP", []);
        let id = doc.insert_instance(BlockInstance::new(def, Point3::new(10.0, 20.0, 0.0)));
        let manager = TagManager::new(doc.clone());
        (doc, manager, id)
    }

    fn labels(doc: &MemoryDocument) -> Vec<Entity> {
        doc.model_space_entities()
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| matches!(e.kind, EntityKind::Text { .. }))
            .collect()
    }

    #[test]
    fn parameter_tag_offsets() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter).unwrap();

        let drawn = labels(&doc);
        assert_eq!(drawn.len(), 1);
        match &drawn[0].kind {
            EntityKind::Text {
                content, position, ..
            } => {
                assert_eq!(content, "Flow: 12");
                assert_eq!(*position, Point3::new(20.0, 40.0, 0.0));
            }
            _ => panic!("expected Text"),
        }
        assert_eq!(drawn[0].layer, "LOOKUP_TAGS");
    }

    #[test]
    fn kinds_stack_vertically() {
        let (_, tags, _) = setup();
        let o = Point3::ORIGIN;
        assert_eq!(tags.tag_position(o, TagKind::Action).y, 15.0);
        assert_eq!(tags.tag_position(o, TagKind::Parameter).y, 20.0);
        assert_eq!(tags.tag_position(o, TagKind::Lookup).y, 25.0);
        assert_eq!(tags.tag_position(o, TagKind::Lookup).x, 10.0);
    }

    #[test]
    fn tag_layer_is_created_once_and_not_plotted() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "A", "1", TagKind::Action);
        tags.create_tag(id, "B", "2", TagKind::Lookup);
        let layer = doc.layer("LOOKUP_TAGS").unwrap();
        assert!(!layer.plottable);
        assert_eq!(labels(&doc).len(), 2);
    }

    #[test]
    fn hide_twice_is_idempotent() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        tags.hide_tags(id);
        assert!(tags.tag(id, "Flow").unwrap().displayed.is_empty());
        tags.hide_tags(id);
        assert!(tags.tag(id, "Flow").unwrap().displayed.is_empty());
        assert!(labels(&doc).is_empty());
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn show_does_not_duplicate_labels() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        assert_eq!(tags.show_tags(id), 1);
        assert_eq!(tags.show_all_tags(), 1);
        assert_eq!(labels(&doc).len(), 1);
        assert_eq!(tags.tag(id, "Flow").unwrap().displayed.len(), 1);
    }

    #[test]
    fn update_value_redraws_label() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        assert!(tags.update_tag_value(id, "Flow", "15"));
        let drawn = labels(&doc);
        assert_eq!(drawn.len(), 1);
        assert!(matches!(&drawn[0].kind, EntityKind::Text { content, .. } if content == "Flow: 15"));
        assert!(!tags.update_tag_value(id, "Missing", "1"));
    }

    #[test]
    fn create_existing_updates_instead_of_duplicating() {
        let (_, mut tags, id) = setup();
        let a = tags.create_tag(id, "Flow", "1", TagKind::Parameter).unwrap();
        let b = tags.create_tag(id, "Flow", "2", TagKind::Parameter).unwrap();
        assert_eq!(a, b);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.tag(id, "Flow").unwrap().value, "2");
    }

    #[test]
    fn rename_refreshes_and_rejects_collisions() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        tags.create_tag(id, "Head", "3", TagKind::Action);
        assert!(!tags.rename_tag(id, "Flow", "Head"));
        assert!(tags.rename_tag(id, "Flow", "Rate"));
        assert!(tags.tag(id, "Flow").is_none());
        let contents: Vec<String> = labels(&doc)
            .into_iter()
            .filter_map(|e| match e.kind {
                EntityKind::Text { content, .. } => Some(content),
                _ => None,
            })
            .collect();
        assert!(contents.contains(&"Rate: 12".to_string()));
        assert_eq!(contents.len(), 2);
    }

    #[test]
    fn remove_erases_labels() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        assert!(tags.remove_tag(id, "Flow"));
        assert!(tags.is_empty());
        assert!(labels(&doc).is_empty());
        assert!(!tags.remove_tag(id, "Flow"));
    }

    #[test]
    fn invisible_tags_are_not_drawn() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Parameter);
        assert!(tags.set_tag_visible(id, "Flow", false));
        assert!(labels(&doc).is_empty());
        assert_eq!(tags.show_tags(id), 0);
        assert!(labels(&doc).is_empty());
        assert!(tags.set_tag_visible(id, "Flow", true));
        assert_eq!(labels(&doc).len(), 1);
    }

    #[test]
    fn failed_hide_keeps_tag_visible() {
        let (doc, mut tags, id) = setup();
        tags.create_tag(id, "Flow", "12", TagKind::Lookup);
        doc.fail_next_commit();

        assert!(!tags.set_tag_visible(id, "Flow", false));
        let tag = tags.tag(id, "Flow").unwrap();
        assert!(tag.visible);
        assert_eq!(tag.displayed.len(), 1);
        assert_eq!(labels(&doc).len(), 1);

        // A later show still owns the label and does not duplicate it.
        assert_eq!(tags.show_tags(id), 1);
        assert_eq!(labels(&doc).len(), 1);

        assert!(tags.set_tag_visible(id, "Flow", false));
        let tag = tags.tag(id, "Flow").unwrap();
        assert!(!tag.visible);
        assert!(tag.displayed.is_empty());
        assert!(labels(&doc).is_empty());
    }

    #[test]
    fn create_on_missing_instance_registers_nothing() {
        let (doc, mut tags, id) = setup();
        doc.erase(id);
        assert!(tags.create_tag(id, "Flow", "1", TagKind::Lookup).is_none());
        assert!(tags.is_empty());
    }

    #[test]
    fn render_failure_keeps_registration() {
        let (doc, mut tags, id) = setup();
        doc.fail_next_commit();
        let tag_id = tags.create_tag(id, "Flow", "1", TagKind::Lookup);
        assert!(tag_id.is_some());
        assert!(tags.tag(id, "Flow").unwrap().displayed.is_empty());
        assert!(labels(&doc).is_empty());
        assert_eq!(tags.show_tags(id), 1);
        assert_eq!(labels(&doc).len(), 1);
    }

    #[test]
    fn purge_orphans_drops_tags_of_erased_instances() {
        let (doc, mut tags, id) = setup();
        let def = doc.add_definition("VALVE", []);
        let other = doc.insert_instance(BlockInstance::new(def, Point3::ORIGIN));
        tags.create_tag(id, "Flow", "1", TagKind::Lookup);
        tags.create_tag(other, "Size", "DN50", TagKind::Lookup);
        doc.erase(id);
        assert_eq!(tags.purge_orphans(), 1);
        assert_eq!(tags.tags_for(other).len(), 1);
        assert_eq!(labels(&doc).len(), 1);
        assert_eq!(tags.clear(), 1);
        assert!(labels(&doc).is_empty());
    }
}
