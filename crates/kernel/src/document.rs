use crate::schema::{Cardinality, RelationDescriptor, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use verso_common::{CREATED_AT_FIELD, EntityId, ID_FIELD, UPDATED_AT_FIELD, VERSION_FIELD};

/// Attribute mapping of a single node.
pub type Fields = Map<String, Value>;

/// Per-node history tracking flag.
///
/// `Inherit` defers to the configured default; the other two override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackFlag {
    #[default]
    Inherit,
    Enabled,
    Suppressed,
}

/// Where an embedded node hangs in its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub id: EntityId,
    pub relation: String,
}

/// Errors from document tree operations.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unknown document type {0:?}")]
    UnknownType(String),
    #[error("type {0:?} is embedded and cannot be a document root")]
    NotRoot(String),
    #[error("node {0} not found")]
    NodeNotFound(EntityId),
    #[error("type {kind:?} has no relation {relation:?}")]
    UnknownRelation { kind: String, relation: String },
    #[error("field {0:?} is managed by the history engine")]
    ReservedField(String),
    #[error("{kind}.{field} is a relation, not an attribute")]
    RelationField { kind: String, field: String },
    #[error("the document root cannot be detached")]
    DetachRoot,
    #[error("malformed snapshot for {kind:?}: {reason}")]
    MalformedSnapshot { kind: String, reason: String },
}

/// One node of a document tree.
#[derive(Debug, Clone)]
pub struct Node {
    id: EntityId,
    kind: String,
    parent: Option<ParentLink>,
    fields: Fields,
    /// Field values as of the last commit.
    committed: Fields,
    new_record: bool,
    children: BTreeMap<String, Vec<EntityId>>,
    committed_children: BTreeMap<String, Vec<EntityId>>,
    track: TrackFlag,
}

impl Node {
    fn new(id: EntityId, kind: String, parent: Option<ParentLink>) -> Self {
        let mut fields = Fields::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        Self {
            id,
            kind,
            parent,
            fields,
            committed: Fields::new(),
            new_record: true,
            children: BTreeMap::new(),
            committed_children: BTreeMap::new(),
            track: TrackFlag::Inherit,
        }
    }

    /// Identifier, also stored under `_id`.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Registered type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Owning node and relation. `None` for the root.
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Current field values, uncommitted edits included.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Field values as of the last commit.
    pub fn committed_fields(&self) -> &Fields {
        &self.committed
    }

    /// Never committed yet.
    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    /// This node's own flag, not the resolved one.
    pub fn track_flag(&self) -> TrackFlag {
        self.track
    }

    /// Child ids under `relation` in order. Empty when unset or unknown.
    pub fn children(&self, relation: &str) -> &[EntityId] {
        self.children
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn committed_children(&self, relation: &str) -> &[EntityId] {
        self.committed_children
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `{field: [old, new]}` for every field that differs from the last
    /// commit. Absent and `null` compare equal.
    pub fn changes(&self) -> Fields {
        let mut out = Fields::new();
        for (key, new) in &self.fields {
            let old = self.committed.get(key).unwrap_or(&Value::Null);
            if old != new {
                out.insert(key.clone(), Value::Array(vec![old.clone(), new.clone()]));
            }
        }
        for (key, old) in &self.committed {
            if !self.fields.contains_key(key) && !old.is_null() {
                out.insert(key.clone(), Value::Array(vec![old.clone(), Value::Null]));
            }
        }
        out
    }

    fn is_dirty(&self) -> bool {
        self.new_record || !self.changes().is_empty()
    }
}

/// An in-memory document: one root node and its embedded tree.
///
/// All mutations go through explicit operations so the tree can report what
/// changed since the last commit. Nodes live in a BTreeMap arena keyed by id;
/// relations store child ids in order.
#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    root: EntityId,
    nodes: BTreeMap<EntityId, Node>,
    /// Subtrees detached since the last commit. Kept so the next diff can
    /// report removals and a restore can bring them back.
    detached: BTreeMap<EntityId, Node>,
}

impl Document {
    /// Create a fresh, unsaved document of a root type.
    pub fn new(schema: Arc<Schema>, kind: &str) -> Result<Self, DocumentError> {
        Self::with_id(schema, kind, EntityId::new())
    }

    /// Create a fresh, unsaved document with a chosen root id.
    pub fn with_id(schema: Arc<Schema>, kind: &str, id: EntityId) -> Result<Self, DocumentError> {
        let ty = schema
            .get(kind)
            .ok_or_else(|| DocumentError::UnknownType(kind.to_string()))?;
        if !ty.is_root() {
            return Err(DocumentError::NotRoot(kind.to_string()));
        }
        let mut nodes = BTreeMap::new();
        nodes.insert(id, Node::new(id, kind.to_string(), None));
        Ok(Self {
            schema,
            root: id,
            nodes,
            detached: BTreeMap::new(),
        })
    }

    /// Rebuild a clean document from a stored snapshot mapping.
    pub fn from_snapshot(
        schema: Arc<Schema>,
        kind: &str,
        body: &Fields,
    ) -> Result<Self, DocumentError> {
        let id = member_id(kind, body)?.ok_or_else(|| DocumentError::MalformedSnapshot {
            kind: kind.to_string(),
            reason: format!("missing {ID_FIELD}"),
        })?;
        let mut doc = Self::with_id(schema, kind, id)?;
        doc.restore(id, body, &[])?;
        doc.commit();
        Ok(doc)
    }

    /// Type registry the document was built against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Root node id. Stable for the document's lifetime.
    pub fn root(&self) -> EntityId {
        self.root
    }

    /// Type name of the root node.
    pub fn root_kind(&self) -> &str {
        &self.nodes[&self.root].kind
    }

    /// Live node by id.
    pub fn node(&self, id: EntityId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Type name of a live node.
    pub fn kind(&self, id: EntityId) -> Result<&str, DocumentError> {
        Ok(&self.live(id)?.kind)
    }

    /// Owning node of a live embedded node. `None` for the root or an
    /// unknown id.
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.nodes.get(&id)?.parent.as_ref().map(|p| p.id)
    }

    /// Ordered child ids of a live node under `relation`.
    pub fn children(&self, id: EntityId, relation: &str) -> &[EntityId] {
        self.nodes
            .get(&id)
            .map(|n| n.children(relation))
            .unwrap_or(&[])
    }

    /// The single child of a `one` relation, if set.
    pub fn child(&self, id: EntityId, relation: &str) -> Option<EntityId> {
        self.children(id, relation).first().copied()
    }

    /// Current fields of a live node.
    pub fn attributes(&self, id: EntityId) -> Result<&Fields, DocumentError> {
        Ok(&self.live(id)?.fields)
    }

    /// One field of a live node.
    pub fn get(&self, id: EntityId, field: &str) -> Option<&Value> {
        self.nodes.get(&id)?.fields.get(field)
    }

    /// `{field: [old, new]}` for the node's dirtied fields.
    pub fn changes(&self, id: EntityId) -> Result<Fields, DocumentError> {
        Ok(self.live(id)?.changes())
    }

    /// Whether a live node has never been committed.
    pub fn is_new_record(&self, id: EntityId) -> Result<bool, DocumentError> {
        Ok(self.live(id)?.new_record)
    }

    /// Write an attribute.
    pub fn set(
        &mut self,
        id: EntityId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), DocumentError> {
        let kind = self.live(id)?.kind.clone();
        self.check_writable(&kind, field)?;
        self.live_mut(id)?
            .fields
            .insert(field.to_string(), value.into());
        Ok(())
    }

    /// Remove an attribute. Returns the previous value.
    pub fn unset(&mut self, id: EntityId, field: &str) -> Result<Option<Value>, DocumentError> {
        let kind = self.live(id)?.kind.clone();
        self.check_writable(&kind, field)?;
        Ok(self.live_mut(id)?.fields.remove(field))
    }

    /// The root's current version, if it has been through a tracked save.
    pub fn version(&self) -> Option<u64> {
        self.get(self.root, VERSION_FIELD).and_then(Value::as_u64)
    }

    /// Write the root's version in place. Reserved for the history engine.
    pub fn set_version(&mut self, version: u64) {
        if let Some(root) = self.nodes.get_mut(&self.root) {
            root.fields
                .insert(VERSION_FIELD.to_string(), Value::from(version));
        }
    }

    /// Build a new child under `relation`. For a `one` relation an existing
    /// child is detached and replaced.
    pub fn embed(
        &mut self,
        parent: EntityId,
        relation: &str,
        fields: Fields,
    ) -> Result<EntityId, DocumentError> {
        let descriptor = self.relation_of(parent, relation)?.clone();
        for key in fields.keys() {
            self.check_writable(&descriptor.target, key)?;
        }
        if descriptor.cardinality == Cardinality::One
            && let Some(existing) = self.child(parent, relation)
        {
            self.detach(existing)?;
        }

        let id = EntityId::new();
        let mut node = Node::new(
            id,
            descriptor.target.clone(),
            Some(ParentLink {
                id: parent,
                relation: relation.to_string(),
            }),
        );
        node.fields.extend(fields);
        self.nodes.insert(id, node);
        self.live_mut(parent)?
            .children
            .entry(relation.to_string())
            .or_default()
            .push(id);
        Ok(id)
    }

    /// Remove a child and its whole subtree from the document.
    pub fn detach(&mut self, id: EntityId) -> Result<(), DocumentError> {
        if id == self.root {
            return Err(DocumentError::DetachRoot);
        }
        let link = self
            .live(id)?
            .parent
            .clone()
            .ok_or(DocumentError::DetachRoot)?;
        if let Some(list) = self
            .nodes
            .get_mut(&link.id)
            .and_then(|p| p.children.get_mut(&link.relation))
        {
            list.retain(|c| *c != id);
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children.values().flatten().copied());
                self.detached.insert(next, node);
            }
        }
        Ok(())
    }

    /// Mark the whole tree clean. Called by the document layer once a write
    /// has succeeded.
    pub fn commit(&mut self) {
        for node in self.nodes.values_mut() {
            node.committed = node.fields.clone();
            node.committed_children = node.children.clone();
            node.new_record = false;
        }
        self.detached.clear();
    }

    /// Stamp `created_at` on new nodes and `updated_at` on new or dirty ones.
    pub fn touch(&mut self, at: &str) {
        for node in self.nodes.values_mut() {
            if !node.is_dirty() {
                continue;
            }
            if node.new_record && !node.fields.contains_key(CREATED_AT_FIELD) {
                node.fields
                    .insert(CREATED_AT_FIELD.to_string(), Value::from(at));
            }
            node.fields
                .insert(UPDATED_AT_FIELD.to_string(), Value::from(at));
        }
    }

    /// Structurally overwrite a subtree from a snapshot mapping.
    ///
    /// Every attribute is replaced (fields missing from the snapshot are
    /// dropped) except `_id` and the names in `preserve`. A relation named in
    /// `preserve` keeps its live members untouched. Other relation trees are
    /// reconciled by `_id`: members missing from the snapshot are detached,
    /// members missing from the tree are brought back from the detached set
    /// or recreated with their snapshotted id.
    pub fn restore(
        &mut self,
        id: EntityId,
        snapshot: &Fields,
        preserve: &[&str],
    ) -> Result<(), DocumentError> {
        let kind = self.live(id)?.kind.clone();
        let relations = self.schema.relations(&kind).to_vec();

        let node = self.live_mut(id)?;
        let mut fields = Fields::new();
        for (key, value) in snapshot {
            let kept = key == ID_FIELD || preserve.contains(&key.as_str());
            if kept || relations.iter().any(|r| r.name == *key) {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        for key in std::iter::once(ID_FIELD).chain(preserve.iter().copied()) {
            if let Some(value) = node.fields.get(key) {
                fields.insert(key.to_string(), value.clone());
            }
        }
        node.fields = fields;

        for relation in &relations {
            if preserve.contains(&relation.name.as_str()) {
                continue;
            }
            let members = snapshot_members(&kind, relation, snapshot.get(&relation.name))?;
            self.reconcile(id, relation, &members, preserve)?;
        }
        Ok(())
    }

    /// Read-only view of a node, live or detached since the last commit.
    pub fn entity(&self, id: EntityId) -> Option<crate::NodeRef<'_>> {
        self.nodes
            .get(&id)
            .or_else(|| self.detached.get(&id))
            .map(|node| crate::NodeRef::new(self, node))
    }

    /// The flag set on a live node itself. Ancestors are not consulted.
    pub fn track_flag(&self, id: EntityId) -> Result<TrackFlag, DocumentError> {
        Ok(self.live(id)?.track)
    }

    /// Set a node's flag, returning the previous one.
    pub fn set_track_flag(
        &mut self,
        id: EntityId,
        flag: TrackFlag,
    ) -> Result<TrackFlag, DocumentError> {
        let node = self.live_mut(id)?;
        Ok(std::mem::replace(&mut node.track, flag))
    }

    /// Run `f` with history tracking suppressed at `id`.
    ///
    /// The node's previous flag is restored when `f` returns or unwinds, so
    /// nested scopes each restore the value they found.
    pub fn without_history_tracking<R>(
        &mut self,
        id: EntityId,
        f: impl FnOnce(&mut Document) -> R,
    ) -> Result<R, DocumentError> {
        let prior = self.set_track_flag(id, TrackFlag::Suppressed)?;
        let guard = SuppressionGuard {
            doc: self,
            id,
            prior,
        };
        Ok(f(&mut *guard.doc))
    }

    pub(crate) fn detached_node(&self, id: EntityId) -> Option<&Node> {
        self.detached.get(&id)
    }

    pub(crate) fn live_node(&self, id: EntityId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn live(&self, id: EntityId) -> Result<&Node, DocumentError> {
        self.nodes.get(&id).ok_or(DocumentError::NodeNotFound(id))
    }

    fn live_mut(&mut self, id: EntityId) -> Result<&mut Node, DocumentError> {
        self.nodes.get_mut(&id).ok_or(DocumentError::NodeNotFound(id))
    }

    fn relation_of(&self, id: EntityId, relation: &str) -> Result<&RelationDescriptor, DocumentError> {
        let kind = &self.live(id)?.kind;
        self.schema
            .relation(kind, relation)
            .ok_or_else(|| DocumentError::UnknownRelation {
                kind: kind.clone(),
                relation: relation.to_string(),
            })
    }

    fn check_writable(&self, kind: &str, field: &str) -> Result<(), DocumentError> {
        if field == ID_FIELD || field == VERSION_FIELD {
            return Err(DocumentError::ReservedField(field.to_string()));
        }
        if self.schema.relation(kind, field).is_some() {
            return Err(DocumentError::RelationField {
                kind: kind.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    fn reconcile(
        &mut self,
        parent: EntityId,
        relation: &RelationDescriptor,
        members: &[&Fields],
        preserve: &[&str],
    ) -> Result<(), DocumentError> {
        let wanted = members
            .iter()
            .map(|m| member_id(&relation.target, m))
            .collect::<Result<Vec<_>, _>>()?;

        let current = self.children(parent, &relation.name).to_vec();
        for child in current {
            if !wanted.contains(&Some(child)) && self.nodes.contains_key(&child) {
                self.detach(child)?;
            }
        }

        let mut order = Vec::with_capacity(members.len());
        for (member, id) in members.iter().zip(wanted) {
            let id = self.adopt(parent, relation, id);
            self.restore(id, member, preserve)?;
            order.push(id);
        }
        self.live_mut(parent)?
            .children
            .insert(relation.name.clone(), order);
        Ok(())
    }

    /// Find or create the node a snapshot member should be restored into.
    fn adopt(&mut self, parent: EntityId, relation: &RelationDescriptor, id: Option<EntityId>) -> EntityId {
        let link = ParentLink {
            id: parent,
            relation: relation.name.clone(),
        };
        if let Some(id) = id {
            if self.nodes.get(&id).is_some_and(|n| n.parent.as_ref() == Some(&link)) {
                return id;
            }
            if let Some(mut node) = self.detached.remove(&id) {
                node.parent = Some(link);
                self.nodes.insert(id, node);
                return id;
            }
        }
        let id = match id {
            Some(id) if !self.nodes.contains_key(&id) => id,
            _ => EntityId::new(),
        };
        tracing::debug!(%id, kind = %relation.target, "recreating embedded node from snapshot");
        self.nodes
            .insert(id, Node::new(id, relation.target.clone(), Some(link)));
        id
    }
}

/// Restores a node's previous flag on drop.
struct SuppressionGuard<'a> {
    doc: &'a mut Document,
    id: EntityId,
    prior: TrackFlag,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        let doc = &mut *self.doc;
        if let Some(node) = doc.nodes.get_mut(&self.id) {
            node.track = self.prior;
        } else if let Some(node) = doc.detached.get_mut(&self.id) {
            node.track = self.prior;
        }
    }
}

fn member_id(kind: &str, member: &Fields) -> Result<Option<EntityId>, DocumentError> {
    match member.get(ID_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|e: verso_common::ParseIdError| {
            DocumentError::MalformedSnapshot {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        }),
        Some(other) => Err(DocumentError::MalformedSnapshot {
            kind: kind.to_string(),
            reason: format!("{ID_FIELD} is not a string: {other}"),
        }),
    }
}

fn snapshot_members<'a>(
    kind: &str,
    relation: &RelationDescriptor,
    value: Option<&'a Value>,
) -> Result<Vec<&'a Fields>, DocumentError> {
    let malformed = |reason: &str| DocumentError::MalformedSnapshot {
        kind: kind.to_string(),
        reason: format!("{}: {reason}", relation.name),
    };
    match (relation.cardinality, value) {
        (_, None | Some(Value::Null)) => Ok(Vec::new()),
        (Cardinality::One, Some(Value::Object(member))) => Ok(vec![member]),
        (Cardinality::Many, Some(Value::Array(items))) => items
            .iter()
            .map(|item| item.as_object().ok_or_else(|| malformed("member is not an object")))
            .collect(),
        (Cardinality::One, Some(_)) => Err(malformed("expected an object")),
        (Cardinality::Many, Some(_)) => Err(malformed("expected an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationDescriptor;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .root("Article", [RelationDescriptor::many("pages", "Page")])
                .embedded(
                    "Page",
                    [
                        RelationDescriptor::many("sections", "Section"),
                        RelationDescriptor::one("footer", "Footer"),
                    ],
                )
                .embedded("Section", [])
                .embedded("Footer", [])
                .root("User", [])
                .build()
                .unwrap(),
        )
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_document_has_id_and_no_version() {
        let doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        assert_eq!(doc.get(root, ID_FIELD), Some(&json!(root.to_string())));
        assert_eq!(doc.version(), None);
        assert!(doc.is_new_record(root).unwrap());
    }

    #[test]
    fn embedded_type_cannot_be_root() {
        assert!(matches!(
            Document::new(schema(), "Page"),
            Err(DocumentError::NotRoot(_))
        ));
        assert!(matches!(
            Document::new(schema(), "Nope"),
            Err(DocumentError::UnknownType(_))
        ));
    }

    #[test]
    fn new_record_reports_every_field() {
        let mut doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        doc.set(root, "name", "Mark").unwrap();
        let changes = doc.changes(root).unwrap();
        assert_eq!(
            Value::Object(changes),
            json!({"_id": [null, root.to_string()], "name": [null, "Mark"]})
        );
    }

    #[test]
    fn commit_clears_changes_and_tracks_new_ones() {
        let mut doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        doc.set(root, "name", "Mark").unwrap();
        doc.commit();
        assert!(doc.changes(root).unwrap().is_empty());
        assert!(!doc.is_new_record(root).unwrap());

        doc.set(root, "age", 36).unwrap();
        doc.unset(root, "name").unwrap();
        assert_eq!(
            Value::Object(doc.changes(root).unwrap()),
            json!({"age": [null, 36], "name": ["Mark", null]})
        );
    }

    #[test]
    fn reserved_and_relation_fields_are_not_writable() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        assert!(matches!(
            doc.set(root, "_id", "x"),
            Err(DocumentError::ReservedField(_))
        ));
        assert!(matches!(
            doc.set(root, "version", 3),
            Err(DocumentError::ReservedField(_))
        ));
        assert!(matches!(
            doc.set(root, "pages", json!([])),
            Err(DocumentError::RelationField { .. })
        ));
    }

    #[test]
    fn embed_and_detach() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        let page = doc
            .embed(root, "pages", fields(json!({"name": "Page 1"})))
            .unwrap();
        let section = doc.embed(page, "sections", Fields::new()).unwrap();
        assert_eq!(doc.children(root, "pages"), [page]);
        assert_eq!(doc.parent(section), Some(page));
        assert_eq!(doc.node_count(), 3);

        doc.detach(page).unwrap();
        assert!(doc.children(root, "pages").is_empty());
        assert!(doc.node(section).is_none());
        assert_eq!(doc.node_count(), 1);
        assert!(matches!(doc.detach(root), Err(DocumentError::DetachRoot)));
    }

    #[test]
    fn embed_one_replaces_existing_child() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let page = doc.embed(doc.root(), "pages", Fields::new()).unwrap();
        let first = doc.embed(page, "footer", Fields::new()).unwrap();
        let second = doc.embed(page, "footer", Fields::new()).unwrap();
        assert_eq!(doc.child(page, "footer"), Some(second));
        assert!(doc.node(first).is_none());
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let mut doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        assert!(matches!(
            doc.embed(root, "pages", Fields::new()),
            Err(DocumentError::UnknownRelation { .. })
        ));
    }

    #[test]
    fn touch_stamps_only_dirty_nodes() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        let page = doc.embed(root, "pages", Fields::new()).unwrap();
        doc.touch("t1");
        doc.commit();
        assert_eq!(doc.get(root, CREATED_AT_FIELD), Some(&json!("t1")));
        assert_eq!(doc.get(page, UPDATED_AT_FIELD), Some(&json!("t1")));

        doc.set(page, "name", "renamed").unwrap();
        doc.touch("t2");
        assert_eq!(doc.get(root, UPDATED_AT_FIELD), Some(&json!("t1")));
        assert_eq!(doc.get(page, UPDATED_AT_FIELD), Some(&json!("t2")));
        assert_eq!(doc.get(page, CREATED_AT_FIELD), Some(&json!("t1")));
    }

    #[test]
    fn suppression_scope_restores_prior_flag() {
        let mut doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        doc.set_track_flag(root, TrackFlag::Enabled).unwrap();

        let inner = doc
            .without_history_tracking(root, |doc| {
                let seen = doc.track_flag(root).unwrap();
                doc.without_history_tracking(root, |doc| doc.track_flag(root).unwrap())
                    .map(|nested| (seen, nested))
            })
            .unwrap()
            .unwrap();
        assert_eq!(inner, (TrackFlag::Suppressed, TrackFlag::Suppressed));
        assert_eq!(doc.track_flag(root).unwrap(), TrackFlag::Enabled);
    }

    #[test]
    fn suppression_scope_restores_on_panic() {
        let mut doc = Document::new(schema(), "User").unwrap();
        let root = doc.root();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = doc.without_history_tracking(root, |_| -> () { panic!("boom") });
        }));
        assert!(result.is_err());
        assert_eq!(doc.track_flag(root).unwrap(), TrackFlag::Inherit);
    }

    #[test]
    fn restore_overwrites_fields_and_reconciles_children() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        doc.set(root, "name", "Old").unwrap();
        let kept = doc
            .embed(root, "pages", fields(json!({"name": "Kept"})))
            .unwrap();
        let dropped = doc.embed(root, "pages", Fields::new()).unwrap();
        doc.commit();

        let recreated = EntityId::new();
        let snapshot = fields(json!({
            "_id": "ignored",
            "name": "New",
            "pages": [
                {"_id": recreated.to_string(), "name": "Back"},
                {"_id": kept.to_string(), "name": "Kept again"},
            ],
        }));
        doc.restore(root, &snapshot, &[]).unwrap();

        assert_eq!(doc.get(root, ID_FIELD), Some(&json!(root.to_string())));
        assert_eq!(doc.get(root, "name"), Some(&json!("New")));
        assert_eq!(doc.children(root, "pages"), [recreated, kept]);
        assert!(doc.node(dropped).is_none());
        assert_eq!(doc.get(kept, "name"), Some(&json!("Kept again")));
        assert!(doc.is_new_record(recreated).unwrap());
    }

    #[test]
    fn restore_reattaches_detached_member() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        let page = doc
            .embed(root, "pages", fields(json!({"name": "P"})))
            .unwrap();
        doc.commit();
        doc.detach(page).unwrap();

        let snapshot = fields(json!({"pages": [{"_id": page.to_string(), "name": "P"}]}));
        doc.restore(root, &snapshot, &[]).unwrap();
        assert!(!doc.is_new_record(page).unwrap());
        assert!(doc.changes(page).unwrap().is_empty());
    }

    #[test]
    fn restore_leaves_preserved_relation_alone() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        let page = doc
            .embed(root, "pages", fields(json!({"name": "Live"})))
            .unwrap();
        doc.embed(page, "sections", Fields::new()).unwrap();
        doc.commit();

        let snapshot = fields(json!({"name": "Restored"}));
        doc.restore(root, &snapshot, &["pages"]).unwrap();
        assert_eq!(doc.get(root, "name"), Some(&json!("Restored")));
        assert_eq!(doc.children(root, "pages"), [page]);
        assert_eq!(doc.get(page, "name"), Some(&json!("Live")));
        assert_eq!(doc.children(page, "sections").len(), 1);
    }

    #[test]
    fn restore_rejects_malformed_relation() {
        let mut doc = Document::new(schema(), "Article").unwrap();
        let root = doc.root();
        let snapshot = fields(json!({"pages": {"name": "not a list"}}));
        assert!(matches!(
            doc.restore(root, &snapshot, &[]),
            Err(DocumentError::MalformedSnapshot { .. })
        ));
    }

    #[test]
    fn from_snapshot_builds_clean_tree() {
        let id = EntityId::new();
        let page = EntityId::new();
        let body = fields(json!({
            "_id": id.to_string(),
            "version": 2,
            "name": "Stored",
            "pages": [{"_id": page.to_string(), "name": "P"}],
        }));
        let doc = Document::from_snapshot(schema(), "Article", &body).unwrap();
        assert_eq!(doc.root(), id);
        assert_eq!(doc.version(), Some(2));
        assert_eq!(doc.children(id, "pages"), [page]);
        assert!(doc.changes(id).unwrap().is_empty());
        assert!(!doc.is_new_record(page).unwrap());
    }
}
