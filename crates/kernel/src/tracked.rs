use crate::document::{Document, Fields, Node, TrackFlag};
use crate::schema::RelationDescriptor;
use verso_common::EntityId;

/// What the history engine needs from a tree node.
///
/// The snapshotter, diff engine and propagation router depend only on this
/// interface, never on a concrete store.
pub trait TrackedEntity: Copy {
    fn id(&self) -> EntityId;
    fn kind(&self) -> &str;
    /// Current field mapping.
    fn attributes(&self) -> &Fields;
    /// Field mapping as of the last commit.
    fn committed_attributes(&self) -> &Fields;
    /// `{field: [old, new]}` for fields dirtied since the last commit.
    fn changed_fields(&self) -> Fields;
    /// Declared relations in order, with their live children.
    fn relations(&self) -> Vec<(RelationDescriptor, Vec<Self>)>;
    /// Children of `relation` that were committed but have since been
    /// detached, in their committed order.
    fn removed(&self, relation: &str) -> Vec<Self>;
    fn parent(&self) -> Option<Self>;
    fn track_flag(&self) -> TrackFlag;

    fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Walk parent links up to the document root.
    fn resolve_root(&self) -> Self {
        let mut node = *self;
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// This node followed by each ancestor up to the root.
    fn ancestry(&self) -> Vec<Self> {
        let mut path = vec![*self];
        let mut node = *self;
        while let Some(parent) = node.parent() {
            path.push(parent);
            node = parent;
        }
        path
    }
}

/// Borrowed view of one node inside a [`Document`].
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    doc: &'a Document,
    node: &'a Node,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(doc: &'a Document, node: &'a Node) -> Self {
        Self { doc, node }
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }
}

impl TrackedEntity for NodeRef<'_> {
    fn id(&self) -> EntityId {
        self.node.id()
    }

    fn kind(&self) -> &str {
        self.node.kind()
    }

    fn attributes(&self) -> &Fields {
        self.node.fields()
    }

    fn committed_attributes(&self) -> &Fields {
        self.node.committed_fields()
    }

    fn changed_fields(&self) -> Fields {
        self.node.changes()
    }

    fn relations(&self) -> Vec<(RelationDescriptor, Vec<Self>)> {
        self.doc
            .schema()
            .relations(self.node.kind())
            .iter()
            .map(|relation| {
                let children = self
                    .node
                    .children(&relation.name)
                    .iter()
                    .filter_map(|id| self.doc.live_node(*id))
                    .map(|node| NodeRef::new(self.doc, node))
                    .collect();
                (relation.clone(), children)
            })
            .collect()
    }

    fn removed(&self, relation: &str) -> Vec<Self> {
        self.node
            .committed_children(relation)
            .iter()
            .filter(|id| self.doc.live_node(**id).is_none())
            .filter_map(|id| self.doc.detached_node(*id))
            .map(|node| NodeRef::new(self.doc, node))
            .collect()
    }

    fn parent(&self) -> Option<Self> {
        let link = self.node.parent()?;
        self.doc
            .live_node(link.id)
            .map(|node| NodeRef::new(self.doc, node))
    }

    fn track_flag(&self) -> TrackFlag {
        self.node.track_flag()
    }
}
