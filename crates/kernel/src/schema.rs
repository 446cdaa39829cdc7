use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use verso_common::RESERVED_FIELDS;

/// How many children a relation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// A named embedded relation from one type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
}

impl RelationDescriptor {
    /// Single-valued embedded child.
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
        }
    }

    /// Ordered multi-valued embedded children.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
        }
    }
}

/// Whether a type is a standalone document or lives inside a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Embedding {
    Root,
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub embedding: Embedding,
    /// Relations in declaration order.
    pub relations: Vec<RelationDescriptor>,
}

impl TypeDescriptor {
    /// Relation by name.
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Standalone, versioned type.
    pub fn is_root(&self) -> bool {
        self.embedding == Embedding::Root
    }
}

/// Registration-time errors. These are programming errors in the type
/// declarations, never runtime conditions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("type {0:?} registered twice")]
    DuplicateType(String),
    #[error("type {kind:?} declares relation {relation:?} twice")]
    DuplicateRelation { kind: String, relation: String },
    #[error("relation {kind}.{relation} targets unknown type {target:?}")]
    UnknownTarget {
        kind: String,
        relation: String,
        target: String,
    },
    #[error("relation {kind}.{relation} targets root type {target:?}; only embedded types can be nested")]
    RootTarget {
        kind: String,
        relation: String,
        target: String,
    },
    #[error("relation {kind}.{relation} uses a reserved field name")]
    ReservedName { kind: String, relation: String },
}

/// Static registry of every document type and its embedded relations.
///
/// Built once up front; documents hold it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, TypeDescriptor>,
}

impl Schema {
    /// Start registering types.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Descriptor of a registered type.
    pub fn get(&self, kind: &str) -> Option<&TypeDescriptor> {
        self.types.get(kind)
    }

    /// Relations of a type, empty for unknown types.
    pub fn relations(&self, kind: &str) -> &[RelationDescriptor] {
        self.types
            .get(kind)
            .map(|t| t.relations.as_slice())
            .unwrap_or(&[])
    }

    /// One relation of a type, if both are registered.
    pub fn relation(&self, kind: &str, name: &str) -> Option<&RelationDescriptor> {
        self.types.get(kind).and_then(|t| t.relation(name))
    }

    /// Every registered type, ordered by name.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDescriptor>,
}

impl SchemaBuilder {
    /// Register a root (independently stored, versioned) type.
    pub fn root(
        mut self,
        name: impl Into<String>,
        relations: impl IntoIterator<Item = RelationDescriptor>,
    ) -> Self {
        self.types.push(TypeDescriptor {
            name: name.into(),
            embedding: Embedding::Root,
            relations: relations.into_iter().collect(),
        });
        self
    }

    /// Register an embeddable type. Its history accrues to whatever root it
    /// ends up nested under.
    pub fn embedded(
        mut self,
        name: impl Into<String>,
        relations: impl IntoIterator<Item = RelationDescriptor>,
    ) -> Self {
        self.types.push(TypeDescriptor {
            name: name.into(),
            embedding: Embedding::Embedded,
            relations: relations.into_iter().collect(),
        });
        self
    }

    /// Validate every declaration and freeze the registry.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types = BTreeMap::new();
        for ty in self.types {
            if types.contains_key(&ty.name) {
                return Err(SchemaError::DuplicateType(ty.name));
            }
            types.insert(ty.name.clone(), ty);
        }

        for ty in types.values() {
            for (i, rel) in ty.relations.iter().enumerate() {
                if RESERVED_FIELDS.contains(&rel.name.as_str()) {
                    return Err(SchemaError::ReservedName {
                        kind: ty.name.clone(),
                        relation: rel.name.clone(),
                    });
                }
                if ty.relations[..i].iter().any(|r| r.name == rel.name) {
                    return Err(SchemaError::DuplicateRelation {
                        kind: ty.name.clone(),
                        relation: rel.name.clone(),
                    });
                }
                match types.get(&rel.target) {
                    None => {
                        return Err(SchemaError::UnknownTarget {
                            kind: ty.name.clone(),
                            relation: rel.name.clone(),
                            target: rel.target.clone(),
                        });
                    }
                    Some(target) if target.is_root() => {
                        return Err(SchemaError::RootTarget {
                            kind: ty.name.clone(),
                            relation: rel.name.clone(),
                            target: rel.target.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Schema { types })
    }
}
