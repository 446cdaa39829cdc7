//! Structural diffs over document trees.
//!
//! A diff maps each changed field to `[old, new]`. Relations nest: a `one`
//! relation maps to its child's diff, a `many` relation to the list of its
//! non-empty member diffs. Members removed since the last commit follow the
//! live members as `{field: [old, null]}`.

use crate::snapshot::is_excluded;
use serde_json::Value;
use verso_common::ID_FIELD;
use verso_kernel::{Cardinality, Fields, RelationDescriptor, Schema, TrackedEntity};

/// Everything dirtied under `entity` since the last commit.
pub fn changes_with_relations<E: TrackedEntity>(entity: E, excluded: &[String]) -> Fields {
    let mut out: Fields = entity
        .changed_fields()
        .into_iter()
        .filter(|(key, _)| !is_excluded(excluded, key))
        .collect();

    for (relation, children) in entity.relations() {
        if is_excluded(excluded, &relation.name) {
            continue;
        }
        let mut members: Vec<Fields> = children
            .iter()
            .map(|child| changes_with_relations(*child, excluded))
            .collect();
        // A replaced `one` child shows up through its successor's `_id`.
        if relation.cardinality == Cardinality::Many || children.is_empty() {
            members.extend(
                entity
                    .removed(&relation.name)
                    .iter()
                    .map(|gone| removal(gone.committed_attributes(), excluded)),
            );
        }
        if let Some(value) = nest(&relation, members) {
            out.insert(relation.name, value);
        }
    }
    out
}

/// The diff that turns snapshot `previous` into snapshot `current`.
///
/// Both mappings are snapshots of a node of type `kind`. Relation members are
/// matched by `_id`. Applied to adjacent versions of a root this reproduces
/// the diff recorded for the later one.
pub fn between(
    schema: &Schema,
    kind: &str,
    previous: &Fields,
    current: &Fields,
    excluded: &[String],
) -> Fields {
    let relations = schema.relations(kind);
    let is_attribute =
        |key: &str| !is_excluded(excluded, key) && !relations.iter().any(|r| r.name == key);

    let mut out = Fields::new();
    for (key, new) in current.iter().filter(|(key, _)| is_attribute(key)) {
        let old = previous.get(key).unwrap_or(&Value::Null);
        if old != new {
            out.insert(key.clone(), Value::Array(vec![old.clone(), new.clone()]));
        }
    }
    for (key, old) in previous.iter().filter(|(key, _)| is_attribute(key)) {
        if !current.contains_key(key) && !old.is_null() {
            out.insert(key.clone(), Value::Array(vec![old.clone(), Value::Null]));
        }
    }

    for relation in relations {
        if is_excluded(excluded, &relation.name) {
            continue;
        }
        let before = members_of(previous.get(&relation.name));
        let after = members_of(current.get(&relation.name));
        let empty = Fields::new();

        let mut members: Vec<Fields> = after
            .iter()
            .map(|member| {
                let matched = before
                    .iter()
                    .find(|old| same_member(old, member))
                    .copied()
                    .unwrap_or(&empty);
                between(schema, &relation.target, matched, member, excluded)
            })
            .collect();
        if relation.cardinality == Cardinality::Many || after.is_empty() {
            let nested = schema.relations(&relation.target);
            members.extend(
                before
                    .iter()
                    .filter(|old| !after.iter().any(|member| same_member(old, member)))
                    .map(|old| {
                        let mut gone = removal(old, excluded);
                        gone.retain(|key, _| !nested.iter().any(|r| r.name == *key));
                        gone
                    }),
            );
        }
        if let Some(value) = nest(relation, members) {
            out.insert(relation.name.clone(), value);
        }
    }
    out
}

/// `{field: [old, null]}` for each non-null field of a removed member.
fn removal(fields: &Fields, excluded: &[String]) -> Fields {
    fields
        .iter()
        .filter(|(key, value)| !value.is_null() && !is_excluded(excluded, key))
        .map(|(key, value)| (key.clone(), Value::Array(vec![value.clone(), Value::Null])))
        .collect()
}

fn nest(relation: &RelationDescriptor, members: Vec<Fields>) -> Option<Value> {
    let mut members = members.into_iter().filter(|m| !m.is_empty());
    match relation.cardinality {
        Cardinality::One => members.next().map(Value::Object),
        Cardinality::Many => {
            let list: Vec<Value> = members.map(Value::Object).collect();
            (!list.is_empty()).then_some(Value::Array(list))
        }
    }
}

fn members_of(value: Option<&Value>) -> Vec<&Fields> {
    match value {
        Some(Value::Object(member)) => vec![member],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn same_member(a: &Fields, b: &Fields) -> bool {
    match (a.get(ID_FIELD), b.get(ID_FIELD)) {
        (Some(x), Some(y)) => !x.is_null() && x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{article_schema, fields};
    use crate::snapshot::attributes_with_relations;
    use serde_json::json;
    use verso_kernel::Document;

    fn timestamps() -> Vec<String> {
        vec!["created_at".into(), "updated_at".into()]
    }

    fn diff(doc: &Document) -> Value {
        Value::Object(changes_with_relations(
            doc.entity(doc.root()).unwrap(),
            &timestamps(),
        ))
    }

    #[test]
    fn new_tree_reports_everything() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.set(root, "name", "A").unwrap();
        let page = doc.embed(root, "pages", fields(json!({"name": "Page 1"}))).unwrap();
        doc.touch("now");

        assert_eq!(
            diff(&doc),
            json!({
                "_id": [null, root.to_string()],
                "name": [null, "A"],
                "pages": [{"_id": [null, page.to_string()], "name": [null, "Page 1"]}],
            })
        );
    }

    #[test]
    fn unchanged_members_are_dropped() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.embed(root, "pages", fields(json!({"name": "P1"}))).unwrap();
        let second = doc.embed(root, "pages", fields(json!({"name": "P2"}))).unwrap();
        doc.commit();

        assert_eq!(diff(&doc), json!({}));
        doc.set(second, "name", "P2 renamed").unwrap();
        assert_eq!(diff(&doc), json!({"pages": [{"name": ["P2", "P2 renamed"]}]}));
    }

    #[test]
    fn nested_relations_merge() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        let page = doc.embed(root, "pages", Fields::new()).unwrap();
        let footer = doc.embed(page, "footer", fields(json!({"text": "old"}))).unwrap();
        doc.commit();

        doc.set(footer, "text", "new").unwrap();
        let section = doc.embed(page, "sections", fields(json!({"body": "S"}))).unwrap();
        assert_eq!(
            diff(&doc),
            json!({"pages": [{
                "sections": [{"_id": [null, section.to_string()], "body": [null, "S"]}],
                "footer": {"text": ["old", "new"]},
            }]})
        );
    }

    #[test]
    fn removed_members_follow_live_ones() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        let gone = doc.embed(root, "pages", fields(json!({"name": "Gone"}))).unwrap();
        let kept = doc.embed(root, "pages", fields(json!({"name": "Kept"}))).unwrap();
        doc.touch("t");
        doc.commit();

        doc.set(kept, "name", "Kept!").unwrap();
        doc.detach(gone).unwrap();
        assert_eq!(
            diff(&doc),
            json!({"pages": [
                {"name": ["Kept", "Kept!"]},
                {"_id": [gone.to_string(), null], "name": ["Gone", null]},
            ]})
        );
    }

    #[test]
    fn unset_one_relation_reports_removal() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let page = doc.embed(doc.root(), "pages", Fields::new()).unwrap();
        let footer = doc.embed(page, "footer", fields(json!({"text": "F"}))).unwrap();
        doc.commit();

        doc.detach(footer).unwrap();
        assert_eq!(
            diff(&doc),
            json!({"pages": [{"footer": {"_id": [footer.to_string(), null], "text": ["F", null]}}]})
        );
    }

    #[test]
    fn excluded_fields_never_appear() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.touch("t1");
        doc.commit();
        doc.set(root, "name", "A").unwrap();
        doc.touch("t2");
        assert_eq!(diff(&doc), json!({"name": [null, "A"]}));
    }

    #[test]
    fn between_matches_live_diff() {
        let schema = article_schema();
        let mut doc = Document::new(schema.clone(), "Article").unwrap();
        let root = doc.root();
        let p1 = doc.embed(root, "pages", fields(json!({"name": "P1"}))).unwrap();
        let p2 = doc.embed(root, "pages", fields(json!({"name": "P2"}))).unwrap();
        doc.embed(p1, "footer", fields(json!({"text": "F"}))).unwrap();
        doc.touch("t1");
        doc.commit();
        let before = attributes_with_relations(doc.entity(root).unwrap(), &[]);

        doc.set(root, "name", "A").unwrap();
        doc.detach(p2).unwrap();
        doc.embed(p1, "footer", fields(json!({"text": "G"}))).unwrap();
        doc.embed(root, "pages", fields(json!({"name": "P3"}))).unwrap();
        doc.touch("t2");
        let after = attributes_with_relations(doc.entity(root).unwrap(), &[]);

        let expected = diff(&doc);
        let computed = between(&schema, "Article", &before, &after, &timestamps());
        assert_eq!(Value::Object(computed), expected);
    }

    #[test]
    fn between_from_nothing_reports_everything() {
        let schema = article_schema();
        let current = fields(json!({"_id": "a", "pages": [{"_id": "p", "name": "P"}]}));
        assert_eq!(
            Value::Object(between(&schema, "Article", &Fields::new(), &current, &[])),
            json!({"_id": [null, "a"], "pages": [{"_id": [null, "p"], "name": [null, "P"]}]})
        );
    }
}
