use serde_json::Value;
use verso_kernel::{Cardinality, Fields, TrackedEntity};

/// Nested mapping of an entity's current fields and its relation trees.
///
/// A `one` relation appears as a mapping, or not at all when unset. A `many`
/// relation appears as a list in child order, or not at all when empty.
/// `excluded` fields are dropped at every depth.
pub fn attributes_with_relations<E: TrackedEntity>(entity: E, excluded: &[String]) -> Fields {
    let mut out: Fields = entity
        .attributes()
        .iter()
        .filter(|(key, _)| !is_excluded(excluded, key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (relation, children) in entity.relations() {
        if is_excluded(excluded, &relation.name) {
            continue;
        }
        let value = match relation.cardinality {
            Cardinality::One => children
                .first()
                .map(|child| Value::Object(attributes_with_relations(*child, excluded))),
            Cardinality::Many if children.is_empty() => None,
            Cardinality::Many => Some(Value::Array(
                children
                    .iter()
                    .map(|child| Value::Object(attributes_with_relations(*child, excluded)))
                    .collect(),
            )),
        };
        if let Some(value) = value {
            out.insert(relation.name, value);
        }
    }
    out
}

pub(crate) fn is_excluded(excluded: &[String], key: &str) -> bool {
    excluded.iter().any(|field| field == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{article_schema, fields};
    use serde_json::json;
    use verso_kernel::Document;

    #[test]
    fn snapshot_nests_relations() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.set(root, "name", "Article").unwrap();
        let page = doc.embed(root, "pages", fields(json!({"name": "P1"}))).unwrap();
        let section = doc.embed(page, "sections", fields(json!({"body": "S"}))).unwrap();
        let footer = doc.embed(page, "footer", fields(json!({"text": "F"}))).unwrap();

        let snapshot = attributes_with_relations(doc.entity(root).unwrap(), &[]);
        assert_eq!(
            Value::Object(snapshot),
            json!({
                "_id": root.to_string(),
                "name": "Article",
                "pages": [{
                    "_id": page.to_string(),
                    "name": "P1",
                    "sections": [{"_id": section.to_string(), "body": "S"}],
                    "footer": {"_id": footer.to_string(), "text": "F"},
                }],
            })
        );
    }

    #[test]
    fn empty_relations_are_absent() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.embed(root, "pages", Fields::new()).unwrap();
        let snapshot = attributes_with_relations(doc.entity(root).unwrap(), &[]);
        let page = snapshot["pages"][0].as_object().unwrap();
        assert!(!page.contains_key("sections"));
        assert!(!page.contains_key("footer"));
    }

    #[test]
    fn excluded_fields_dropped_at_every_depth() {
        let mut doc = Document::new(article_schema(), "Article").unwrap();
        let root = doc.root();
        doc.set(root, "staging", true).unwrap();
        doc.embed(root, "pages", fields(json!({"staging": true, "name": "P"})))
            .unwrap();

        let snapshot = attributes_with_relations(doc.entity(root).unwrap(), &["staging".to_string()]);
        assert!(!snapshot.contains_key("staging"));
        let page = snapshot["pages"][0].as_object().unwrap();
        assert!(!page.contains_key("staging"));
        assert_eq!(page["name"], json!("P"));
    }
}
