//! Walking the object subschemas a params document is built from.

use serde_json::{Map, Value};

/// Keywords whose members all describe the same instance.
pub(crate) const COMBINATORS: &[&str] = &["allOf", "oneOf", "anyOf"];

/// Root keywords that must stay at the document root for `$ref`s to resolve.
pub(crate) const ROOT_KEYWORDS: &[&str] = &["$schema", "definitions", "$defs"];

/// Resolves a local `#/...` reference against the document root.
pub(crate) fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    root.pointer(reference.strip_prefix('#')?)
}

/// True when the schema rejects properties it does not list.
pub(crate) fn is_closed(schema: &Map<String, Value>) -> bool {
    ["additionalProperties", "unevaluatedProperties"]
        .iter()
        .filter_map(|key| schema.get(*key))
        .any(|extra| match extra {
            Value::Bool(open) => !open,
            Value::Object(obj) => !obj.is_empty(),
            _ => false,
        })
}

pub(crate) fn has_property(schema: &Map<String, Value>, name: &str) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| props.contains_key(name))
}

/// Visits `schema` and every object subschema reachable through
/// [`COMBINATORS`] and local `$ref`s, returning the first hit of `visit`.
/// Nested `properties` are not entered.
pub(crate) fn find_in_objects<'a, T, F>(schema: &'a Value, root: &'a Value, mut visit: F) -> Option<T>
where
    F: FnMut(&'a Map<String, Value>) -> Option<T>,
{
    let mut seen = Vec::new();
    find_inner(schema, root, &mut visit, &mut seen)
}

fn find_inner<'a, T, F>(
    schema: &'a Value,
    root: &'a Value,
    visit: &mut F,
    seen: &mut Vec<&'a str>,
) -> Option<T>
where
    F: FnMut(&'a Map<String, Value>) -> Option<T>,
{
    let obj = schema.as_object()?;
    if let Some(found) = visit(obj) {
        return Some(found);
    }
    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        if !seen.contains(&reference) {
            seen.push(reference);
            if let Some(found) =
                resolve_ref(root, reference).and_then(|target| find_inner(target, root, visit, seen))
            {
                return Some(found);
            }
        }
    }
    for key in COMBINATORS {
        let members = obj.get(*key).and_then(Value::as_array).into_iter().flatten();
        for member in members {
            if let Some(found) = find_inner(member, root, visit, seen) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closed_means_extra_properties_are_constrained() {
        let closed = json!({ "additionalProperties": false });
        let typed = json!({ "additionalProperties": { "type": "integer" } });
        let open = json!({ "additionalProperties": {} });
        assert!(is_closed(closed.as_object().unwrap()));
        assert!(is_closed(typed.as_object().unwrap()));
        assert!(!is_closed(open.as_object().unwrap()));
        assert!(!is_closed(json!({}).as_object().unwrap()));
    }

    #[test]
    fn walk_follows_refs_and_combinators_once() {
        let doc = json!({
            "anyOf": [
                { "$ref": "#/definitions/Loop" },
                { "oneOf": [{ "properties": { "deep": {} } }] }
            ],
            "definitions": {
                "Loop": { "allOf": [{ "$ref": "#/definitions/Loop" }], "title": "loop" }
            }
        });
        let titles = find_in_objects(&doc, &doc, |obj| obj.get("title").and_then(Value::as_str));
        assert_eq!(titles, Some("loop"));
        assert!(find_in_objects(&doc, &doc, |obj| has_property(obj, "deep").then_some(())).is_some());
        assert!(find_in_objects(&doc, &doc, |obj| has_property(obj, "missing").then_some(())).is_none());
    }
}
