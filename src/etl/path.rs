//! Dotted field paths over JSON trees, e.g. `user.profile.role` or `items.0.sku`.

use serde_json::{Map, Value};

/// Resolve `path` against `value`. Mapping keys are matched exactly and numeric
/// segments index into sequences. `None` means absent: a missing key, an index
/// out of bounds, or descent into a scalar.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate mappings as needed. A scalar
/// found where a mapping is required is replaced.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = target;

    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }

        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
}

/// Remove the value at `path`, leaving parent mappings in place
pub fn remove_path(target: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => target.shift_remove(path),
        Some((parent, leaf)) => {
            let mut current = target;
            for part in parent.split('.') {
                current = current.get_mut(part)?.as_object_mut()?;
            }
            current.shift_remove(leaf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_nested_and_indexed() {
        let record = json!({
            "user": {"profile": {"role": "admin"}},
            "items": [{"sku": "A-1"}, {"sku": "B-2"}],
            "note": null
        });

        assert_eq!(resolve(&record, "user.profile.role"), Some(&json!("admin")));
        assert_eq!(resolve(&record, "items.1.sku"), Some(&json!("B-2")));
        assert_eq!(resolve(&record, "note"), Some(&Value::Null));
        assert_eq!(resolve(&record, ""), Some(&record));
    }

    #[test]
    fn test_resolve_absent() {
        let record = json!({"user": {"name": "ana"}, "items": [1]});

        assert_eq!(resolve(&record, "user.email"), None);
        assert_eq!(resolve(&record, "user.name.first"), None);
        assert_eq!(resolve(&record, "items.5"), None);
        assert_eq!(resolve(&record, "items.first"), None);
        assert_eq!(resolve(&record, "missing.deeply.nested"), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut out = Map::new();
        set_path(&mut out, "location.city", json!("Lima"));
        set_path(&mut out, "location.country", json!("PE"));
        set_path(&mut out, "id", json!(7));

        assert_eq!(
            Value::Object(out),
            json!({"location": {"city": "Lima", "country": "PE"}, "id": 7})
        );
    }

    #[test]
    fn test_set_path_replaces_scalar_parent() {
        let mut out = Map::new();
        set_path(&mut out, "a", json!(1));
        set_path(&mut out, "a.b", json!(2));
        assert_eq!(Value::Object(out), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_remove_path() {
        let mut out = json!({"a": {"b": 1, "c": 2}, "d": 3})
            .as_object()
            .cloned()
            .unwrap();

        assert_eq!(remove_path(&mut out, "a.b"), Some(json!(1)));
        assert_eq!(remove_path(&mut out, "d"), Some(json!(3)));
        assert_eq!(remove_path(&mut out, "a.x.y"), None);
        assert_eq!(Value::Object(out), json!({"a": {"c": 2}}));
    }
}
