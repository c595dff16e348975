// JSON-Schema sanitizers for tool parameter schemas
//
// Two modes: a light cleanup for native Gemini models and a strict
// hint-rewriting pipeline for Claude served through Antigravity's
// VALIDATED tool mode. Both return new trees; input is never mutated.

use serde_json::{json, Map, Value};

const PLACEHOLDER_DESCRIPTION: &str = "Placeholder for empty schema";

/// Keys the light cleanup removes outright.
const LIGHT_DROPPED_KEYS: [&str; 9] = [
    "minLength",
    "maxLength",
    "pattern",
    "format",
    "examples",
    "default",
    "strict",
    "$schema",
    "additionalProperties",
];

/// Constraints the strict pipeline rewrites into description hints
/// before stripping.
const HINTED_CONSTRAINTS: [&str; 10] = [
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "pattern",
    "minItems",
    "maxItems",
    "format",
    "default",
    "examples",
];

/// Structural keywords the strict pipeline strips after hinting.
const STRIPPED_KEYWORDS: [&str; 10] = [
    "$schema",
    "$defs",
    "definitions",
    "const",
    "$ref",
    "additionalProperties",
    "propertyNames",
    "title",
    "$id",
    "$comment",
];

/// Light cleanup for Gemini models: drop unsupported keys, keep shape.
pub fn clean_light(schema: &Value) -> Value {
    let mut v = schema.clone();
    clean_light_inner(&mut v);
    v
}

fn clean_light_inner(value: &mut Value) {
    if let Value::Object(map) = value {
        for key in LIGHT_DROPPED_KEYS {
            map.remove(key);
        }
        if let Some(Value::Object(props)) = map.get_mut("properties") {
            for (_, child) in props.iter_mut() {
                clean_light_inner(child);
            }
        }
        if let Some(items) = map.get_mut("items") {
            clean_light_inner(items);
        }
    }
}

/// Strict cleanup for Claude on Antigravity. Runs an ordered pipeline of
/// pure tree transforms; the hint passes must precede the keyword strip
/// so the constraints are still present to be hinted from.
pub fn clean_strict(schema: &Value) -> Value {
    let mut v = schema.clone();
    convert_refs_to_hints(&mut v);
    convert_const_to_enum(&mut v);
    add_enum_hints(&mut v);
    add_additional_properties_hints(&mut v);
    move_constraints_to_description(&mut v, false);
    merge_all_of(&mut v);
    flatten_anyof_oneof(&mut v);
    flatten_type_arrays(&mut v);
    remove_unsupported_keywords(&mut v, false);
    cleanup_required_fields(&mut v);
    add_empty_object_placeholder(&mut v);
    v
}

fn convert_refs_to_hints(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(ref_val) = map.get("$ref").and_then(|v| v.as_str()) {
                let def_name = ref_val.rsplit('/').next().unwrap_or(ref_val).to_string();
                let mut hint = format!("See: {}", def_name);
                if let Some(existing) = map.get("description").and_then(|v| v.as_str()) {
                    if !existing.is_empty() {
                        hint = format!("{} (See: {})", existing, def_name);
                    }
                }
                *value = json!({
                    "type": "object",
                    "description": hint
                });
                return;
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    convert_refs_to_hints(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                convert_refs_to_hints(item);
            }
        }
        _ => {}
    }
}

fn convert_const_to_enum(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.contains_key("const") && !map.contains_key("enum") {
                if let Some(val) = map.get("const").cloned() {
                    map.insert("enum".to_string(), Value::Array(vec![val]));
                }
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    convert_const_to_enum(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                convert_const_to_enum(item);
            }
        }
        _ => {}
    }
}

fn add_enum_hints(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(enum_arr)) = map.get("enum") {
                let len = enum_arr.len();
                if len >= 2 && len <= 10 {
                    let vals: Vec<String> = enum_arr.iter().map(value_to_string).collect();
                    append_hint_to_obj(map, &format!("Allowed: {}", vals.join(", ")));
                }
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    add_enum_hints(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                add_enum_hints(item);
            }
        }
        _ => {}
    }
}

fn add_additional_properties_hints(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Bool(false)) = map.get("additionalProperties") {
                append_hint_to_obj(map, "No extra properties allowed");
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    add_additional_properties_hints(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                add_additional_properties_hints(item);
            }
        }
        _ => {}
    }
}

fn move_constraints_to_description(value: &mut Value, in_properties_map: bool) {
    match value {
        Value::Object(map) => {
            if !in_properties_map {
                for key in HINTED_CONSTRAINTS {
                    if let Some(val) = map.get(key) {
                        let hint = format!("{}: {}", key, value_to_string(val));
                        append_hint_to_obj(map, &hint);
                    }
                }
            }
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    move_constraints_to_description(child, key == "properties");
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                move_constraints_to_description(item, false);
            }
        }
        _ => {}
    }
}

fn merge_all_of(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    merge_all_of(child);
                }
            }

            match map.remove("allOf") {
                Some(Value::Array(items)) => {
                    let mut required: Vec<String> = map
                        .get("required")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();

                    for item in &items {
                        if let Value::Object(item_map) = item {
                            if let Some(Value::Object(item_props)) = item_map.get("properties") {
                                let props = map
                                    .entry("properties".to_string())
                                    .or_insert_with(|| json!({}));
                                if let Value::Object(props_map) = props {
                                    for (k, v) in item_props {
                                        props_map.insert(k.clone(), v.clone());
                                    }
                                }
                            }
                            if let Some(Value::Array(req_arr)) = item_map.get("required") {
                                for r in req_arr {
                                    if let Some(s) = r.as_str() {
                                        if !required.iter().any(|existing| existing == s) {
                                            required.push(s.to_string());
                                        }
                                    }
                                }
                            }
                            for (k, v) in item_map {
                                if k == "properties" || k == "required" {
                                    continue;
                                }
                                if !map.contains_key(k) {
                                    map.insert(k.clone(), v.clone());
                                }
                            }
                        }
                    }

                    if !required.is_empty() {
                        map.insert("required".to_string(), json!(required));
                    }
                }
                Some(other) => {
                    map.insert("allOf".to_string(), other);
                }
                None => {}
            }
        }
        Value::Array(arr) => {
            for item in arr {
                merge_all_of(item);
            }
        }
        _ => {}
    }
}

fn flatten_anyof_oneof(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    flatten_anyof_oneof(child);
                }
            }

            for branch_key in ["anyOf", "oneOf"] {
                let items = match map.get(branch_key) {
                    Some(Value::Array(items)) if !items.is_empty() => items.clone(),
                    _ => continue,
                };
                let parent_desc = map
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();

                if items.iter().all(is_const_or_enum_option) {
                    let mut merged: Vec<Value> = Vec::new();
                    for item in &items {
                        if let Some(c) = item.get("const") {
                            merged.push(Value::String(value_to_string(c)));
                        } else if let Some(Value::Array(vals)) = item.get("enum") {
                            for v in vals {
                                merged.push(Value::String(value_to_string(v)));
                            }
                        }
                    }
                    let mut replacement = json!({ "type": "string", "enum": merged });
                    if !parent_desc.is_empty() {
                        replacement["description"] = json!(parent_desc);
                    }
                    *value = replacement;
                    return;
                }

                let (best_idx, all_types) = select_best(&items);
                let mut selected = items[best_idx].clone();
                if !parent_desc.is_empty() {
                    merge_description_in_value(&mut selected, &parent_desc);
                }
                let mut distinct: Vec<&String> = Vec::new();
                for t in &all_types {
                    if !distinct.contains(&t) {
                        distinct.push(t);
                    }
                }
                if distinct.len() > 1 {
                    append_hint_to_value(
                        &mut selected,
                        &format!("Accepts: {}", all_types.join(" | ")),
                    );
                }
                *value = selected;
                return;
            }
        }
        Value::Array(arr) => {
            for item in arr {
                flatten_anyof_oneof(item);
            }
        }
        _ => {}
    }
}

fn flatten_type_arrays(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(types_arr)) = map.get("type").cloned().as_ref() {
                let mut has_null = false;
                let mut non_null: Vec<String> = Vec::new();
                for item in types_arr {
                    let s = value_to_string(item);
                    if s == "null" {
                        has_null = true;
                    } else if !s.is_empty() {
                        non_null.push(s);
                    }
                }
                let first = non_null
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "string".to_string());
                map.insert("type".to_string(), Value::String(first));
                if has_null {
                    append_hint_to_obj(map, "nullable");
                }
                if non_null.len() > 1 {
                    append_hint_to_obj(map, &format!("Accepts: {}", non_null.join(" | ")));
                }
            }

            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    flatten_type_arrays(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                flatten_type_arrays(item);
            }
        }
        _ => {}
    }
}

fn remove_unsupported_keywords(value: &mut Value, in_properties_map: bool) {
    match value {
        Value::Object(map) => {
            if !in_properties_map {
                for key in HINTED_CONSTRAINTS {
                    map.remove(key);
                }
                for key in STRIPPED_KEYWORDS {
                    map.remove(key);
                }
            }

            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    remove_unsupported_keywords(child, key == "properties");
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                remove_unsupported_keywords(item, false);
            }
        }
        _ => {}
    }
}

fn cleanup_required_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let props = map.get("properties").and_then(|v| v.as_object()).cloned();
            if let (Some(props), Some(Value::Array(req_arr))) = (props, map.get_mut("required")) {
                let valid: Vec<Value> = req_arr
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter(|key| props.contains_key(*key))
                    .map(|s| Value::String(s.to_string()))
                    .collect();
                if valid.len() != req_arr.len() {
                    if valid.is_empty() {
                        map.remove("required");
                    } else {
                        *req_arr = valid;
                    }
                }
            }

            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    cleanup_required_fields(child);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                cleanup_required_fields(item);
            }
        }
        _ => {}
    }
}

fn add_empty_object_placeholder(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    add_empty_object_placeholder(child);
                }
            }

            let is_object = map
                .get("type")
                .and_then(|v| v.as_str())
                .map(|t| t == "object")
                .unwrap_or(false);
            if !is_object {
                return;
            }

            let props_empty = map
                .get("properties")
                .and_then(|v| v.as_object())
                .map(|p| p.is_empty())
                .unwrap_or(true);
            if props_empty {
                map.insert(
                    "properties".to_string(),
                    json!({
                        "_placeholder": {
                            "type": "boolean",
                            "description": PLACEHOLDER_DESCRIPTION
                        }
                    }),
                );
                map.insert("required".to_string(), json!(["_placeholder"]));
            }
        }
        Value::Array(arr) => {
            for item in arr {
                add_empty_object_placeholder(item);
            }
        }
        _ => {}
    }
}

fn is_const_or_enum_option(item: &Value) -> bool {
    item.get("const").is_some() || item.get("enum").is_some()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn append_hint_to_obj(map: &mut Map<String, Value>, hint: &str) {
    let existing = map.get("description").and_then(|v| v.as_str()).unwrap_or("");
    if existing.contains(hint) {
        return;
    }
    let new_desc = if existing.is_empty() {
        hint.to_string()
    } else {
        format!("{} ({})", existing, hint)
    };
    map.insert("description".to_string(), Value::String(new_desc));
}

fn append_hint_to_value(value: &mut Value, hint: &str) {
    if let Value::Object(map) = value {
        append_hint_to_obj(map, hint);
    }
}

fn merge_description_in_value(value: &mut Value, parent_desc: &str) {
    if parent_desc.is_empty() {
        return;
    }
    if let Value::Object(map) = value {
        let child_desc = map.get("description").and_then(|v| v.as_str()).unwrap_or("");
        if child_desc.is_empty() {
            map.insert(
                "description".to_string(),
                Value::String(parent_desc.to_string()),
            );
        } else if child_desc != parent_desc {
            map.insert(
                "description".to_string(),
                Value::String(format!("{} ({})", parent_desc, child_desc)),
            );
        }
    }
}

/// Pick the option with the highest complexity score:
/// object (3) > array (2) > primitive (1) > null (0).
fn select_best(items: &[Value]) -> (usize, Vec<String>) {
    let mut best_idx = 0;
    let mut best_score = -1;
    let mut types: Vec<String> = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let mut t = item
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let has_props = item.get("properties").is_some();
        let has_items = item.get("items").is_some();

        let score = if t == "object" || has_props {
            if t.is_empty() {
                t = "object".to_string();
            }
            3
        } else if t == "array" || has_items {
            if t.is_empty() {
                t = "array".to_string();
            }
            2
        } else if !t.is_empty() && t != "null" {
            1
        } else {
            t = "null".to_string();
            0
        };

        types.push(t);

        if score > best_score {
            best_score = score;
            best_idx = idx;
        }
    }

    (best_idx, types)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Structural comparison helper that ignores descriptions, since the
    /// hint passes append to them on every run.
    fn strip_descriptions(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    if k == "description" {
                        continue;
                    }
                    out.insert(k.clone(), strip_descriptions(v));
                }
                Value::Object(out)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(strip_descriptions).collect()),
            other => other.clone(),
        }
    }

    #[test]
    fn test_clean_light_drops_unsupported_keys() {
        let schema = json!({
            "type": "object",
            "$schema": "http://json-schema.org/draft-07/schema#",
            "additionalProperties": false,
            "properties": {
                "name": { "type": "string", "minLength": 1, "pattern": "^a" },
                "items_list": {
                    "type": "array",
                    "items": { "type": "string", "format": "uri", "default": "x" }
                }
            }
        });
        let cleaned = clean_light(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["name"].get("minLength").is_none());
        assert!(cleaned["properties"]["name"].get("pattern").is_none());
        assert!(cleaned["properties"]["items_list"]["items"].get("format").is_none());
        assert!(cleaned["properties"]["items_list"]["items"].get("default").is_none());
        assert_eq!(cleaned["properties"]["name"]["type"], "string");
    }

    #[test]
    fn test_clean_light_does_not_mutate_input() {
        let schema = json!({ "type": "string", "pattern": "^a" });
        let _ = clean_light(&schema);
        assert!(schema.get("pattern").is_some());
    }

    #[test]
    fn test_clean_strict_const_and_additional_properties() {
        // Spec scenario: const becomes enum, additionalProperties becomes
        // a hint, empty object gets a placeholder.
        let schema = json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "const": "active" },
                "metadata": { "type": "object", "additionalProperties": false }
            }
        });
        let cleaned = clean_strict(&schema);

        assert_eq!(cleaned["properties"]["status"]["enum"], json!(["active"]));
        assert!(cleaned["properties"]["status"].get("const").is_none());

        let metadata = &cleaned["properties"]["metadata"];
        assert!(metadata["description"]
            .as_str()
            .unwrap()
            .contains("No extra properties allowed"));
        assert!(metadata["properties"].get("_placeholder").is_some());
        assert_eq!(metadata["required"], json!(["_placeholder"]));
        assert!(metadata.get("additionalProperties").is_none());
    }

    #[test]
    fn test_clean_strict_refs_to_description() {
        let schema = json!({
            "type": "object",
            "properties": {
                "user": { "$ref": "#/$defs/User", "description": "the user" }
            },
            "$defs": { "User": { "type": "object" } }
        });
        let cleaned = clean_strict(&schema);
        let user = &cleaned["properties"]["user"];
        assert_eq!(user["type"], "object");
        assert!(user["description"].as_str().unwrap().contains("the user"));
        assert!(user["description"].as_str().unwrap().contains("See: User"));
        assert!(cleaned.get("$defs").is_none());
    }

    #[test]
    fn test_clean_strict_enum_hint() {
        let schema = json!({
            "type": "string",
            "enum": ["a", "b", "c"]
        });
        let cleaned = clean_strict(&schema);
        assert_eq!(
            cleaned["description"].as_str().unwrap(),
            "Allowed: a, b, c"
        );
        assert_eq!(cleaned["enum"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_clean_strict_constraint_hints() {
        let schema = json!({
            "type": "string",
            "description": "a name",
            "minLength": 1,
            "maxLength": 10
        });
        let cleaned = clean_strict(&schema);
        let desc = cleaned["description"].as_str().unwrap();
        assert!(desc.starts_with("a name"));
        assert!(desc.contains("minLength: 1"));
        assert!(desc.contains("maxLength: 10"));
        assert!(cleaned.get("minLength").is_none());
        assert!(cleaned.get("maxLength").is_none());
    }

    #[test]
    fn test_clean_strict_all_of_merge() {
        let schema = json!({
            "type": "object",
            "allOf": [
                {
                    "properties": { "a": { "type": "string" } },
                    "required": ["a"]
                },
                {
                    "properties": { "b": { "type": "number" } },
                    "required": ["b"],
                    "title": "ignored-when-present"
                }
            ]
        });
        let cleaned = clean_strict(&schema);
        assert!(cleaned.get("allOf").is_none());
        assert!(cleaned["properties"].get("a").is_some());
        assert!(cleaned["properties"].get("b").is_some());
        assert_eq!(cleaned["required"], json!(["a", "b"]));
    }

    #[test]
    fn test_clean_strict_anyof_all_enums_merge() {
        let schema = json!({
            "description": "pick one",
            "anyOf": [
                { "const": "x" },
                { "enum": ["y", "z"] }
            ]
        });
        let cleaned = clean_strict(&schema);
        assert_eq!(cleaned["type"], "string");
        assert_eq!(cleaned["enum"], json!(["x", "y", "z"]));
        assert!(cleaned["description"].as_str().unwrap().contains("pick one"));
    }

    #[test]
    fn test_clean_strict_anyof_picks_most_complex() {
        let schema = json!({
            "description": "payload",
            "anyOf": [
                { "type": "string" },
                {
                    "type": "object",
                    "properties": { "id": { "type": "string" } }
                }
            ]
        });
        let cleaned = clean_strict(&schema);
        assert_eq!(cleaned["type"], "object");
        assert!(cleaned["properties"].get("id").is_some());
        let desc = cleaned["description"].as_str().unwrap();
        assert!(desc.contains("payload"));
        assert!(desc.contains("Accepts: string | object"));
    }

    #[test]
    fn test_clean_strict_type_array_flatten() {
        let schema = json!({
            "type": ["string", "null"]
        });
        let cleaned = clean_strict(&schema);
        assert_eq!(cleaned["type"], "string");
        assert!(cleaned["description"].as_str().unwrap().contains("nullable"));
    }

    #[test]
    fn test_clean_strict_keeps_keyword_named_properties() {
        // A user property literally named "pattern" must survive.
        let schema = json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "format": { "type": "string" }
            },
            "required": ["pattern"]
        });
        let cleaned = clean_strict(&schema);
        assert!(cleaned["properties"].get("pattern").is_some());
        assert!(cleaned["properties"].get("format").is_some());
        assert_eq!(cleaned["required"], json!(["pattern"]));
    }

    #[test]
    fn test_clean_strict_required_cleanup() {
        let schema = json!({
            "type": "object",
            "properties": { "kept": { "type": "string" } },
            "required": ["kept", "phantom"]
        });
        let cleaned = clean_strict(&schema);
        assert_eq!(cleaned["required"], json!(["kept"]));
    }

    #[test]
    fn test_clean_light_idempotent() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "a": { "type": "string", "pattern": "^a", "minLength": 2 }
            }
        });
        let once = clean_light(&schema);
        let twice = clean_light(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_strict_idempotent_modulo_descriptions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "const": "active", "minLength": 1 },
                "metadata": { "type": "object", "additionalProperties": false },
                "mode": { "anyOf": [{ "const": "a" }, { "const": "b" }] }
            },
            "required": ["status", "gone"]
        });
        let once = clean_strict(&schema);
        let twice = clean_strict(&once);
        assert_eq!(strip_descriptions(&once), strip_descriptions(&twice));
    }
}
