//! Parameter name adaptation.
//!
//! Clients send keys in either camelCase or snake_case. Every input key is
//! also made available under both spellings so handlers can declare
//! parameters in whichever convention they use.

use serde_json::{Map, Value};

/// snake_case spelling of a key.
///
/// Keys already containing `_` are only lowercased; otherwise `_` is
/// inserted at each lower-to-upper transition.
pub fn to_snake(key: &str) -> String {
    if key.contains('_') {
        return key.to_lowercase();
    }
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if prev_lower && c.is_ascii_uppercase() {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c);
    }
    out.to_lowercase()
}

/// camelCase spelling of a key. Keys without `_` are returned unchanged.
pub fn to_camel(key: &str) -> String {
    if !key.contains('_') {
        return key.to_string();
    }
    let joined: String = key
        .to_lowercase()
        .split('_')
        .map(capitalize)
        .collect();
    lowercase_first(&joined)
}

/// Input map plus snake_case and camelCase aliases of every key
pub fn adapt_parameters(input: &Map<String, Value>) -> Map<String, Value> {
    let mut expanded = input.clone();
    for (key, value) in input {
        expanded.insert(to_snake(key), value.clone());
        expanded.insert(to_camel(key), value.clone());
    }
    expanded
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn lowercase_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_to_snake() {
        assert_eq!(to_snake("userId"), "user_id");
        assert_eq!(to_snake("parentCategoryId"), "parent_category_id");
        assert_eq!(to_snake("user_id"), "user_id");
        assert_eq!(to_snake("User_ID"), "user_id");
        assert_eq!(to_snake("page"), "page");
        assert_eq!(to_snake("HTTPCode"), "httpcode");
        assert_eq!(to_snake("pageNo2X"), "page_no2x");
    }

    #[test]
    fn test_to_camel() {
        assert_eq!(to_camel("user_id"), "userId");
        assert_eq!(to_camel("USER_ID"), "userId");
        assert_eq!(to_camel("parent_category_id"), "parentCategoryId");
        assert_eq!(to_camel("userId"), "userId");
        assert_eq!(to_camel("a__b"), "aB");
        assert_eq!(to_camel("_page"), "page");
    }

    #[test]
    fn test_adapt_parameters_both_spellings() {
        let input = json!({"userId": 5, "page_size": 20});
        let expanded = adapt_parameters(input.as_object().unwrap());
        assert_eq!(expanded["userId"], 5);
        assert_eq!(expanded["user_id"], 5);
        assert_eq!(expanded["page_size"], 20);
        assert_eq!(expanded["pageSize"], 20);
        assert_eq!(expanded.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_adapted_keys_resolve(key in "[a-z]{1,6}([A-Z][a-z]{1,6}){0,3}", value in any::<i64>()) {
            let mut input = Map::new();
            input.insert(key.clone(), json!(value));
            let expanded = adapt_parameters(&input);
            let snake = to_snake(&key);
            prop_assert_eq!(&expanded[&key], &json!(value));
            prop_assert_eq!(&expanded[&snake], &json!(value));
            // Lowercase-led camelCase survives a snake round trip
            prop_assert_eq!(to_camel(&snake), key);
        }
    }
}
