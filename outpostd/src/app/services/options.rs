// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde_json::{Map, Value};

/// Fills in `defaults` for every key the caller did not set. Nested objects
/// are merged key by key; any other caller value wins as is.
pub fn merge_user_options(user: Map<String, Value>, defaults: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = user;
    for (key, default) in defaults {
        match (merged.get_mut(key), default) {
            (None, _) => {
                merged.insert(key.clone(), default.clone());
            }
            (Some(Value::Object(current)), Value::Object(nested)) => {
                let taken = std::mem::take(current);
                *current = merge_user_options(taken, nested);
            }
            (Some(_), _) => {}
        }
    }
    merged
}
