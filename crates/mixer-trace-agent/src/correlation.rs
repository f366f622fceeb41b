// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical request ids (`|root.token.token_`).
//!
//! A child id is its parent with a random 8 hex character token appended, followed by `.` when
//! the child is an outgoing dependency call and `_` when it is a request acknowledging the
//! parent. The root is the first `.` delimited segment once leading `|` are stripped.

use rand::Rng;

const ROOT_ID_BYTES: usize = 16;
const SEGMENT_BYTES: usize = 4;

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

/// 32 lowercase hex characters.
pub fn new_root_id() -> String {
    random_hex::<ROOT_ID_BYTES>()
}

/// Id of a dependency call started from `parent_id`.
pub fn start_dependency(parent_id: &str) -> String {
    format!("{parent_id}{}.", random_hex::<SEGMENT_BYTES>())
}

/// Id of a request acknowledging the call identified by `parent_id`.
pub fn acknowledge_request(parent_id: &str) -> String {
    format!("{parent_id}{}_", random_hex::<SEGMENT_BYTES>())
}

/// The trace root shared by every id derived from `id`. Empty when there is none.
pub fn extract_operation_root(id: &str) -> &str {
    id.trim_start_matches('|')
        .split('.')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use regex::Regex;

    use super::*;

    #[test]
    fn test_new_root_id_is_32_hex_chars() {
        let id = new_root_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_root_id());
    }

    #[test]
    fn test_child_ids() {
        let dependency = Regex::new(r"^\|original-guid\.[0-9a-f]{8}\.$").unwrap();
        let request = Regex::new(r"^\|original-guid\.[0-9a-f]{8}_$").unwrap();

        assert!(dependency.is_match(&start_dependency("|original-guid.")));
        assert!(request.is_match(&acknowledge_request("|original-guid.")));
    }

    #[test]
    fn test_extract_operation_root() {
        assert_eq!(extract_operation_root("|abc.def_ghi."), "abc");
        assert_eq!(extract_operation_root("||abc"), "abc");
        assert_eq!(
            extract_operation_root("|29b9f7da25a34eb183dfa589c30ee9e9.0"),
            "29b9f7da25a34eb183dfa589c30ee9e9"
        );
        assert_eq!(extract_operation_root(".abc.def"), "abc");
        assert_eq!(extract_operation_root("|"), "");
        assert_eq!(extract_operation_root(""), "");
    }

    proptest! {
        #[test]
        fn child_ids_keep_the_operation_root(root in "[0-9a-zA-Z-]{1,32}", suffix in "[0-9a-f._]{0,20}") {
            let id = format!("|{root}.{suffix}");
            let child = start_dependency(&acknowledge_request(&id));
            prop_assert!(child.starts_with(&id));
            prop_assert_eq!(extract_operation_root(&child), extract_operation_root(&id));
            prop_assert_eq!(extract_operation_root(&id), root.as_str());
        }
    }
}
