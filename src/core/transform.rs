//! Header and path transformation.
use hyper::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use regex::Regex;

use crate::core::model::{HeaderOps, PathRewrite};

/// Apply header operations in the fixed order remove → set → add.
///
/// `HeaderMap` keys are case-insensitive, which covers the case-insensitive
/// matching required for remove and for the add existence check. Existing
/// header values not named by any operation are preserved verbatim.
pub fn apply_header_ops(headers: &mut HeaderMap, ops: &HeaderOps) {
    for name in &ops.remove {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(&header_name);
        }
    }

    for (name, value) in &ops.set {
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(header_name, header_value);
        } else {
            tracing::debug!(header = %name, "skipping invalid header in set operation");
        }
    }

    for (name, value) in &ops.add {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "skipping invalid header in add operation");
            continue;
        };
        if headers.contains_key(&header_name) {
            continue;
        }
        if let Ok(header_value) = HeaderValue::from_str(value) {
            headers.insert(header_name, header_value);
        }
    }
}

/// Rewrite a path with a configured regex pattern.
///
/// Only the first match is replaced; the replacement may carry
/// back-references. An invalid pattern is swallowed and the original path
/// returned unchanged, as is a pattern that does not match.
pub fn rewrite_path(path: &str, rewrite: &PathRewrite) -> String {
    match Regex::new(&rewrite.pattern) {
        Ok(re) => re.replace(path, rewrite.replacement.as_str()).into_owned(),
        Err(e) => {
            tracing::debug!(pattern = %rewrite.pattern, error = %e, "invalid path rewrite pattern ignored");
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn ops(
        remove: &[&str],
        set: &[(&str, &str)],
        add: &[(&str, &str)],
    ) -> HeaderOps {
        HeaderOps {
            remove: remove.iter().map(|s| s.to_string()).collect(),
            set: set
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            add: add
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_remove_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Debug", HeaderValue::from_static("1"));

        apply_header_ops(&mut headers, &ops(&["x-debug"], &[], &[]));
        assert!(headers.get("x-debug").is_none());
    }

    #[test]
    fn test_remove_then_add_yields_added_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("old"));

        apply_header_ops(&mut headers, &ops(&["x-trace"], &[], &[("X-Trace", "new")]));
        assert_eq!(headers.get("x-trace").unwrap(), "new");
    }

    #[test]
    fn test_add_when_present_is_noop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-source", HeaderValue::from_static("original"));

        apply_header_ops(&mut headers, &ops(&[], &[], &[("X-Source", "shadow")]));
        assert_eq!(headers.get("x-source").unwrap(), "original");
    }

    #[test]
    fn test_set_wins_over_add() {
        let mut headers = HeaderMap::new();

        apply_header_ops(
            &mut headers,
            &ops(&[], &[("x-env", "set-value")], &[("x-env", "add-value")]),
        );
        assert_eq!(headers.get("x-env").unwrap(), "set-value");
    }

    #[test]
    fn test_set_overwrites_existing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-version", HeaderValue::from_static("1"));

        apply_header_ops(&mut headers, &ops(&[], &[("x-version", "2")], &[]));
        assert_eq!(headers.get("x-version").unwrap(), "2");
    }

    #[test]
    fn test_unrelated_headers_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));

        apply_header_ops(&mut headers, &ops(&["x-gone"], &[("x-new", "v")], &[]));
        assert_eq!(headers.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_rewrite_strips_prefix() {
        let rewrite = PathRewrite {
            pattern: "^/api".into(),
            replacement: "".into(),
        };
        assert_eq!(rewrite_path("/api/users", &rewrite), "/users");
    }

    #[test]
    fn test_rewrite_with_back_reference() {
        let rewrite = PathRewrite {
            pattern: "^/v1/(.*)$".into(),
            replacement: "/v2/$1".into(),
        };
        assert_eq!(rewrite_path("/v1/users/42", &rewrite), "/v2/users/42");
    }

    #[test]
    fn test_rewrite_unmatched_pattern_returns_input() {
        let rewrite = PathRewrite {
            pattern: "^/other".into(),
            replacement: "/x".into(),
        };
        assert_eq!(rewrite_path("/api/users", &rewrite), "/api/users");
    }

    #[test]
    fn test_rewrite_invalid_pattern_returns_input() {
        let rewrite = PathRewrite {
            pattern: "([unclosed".into(),
            replacement: "/x".into(),
        };
        assert_eq!(rewrite_path("/api/users", &rewrite), "/api/users");
    }
}
