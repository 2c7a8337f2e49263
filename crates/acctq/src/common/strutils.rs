/// Case-insensitive equality for cluster/account/user names.
///
/// Names compare case-insensitively throughout the accounting layer; byte-wise
/// comparison of names is always a bug.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Canonical lowercase key used for name-indexed maps.
pub fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Splits a comma-separated value list, dropping empty items
/// (`"a,,b"` -> `["a", "b"]`).
pub fn split_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{name_key, names_equal, split_comma_list};

    #[test]
    fn test_names_equal_ignores_case() {
        assert!(names_equal("Cluster1", "cluster1"));
        assert!(names_equal("ROOT", "root"));
        assert!(!names_equal("root", "roots"));
    }

    #[test]
    fn test_name_key() {
        assert_eq!(name_key("Alice"), "alice");
    }

    #[test]
    fn test_split_comma_list() {
        assert_eq!(split_comma_list("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_comma_list("a,,b"), vec!["a", "b"]);
        assert_eq!(split_comma_list(""), Vec::<String>::new());
    }
}
