//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid build name (lowercase alphanumeric with hyphens)
    pub fn build_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a set of distinct build names
    pub fn distinct_build_names(max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set(build_name(), 1..=max)
            .prop_map(|names| names.into_iter().collect())
    }

    /// Generate a project path such as `:core:api`
    pub fn project_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9]{0,8}", 1..4)
            .prop_map(|segments| format!(":{}", segments.join(":")))
    }

    /// Generate an absolute build root directory
    pub fn root_dir() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9_]{0,8}", 1..4)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::config::defaults::MIN_PROPTEST_ITERATIONS;
    use crate::core::identity::ProjectPath;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(MIN_PROPTEST_ITERATIONS))]

        #[test]
        fn test_build_name_generator(name in build_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_distinct_build_names_generator(names in distinct_build_names(6)) {
            let unique: HashSet<&String> = names.iter().collect();
            prop_assert_eq!(unique.len(), names.len());
        }

        #[test]
        fn test_project_path_generator(path in project_path()) {
            let parsed = ProjectPath::parse(&path);
            prop_assert!(!parsed.is_root());
            prop_assert_eq!(parsed.to_string(), path);
        }

        #[test]
        fn test_root_dir_generator(dir in root_dir()) {
            prop_assert!(dir.starts_with('/'));
            prop_assert!(!dir.contains(".."));
        }
    }
}
