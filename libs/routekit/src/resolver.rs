//! Best-match resolution of `(resource, context, action)` against a key space.
//!
//! The search is a fixed priority cascade from most to least specific:
//!
//! | step | key                    |
//! |------|------------------------|
//! | 1    | `resource?context?action` |
//! | 2    | `resource??action`     |
//! | 3    | `resource?context?`    |
//! | 4    | `?context?action`      |
//! | 5    | `??action`             |
//! | 6    | `resource??`           |
//! | 7    | `?context?`            |
//! | 8    | `??`                   |
//!
//! A step is only tried when every part it keeps was supplied (non-empty), so
//! absent parts never produce duplicate or misplaced keys. The catch-all is
//! always tried. The first key the provider knows wins; the tie-break is
//! positional, never score-based.

use std::collections::{BTreeSet, HashSet};

use crate::action_key::create_key;

/// Anything that can answer "is this serialized key routable?".
pub trait KeyProvider {
    fn contains_key(&self, key: &str) -> bool;
}

impl KeyProvider for HashSet<String> {
    fn contains_key(&self, key: &str) -> bool {
        self.contains(key)
    }
}

impl KeyProvider for BTreeSet<String> {
    fn contains_key(&self, key: &str) -> bool {
        self.contains(key)
    }
}

impl<F> KeyProvider for F
where
    F: Fn(&str) -> bool,
{
    fn contains_key(&self, key: &str) -> bool {
        self(key)
    }
}

const RESOURCE: u8 = 0b100;
const CONTEXT: u8 = 0b010;
const ACTION: u8 = 0b001;
const ALL: u8 = RESOURCE | CONTEXT | ACTION;

/// Parts kept by each cascade step, in priority order.
const CASCADE: [u8; 8] = [
    ALL,
    RESOURCE | ACTION,
    RESOURCE | CONTEXT,
    CONTEXT | ACTION,
    ACTION,
    RESOURCE,
    CONTEXT,
    0,
];

/// Ordered list of candidate keys for the given parts.
pub fn candidate_keys(resource: &str, context: &str, action: &str) -> Vec<String> {
    let mut present = 0u8;
    if !resource.is_empty() {
        present |= RESOURCE;
    }
    if !context.is_empty() {
        present |= CONTEXT;
    }
    if !action.is_empty() {
        present |= ACTION;
    }

    let mut keys: Vec<String> = Vec::with_capacity(CASCADE.len());
    for keep in CASCADE {
        if keep & !present != 0 {
            continue;
        }
        let pick = |bit: u8, part: &str| if keep & bit != 0 { part.to_string() } else { String::new() };
        let key = create_key(
            &pick(RESOURCE, resource),
            &pick(CONTEXT, context),
            &pick(ACTION, action),
        );
        keys.push(key);
    }
    keys
}

/// Return the first candidate key known to `provider`, or `None` when nothing routes.
pub fn get_best_match<P>(provider: &P, resource: &str, context: &str, action: &str) -> Option<String>
where
    P: KeyProvider + ?Sized,
{
    let found = candidate_keys(resource, context, action)
        .into_iter()
        .find(|key| provider.contains_key(key));
    tracing::trace!(resource, context, action, found = ?found, "action key resolution");
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn full_cascade_order() {
        let keys = candidate_keys("R", "C", "A");
        assert_eq!(
            keys,
            vec!["R?C?A", "R??A", "R?C?", "?C?A", "??A", "R??", "?C?", "??"]
        );
    }

    #[test]
    fn strict_priority_prefers_action_over_resource() {
        let p = provider(&["??A", "R??"]);
        assert_eq!(get_best_match(&p, "R", "C", "A").as_deref(), Some("??A"));
    }

    #[test]
    fn exact_match_wins() {
        let p = provider(&["R?C?A", "??", "R??A"]);
        assert_eq!(get_best_match(&p, "R", "C", "A").as_deref(), Some("R?C?A"));
    }

    #[test]
    fn catch_all_with_empty_inputs() {
        let p = provider(&["??"]);
        assert_eq!(get_best_match(&p, "", "", "").as_deref(), Some("??"));
        assert_eq!(candidate_keys("", "", ""), vec!["??"]);
    }

    #[test]
    fn no_match_returns_none() {
        let never = |_: &str| false;
        assert_eq!(get_best_match(&never, "R", "C", "A"), None);
        assert_eq!(get_best_match(&never, "", "", ""), None);
    }

    #[test]
    fn absent_parts_skip_steps_that_keep_them() {
        // context missing: steps 1, 3, 4 and 7 need it
        assert_eq!(candidate_keys("R", "", "A"), vec!["R??A", "??A", "R??", "??"]);
        assert_eq!(candidate_keys("", "C", ""), vec!["?C?", "??"]);
    }

    #[test]
    fn catch_all_reached_when_only_it_matches() {
        let p = provider(&["??"]);
        assert_eq!(get_best_match(&p, "R", "C", "A").as_deref(), Some("??"));
    }
}
