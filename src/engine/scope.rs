//! Run scopes and their expansion into story sets

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

use super::tree::{ComponentId, GroupId, StoryId, StoryTree};

/// The subset of stories a run targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RunScope {
    Story(StoryId),
    Component(ComponentId),
    Group(GroupId),
    All,
}

impl RunScope {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl std::fmt::Display for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Story(id) => write!(f, "story '{}'", id),
            Self::Component(id) => write!(f, "component '{}'", id),
            Self::Group(id) => write!(f, "group '{}'", id),
            Self::All => write!(f, "all stories"),
        }
    }
}

/// Parses `all`, `story:<id>`, `component:<id>` and `group:<id>`
impl FromStr for RunScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid scope '{}': expected all or <kind>:<id>", s))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("invalid scope '{}': missing id", s));
        }

        match kind.trim() {
            "story" => Ok(Self::Story(StoryId::from(id))),
            "component" => Ok(Self::Component(ComponentId::from(id))),
            "group" => Ok(Self::Group(GroupId::from(id))),
            other => Err(format!(
                "unknown scope kind '{}'. Expected story, component or group",
                other
            )),
        }
    }
}

/// Expands scopes against a tree
///
/// Expansion depends only on the tree, never on earlier runs.
pub struct ScopeResolver<'a> {
    tree: &'a StoryTree,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(tree: &'a StoryTree) -> Self {
        Self { tree }
    }

    /// Testable stories in scope
    ///
    /// Fails with `UnknownNode` for missing ids and `NotTestable` when nothing
    /// in scope can be tested.
    pub fn expand(&self, scope: &RunScope) -> Result<BTreeSet<StoryId>> {
        let ids: BTreeSet<StoryId> = self
            .tree
            .resolve_scope(scope)?
            .into_iter()
            .filter(|id| self.tree.story(id.as_str()).is_some_and(|s| s.testable))
            .collect();

        if ids.is_empty() {
            return Err(Error::not_testable(scope));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> StoryTree {
        StoryTree::builder()
            .story("addons-group-test--one", "addons/group/test", "One")
            .story("addons-group-test--two", "addons/group/test", "Two")
            .story_with("addons-group-test--skipped", "addons/group/test", "Skipped", false)
            .story("addons-group-other--three", "addons/group/other", "Three")
            .story_with("docs-only--page", "docs-only", "Page", false)
            .build()
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!("all".parse::<RunScope>().unwrap(), RunScope::All);
        assert_eq!(
            "component:addons-group-test".parse::<RunScope>().unwrap(),
            RunScope::Component(ComponentId::from("addons-group-test"))
        );
        assert!("widget:x".parse::<RunScope>().is_err());
        assert!("story:".parse::<RunScope>().is_err());
        assert!("addons".parse::<RunScope>().is_err());
    }

    #[test]
    fn test_expand_filters_untestable() {
        let tree = tree();
        let resolver = ScopeResolver::new(&tree);

        let ids = resolver
            .expand(&RunScope::Component(ComponentId::from("addons-group-test")))
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains("addons-group-test--skipped"));

        let ids = resolver.expand(&RunScope::Group(GroupId::from("addons-group"))).unwrap();
        assert_eq!(ids.len(), 3);

        assert_eq!(resolver.expand(&RunScope::All).unwrap().len(), 3);
    }

    #[test]
    fn test_untestable_story_is_rejected() {
        let tree = tree();
        let resolver = ScopeResolver::new(&tree);

        let err = resolver
            .expand(&RunScope::Story(StoryId::from("addons-group-test--skipped")))
            .unwrap_err();
        assert!(matches!(err, Error::NotTestable { .. }));

        let err = resolver
            .expand(&RunScope::Component(ComponentId::from("docs-only")))
            .unwrap_err();
        assert!(matches!(err, Error::NotTestable { .. }));
    }

    #[test]
    fn test_expand_is_deterministic() {
        let tree = tree();
        let resolver = ScopeResolver::new(&tree);
        let first = resolver.expand(&RunScope::All).unwrap();
        let second = resolver.expand(&RunScope::All).unwrap();
        assert_eq!(first, second);
    }
}
