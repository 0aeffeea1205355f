//! Story tree: the Group → Component → Story hierarchy
//!
//! Nodes are addressed by stable string ids and stored in flat maps, so scope
//! resolution is a lookup rather than a walk over owned subtrees. The tree is
//! built once from the story index and never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

use super::scope::RunScope;

macro_rules! node_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

node_id!(
    /// Story id, e.g. `example-button--primary`
    StoryId
);
node_id!(
    /// Component id, the sanitized story title, e.g. `addons-group-test`
    ComponentId
);
node_id!(
    /// Group id, the sanitized parent path of a title, e.g. `addons-group`
    GroupId
);

/// Kind of node an id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Story,
    Component,
    Group,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Story => write!(f, "story"),
            Self::Component => write!(f, "component"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// A single testable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryNode {
    pub id: StoryId,
    pub name: String,
    pub component_id: ComponentId,
    pub group_id: GroupId,
    pub testable: bool,
}

/// A component and the stories written for it, in index order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentNode {
    pub id: ComponentId,
    pub title: String,
    pub group_id: GroupId,
    pub stories: Vec<StoryId>,
}

/// A group of components sharing a title prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupNode {
    pub id: GroupId,
    pub title: String,
    pub components: Vec<ComponentId>,
}

/// Parents of a story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestors {
    pub component_id: ComponentId,
    pub group_id: GroupId,
}

/// Read-only registry of groups, components and stories
#[derive(Debug, Clone, Default)]
pub struct StoryTree {
    stories: BTreeMap<StoryId, StoryNode>,
    components: BTreeMap<ComponentId, ComponentNode>,
    groups: BTreeMap<GroupId, GroupNode>,
}

impl StoryTree {
    pub fn builder() -> TreeBuilder {
        TreeBuilder::default()
    }

    /// Load a tree from a Storybook-style `index.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let index: StoryIndex = serde_json::from_str(&content)
            .map_err(|e| Error::index_parse(&path.display().to_string(), e))?;
        Ok(Self::from_index(&index))
    }

    /// Build a tree from a parsed index; docs entries are skipped
    pub fn from_index(index: &StoryIndex) -> Self {
        let mut builder = Self::builder();
        for entry in index.entries.values() {
            if entry.entry_type != EntryType::Story {
                continue;
            }
            let testable = entry
                .tags
                .as_ref()
                .map_or(true, |tags| tags.iter().any(|t| t == "test"));
            builder = builder.story_with(&entry.id, &entry.title, &entry.name, testable);
        }
        builder.build()
    }

    pub fn story(&self, id: &str) -> Option<&StoryNode> {
        self.stories.get(id)
    }

    pub fn component(&self, id: &str) -> Option<&ComponentNode> {
        self.components.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&GroupNode> {
        self.groups.get(id)
    }

    pub fn stories(&self) -> impl Iterator<Item = &StoryNode> {
        self.stories.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupNode> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Find which kind of node an id names, preferring the most specific
    pub fn find(&self, id: &str) -> Option<NodeKind> {
        if self.stories.contains_key(id) {
            Some(NodeKind::Story)
        } else if self.components.contains_key(id) {
            Some(NodeKind::Component)
        } else if self.groups.contains_key(id) {
            Some(NodeKind::Group)
        } else {
            None
        }
    }

    /// Component and group a story belongs to
    pub fn ancestors_of(&self, story_id: &str) -> Result<Ancestors> {
        let story = self
            .story(story_id)
            .ok_or_else(|| Error::unknown_node("story", story_id))?;
        Ok(Ancestors {
            component_id: story.component_id.clone(),
            group_id: story.group_id.clone(),
        })
    }

    /// Every story under the node a scope names, testable or not
    pub fn resolve_scope(&self, scope: &RunScope) -> Result<BTreeSet<StoryId>> {
        match scope {
            RunScope::All => Ok(self.stories.keys().cloned().collect()),
            RunScope::Story(id) => {
                let story = self
                    .story(id.as_str())
                    .ok_or_else(|| Error::unknown_node("story", id.as_str()))?;
                Ok(BTreeSet::from([story.id.clone()]))
            }
            RunScope::Component(id) => {
                let component = self
                    .component(id.as_str())
                    .ok_or_else(|| Error::unknown_node("component", id.as_str()))?;
                Ok(component.stories.iter().cloned().collect())
            }
            RunScope::Group(id) => {
                let group = self
                    .group(id.as_str())
                    .ok_or_else(|| Error::unknown_node("group", id.as_str()))?;
                Ok(group
                    .components
                    .iter()
                    .filter_map(|c| self.components.get(c))
                    .flat_map(|c| c.stories.iter().cloned())
                    .collect())
            }
        }
    }
}

/// Incremental tree construction
#[derive(Debug, Default)]
pub struct TreeBuilder {
    tree: StoryTree,
}

impl TreeBuilder {
    /// Add a testable story
    pub fn story(self, id: &str, title: &str, name: &str) -> Self {
        self.story_with(id, title, name, true)
    }

    /// Add a story, deriving its component and group from the title
    ///
    /// A repeated story id keeps its first registration.
    pub fn story_with(mut self, id: &str, title: &str, name: &str, testable: bool) -> Self {
        if self.tree.stories.contains_key(id) {
            tracing::warn!(story_id = id, "Duplicate story id in index, keeping first");
            return self;
        }

        let component_id = ComponentId::new(sanitize(title));
        let group_title = match title.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => title,
        };
        let mut group_id = GroupId::new(sanitize(group_title));
        let story_id = StoryId::from(id);

        // Titles that sanitize alike share one component, in the first title's group
        if let Some(existing) = self.tree.components.get(&component_id) {
            if existing.title != title {
                tracing::warn!(
                    story_id = id,
                    title,
                    existing = %existing.title,
                    component_id = %component_id,
                    "Title collides with another component id, merging into it"
                );
                group_id = existing.group_id.clone();
            }
        }

        let group = self
            .tree
            .groups
            .entry(group_id.clone())
            .or_insert_with(|| GroupNode {
                id: group_id.clone(),
                title: group_title.to_string(),
                components: Vec::new(),
            });
        if !group.components.contains(&component_id) {
            group.components.push(component_id.clone());
        }

        self.tree
            .components
            .entry(component_id.clone())
            .or_insert_with(|| ComponentNode {
                id: component_id.clone(),
                title: title.to_string(),
                group_id: group_id.clone(),
                stories: Vec::new(),
            })
            .stories
            .push(story_id.clone());

        self.tree.stories.insert(
            story_id.clone(),
            StoryNode {
                id: story_id,
                name: name.to_string(),
                component_id,
                group_id,
                testable,
            },
        );
        self
    }

    pub fn build(self) -> StoryTree {
        self.tree
    }
}

/// Turn a title into an id: lowercase, runs of other characters become `-`
pub fn sanitize(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// On-disk story index
#[derive(Debug, Deserialize)]
pub struct StoryIndex {
    #[serde(default)]
    pub v: u32,
    pub entries: BTreeMap<String, IndexEntry>,
}

/// One entry of the story index
#[derive(Debug, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub name: String,
    #[serde(rename = "importPath", default)]
    pub import_path: Option<String>,
    #[serde(rename = "type", default)]
    pub entry_type: EntryType,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    Story,
    Docs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoryTree {
        StoryTree::builder()
            .story("example-button--primary", "Example/Button", "Primary")
            .story("example-button--secondary", "Example/Button", "Secondary")
            .story("example-header--logged-in", "Example/Header", "Logged In")
            .story_with("example-page--docs-only", "Example/Page", "Docs Only", false)
            .story("intro--welcome", "Intro", "Welcome")
            .build()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("addons/group/test"), "addons-group-test");
        assert_eq!(sanitize("Example/Button"), "example-button");
        assert_eq!(sanitize("  Weird // Title!! "), "weird-title");
    }

    #[test]
    fn test_hierarchy_from_titles() {
        let tree = sample();
        let ancestors = tree.ancestors_of("example-header--logged-in").unwrap();
        assert_eq!(ancestors.component_id.as_str(), "example-header");
        assert_eq!(ancestors.group_id.as_str(), "example");

        let group = tree.group("example").unwrap();
        assert_eq!(group.components.len(), 3);

        // A single-segment title forms its own group
        assert_eq!(tree.ancestors_of("intro--welcome").unwrap().group_id.as_str(), "intro");
    }

    #[test]
    fn test_colliding_titles_share_first_group() {
        let tree = StoryTree::builder()
            .story("foo-bar--one", "foo/bar", "One")
            .story("foo-bar--two", "foo-bar", "Two")
            .build();

        let component = tree.component("foo-bar").unwrap();
        assert_eq!(component.stories.len(), 2);
        assert_eq!(component.group_id.as_str(), "foo");
        assert_eq!(tree.ancestors_of("foo-bar--two").unwrap().group_id.as_str(), "foo");

        assert!(tree.group("foo-bar").is_none());
        assert!(matches!(
            tree.resolve_scope(&RunScope::Group(GroupId::from("foo-bar"))),
            Err(Error::UnknownNode { .. })
        ));
        assert_eq!(
            tree.resolve_scope(&RunScope::Group(GroupId::from("foo"))).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_resolve_scope() {
        let tree = sample();
        let ids = tree
            .resolve_scope(&RunScope::Component(ComponentId::from("example-button")))
            .unwrap();
        assert_eq!(ids.len(), 2);

        // Raw resolution keeps non-testable members
        let ids = tree.resolve_scope(&RunScope::Group(GroupId::from("example"))).unwrap();
        assert_eq!(ids.len(), 4);

        assert_eq!(tree.resolve_scope(&RunScope::All).unwrap().len(), 5);
    }

    #[test]
    fn test_unknown_nodes() {
        let tree = sample();
        assert!(matches!(
            tree.ancestors_of("missing--story"),
            Err(Error::UnknownNode { .. })
        ));
        assert!(matches!(
            tree.resolve_scope(&RunScope::Group(GroupId::from("nope"))),
            Err(Error::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_find_prefers_story() {
        let tree = sample();
        assert_eq!(tree.find("example-button--primary"), Some(NodeKind::Story));
        assert_eq!(tree.find("example-button"), Some(NodeKind::Component));
        assert_eq!(tree.find("example"), Some(NodeKind::Group));
        assert_eq!(tree.find("nothing"), None);
    }

    #[test]
    fn test_from_index_json() {
        let json = r#"{
            "v": 5,
            "entries": {
                "example-button--docs": {
                    "id": "example-button--docs", "title": "Example/Button", "name": "Docs",
                    "importPath": "./Button.mdx", "type": "docs", "tags": ["autodocs"]
                },
                "example-button--primary": {
                    "id": "example-button--primary", "title": "Example/Button", "name": "Primary",
                    "importPath": "./Button.stories.tsx", "type": "story", "tags": ["dev", "test"]
                },
                "example-button--no-test": {
                    "id": "example-button--no-test", "title": "Example/Button", "name": "No Test",
                    "importPath": "./Button.stories.tsx", "type": "story", "tags": ["dev"]
                }
            }
        }"#;
        let index: StoryIndex = serde_json::from_str(json).unwrap();
        let tree = StoryTree::from_index(&index);

        assert_eq!(tree.len(), 2);
        assert!(tree.story("example-button--primary").unwrap().testable);
        assert!(!tree.story("example-button--no-test").unwrap().testable);
        assert!(tree.story("example-button--docs").is_none());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StoryTree::load(&path), Err(Error::IndexParse { .. })));
    }
}
