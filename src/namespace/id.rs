//! Identifiers for namespace entries.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// One relative component of a namespace identifier, e.g. `Users`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemComponent(String);

impl ItemComponent {
    /// Wrap a component token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemComponent {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for ItemComponent {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// A fully qualified, path-like identifier: a root token followed by
/// relative components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsoluteId {
    root: String,
    components: Vec<ItemComponent>,
}

impl AbsoluteId {
    /// An identifier naming a root, such as `C:\` or `/`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            components: Vec::new(),
        }
    }

    /// Build an identifier from a filesystem path.
    ///
    /// `.` components are dropped and `..` pops the previous component.
    pub fn from_path(path: &Path) -> Self {
        let mut root = String::new();
        let mut components = Vec::new();

        for component in path.components() {
            match component {
                Component::Prefix(prefix) => {
                    root.push_str(&prefix.as_os_str().to_string_lossy());
                }
                Component::RootDir => root.push(std::path::MAIN_SEPARATOR),
                Component::CurDir => {}
                Component::ParentDir => {
                    components.pop();
                }
                Component::Normal(name) => {
                    components.push(ItemComponent::new(name.to_string_lossy().into_owned()));
                }
            }
        }

        Self { root, components }
    }

    /// Convert back into a filesystem path.
    pub fn to_path_buf(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.root);
        for component in &self.components {
            path.push(component.as_str());
        }
        path
    }

    /// The root token.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Components below the root, outermost first.
    pub fn components(&self) -> &[ItemComponent] {
        &self.components
    }

    /// True when the identifier names a root.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a component.
    pub fn join(&self, component: impl Into<ItemComponent>) -> Self {
        let mut joined = self.clone();
        joined.components.push(component.into());
        joined
    }

    /// The identifier of the containing entry, `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.components.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.components.pop();
        Some(parent)
    }

    /// The last component, `None` for a root.
    pub fn last_component(&self) -> Option<&ItemComponent> {
        self.components.last()
    }

    /// Components of `self` below `prefix`, if `prefix` is an ancestor of (or equal to) `self`.
    pub fn strip_prefix<'a>(
        &'a self,
        prefix: &AbsoluteId,
        same_component: impl Fn(&str, &str) -> bool,
    ) -> Option<&'a [ItemComponent]> {
        if !same_component(&self.root, &prefix.root)
            || prefix.components.len() > self.components.len()
        {
            return None;
        }

        let matches = prefix
            .components
            .iter()
            .zip(&self.components)
            .all(|(a, b)| same_component(a.as_str(), b.as_str()));

        matches.then(|| &self.components[prefix.components.len()..])
    }

    /// Whether `prefix` is an ancestor of (or equal to) `self`, comparing exactly.
    pub fn starts_with(&self, prefix: &AbsoluteId) -> bool {
        self.strip_prefix(prefix, |a, b| a == b).is_some()
    }

    fn separator(&self) -> char {
        if self.root.contains('\\') {
            '\\'
        } else {
            '/'
        }
    }
}

impl fmt::Display for AbsoluteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = self.separator();
        f.write_str(&self.root)?;

        let mut needs_separator = !self.root.is_empty() && !self.root.ends_with(separator);
        for component in &self.components {
            if needs_separator {
                write!(f, "{separator}")?;
            }
            f.write_str(component.as_str())?;
            needs_separator = true;
        }
        Ok(())
    }
}

/// Identifier stored on a tree node.
///
/// Roots carry an absolute id; every other node only knows its own component
/// and reaches the rest of its path through its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceItemId {
    /// A root entry.
    Absolute(AbsoluteId),
    /// A child entry, relative to its parent node.
    Relative(ItemComponent),
}
