//! Snapshot of the workspace identifiers that should have an entry.

use indexmap::IndexSet;
use tracing::warn;

/// Identifiers valid for one reconciliation pass.
///
/// Keeps first-seen order so a batch of new entries always receives ports in
/// the same order for the same input. Identifiers that cannot be written as a
/// single host alias (empty, or containing whitespace) are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveWorkspaceSet {
    ids: IndexSet<String>,
}

impl ActiveWorkspaceSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = IndexSet::new();
        for raw in ids {
            let id = raw.as_ref().trim();
            if id.is_empty() {
                continue;
            }
            if id.chars().any(char::is_whitespace) {
                warn!(identifier = id, "skipping workspace identifier containing whitespace");
                continue;
            }
            set.insert(id.to_string());
        }
        Self { ids: set }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ActiveWorkspaceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
