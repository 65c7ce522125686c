use std::collections::HashSet;

use crate::Namespace;

pub const DEFAULT_NAMESPACE_INDEX: i32 = 844;

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Namespaces comments are displayed in, `None` meaning all content namespaces
    pub allowed_namespaces: Option<HashSet<Namespace>>,
    pub content_namespaces: HashSet<Namespace>,

    /// Display comments on all talk pages, not only those whose subject namespace is allowed
    pub enable_talk: bool,

    pub newest_streams_on_top: bool,
    pub initially_collapsed_namespaces: HashSet<Namespace>,

    /// Keep reply-create log entries out of the recent changes feed
    pub suppress_logs_from_rcs: bool,

    /// Index of the namespace comment pages live in, its talk namespace is the next one
    pub namespace_index: i32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            allowed_namespaces: None,
            content_namespaces: [Namespace::MAIN].into_iter().collect(),
            enable_talk: false,
            newest_streams_on_top: false,
            initially_collapsed_namespaces: HashSet::new(),
            suppress_logs_from_rcs: false,
            namespace_index: DEFAULT_NAMESPACE_INDEX,
        }
    }
}

impl Config {
    pub fn comment_namespace(&self) -> Namespace {
        Namespace(self.namespace_index)
    }

    pub fn comment_talk_namespace(&self) -> Namespace {
        Namespace(self.namespace_index + 1)
    }

    pub fn is_allowed(&self, ns: Namespace) -> bool {
        self.allowed_namespaces
            .as_ref()
            .unwrap_or(&self.content_namespaces)
            .contains(&ns)
    }
}
