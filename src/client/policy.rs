//! Cache policy table and cache key builders.
//!
//! Every cacheable read maps to one [`PolicyEntry`]: which tier holds its
//! results and for how long. Mutations are never cached and do not appear
//! here.

use std::collections::HashMap;
use std::time::Duration;

/// TTL for reference data that rarely changes: one week.
pub const REFERENCE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// TTL for the running entry, which changes whenever a timer starts or stops.
pub const RUNNING_ENTRY_TTL: Duration = Duration::from_secs(10);

/// Cacheable read operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentUser,
    Workspaces,
    Projects,
    Clients,
    Tasks,
    Tags,
    Favorites,
    RunningEntry,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::CurrentUser,
        Operation::Workspaces,
        Operation::Projects,
        Operation::Clients,
        Operation::Tasks,
        Operation::Tags,
        Operation::Favorites,
        Operation::RunningEntry,
    ];

    /// Short name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CurrentUser => "current_user",
            Operation::Workspaces => "workspaces",
            Operation::Projects => "projects",
            Operation::Clients => "clients",
            Operation::Tasks => "tasks",
            Operation::Tags => "tags",
            Operation::Favorites => "favorites",
            Operation::RunningEntry => "running_entry",
        }
    }
}

/// Where an operation's results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Always go to the remote service.
    None,
    /// Process-local, lost on exit.
    Memory,
    /// Persisted across runs in the cache file.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEntry {
    pub tier: Tier,
    pub ttl: Duration,
}

impl PolicyEntry {
    pub const fn new(tier: Tier, ttl: Duration) -> Self {
        Self { tier, ttl }
    }

    /// Never cache.
    pub const fn uncached() -> Self {
        Self::new(Tier::None, Duration::ZERO)
    }
}

/// Operation to policy table.
///
/// ```rust
/// # use punchclock::client::{CachePolicy, Operation, PolicyEntry, Tier};
/// # use std::time::Duration;
/// let policy = CachePolicy::default()
///     .with(Operation::RunningEntry, PolicyEntry::uncached());
/// assert_eq!(policy.lookup(Operation::RunningEntry).tier, Tier::None);
/// assert_eq!(policy.lookup(Operation::Projects).tier, Tier::File);
/// ```
#[derive(Debug, Clone)]
pub struct CachePolicy {
    entries: HashMap<Operation, PolicyEntry>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::with_ttls(REFERENCE_TTL, RUNNING_ENTRY_TTL)
    }
}

impl CachePolicy {
    /// Default table with custom TTLs for reference data and the running
    /// entry.
    pub fn with_ttls(reference_ttl: Duration, running_ttl: Duration) -> Self {
        let entries = Operation::ALL
            .into_iter()
            .map(|op| {
                let entry = match op {
                    Operation::RunningEntry => PolicyEntry::new(Tier::Memory, running_ttl),
                    _ => PolicyEntry::new(Tier::File, reference_ttl),
                };
                (op, entry)
            })
            .collect();
        Self { entries }
    }

    /// A table that caches nothing.
    pub fn disabled() -> Self {
        Self {
            entries: Operation::ALL
                .into_iter()
                .map(|op| (op, PolicyEntry::uncached()))
                .collect(),
        }
    }

    /// Override one operation's entry.
    pub fn with(mut self, op: Operation, entry: PolicyEntry) -> Self {
        self.entries.insert(op, entry);
        self
    }

    pub fn lookup(&self, op: Operation) -> PolicyEntry {
        self.entries
            .get(&op)
            .copied()
            .unwrap_or_else(PolicyEntry::uncached)
    }
}

/// Cache key builders.
///
/// Keys are `resource[:selector...]`. Invalidation matches by substring, so
/// every prefix that is invalidated ends in a separator.
pub mod keys {
    pub fn current_user() -> String {
        "user".to_string()
    }

    pub fn workspaces() -> String {
        "workspaces".to_string()
    }

    pub fn projects(workspace_id: &str) -> String {
        format!("projects:{workspace_id}")
    }

    pub fn clients(workspace_id: &str) -> String {
        format!("clients:{workspace_id}")
    }

    pub fn tasks(workspace_id: &str, project_id: &str) -> String {
        format!("tasks:{workspace_id}:{project_id}")
    }

    pub fn tags(workspace_id: &str) -> String {
        format!("tags:{workspace_id}")
    }

    pub fn favorites(workspace_id: &str) -> String {
        format!("favorites:{workspace_id}")
    }

    pub fn running_entry(workspace_id: &str, user_id: &str) -> String {
        format!("{}{user_id}", running_prefix(workspace_id))
    }

    /// Matches the running entry of every user in a workspace.
    pub fn running_prefix(workspace_id: &str) -> String {
        format!("running:{workspace_id}:")
    }
}
