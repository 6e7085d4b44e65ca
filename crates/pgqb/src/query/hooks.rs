//! Lifecycle hooks.

use super::{Query, QueryKind};
use crate::error::QbResult;
use crate::record::Record;
use std::fmt;
use std::sync::Arc;

pub type BeforeHook = Arc<dyn Fn(&Query) -> QbResult<()> + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(&[Record], &Query) -> QbResult<()> + Send + Sync>;

/// Which kind of statement a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Query,
    Create,
    Update,
    Delete,
}

impl HookPhase {
    pub(crate) fn of(query: &Query) -> Option<HookPhase> {
        match query.kind {
            QueryKind::Select => Some(HookPhase::Query),
            QueryKind::Insert => Some(HookPhase::Create),
            QueryKind::Update => Some(HookPhase::Update),
            QueryKind::Delete => Some(HookPhase::Delete),
            QueryKind::Truncate | QueryKind::ColumnInfo => None,
        }
    }
}

/// Hooks registered on a table or a single query.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before: Vec<(HookPhase, BeforeHook)>,
    pub(crate) after: Vec<(HookPhase, AfterHook)>,
    pub(crate) after_commit: Vec<(HookPhase, AfterHook)>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("after_commit", &self.after_commit.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(
        mut self,
        phase: HookPhase,
        f: impl Fn(&Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before.push((phase, Arc::new(f)));
        self
    }

    pub fn after(
        mut self,
        phase: HookPhase,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after.push((phase, Arc::new(f)));
        self
    }

    /// Runs once the surrounding transaction commits (immediately when there is none).
    pub fn after_commit(
        mut self,
        phase: HookPhase,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_commit.push((phase, Arc::new(f)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.after_commit.is_empty()
    }

    /// True when some after-hook for `phase` needs returned rows.
    pub(crate) fn wants_rows(&self, phase: HookPhase) -> bool {
        self.after
            .iter()
            .chain(&self.after_commit)
            .any(|(p, _)| *p == phase)
    }

    pub(crate) fn fire_before(&self, phase: HookPhase, query: &Query) -> QbResult<()> {
        for (_, hook) in self.before.iter().filter(|(p, _)| *p == phase) {
            hook(query)?;
        }
        Ok(())
    }

    pub(crate) fn fire_after(
        &self,
        phase: HookPhase,
        rows: &[Record],
        query: &Query,
    ) -> QbResult<()> {
        for (_, hook) in self.after.iter().filter(|(p, _)| *p == phase) {
            hook(rows, query)?;
        }
        Ok(())
    }

    pub(crate) fn commit_hooks(&self, phase: HookPhase) -> Vec<AfterHook> {
        self.after_commit
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub(crate) fn extend(&mut self, other: &Hooks) {
        self.before.extend(other.before.iter().cloned());
        self.after.extend(other.after.iter().cloned());
        self.after_commit.extend(other.after_commit.iter().cloned());
    }
}

impl Query {
    pub fn before_query(mut self, f: impl Fn(&Query) -> QbResult<()> + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.before(HookPhase::Query, f);
        self
    }

    pub fn after_query(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after(HookPhase::Query, f);
        self
    }

    pub fn before_create(mut self, f: impl Fn(&Query) -> QbResult<()> + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.before(HookPhase::Create, f);
        self
    }

    pub fn after_create(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after(HookPhase::Create, f);
        self
    }

    pub fn after_create_commit(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after_commit(HookPhase::Create, f);
        self
    }

    pub fn before_update(mut self, f: impl Fn(&Query) -> QbResult<()> + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.before(HookPhase::Update, f);
        self
    }

    pub fn after_update(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after(HookPhase::Update, f);
        self
    }

    pub fn after_update_commit(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after_commit(HookPhase::Update, f);
        self
    }

    pub fn before_delete(mut self, f: impl Fn(&Query) -> QbResult<()> + Send + Sync + 'static) -> Self {
        self.hooks = self.hooks.before(HookPhase::Delete, f);
        self
    }

    pub fn after_delete(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after(HookPhase::Delete, f);
        self
    }

    pub fn after_delete_commit(
        mut self,
        f: impl Fn(&[Record], &Query) -> QbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks = self.hooks.after_commit(HookPhase::Delete, f);
        self
    }

    /// Columns after-hooks need; they are added to the select/returning list.
    pub fn after_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_select
            .extend(columns.into_iter().map(Into::into));
        self
    }
}
