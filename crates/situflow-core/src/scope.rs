//! Cleanup scopes tied to lifecycle segments.
//!
//! A [`Scope`] collects cleanup actions registered while a segment is live
//! and fires each of them exactly once, either on [`Scope::clear`] or when
//! the scope is dropped. Actions run in reverse registration order.

use std::fmt;

/// A group of cleanup actions that expire together.
pub struct Scope {
    label: &'static str,
    actions: Vec<Box<dyn FnOnce()>>,
    /// Number of clears that fired at least one action.
    expirations: u64,
}

impl Scope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            actions: Vec::new(),
            expirations: 0,
        }
    }

    /// Register an action to run when this scope expires.
    pub fn on_expire(&mut self, action: impl FnOnce() + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Fire every registered action (newest first) and empty the scope.
    /// Returns how many actions ran.
    pub fn clear(&mut self) -> usize {
        if self.actions.is_empty() {
            return 0;
        }
        let actions = std::mem::take(&mut self.actions);
        let count = actions.len();
        for action in actions.into_iter().rev() {
            action();
        }
        self.expirations += 1;
        count
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of actions waiting for expiry.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// How many times this scope expired with pending actions.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("label", &self.label)
            .field("pending", &self.actions.len())
            .field("expirations", &self.expirations)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Per-situation scope set
// ---------------------------------------------------------------------------

/// Which lifecycle segment a scope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Lives from load start until unload.
    Load,
    /// Lives from setup until cleanup.
    Setup,
    /// Lives from activate until deactivate.
    Active,
    /// Lives from pre-open until post-close.
    Open,
    /// Lives for a single open or close body run.
    Animation,
}

/// The five segment scopes owned by one situation.
#[derive(Debug)]
pub struct SituationScopes {
    pub load: Scope,
    pub setup: Scope,
    pub active: Scope,
    pub open: Scope,
    pub animation: Scope,
}

impl Default for SituationScopes {
    fn default() -> Self {
        Self {
            load: Scope::new("load"),
            setup: Scope::new("setup"),
            active: Scope::new("active"),
            open: Scope::new("open"),
            animation: Scope::new("animation"),
        }
    }
}

impl SituationScopes {
    pub fn get(&self, kind: ScopeKind) -> &Scope {
        match kind {
            ScopeKind::Load => &self.load,
            ScopeKind::Setup => &self.setup,
            ScopeKind::Active => &self.active,
            ScopeKind::Open => &self.open,
            ScopeKind::Animation => &self.animation,
        }
    }

    pub fn get_mut(&mut self, kind: ScopeKind) -> &mut Scope {
        match kind {
            ScopeKind::Load => &mut self.load,
            ScopeKind::Setup => &mut self.setup,
            ScopeKind::Active => &mut self.active,
            ScopeKind::Open => &mut self.open,
            ScopeKind::Animation => &mut self.animation,
        }
    }
}
