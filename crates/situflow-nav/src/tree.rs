//! Tree navigation: explicit typed edges plus fallback routes.
//!
//! Each flow node wraps one situation and mirrors the container tree: a
//! node connected under `from` is registered as a child of `from`'s
//! situation. Navigating to a type resolves, in order:
//!
//! 1. the current node's direct child of that type,
//! 2. fallbacks registered on the current node or any ancestor (nearest
//!    first), scoped to that subtree,
//! 3. the tree-wide global fallbacks.
//!
//! A fallback may point anywhere in the tree; the container closes up to the
//! common ancestor and opens down to the target.

use crate::error::NavError;
use situflow_core::behavior::SituationBehavior;
use situflow_core::container::{SituationContainer, TransitionRequest};
use situflow_core::error::TransitionError;
use situflow_core::id::SituationId;
use situflow_core::transition::TransitionHandle;
use slotmap::{SlotMap, new_key_type};
use std::any::TypeId;
use std::collections::HashMap;

new_key_type! {
    /// Identifies a node of a [`SituationTree`].
    pub struct FlowNodeId;
}

/// Where a fallback route is visible from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackScope {
    /// From every node.
    Global,
    /// From the given node and all of its descendants.
    Subtree(FlowNodeId),
}

struct FlowNode {
    situation: SituationId,
    kind: TypeId,
    parent: Option<FlowNodeId>,
    children: HashMap<TypeId, FlowNodeId>,
    fallbacks: HashMap<TypeId, FlowNodeId>,
}

pub struct SituationTree {
    container: SituationContainer,
    nodes: SlotMap<FlowNodeId, FlowNode>,
    by_situation: HashMap<SituationId, FlowNodeId>,
    root: Option<FlowNodeId>,
    global_fallbacks: HashMap<TypeId, FlowNodeId>,
}

impl Default for SituationTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SituationTree {
    pub fn new() -> Self {
        Self::with_container(SituationContainer::new())
    }

    /// Wrap an empty container.
    pub fn with_container(container: SituationContainer) -> Self {
        Self {
            container,
            nodes: SlotMap::with_key(),
            by_situation: HashMap::new(),
            root: None,
            global_fallbacks: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    pub fn set_root<T: SituationBehavior>(&mut self, behavior: T) -> Result<FlowNodeId, NavError> {
        if self.root.is_some() {
            return Err(NavError::RootAlreadySet);
        }
        let node = self.insert_node(behavior, None)?;
        self.root = Some(node);
        Ok(node)
    }

    /// Add a typed edge `from -> T`. One edge per type per node.
    pub fn connect<T: SituationBehavior>(&mut self, from: FlowNodeId, behavior: T) -> Result<FlowNodeId, NavError> {
        let parent = self.nodes.get(from).ok_or(NavError::UnknownNode(from))?;
        if parent.children.contains_key(&TypeId::of::<T>()) {
            return Err(NavError::DuplicateEdge {
                kind: std::any::type_name::<T>(),
            });
        }
        let node = self.insert_node(behavior, Some(from))?;
        if let Some(parent) = self.nodes.get_mut(from) {
            parent.children.insert(TypeId::of::<T>(), node);
        }
        Ok(node)
    }

    fn insert_node<T: SituationBehavior>(
        &mut self,
        behavior: T,
        parent: Option<FlowNodeId>,
    ) -> Result<FlowNodeId, NavError> {
        let parent_situation = match parent {
            Some(parent) => Some(
                self.nodes
                    .get(parent)
                    .ok_or(NavError::UnknownNode(parent))?
                    .situation,
            ),
            None => None,
        };
        let situation = self.container.register(behavior, parent_situation)?;
        let node = self.nodes.insert(FlowNode {
            situation,
            kind: TypeId::of::<T>(),
            parent,
            children: HashMap::new(),
            fallbacks: HashMap::new(),
        });
        self.by_situation.insert(situation, node);
        Ok(node)
    }

    /// Remove the edge `from -> T` and dispose the whole subtree behind it.
    /// Fallbacks pointing into the subtree are dropped as well.
    pub fn disconnect<T: SituationBehavior>(&mut self, from: FlowNodeId) -> Result<(), NavError> {
        let kind = TypeId::of::<T>();
        let child = self
            .nodes
            .get(from)
            .ok_or(NavError::UnknownNode(from))?
            .children
            .get(&kind)
            .copied()
            .ok_or(NavError::NotConnected {
                kind: std::any::type_name::<T>(),
            })?;

        let subtree = self.subtree(child);
        let situation = self.nodes[child].situation;
        self.container.remove_subtree(situation)?;

        if let Some(parent) = self.nodes.get_mut(from) {
            parent.children.remove(&kind);
        }
        for node in &subtree {
            if let Some(removed) = self.nodes.remove(*node) {
                self.by_situation.remove(&removed.situation);
            }
        }
        self.global_fallbacks.retain(|_, target| !subtree.contains(target));
        for node in self.nodes.values_mut() {
            node.fallbacks.retain(|_, target| !subtree.contains(target));
        }
        tracing::debug!(removed = subtree.len(), "flow subtree disconnected");
        Ok(())
    }

    fn subtree(&self, node: FlowNodeId) -> Vec<FlowNodeId> {
        let mut out = Vec::new();
        let mut pending = vec![node];
        while let Some(next) = pending.pop() {
            if let Some(flow) = self.nodes.get(next) {
                out.push(next);
                pending.extend(flow.children.values().copied());
            }
        }
        out
    }

    /// Make `node` reachable by its type from everywhere `scope` covers.
    /// Replaces an earlier fallback of the same type in that scope.
    pub fn set_fallback_node(&mut self, scope: FallbackScope, node: FlowNodeId) -> Result<(), NavError> {
        let kind = self.nodes.get(node).ok_or(NavError::UnknownNode(node))?.kind;
        match scope {
            FallbackScope::Global => {
                self.global_fallbacks.insert(kind, node);
            }
            FallbackScope::Subtree(owner) => {
                self.nodes
                    .get_mut(owner)
                    .ok_or(NavError::UnknownNode(owner))?
                    .fallbacks
                    .insert(kind, node);
            }
        }
        Ok(())
    }

    /// Remove the fallback for `T` in `scope`. Returns whether one existed.
    pub fn reset_fallback_node<T: SituationBehavior>(&mut self, scope: FallbackScope) -> bool {
        let kind = TypeId::of::<T>();
        match scope {
            FallbackScope::Global => self.global_fallbacks.remove(&kind).is_some(),
            FallbackScope::Subtree(owner) => self
                .nodes
                .get_mut(owner)
                .is_some_and(|node| node.fallbacks.remove(&kind).is_some()),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn container(&self) -> &SituationContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut SituationContainer {
        &mut self.container
    }

    pub fn root(&self) -> Option<FlowNodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: FlowNodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn situation(&self, node: FlowNodeId) -> Option<SituationId> {
        self.nodes.get(node).map(|n| n.situation)
    }

    pub fn node_of(&self, situation: SituationId) -> Option<FlowNodeId> {
        self.by_situation.get(&situation).copied()
    }

    pub fn parent(&self, node: FlowNodeId) -> Option<FlowNodeId> {
        self.nodes.get(node)?.parent
    }

    /// The direct child of type `T`.
    pub fn child<T: SituationBehavior>(&self, node: FlowNodeId) -> Option<FlowNodeId> {
        self.nodes.get(node)?.children.get(&TypeId::of::<T>()).copied()
    }

    /// The node of the container's current situation.
    pub fn current(&self) -> Option<FlowNodeId> {
        self.container.current().and_then(|id| self.node_of(id))
    }

    pub fn is_transitioning(&self) -> bool {
        self.container.is_transitioning()
    }

    fn resolve(&self, kind: TypeId) -> Option<FlowNodeId> {
        if let Some(current) = self.current() {
            if let Some(&child) = self.nodes.get(current).and_then(|n| n.children.get(&kind)) {
                return Some(child);
            }
            let mut cursor = Some(current);
            while let Some(node) = cursor.and_then(|id| self.nodes.get(id)) {
                if let Some(&fallback) = node.fallbacks.get(&kind) {
                    return Some(fallback);
                }
                cursor = node.parent;
            }
        }
        self.global_fallbacks.get(&kind).copied()
    }

    /// Resolve `T` the way [`transition`](Self::transition) would, without
    /// navigating.
    pub fn check_transition<T: SituationBehavior>(&self) -> Option<FlowNodeId> {
        self.resolve(TypeId::of::<T>())
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    fn no_route(what: &str) -> TransitionHandle {
        let err = TransitionError::NoRoute(what.to_string());
        tracing::warn!(error = %err, "navigation rejected");
        TransitionHandle::rejected(err)
    }

    pub fn open_root(&mut self, request: TransitionRequest) -> TransitionHandle {
        match self.root.and_then(|root| self.situation(root)) {
            Some(situation) => self.container.transition(situation, request),
            None => Self::no_route("root"),
        }
    }

    /// Navigate to `T` through a direct edge or a fallback.
    pub fn transition<T: SituationBehavior>(&mut self, request: TransitionRequest) -> TransitionHandle {
        match self.check_transition::<T>().and_then(|node| self.situation(node)) {
            Some(situation) => self.container.transition(situation, request),
            None => Self::no_route(std::any::type_name::<T>()),
        }
    }

    /// Walk up `depth` parents from the current node and navigate there.
    /// The walk stops early at the root or at a node that is gone.
    pub fn back(&mut self, depth: usize, request: TransitionRequest) -> TransitionHandle {
        let Some(current) = self.current() else {
            return TransitionHandle::rejected(TransitionError::NothingRunning);
        };
        let mut target = current;
        for _ in 0..depth {
            match self.parent(target).filter(|parent| self.contains(*parent)) {
                Some(parent) => target = parent,
                None => break,
            }
        }
        if target == current {
            return Self::no_route("parent");
        }
        let situation = self.nodes[target].situation;
        self.container.transition(situation, request.back())
    }

    pub fn reset(&mut self, request: TransitionRequest) -> TransitionHandle {
        self.container.reset(request)
    }

    pub fn update(&mut self, delta: f32) {
        self.container.update(delta);
    }

    pub fn late_update(&mut self, delta: f32) {
        self.container.late_update(delta);
    }

    pub fn fixed_update(&mut self, delta: f32) {
        self.container.fixed_update(delta);
    }

    /// Release every situation and drop the whole topology.
    pub fn clear(&mut self) {
        self.container.clear();
        self.nodes.clear();
        self.by_situation.clear();
        self.global_fallbacks.clear();
        self.root = None;
    }
}
