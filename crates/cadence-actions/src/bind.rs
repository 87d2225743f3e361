//! Parameter binding.
//!
//! Binding concrete parameters to an action yields a child action, memoized
//! by the structural key of the merged parameters. Children are held weakly:
//! two binds with equal parameters return the same child while someone still
//! references it. Binding a reactive source yields a [`ProxyAction`] instead.

use cadence_core::params::{self, merge_with_parent};
use cadence_core::{Dynamic, ObserverGuard, Params, ParamsKey};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::Action;
use crate::handle::ActionHandle;
use crate::proxy::{ProxyAction, ProxyOptions};

/// One field of a [`ParamsPlan`].
#[derive(Clone)]
pub enum PlanField {
    Static(Value),
    Cell(Dynamic<Value>),
}

/// Object parameters whose fields may individually be reactive.
#[derive(Clone, Default)]
pub struct ParamsPlan {
    fields: BTreeMap<String, PlanField>,
}

impl ParamsPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), PlanField::Static(value));
        self
    }

    pub fn with_cell(mut self, key: impl Into<String>, cell: Dynamic<Value>) -> Self {
        self.fields.insert(key.into(), PlanField::Cell(cell));
        self
    }

    /// Whether any field is reactive.
    pub fn has_cells(&self) -> bool {
        self.fields
            .values()
            .any(|field| matches!(field, PlanField::Cell(_)))
    }

    /// Current parameter object.
    pub fn current(&self) -> Value {
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|(key, field)| {
                let value = match field {
                    PlanField::Static(value) => value.clone(),
                    PlanField::Cell(cell) => cell.get(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(object)
    }

    fn cells(&self) -> impl Iterator<Item = &Dynamic<Value>> {
        self.fields.values().filter_map(|field| match field {
            PlanField::Cell(cell) => Some(cell),
            PlanField::Static(_) => None,
        })
    }
}

/// A reactive parameter source.
#[derive(Clone)]
pub enum ParamsSource {
    /// A whole-parameter cell. `Params::Unset` resolves to the bound action.
    Cell(Dynamic<Params>),
    /// An object with reactive fields.
    Plan(ParamsPlan),
}

impl ParamsSource {
    pub(crate) fn current(&self) -> Params {
        match self {
            ParamsSource::Cell(cell) => cell.get(),
            ParamsSource::Plan(plan) => Params::Value(plan.current()),
        }
    }

    /// Sum of the versions of every reactive part. Changes whenever any
    /// part is written.
    pub(crate) fn version(&self) -> u64 {
        match self {
            ParamsSource::Cell(cell) => cell.version(),
            ParamsSource::Plan(plan) => plan.cells().map(Dynamic::version).sum(),
        }
    }

    pub(crate) fn observe<F>(&self, on_change: F) -> Vec<ObserverGuard>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let on_change = Arc::new(on_change);
        match self {
            ParamsSource::Cell(cell) => {
                vec![cell.observe(move |_| on_change())]
            }
            ParamsSource::Plan(plan) => plan
                .cells()
                .map(|cell| {
                    let on_change = on_change.clone();
                    cell.observe(move |_| on_change())
                })
                .collect(),
        }
    }
}

impl From<Dynamic<Params>> for ParamsSource {
    fn from(cell: Dynamic<Params>) -> Self {
        ParamsSource::Cell(cell)
    }
}

impl From<ParamsPlan> for ParamsSource {
    fn from(plan: ParamsPlan) -> Self {
        ParamsSource::Plan(plan)
    }
}

/// Input accepted by [`Action::bind`].
pub enum ParamsInput {
    Value(Value),
    Source(ParamsSource),
}

impl From<Value> for ParamsInput {
    fn from(value: Value) -> Self {
        ParamsInput::Value(value)
    }
}

impl From<ParamsSource> for ParamsInput {
    fn from(source: ParamsSource) -> Self {
        ParamsInput::Source(source)
    }
}

impl From<Dynamic<Params>> for ParamsInput {
    fn from(cell: Dynamic<Params>) -> Self {
        ParamsInput::Source(ParamsSource::Cell(cell))
    }
}

impl From<ParamsPlan> for ParamsInput {
    fn from(plan: ParamsPlan) -> Self {
        // A plan without cells is just a value.
        if plan.has_cells() {
            ParamsInput::Source(ParamsSource::Plan(plan))
        } else {
            ParamsInput::Value(plan.current())
        }
    }
}

impl Action {
    /// Bind parameters: a concrete value gives a child, a reactive source
    /// gives a proxy following it.
    pub fn bind(&self, input: impl Into<ParamsInput>) -> ActionHandle {
        match input.into() {
            ParamsInput::Value(value) => ActionHandle::Action(self.bind_params(value)),
            ParamsInput::Source(source) => {
                ActionHandle::Proxy(self.bind_source(source, ProxyOptions::default()))
            }
        }
    }

    /// Child for `overlay` merged over this action's parameters.
    ///
    /// Primitive overlays replace the parameters outright. Equal merged
    /// parameters return the same live child.
    pub fn bind_params(&self, overlay: Value) -> Action {
        let merged = if params::is_primitive(&overlay) {
            overlay
        } else {
            merge_with_parent(&self.params(), &overlay)
        };
        let key = ParamsKey::of(&merged);

        let mut children = self.inner.children.lock();
        if let Some(child) = children.get(&key).and_then(Action::upgrade) {
            return child;
        }
        children.retain(|_, weak| weak.strong_count() > 0);

        let child = Action::new_child(self, Params::Value(merged));
        children.insert(key, child.downgrade());
        drop(children);

        tracing::trace!(parent = %self, child = %child, "child action created");
        child
    }

    /// Proxy following `source`.
    pub fn bind_source(&self, source: ParamsSource, options: ProxyOptions) -> ProxyAction {
        let proxy = ProxyAction::new(self.clone(), source, options);
        let mut proxies = self.inner.proxies.lock();
        proxies.retain(|weak| weak.strong_count() > 0);
        proxies.push(proxy.downgrade());
        proxy
    }

    /// Merge `overlay` into this action's parameters in place.
    ///
    /// Returns whether the parameters changed. A child is re-keyed in its
    /// parent's memo table so later binds find it under the new key.
    pub fn replace_params(&self, overlay: Value) -> bool {
        let old = self.params();
        let mut next = old.to_value();
        let changed = match &old {
            Params::Value(current) if !params::is_primitive(current) && !params::is_primitive(&overlay) => {
                params::merge_into(&mut next, &overlay)
            }
            _ => {
                let changed = next != overlay || old.is_unset();
                next = overlay;
                changed
            }
        };
        if !changed {
            return false;
        }

        self.cells().params.set(Params::Value(next.clone()));

        if let Some(parent) = self.parent() {
            let mut children = parent.inner.children.lock();
            let old_key = old.key();
            if children
                .get(&old_key)
                .is_some_and(|weak| weak.as_ptr() == Arc::as_ptr(&self.inner))
            {
                children.remove(&old_key);
            }
            children.insert(ParamsKey::of(&next), self.downgrade());
        }
        tracing::debug!(action = %self, "params replaced");
        true
    }

    /// This action and every live descendant matching `predicate`, depth
    /// first. Children are visited in key order. With `include_proxies`,
    /// live proxies bound to each visited action are tested too.
    pub fn match_all_self_or_descendant<P>(
        &self,
        predicate: P,
        include_proxies: bool,
    ) -> Vec<ActionHandle>
    where
        P: Fn(&ActionHandle) -> bool,
    {
        let mut matches = Vec::new();
        self.collect_matching(&predicate, include_proxies, &mut matches);
        matches
    }

    fn collect_matching<P>(&self, predicate: &P, include_proxies: bool, out: &mut Vec<ActionHandle>)
    where
        P: Fn(&ActionHandle) -> bool,
    {
        let own = ActionHandle::Action(self.clone());
        if predicate(&own) {
            out.push(own);
        }

        if include_proxies {
            let proxies: Vec<ProxyAction> = self
                .inner
                .proxies
                .lock()
                .iter()
                .filter_map(ProxyAction::upgrade)
                .collect();
            for proxy in proxies {
                let handle = ActionHandle::Proxy(proxy);
                if predicate(&handle) {
                    out.push(handle);
                }
            }
        }

        let mut children: Vec<(ParamsKey, Action)> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(|(key, weak)| Action::upgrade(weak).map(|child| (key.clone(), child)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, child) in children {
            child.collect_matching(predicate, include_proxies, out);
        }
    }

    /// Live children, in key order.
    pub fn children(&self) -> Vec<Action> {
        let mut children: Vec<(ParamsKey, Action)> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(|(key, weak)| Action::upgrade(weak).map(|child| (key.clone(), child)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children.into_iter().map(|(_, child)| child).collect()
    }
}
