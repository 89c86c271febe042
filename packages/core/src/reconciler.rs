use std::sync::Arc;

use serde_json::Value;

use crate::controller::Controller;
use crate::events::EventBus;
use crate::load::Spawner;
use crate::matcher::RouteMatch;
use crate::route::LoadingAppearance;

/// The result of diffing a previous controller chain against a fresh match.
pub(crate) struct Reconciled<T: Clone> {
    /// The new chain, ordered root to leaf.
    pub(crate) chain: Vec<Arc<Controller<T>>>,
    /// Indices into `chain` of controllers that need a load started.
    pub(crate) to_load: Vec<usize>,
}

/// Walk the previous chain and the new matches in lockstep and decide, per
/// level, whether to reuse the previous controller, replace it with a
/// fallback attached, or replace it outright.
///
/// Every previous controller not carried into the new chain is frozen. Once
/// the routes diverge, deeper previous controllers are not compared against
/// at all; their disposal is the rendering layer's concern once it stops
/// subscribing.
pub(crate) fn reconcile<T: Clone>(
    previous: &[Arc<Controller<T>>],
    matches: &[RouteMatch<T>],
    context: &Value,
    bus: &EventBus<T>,
    spawner: &Spawner,
) -> Reconciled<T> {
    let mut chain = Vec::with_capacity(matches.len());
    let mut to_load = Vec::new();
    let mut diverged = false;

    for (index, matched) in matches.iter().enumerate() {
        let prev = if diverged { None } else { previous.get(index) };

        let fresh = |fallback: Option<Arc<Controller<T>>>| {
            let controller = Controller::new(
                matched.route.clone(),
                matched.params.clone(),
                context.clone(),
                bus.clone(),
                spawner.clone(),
            );
            controller.set_fallback(fallback);
            controller
        };

        match prev {
            Some(prev)
                if Arc::ptr_eq(prev.route(), &matched.route)
                    && prev.params() == &matched.params
                    && prev.context() == context =>
            {
                // unchanged level: state, payload and in-flight load carry
                // over verbatim
                chain.push(prev.clone());
            }
            Some(prev) if Arc::ptr_eq(prev.route(), &matched.route) => {
                // same route, changed params or context
                let keep_previous_view = prev.state().is_ready()
                    && matches!(
                        matched.route.appearance(),
                        LoadingAppearance::Avoid | LoadingAppearance::RouteLoading
                    );
                let fallback = keep_previous_view.then(|| prev.clone());

                to_load.push(index);
                chain.push(fresh(fallback));
            }
            Some(prev) => {
                // route changed; the previous subtree below this point is
                // not walked any further
                diverged = true;

                let keep_previous_view = prev.state().is_ready()
                    && matched.route.appearance() == LoadingAppearance::Avoid;
                let fallback = keep_previous_view.then(|| prev.clone());

                to_load.push(index);
                chain.push(fresh(fallback));
            }
            None => {
                to_load.push(index);
                chain.push(fresh(None));
            }
        }
    }

    for prev in previous {
        if !chain.iter().any(|c| Arc::ptr_eq(c, prev)) {
            prev.freeze();
        }
    }

    Reconciled { chain, to_load }
}
