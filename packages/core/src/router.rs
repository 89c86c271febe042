use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::controller::{Controller, ControllerState};
use crate::events::{EventBus, RouterEvent, Subscription};
use crate::hydration::HydrationChannel;
use crate::load::Spawner;
use crate::location::Location;
use crate::matcher::match_routes;
use crate::reconciler::reconcile;
use crate::route::Route;

/// What a navigation resolved to.
#[derive(Debug, Clone)]
pub enum NavigationOutcome<T: Clone> {
    /// The location matched; the new controller chain, ordered root to leaf.
    Matched(Vec<Arc<Controller<T>>>),
    /// No candidate route was viable for the location.
    NotFound,
}

/// The routing engine.
///
/// Owns the declared leaf routes (in priority order), the event bus, and
/// the current controller chain. A navigation request enters through
/// [`navigate`](Self::navigate); the rendering layer subscribes through
/// [`subscribe`](Self::subscribe) and reads the controllers of the returned
/// chain.
///
/// Controller chains are exclusively owned by the router that created them
/// and must not be shared across routers.
pub struct Router<T: Clone> {
    routes: Vec<Arc<Route<T>>>,
    bus: EventBus<T>,
    spawner: Spawner,
    context: Value,
    hydration: Option<Mutex<HydrationChannel>>,
    chain: Mutex<Vec<Arc<Controller<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Router<T> {
    /// Create a router over `routes`, spawning load futures through
    /// `spawner`.
    ///
    /// The route order is the matching priority order.
    pub fn new(routes: Vec<Arc<Route<T>>>, spawner: Spawner) -> Self {
        Self {
            routes,
            bus: EventBus::new(),
            spawner,
            context: Value::Null,
            hydration: None,
            chain: Mutex::new(Vec::new()),
        }
    }

    /// Attach a navigation context, passed to every data loader and compared
    /// during reconciliation.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Attach a hydration channel.
    ///
    /// A client side channel seeds the first navigation's controllers from
    /// the server's settled states instead of re-invoking their loaders; a
    /// server side channel can capture the settled chain via
    /// [`hydration_payload`](Self::hydration_payload).
    pub fn with_hydration(mut self, channel: HydrationChannel) -> Self {
        self.hydration = Some(Mutex::new(channel));
        self
    }

    /// Register an event listener.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RouterEvent<T>) + Send + Sync + 'static,
    ) -> Subscription<T> {
        self.bus.subscribe(listener)
    }

    /// The navigation context.
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// The current controller chain, ordered root to leaf. Empty before the
    /// first navigation and after a not-found resolution.
    pub fn active_chain(&self) -> Vec<Arc<Controller<T>>> {
        self.chain.lock().unwrap().clone()
    }

    /// Resolve `location` and swap the controller chain accordingly.
    ///
    /// Publishes [`RouterEvent::Navigate`], matches the route tree,
    /// reconciles the previous chain into the new one, freezes every
    /// controller that did not survive, and starts loading the ones that are
    /// new or changed. With a client side hydration channel attached,
    /// controllers are seeded positionally from the captured server states
    /// instead.
    pub fn navigate(&self, location: &Location) -> NavigationOutcome<T> {
        self.bus.publish(&RouterEvent::Navigate {
            location: location.clone(),
        });

        let matches = match_routes(&location.pathname, &location.search_params, &self.routes);
        let Some(matches) = matches else {
            let previous = std::mem::take(&mut *self.chain.lock().unwrap());
            for controller in &previous {
                controller.freeze();
            }
            return NavigationOutcome::NotFound;
        };

        let reconciled = {
            let mut chain = self.chain.lock().unwrap();
            let reconciled = reconcile(&chain, &matches, &self.context, &self.bus, &self.spawner);
            *chain = reconciled.chain.clone();
            reconciled
        };

        for &index in &reconciled.to_load {
            let controller = &reconciled.chain[index];
            let seeded = self
                .hydration
                .as_ref()
                .and_then(|channel| channel.lock().unwrap().consume(index));

            match seeded {
                Some(state) => match state.into_state() {
                    ControllerState::Ready { data } => controller.set_data(data),
                    ControllerState::Failed { error } => controller.set_error(error),
                    ControllerState::NotFound => controller.not_found(),
                    ControllerState::Redirect { target } => controller.redirect(target),
                    ControllerState::Loading => controller.load(),
                },
                None => controller.load(),
            }
        }

        NavigationOutcome::Matched(reconciled.chain)
    }

    /// Capture the current chain into the attached server side hydration
    /// channel and return its payload.
    ///
    /// Returns [`None`] when no channel is attached.
    pub fn hydration_payload(&self) -> Option<Result<String, serde_json::Error>> {
        let channel = self.hydration.as_ref()?;
        let mut channel = channel.lock().unwrap();
        channel.capture(&self.chain.lock().unwrap());
        Some(channel.payload())
    }

    /// Tear down the attached hydration channel, dropping unconsumed state.
    pub fn teardown_hydration(&self) {
        if let Some(channel) = &self.hydration {
            channel.lock().unwrap().teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::controller::ControllerState;
    use crate::hydration::SerializedState;
    use crate::route::Route;
    use crate::test_util::TestExecutor;

    use super::*;

    fn routes() -> (Vec<Arc<Route<&'static str>>>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();

        let a = Arc::new(Route::for_component("/a", "A").unwrap());
        let b = Arc::new(
            Route::for_component("/b", "B")
                .unwrap()
                .parent(&a)
                .data_loader(move |params, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let params = params.clone();
                    async move { Ok(json!({ "params": params })) }
                }),
        );
        (vec![a, b], loads)
    }

    #[test]
    fn navigate_builds_and_loads_chain() {
        let executor = TestExecutor::new();
        let (routes, loads) = routes();
        let router = Router::new(routes, executor.spawner());

        let NavigationOutcome::Matched(chain) = router.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].state(), ControllerState::Loading);

        executor.run();
        assert!(chain[0].state().is_ready());
        assert!(chain[1].state().is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_found_clears_and_freezes_chain() {
        let executor = TestExecutor::new();
        let (routes, _) = routes();
        let router = Router::new(routes, executor.spawner());

        let NavigationOutcome::Matched(chain) = router.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };
        executor.run();

        assert!(matches!(
            router.navigate(&"/missing".into()),
            NavigationOutcome::NotFound
        ));
        assert!(router.active_chain().is_empty());
        assert!(chain[0].is_frozen());
        assert!(chain[1].is_frozen());
    }

    #[test]
    fn unchanged_navigation_reuses_controllers() {
        let executor = TestExecutor::new();
        let (routes, loads) = routes();
        let router = Router::new(routes, executor.spawner());

        let NavigationOutcome::Matched(first) = router.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };
        executor.run();

        let NavigationOutcome::Matched(second) = router.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[1], &second[1]));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hydration_seeds_without_invoking_loaders() {
        let executor = TestExecutor::new();
        let (routes, loads) = routes();

        let payload = serde_json::to_string(&vec![
            Some(SerializedState::Ready { data: json!(null) }),
            Some(SerializedState::Ready { data: json!({"seeded": true}) }),
        ])
        .unwrap();
        let channel = HydrationChannel::client(&payload).unwrap();
        let router = Router::new(routes, executor.spawner()).with_hydration(channel);

        let NavigationOutcome::Matched(chain) = router.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };

        assert_eq!(
            chain[1].state(),
            ControllerState::Ready {
                data: json!({"seeded": true})
            }
        );
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn server_round_trip_through_payload() {
        let executor = TestExecutor::new();
        let (routes, _) = routes();
        let server =
            Router::new(routes.clone(), executor.spawner()).with_hydration(HydrationChannel::server());

        server.navigate(&"/a/b".into());
        executor.run();
        let payload = server.hydration_payload().unwrap().unwrap();

        let client_executor = TestExecutor::new();
        let (client_routes, client_loads) = routes_like(&routes);
        let client = Router::new(client_routes, client_executor.spawner())
            .with_hydration(HydrationChannel::client(&payload).unwrap());

        let NavigationOutcome::Matched(chain) = client.navigate(&"/a/b".into()) else {
            panic!("expected a match");
        };
        assert!(chain[0].state().is_ready());
        assert!(chain[1].state().is_ready());
        assert_eq!(client_loads.load(Ordering::SeqCst), 0);
        client.teardown_hydration();
    }

    /// A structurally identical route tree, as the client side of a handoff
    /// would declare it.
    fn routes_like(
        _server: &[Arc<Route<&'static str>>],
    ) -> (Vec<Arc<Route<&'static str>>>, Arc<AtomicUsize>) {
        routes()
    }
}
