use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_channel::oneshot;
use futures_util::future::{self, BoxFuture, Either, Shared};
use futures_util::FutureExt;
use serde_json::Value;

use crate::events::{EventBus, RouterEvent};
use crate::load::{AbortSignal, LoadError, Spawner};
use crate::pattern::Params;
use crate::route::{LoadingAppearance, Route};

/// Abort reason used when a newer load replaces a pending one.
pub const SUPERSEDED: &str = "superseded";

/// The shared handle of an in-flight load.
///
/// Rendering layers that suspend can await it; it resolves with the load
/// outcome, or rejects with [`LoadError::Aborted`].
pub type PendingLoad = Shared<BoxFuture<'static, Result<Value, LoadError>>>;

/// The state of a [`Controller`], with its status-dependent payload.
///
/// The resolved component is not part of the state; it lives in the route's
/// memoized component slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    /// The component fetch or data load has not settled yet.
    Loading,
    /// Both loads settled successfully.
    Ready {
        /// The data the route's loader produced.
        data: Value,
    },
    /// The load failed, or the rendering layer reported an error.
    Failed {
        /// The failure.
        error: LoadError,
    },
    /// The route reported that its resource does not exist.
    NotFound,
    /// The route requested a navigation elsewhere.
    Redirect {
        /// Where to navigate instead.
        target: String,
    },
}

impl ControllerState {
    /// Whether the state is anything but [`Loading`](Self::Loading).
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Loading)
    }

    /// Whether the state is [`Ready`](Self::Ready).
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

static NEXT_LOAD_ID: AtomicU64 = AtomicU64::new(0);

struct PendingSlot {
    id: u64,
    handle: PendingLoad,
    abort_tx: Option<oneshot::Sender<String>>,
    signal: AbortSignal,
}

struct ControllerInner<T: Clone> {
    state: ControllerState,
    fallback: Option<Arc<Controller<T>>>,
    pending: Option<PendingSlot>,
    frozen: bool,
}

/// The mutable, subscribable state machine bound to one route match.
///
/// A controller is created by reconciliation for every level of the matched
/// chain and owns the asynchronous load of that level's component and data.
/// Its identity is stable for the duration of one reconciliation result;
/// when a later navigation replaces it, it is frozen instead of destroyed,
/// so a still-in-flight load settling late cannot mutate discarded state.
///
/// At most one non-frozen pending load exists per controller; starting a new
/// load aborts the previous one. Settlement handlers compare the settling
/// load's identity against the currently tracked one and are a no-op when
/// they differ. That comparison is the sole race-prevention mechanism.
pub struct Controller<T: Clone> {
    route: Arc<Route<T>>,
    params: Params,
    context: Value,
    bus: EventBus<T>,
    spawner: Spawner,
    inner: Mutex<ControllerInner<T>>,
}

impl<T: Clone> Controller<T> {
    pub(crate) fn new(
        route: Arc<Route<T>>,
        params: Params,
        context: Value,
        bus: EventBus<T>,
        spawner: Spawner,
    ) -> Arc<Self> {
        Self::with_state(route, params, context, bus, spawner, ControllerState::Loading)
    }

    pub(crate) fn with_state(
        route: Arc<Route<T>>,
        params: Params,
        context: Value,
        bus: EventBus<T>,
        spawner: Spawner,
        state: ControllerState,
    ) -> Arc<Self> {
        Arc::new(Self {
            route,
            params,
            context,
            bus,
            spawner,
            inner: Mutex::new(ControllerInner {
                state,
                fallback: None,
                pending: None,
                frozen: false,
            }),
        })
    }

    /// The route this controller is bound to.
    pub fn route(&self) -> &Arc<Route<T>> {
        &self.route
    }

    /// The validated parameters this controller was created with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The navigation context this controller was created with.
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> ControllerState {
        self.inner.lock().unwrap().state.clone()
    }

    /// The previous view kept visible while this controller loads, per the
    /// route's [`LoadingAppearance`]. Cleared when the load settles.
    pub fn fallback(&self) -> Option<Arc<Controller<T>>> {
        self.inner.lock().unwrap().fallback.clone()
    }

    /// The handle of the in-flight load, if one is tracked.
    pub fn pending(&self) -> Option<PendingLoad> {
        self.inner
            .lock()
            .unwrap()
            .pending
            .as_ref()
            .map(|p| p.handle.clone())
    }

    /// Whether this controller was superseded and no longer mutates.
    pub fn is_frozen(&self) -> bool {
        self.inner.lock().unwrap().frozen
    }

    pub(crate) fn freeze(&self) {
        self.inner.lock().unwrap().frozen = true;
    }

    pub(crate) fn set_fallback(&self, fallback: Option<Arc<Controller<T>>>) {
        self.inner.lock().unwrap().fallback = fallback;
    }

    fn frozen_copy(self: &Arc<Self>, state: ControllerState) -> Arc<Self> {
        let copy = Self::with_state(
            self.route.clone(),
            self.params.clone(),
            self.context.clone(),
            self.bus.clone(),
            self.spawner.clone(),
            state,
        );
        copy.freeze();
        copy
    }

    fn publish(&self, event: RouterEvent<T>) {
        self.bus.publish(&event);
    }
}

impl<T: Clone + Send + Sync + 'static> Controller<T> {
    /// Start (or restart) loading this controller's component and data.
    ///
    /// Any previous pending load of this controller is aborted first; its
    /// handle rejects with [`LoadError::Aborted`]. The component fetch and
    /// the data loader run concurrently; the controller stays in
    /// [`ControllerState::Loading`] until both settle.
    pub fn load(self: &Arc<Self>) {
        let (abort_tx, abort_rx) = oneshot::channel::<String>();
        let signal = AbortSignal::new();
        let id = NEXT_LOAD_ID.fetch_add(1, Ordering::Relaxed);

        let route = self.route.clone();
        let params = self.params.clone();
        let context = self.context.clone();
        let loader_signal = signal.clone();

        let work = async move {
            let component = route.resolve_component();
            let data = async {
                match route.loader() {
                    Some(loader) => loader(params, context, loader_signal).await,
                    None => Ok(Value::Null),
                }
            };
            let (component, data) = future::join(component, data).await;
            component?;
            data
        };

        let raced = async move {
            match future::select(std::pin::pin!(work), abort_rx).await {
                Either::Left((outcome, _)) => outcome,
                Either::Right((reason, _)) => Err(LoadError::Aborted(
                    reason.unwrap_or_else(|_| String::from(SUPERSEDED)),
                )),
            }
        };
        let handle: PendingLoad = raced.boxed().shared();

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }

            if let Some(mut previous) = inner.pending.take() {
                previous.signal.set(String::from(SUPERSEDED));
                if let Some(tx) = previous.abort_tx.take() {
                    let _ = tx.send(String::from(SUPERSEDED));
                }
            }

            // keep the old view visible while reloading, per policy
            if inner.fallback.is_none()
                && inner.state.is_ready()
                && self.route.appearance() != LoadingAppearance::Loading
            {
                let state = inner.state.clone();
                inner.fallback = Some(self.frozen_copy(state));
            }

            inner.state = ControllerState::Loading;
            inner.pending = Some(PendingSlot {
                id,
                handle: handle.clone(),
                abort_tx: Some(abort_tx),
                signal,
            });
        }
        self.publish(RouterEvent::Loading {
            controller: self.clone(),
        });

        let this = self.clone();
        let driver = handle;
        (self.spawner)(Box::pin(async move {
            let outcome = driver.await;
            this.settle(id, outcome);
        }));
    }

    /// Re-enter loading from any settled state.
    pub fn reload(self: &Arc<Self>) {
        self.load();
    }

    fn settle(self: &Arc<Self>, id: u64, outcome: Result<Value, LoadError>) {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            match &inner.pending {
                // stale settlement of a replaced load
                Some(pending) if pending.id == id => {}
                _ => return,
            }
            inner.pending = None;
            inner.fallback = None;

            match outcome {
                Ok(data) => {
                    inner.state = ControllerState::Ready { data };
                    RouterEvent::Ready {
                        controller: self.clone(),
                    }
                }
                Err(LoadError::NotFound) => {
                    inner.state = ControllerState::NotFound;
                    RouterEvent::NotFound {
                        controller: self.clone(),
                    }
                }
                Err(LoadError::Redirect(target)) => {
                    inner.state = ControllerState::Redirect {
                        target: target.clone(),
                    };
                    RouterEvent::Redirect {
                        controller: self.clone(),
                        target,
                    }
                }
                Err(error) => {
                    inner.state = ControllerState::Failed {
                        error: error.clone(),
                    };
                    RouterEvent::Error {
                        controller: self.clone(),
                        error,
                    }
                }
            }
        };
        self.publish(event);
    }

    /// Abort the in-flight load, if any.
    ///
    /// The pending handle rejects with the reason. If this controller itself
    /// was loading, it also transitions to [`ControllerState::Failed`]
    /// holding [`LoadError::Aborted`]. A no-op when nothing is in flight.
    pub fn abort(self: &Arc<Self>, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            let Some(mut pending) = inner.pending.take() else {
                return;
            };
            pending.signal.set(reason.clone());
            if let Some(tx) = pending.abort_tx.take() {
                let _ = tx.send(reason.clone());
            }
            if matches!(inner.state, ControllerState::Loading) {
                inner.state = ControllerState::Failed {
                    error: LoadError::Aborted(reason.clone()),
                };
                inner.fallback = None;
            }
        }
        self.publish(RouterEvent::Aborted {
            controller: self.clone(),
            reason,
        });
    }

    /// Put the controller into [`ControllerState::Ready`] directly.
    pub fn set_data(self: &Arc<Self>, data: Value) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            inner.pending = None;
            inner.fallback = None;
            inner.state = ControllerState::Ready { data };
        }
        self.publish(RouterEvent::Ready {
            controller: self.clone(),
        });
    }

    /// Put the controller into [`ControllerState::Failed`].
    ///
    /// Reporting the error the controller already holds is a pure no-op, so
    /// a rendering layer re-throwing the same error during repeated render
    /// attempts does not cause an event storm.
    pub fn set_error(self: &Arc<Self>, error: LoadError) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            if matches!(&inner.state, ControllerState::Failed { error: held } if *held == error) {
                return;
            }
            inner.pending = None;
            inner.fallback = None;
            inner.state = ControllerState::Failed {
                error: error.clone(),
            };
        }
        self.publish(RouterEvent::Error {
            controller: self.clone(),
            error,
        });
    }

    /// Put the controller into [`ControllerState::NotFound`].
    pub fn not_found(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            inner.pending = None;
            inner.fallback = None;
            inner.state = ControllerState::NotFound;
        }
        self.publish(RouterEvent::NotFound {
            controller: self.clone(),
        });
    }

    /// Put the controller into [`ControllerState::Redirect`].
    pub fn redirect(self: &Arc<Self>, target: impl Into<String>) {
        let target = target.into();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.frozen {
                return;
            }
            inner.pending = None;
            inner.fallback = None;
            inner.state = ControllerState::Redirect {
                target: target.clone(),
            };
        }
        self.publish(RouterEvent::Redirect {
            controller: self.clone(),
            target,
        });
    }
}

impl<T: Clone> Debug for Controller<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Controller")
            .field("route", &self.route.pattern().to_string())
            .field("params", &self.params)
            .field("state", &inner.state)
            .field("frozen", &inner.frozen)
            .field("pending", &inner.pending.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use crate::events::Subscription;
    use crate::test_util::TestExecutor;

    use super::*;

    /// Lets a test decide when (and how) a data loader settles. Each queued
    /// sender gates exactly one load; loads without a queued gate settle
    /// immediately.
    #[derive(Clone, Default)]
    struct Gate {
        receivers: Arc<Mutex<VecDeque<oneshot::Receiver<Result<Value, LoadError>>>>>,
    }

    impl Gate {
        fn open(&self) -> oneshot::Sender<Result<Value, LoadError>> {
            let (tx, rx) = oneshot::channel();
            self.receivers.lock().unwrap().push_back(rx);
            tx
        }

        fn route(&self, appearance: LoadingAppearance) -> Arc<Route<&'static str>> {
            let receivers = self.receivers.clone();
            Arc::new(
                Route::for_component("/r", "view")
                    .unwrap()
                    .loading_appearance(appearance)
                    .data_loader(move |_, _, _| {
                        let rx = receivers.lock().unwrap().pop_front();
                        async move {
                            match rx {
                                Some(rx) => {
                                    rx.await.unwrap_or(Err(LoadError::other("gate dropped")))
                                }
                                None => Ok(json!("immediate")),
                            }
                        }
                    }),
            )
        }
    }

    fn recording_bus() -> (
        EventBus<&'static str>,
        Arc<Mutex<Vec<&'static str>>>,
        Subscription<&'static str>,
    ) {
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = bus.subscribe(move |event| {
            let name = match event {
                RouterEvent::Navigate { .. } => "navigate",
                RouterEvent::Loading { .. } => "loading",
                RouterEvent::Ready { .. } => "ready",
                RouterEvent::Error { .. } => "error",
                RouterEvent::NotFound { .. } => "not_found",
                RouterEvent::Redirect { .. } => "redirect",
                RouterEvent::Aborted { .. } => "aborted",
            };
            sink.lock().unwrap().push(name);
        });
        (bus, events, subscription)
    }

    fn controller(
        route: &Arc<Route<&'static str>>,
        bus: &EventBus<&'static str>,
        spawner: &Spawner,
    ) -> Arc<Controller<&'static str>> {
        Controller::new(
            route.clone(),
            Params::new(),
            Value::Null,
            bus.clone(),
            spawner.clone(),
        )
    }

    #[test]
    fn load_settles_to_ready() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let controller = controller(&gate.route(LoadingAppearance::Auto), &bus, &executor.spawner());

        controller.load();
        assert_eq!(controller.state(), ControllerState::Loading);
        assert!(controller.pending().is_some());

        executor.run();
        assert_eq!(
            controller.state(),
            ControllerState::Ready {
                data: json!("immediate")
            }
        );
        assert!(controller.pending().is_none());
        assert_eq!(*events.lock().unwrap(), vec!["loading", "ready"]);
    }

    #[test]
    fn second_load_aborts_the_first() {
        let executor = TestExecutor::new();
        let (bus, _, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Loading);
        let controller = controller(&route, &bus, &executor.spawner());

        let _tx1 = gate.open();
        let tx2 = gate.open();

        controller.load();
        executor.run();
        let first = controller.pending().unwrap();

        controller.load();
        executor.run();

        assert_eq!(
            first.now_or_never(),
            Some(Err(LoadError::Aborted(String::from(SUPERSEDED))))
        );
        assert_eq!(controller.state(), ControllerState::Loading);

        tx2.send(Ok(json!("second"))).unwrap();
        executor.run();
        assert_eq!(
            controller.state(),
            ControllerState::Ready {
                data: json!("second")
            }
        );
    }

    #[test]
    fn stale_settlement_is_a_no_op() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Loading);
        let controller = controller(&route, &bus, &executor.spawner());

        let tx1 = gate.open();
        let tx2 = gate.open();

        controller.load();
        executor.run();
        controller.load();
        executor.run();

        // the first load settles *after* being superseded; nothing happens
        let _ = tx1.send(Ok(json!("stale")));
        executor.run();
        assert_eq!(controller.state(), ControllerState::Loading);

        tx2.send(Ok(json!("fresh"))).unwrap();
        executor.run();
        assert_eq!(
            controller.state(),
            ControllerState::Ready {
                data: json!("fresh")
            }
        );
        assert_eq!(
            *events.lock().unwrap(),
            vec!["loading", "loading", "ready"]
        );
    }

    #[test]
    fn abort_while_loading_fails_with_reason() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Loading);
        let controller = controller(&route, &bus, &executor.spawner());

        let _tx = gate.open();
        controller.load();
        executor.run();
        let pending = controller.pending().unwrap();

        controller.abort("x");
        executor.run();

        assert_eq!(
            controller.state(),
            ControllerState::Failed {
                error: LoadError::Aborted(String::from("x"))
            }
        );
        assert_eq!(
            pending.now_or_never(),
            Some(Err(LoadError::Aborted(String::from("x"))))
        );
        assert_eq!(*events.lock().unwrap(), vec!["loading", "aborted"]);
    }

    #[test]
    fn abort_without_pending_load_is_a_no_op() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let controller = controller(&gate.route(LoadingAppearance::Auto), &bus, &executor.spawner());

        controller.abort("x");
        assert_eq!(controller.state(), ControllerState::Loading);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn loader_observes_the_abort_signal() {
        let executor = TestExecutor::new();
        let (bus, _, _sub) = recording_bus();

        let seen: Arc<Mutex<Option<AbortSignal>>> = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let route = Arc::new(
            Route::for_component("/r", "view")
                .unwrap()
                .data_loader(move |_, _, signal| {
                    *slot.lock().unwrap() = Some(signal);
                    async move { future::pending::<Result<Value, LoadError>>().await }
                }),
        );
        let controller = controller(&route, &bus, &executor.spawner());

        controller.load();
        executor.run();
        controller.abort("gone");

        let signal = seen.lock().unwrap().clone().unwrap();
        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(String::from("gone")));
    }

    #[test]
    fn reload_keeps_previous_view_as_fallback() {
        let executor = TestExecutor::new();
        let (bus, _, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Auto);
        let controller = controller(&route, &bus, &executor.spawner());

        controller.load();
        executor.run();
        assert!(controller.state().is_ready());

        let tx = gate.open();
        controller.reload();

        let fallback = controller.fallback().unwrap();
        assert!(fallback.is_frozen());
        assert_eq!(
            fallback.state(),
            ControllerState::Ready {
                data: json!("immediate")
            }
        );

        executor.run();
        tx.send(Ok(json!("reloaded"))).unwrap();
        executor.run();
        assert!(controller.fallback().is_none());
        assert_eq!(
            controller.state(),
            ControllerState::Ready {
                data: json!("reloaded")
            }
        );
    }

    #[test]
    fn loading_appearance_loading_never_keeps_a_fallback() {
        let executor = TestExecutor::new();
        let (bus, _, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Loading);
        let controller = controller(&route, &bus, &executor.spawner());

        controller.load();
        executor.run();
        assert!(controller.state().is_ready());

        let _tx = gate.open();
        controller.reload();
        assert!(controller.fallback().is_none());
    }

    #[test]
    fn sentinels_become_status() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let route = gate.route(LoadingAppearance::Auto);

        let not_found = controller(&route, &bus, &executor.spawner());
        let tx = gate.open();
        not_found.load();
        executor.run();
        tx.send(Err(LoadError::NotFound)).unwrap();
        executor.run();
        assert_eq!(not_found.state(), ControllerState::NotFound);

        let redirected = controller(&route, &bus, &executor.spawner());
        let tx = gate.open();
        redirected.load();
        executor.run();
        tx.send(Err(LoadError::Redirect(String::from("/login"))))
            .unwrap();
        executor.run();
        assert_eq!(
            redirected.state(),
            ControllerState::Redirect {
                target: String::from("/login")
            }
        );

        assert_eq!(
            *events.lock().unwrap(),
            vec!["loading", "not_found", "loading", "redirect"]
        );
    }

    #[test]
    fn failing_component_fetch_fails_the_load() {
        let executor = TestExecutor::new();
        let (bus, _, _sub) = recording_bus();
        let route = Arc::new(
            Route::<&'static str>::new("/r", || async { Err(LoadError::other("chunk missing")) })
                .unwrap(),
        );
        let controller = controller(&route, &bus, &executor.spawner());

        controller.load();
        executor.run();
        assert_eq!(
            controller.state(),
            ControllerState::Failed {
                error: LoadError::Message(String::from("chunk missing"))
            }
        );
    }

    #[test]
    fn identical_error_reports_are_suppressed() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let controller = controller(&gate.route(LoadingAppearance::Auto), &bus, &executor.spawner());

        controller.set_error(LoadError::other("boom"));
        controller.set_error(LoadError::other("boom"));
        controller.set_error(LoadError::other("other"));

        assert_eq!(*events.lock().unwrap(), vec!["error", "error"]);
    }

    #[test]
    fn frozen_controller_never_mutates() {
        let executor = TestExecutor::new();
        let (bus, events, _sub) = recording_bus();
        let gate = Gate::default();
        let controller = controller(&gate.route(LoadingAppearance::Auto), &bus, &executor.spawner());

        controller.set_data(json!("kept"));
        controller.freeze();

        controller.set_data(json!("changed"));
        controller.set_error(LoadError::other("boom"));
        controller.not_found();
        controller.redirect("/elsewhere");
        controller.reload();
        controller.abort("x");
        executor.run();

        assert_eq!(
            controller.state(),
            ControllerState::Ready {
                data: json!("kept")
            }
        );
        assert_eq!(*events.lock().unwrap(), vec!["ready"]);
    }
}
