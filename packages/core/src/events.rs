use std::sync::{Arc, Mutex, Weak};

use crate::controller::Controller;
use crate::load::LoadError;
use crate::location::Location;

/// An event published by the router or one of its controllers.
///
/// Events are published synchronously from within the mutator that caused
/// them; a listener observes the already updated controller state.
#[derive(Clone)]
pub enum RouterEvent<T: Clone> {
    /// A navigation request entered the router.
    Navigate {
        /// The requested location.
        location: Location,
    },
    /// A controller started or restarted loading.
    Loading {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
    },
    /// A controller's load settled with data.
    Ready {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
    },
    /// A controller entered an error state.
    Error {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
        /// The error it holds.
        error: LoadError,
    },
    /// A controller reported not-found.
    NotFound {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
    },
    /// A controller requested a redirect.
    Redirect {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
        /// Where to navigate instead.
        target: String,
    },
    /// A controller's pending load was aborted.
    Aborted {
        /// The controller that changed.
        controller: Arc<Controller<T>>,
        /// The abort reason.
        reason: String,
    },
}

type Listener<T> = Arc<dyn Fn(&RouterEvent<T>) + Send + Sync>;

struct BusInner<T: Clone> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// The event bus shared by a router and its controllers.
pub struct EventBus<T: Clone> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T: Clone> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener. It is called for every event, in subscription
    /// order, until the returned [`Subscription`] is dropped.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RouterEvent<T>) + Send + Sync + 'static,
    ) -> Subscription<T> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn publish(&self, event: &RouterEvent<T>) {
        // listeners may subscribe or unsubscribe from within the callback
        let listeners: Vec<Listener<T>> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };

        for listener in listeners {
            listener(event);
        }
    }
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription<T: Clone> {
    id: u64,
    bus: Weak<Mutex<BusInner<T>>>,
}

impl<T: Clone> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut inner) = bus.lock() {
                inner.listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
