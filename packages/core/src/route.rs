use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use async_lock::OnceCell;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;

use crate::load::{AbortSignal, LoadError};
use crate::pattern::{Params, PathPattern, PatternError};

/// Controls what is shown while a route reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingAppearance {
    /// Always show this route's own pending state.
    Loading,
    /// Keep the replaced view visible during a same-route reload, so the
    /// screen does not flash to a placeholder.
    #[default]
    Auto,
    /// Like [`Auto`](Self::Auto), but the replaced view also stays visible
    /// across a route change, as long as it was ready.
    Avoid,
    /// Like [`Avoid`](Self::Avoid), but only for parameter or context
    /// changes within the same route.
    RouteLoading,
}

/// Where a route's state is produced during server rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderingDisposition {
    /// Rendered on the server; its settled state is part of the hydration
    /// payload.
    #[default]
    Server,
    /// Client only; the hydration payload carries no entry for it.
    Client,
}

/// An error a [`ParamAdapter`] reports when the merged parameters are not
/// valid for its route.
///
/// Adapter rejection is recovered locally during matching: the whole
/// candidate chain is discarded and the next candidate route is tried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid parameters: {0}")]
pub struct AdapterError(String);

impl AdapterError {
    /// Create an adapter error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Validates and transforms the merged pathname and search parameters of one
/// route level.
pub trait ParamAdapter: Send + Sync {
    /// Parse the merged raw parameters into validated ones, or reject them.
    fn parse(&self, raw: &Params) -> Result<Params, AdapterError>;
}

impl<F> ParamAdapter for F
where
    F: Fn(&Params) -> Result<Params, AdapterError> + Send + Sync,
{
    fn parse(&self, raw: &Params) -> Result<Params, AdapterError> {
        self(raw)
    }
}

/// Loads the data a route needs, given validated params, the navigation
/// context and a cancellation signal.
pub type DataLoader =
    Arc<dyn Fn(Params, Value, AbortSignal) -> BoxFuture<'static, Result<Value, LoadError>> + Send + Sync>;

/// Fetches the component a route renders. Expected to be pure with respect
/// to its route; the first successful resolution is cached forever.
pub type ComponentFetcher<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, LoadError>> + Send + Sync>;

/// An immutable route declaration.
///
/// Routes form a singly linked ancestor chain through
/// [`parent`](Self::parent). A route is created once at application setup
/// and lives for the process lifetime; the only mutation ever applied is the
/// memoized resolved-component slot, written at most once per successful
/// fetch.
///
/// `T` is the opaque component type of the rendering layer; the engine only
/// ever clones and hands it back.
pub struct Route<T: Clone> {
    pattern: PathPattern,
    parent: Option<Arc<Route<T>>>,
    param_adapter: Option<Arc<dyn ParamAdapter>>,
    data_loader: Option<DataLoader>,
    component_fetcher: ComponentFetcher<T>,
    loading_appearance: LoadingAppearance,
    rendering_disposition: RenderingDisposition,
    error_component: Option<T>,
    loading_component: Option<T>,
    not_found_component: Option<T>,
    resolved: OnceCell<T>,
}

impl<T: Clone + Send + Sync + 'static> Route<T> {
    /// Create a route from a pathname template and a component fetcher.
    pub fn new<F, Fut>(pattern: &str, component_fetcher: F) -> Result<Self, PatternError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        Ok(Self::with_pattern(
            PathPattern::parse(pattern)?,
            component_fetcher,
        ))
    }

    /// Create a route from an already compiled pattern.
    pub fn with_pattern<F, Fut>(pattern: PathPattern, component_fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        Self {
            pattern,
            parent: None,
            param_adapter: None,
            data_loader: None,
            component_fetcher: Arc::new(move || component_fetcher().boxed()),
            loading_appearance: LoadingAppearance::default(),
            rendering_disposition: RenderingDisposition::default(),
            error_component: None,
            loading_component: None,
            not_found_component: None,
            resolved: OnceCell::new(),
        }
    }

    /// Create a route whose component needs no fetching.
    pub fn for_component(pattern: &str, component: T) -> Result<Self, PatternError> {
        Self::new(pattern, move || {
            let component = component.clone();
            async move { Ok(component) }
        })
    }

    /// Link this route below a parent route.
    pub fn parent(mut self, parent: &Arc<Route<T>>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Validate this route's parameters with an adapter.
    pub fn param_adapter(mut self, adapter: impl ParamAdapter + 'static) -> Self {
        self.param_adapter = Some(Arc::new(adapter));
        self
    }

    /// Load data for this route.
    pub fn data_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(Params, Value, AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LoadError>> + Send + 'static,
    {
        self.data_loader = Some(Arc::new(move |params, context, signal| {
            loader(params, context, signal).boxed()
        }));
        self
    }

    /// Set the loading appearance policy.
    pub fn loading_appearance(mut self, appearance: LoadingAppearance) -> Self {
        self.loading_appearance = appearance;
        self
    }

    /// Set where this route renders during server rendering.
    pub fn rendering_disposition(mut self, disposition: RenderingDisposition) -> Self {
        self.rendering_disposition = disposition;
        self
    }

    /// Component shown when this route is in an error state. The engine
    /// never inspects it.
    pub fn error_component(mut self, component: T) -> Self {
        self.error_component = Some(component);
        self
    }

    /// Component shown while this route is loading. The engine never
    /// inspects it.
    pub fn loading_component(mut self, component: T) -> Self {
        self.loading_component = Some(component);
        self
    }

    /// Component shown when this route reports not-found. The engine never
    /// inspects it.
    pub fn not_found_component(mut self, component: T) -> Self {
        self.not_found_component = Some(component);
        self
    }

    /// Resolve this route's component, fetching it on first use.
    ///
    /// The first successful fetch is cached for the lifetime of the route; a
    /// failed fetch leaves the slot empty so a later load can retry.
    pub async fn resolve_component(&self) -> Result<T, LoadError> {
        self.resolved
            .get_or_try_init(|| (self.component_fetcher)())
            .await
            .map(T::clone)
    }
}

impl<T: Clone> Route<T> {
    /// The compiled pathname template.
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// The parent route, if any.
    pub fn parent_route(&self) -> Option<&Arc<Route<T>>> {
        self.parent.as_ref()
    }

    /// Iterate this route's ancestors, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = Arc<Route<T>>> + '_ {
        std::iter::successors(self.parent.clone(), |route| route.parent.clone())
    }

    /// The ancestor chain including this route, ordered root first.
    pub fn ancestry(self: &Arc<Self>) -> Vec<Arc<Route<T>>> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent.clone() {
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// The loading appearance policy.
    pub fn appearance(&self) -> LoadingAppearance {
        self.loading_appearance
    }

    /// The rendering disposition.
    pub fn disposition(&self) -> RenderingDisposition {
        self.rendering_disposition
    }

    /// The already resolved component, if a fetch has succeeded before.
    pub fn resolved_component(&self) -> Option<T> {
        self.resolved.get().map(T::clone)
    }

    /// The error component, if one was declared.
    pub fn error_view(&self) -> Option<&T> {
        self.error_component.as_ref()
    }

    /// The loading component, if one was declared.
    pub fn loading_view(&self) -> Option<&T> {
        self.loading_component.as_ref()
    }

    /// The not-found component, if one was declared.
    pub fn not_found_view(&self) -> Option<&T> {
        self.not_found_component.as_ref()
    }

    pub(crate) fn adapter(&self) -> Option<&Arc<dyn ParamAdapter>> {
        self.param_adapter.as_ref()
    }

    pub(crate) fn loader(&self) -> Option<DataLoader> {
        self.data_loader.clone()
    }
}

impl<T: Clone> Debug for Route<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.to_string())
            .field("parent", &self.parent.as_ref().map(|p| p.pattern.to_string()))
            .field("loading_appearance", &self.loading_appearance)
            .field("rendering_disposition", &self.rendering_disposition)
            .finish_non_exhaustive()
    }
}
