//! Client-side route matching and route-state engine.
//!
//! Given a tree of declared [`Route`]s and a requested [`Location`], the
//! engine determines which route and ancestors apply, loads the component
//! and data each matched level needs, and exposes a mutable, subscribable
//! [`Controller`] per level for a rendering layer to consume.
//!
//! Three pieces cooperate:
//!
//! - [`PathPattern`] compiles a pathname template into a matcher, a URL
//!   builder and a parameter set.
//! - [`match_routes`] resolves a location against an ordered list of leaf
//!   routes and their ancestor chains.
//! - [`Router::navigate`] reconciles the previous controller chain against
//!   the fresh match, reusing, replacing-with-fallback or replacing each
//!   level, and starts the loads the new chain needs.
//!
//! Rendering, history adapters and server streaming live outside this
//! crate; they interact through [`RouterEvent`] subscriptions, the
//! controller accessors and the [`HydrationChannel`].
#![deny(missing_docs)]

mod controller;
mod events;
mod hydration;
mod load;
mod location;
mod matcher;
mod pattern;
mod reconciler;
mod route;
mod router;

pub use controller::{Controller, ControllerState, PendingLoad, SUPERSEDED};
pub use events::{RouterEvent, Subscription};
pub use hydration::{HydrationChannel, SerializedState};
pub use load::{AbortSignal, LoadError, Spawner};
pub use location::Location;
pub use matcher::{match_routes, RouteMatch};
pub use pattern::{
    BuildPathnameError, Params, PathPattern, PathnameMatch, PatternError, RawParams,
};
pub use route::{
    AdapterError, ComponentFetcher, DataLoader, LoadingAppearance, ParamAdapter,
    RenderingDisposition, Route,
};
pub use router::{NavigationOutcome, Router};

/// A collection of useful items most applications need.
pub mod prelude {
    pub use crate::controller::{Controller, ControllerState};
    pub use crate::events::{RouterEvent, Subscription};
    pub use crate::hydration::HydrationChannel;
    pub use crate::load::{AbortSignal, LoadError, Spawner};
    pub use crate::location::Location;
    pub use crate::pattern::{Params, PathPattern};
    pub use crate::route::{
        AdapterError, LoadingAppearance, ParamAdapter, RenderingDisposition, Route,
    };
    pub use crate::router::{NavigationOutcome, Router};
}
