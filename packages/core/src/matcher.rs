use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::pattern::{Params, PathnameMatch, RawParams};
use crate::route::Route;

/// A resolved (route, params) pair for one level of an ancestor chain.
#[derive(Debug, Clone)]
pub struct RouteMatch<T: Clone> {
    /// The matched route.
    pub route: Arc<Route<T>>,
    /// The validated parameters for this level.
    pub params: Params,
}

/// Resolve a location against an ordered list of leaf routes.
///
/// The list order is the priority order; the first leaf whose whole ancestor
/// chain matches wins. For every candidate the chain is matched root first,
/// each level consuming a prefix and passing the remainder down. A candidate
/// is rejected as soon as any ancestor fails, if the leaf leaves part of the
/// pathname unconsumed, or if any level's
/// [`ParamAdapter`](crate::route::ParamAdapter) rejects its parameters.
///
/// Returns the matched chain ordered root to leaf, or [`None`] when no
/// candidate is viable.
pub fn match_routes<T: Clone>(
    pathname: &str,
    search_params: &BTreeMap<String, String>,
    routes: &[Arc<Route<T>>],
) -> Option<Vec<RouteMatch<T>>> {
    // Sibling candidates share ancestors; memoize each route's match for the
    // duration of this call so the same regex never runs twice. A route's
    // input pathname is determined by its fixed ancestor chain, so the route
    // identity alone is a sufficient key.
    let mut cache: HashMap<*const Route<T>, Option<PathnameMatch>> = HashMap::new();

    'candidates: for leaf in routes {
        let chain = leaf.ancestry();

        let mut matches: Vec<PathnameMatch> = Vec::with_capacity(chain.len());
        let mut current = pathname.to_string();
        for route in &chain {
            let key = Arc::as_ptr(route);
            let matched = match cache.get(&key) {
                Some(cached) => cached.clone(),
                None => {
                    let matched = route.pattern().match_pathname(&current);
                    cache.insert(key, matched.clone());
                    matched
                }
            };

            match matched {
                Some(matched) => {
                    current = matched.child_pathname.clone();
                    matches.push(matched);
                }
                None => continue 'candidates,
            }
        }

        // a partial consumption must not pass for a full match
        if matches.last().map(|m| m.child_pathname.as_str()) != Some("/") {
            continue;
        }

        // derive and validate params bottom-up
        let mut resolved = Vec::with_capacity(chain.len());
        for (route, matched) in chain.iter().zip(&matches).rev() {
            let merged = merge_params(&matched.params, search_params);
            let params = match route.adapter() {
                Some(adapter) => match adapter.parse(&merged) {
                    Ok(params) => params,
                    Err(err) => {
                        trace!(
                            pattern = %route.pattern(),
                            %err,
                            "candidate discarded by param adapter"
                        );
                        continue 'candidates;
                    }
                },
                None => merged,
            };
            resolved.push(RouteMatch {
                route: route.clone(),
                params,
            });
        }

        resolved.reverse();
        return Some(resolved);
    }

    None
}

/// Merge one level's pathname params with the global search params.
///
/// Pathname params shadow search params of the same name; absent optional
/// params become `null`.
fn merge_params(raw: &RawParams, search_params: &BTreeMap<String, String>) -> Params {
    let mut merged: Params = search_params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    for (name, value) in raw {
        let value = match value {
            Some(value) => Value::String(value.clone()),
            None => Value::Null,
        };
        merged.insert(name.clone(), value);
    }

    merged
}
