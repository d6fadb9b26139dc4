/// Routing table: request classification predicates mapped to strategies
///
/// The first matching route wins; unmatched requests use the fallback.
use std::collections::BTreeSet;
use url::{Origin, Url};

use super::http::Request;
use super::manifest::StaticManifest;

/// How a request is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Static partition, then network (stored in the static partition)
    CacheFirst,
    /// Network (stored in the api partition), then the api partition,
    /// then a synthesized offline payload
    NetworkFirst,
    /// Static then dynamic partition, then network (stored in the dynamic
    /// partition), then an offline fallback
    CacheThenNetwork,
}

/// Request classification predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
    /// URL path starts with the prefix (any origin)
    PathPrefix(String),
    /// Same origin as the scope and the path is listed
    Paths { origin: Origin, paths: BTreeSet<String> },
    Any,
}

impl RouteMatcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            RouteMatcher::PathPrefix(prefix) => request.path().starts_with(prefix.as_str()),
            RouteMatcher::Paths { origin, paths } => {
                request.url.origin() == *origin && paths.contains(request.path())
            }
            RouteMatcher::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub matcher: RouteMatcher,
    pub strategy: Strategy,
}

/// The route a request resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub name: &'a str,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
    fallback: Strategy,
}

impl RouteTable {
    pub fn new(fallback: Strategy) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    pub fn route(mut self, name: &str, matcher: RouteMatcher, strategy: Strategy) -> Self {
        self.routes.push(Route {
            name: name.to_string(),
            matcher,
            strategy,
        });
        self
    }

    /// API prefix is network-first, manifest paths on the scope's origin are
    /// cache-first, everything else is cache-then-network.
    pub fn standard(scope: &Url, api_prefix: &str, manifest: &StaticManifest) -> Self {
        Self::new(Strategy::CacheThenNetwork)
            .route(
                "api",
                RouteMatcher::PathPrefix(api_prefix.to_string()),
                Strategy::NetworkFirst,
            )
            .route(
                "static",
                RouteMatcher::Paths {
                    origin: scope.origin(),
                    paths: manifest.paths().iter().cloned().collect(),
                },
                Strategy::CacheFirst,
            )
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn resolve(&self, request: &Request) -> RouteMatch<'_> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(request))
            .map(|route| RouteMatch {
                name: &route.name,
                strategy: route.strategy,
            })
            .unwrap_or(RouteMatch {
                name: "dynamic",
                strategy: self.fallback,
            })
    }
}
