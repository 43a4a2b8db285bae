//! Route and service configuration (spec.md §3 `RouteTable`), the
//! immutable-after-load config value the Router (C5) is built against.
//! Grounded on `examples/original_source/gateway/router/router_mgr.hpp`'s
//! `HttpRouter`/`ServiceRouter` split.

use std::collections::HashMap;

/// A single `(method, path) -> (cmd_id, service_name)` route entry.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub cmd_id: u32,
    pub service_name: String,
}

/// A downstream service's dispatch parameters, addressed either by name or
/// by the `cmd_id` range it owns.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub max_connections: u32,
    pub cmd_range: (u32, u32),
}

impl ServiceEntry {
    pub fn covers(&self, cmd_id: u32) -> bool {
        cmd_id >= self.cmd_range.0 && cmd_id <= self.cmd_range.1
    }
}

/// The plain config value passed into `Router::new` (spec.md §4.4): routes
/// keyed by exact `(method, path)` under a configured `api_prefix`, plus a
/// service table with an inverse `cmd_id` index.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub api_prefix: String,
    /// Keyed by `(UPPERCASE method, path without api_prefix)`.
    pub routes: HashMap<(String, String), RouteEntry>,
    pub services: HashMap<String, ServiceEntry>,
}

impl RouteConfig {
    pub fn new(api_prefix: impl Into<String>) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            routes: HashMap::new(),
            services: HashMap::new(),
        }
    }

    pub fn with_route(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        cmd_id: u32,
        service_name: impl Into<String>,
    ) -> Self {
        self.routes.insert(
            (method.into().to_uppercase(), path.into()),
            RouteEntry {
                cmd_id,
                service_name: service_name.into(),
            },
        );
        self
    }

    pub fn with_service(
        mut self,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout_ms: u64,
        max_connections: u32,
        cmd_range: (u32, u32),
    ) -> Self {
        self.services.insert(
            name.into(),
            ServiceEntry {
                endpoint: endpoint.into(),
                timeout_ms,
                max_connections,
                cmd_range,
            },
        );
        self
    }
}
