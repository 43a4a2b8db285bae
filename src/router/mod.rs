//! Router (C5): path+method → (cmd_id, service_name); cmd_id range →
//! service endpoint. Grounded on
//! `examples/original_source/gateway/router/router_mgr.hpp`
//! (`HttpRouter`/`ServiceRouter`/`RouterManager` split).

use std::sync::RwLock;

use crate::config::route_table::ServiceEntry;
use crate::config::RouteConfig;
use crate::error::RouterError;

/// Result of resolving a request/response path, mirroring
/// `HttpRouteResult` in the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResolution {
    pub cmd_id: u32,
    pub service_name: String,
}

/// Result of resolving a service by name or by cmd_id, mirroring
/// `ServiceRouteResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResolution {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub max_connections: u32,
}

/// Route-count / service-count snapshot, carried over from the original's
/// `RouterManager::get_stats()` (spec.md §9 supplemented feature).
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterStats {
    pub route_count: usize,
    pub service_count: usize,
}

/// Both lookup operations are pure; the config is swapped in one step
/// under `reload()` so readers always observe a consistent snapshot.
pub struct Router {
    config: RwLock<RouteConfig>,
}

impl Router {
    pub fn new(config: RouteConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replaces the route/service tables in one step.
    pub fn reload(&self, config: RouteConfig) {
        *self.config.write().expect("router config lock poisoned") = config;
    }

    pub fn resolve_reqresp(&self, method: &str, path: &str) -> Result<RouteResolution, RouterError> {
        let config = self.config.read().expect("router config lock poisoned");
        let stripped = path
            .strip_prefix(config.api_prefix.as_str())
            .unwrap_or(path);
        let key = (method.to_uppercase(), stripped.to_string());

        config
            .routes
            .get(&key)
            .map(|entry| RouteResolution {
                cmd_id: entry.cmd_id,
                service_name: entry.service_name.clone(),
            })
            .ok_or_else(|| RouterError::NoRoute(method.to_string(), path.to_string()))
    }

    /// Resolves a service directly by name, or (if `name_or_cmd` parses as
    /// a `u32`) by the cmd_id range that covers it. On a tie the first
    /// service by lexicographic name wins, a deterministic tie-break.
    pub fn resolve_service(&self, name_or_cmd: &str) -> Result<ServiceResolution, RouterError> {
        let config = self.config.read().expect("router config lock poisoned");

        if let Some(entry) = config.services.get(name_or_cmd) {
            return Ok(to_resolution(entry));
        }

        if let Ok(cmd_id) = name_or_cmd.parse::<u32>() {
            let mut names: Vec<&String> = config.services.keys().collect();
            names.sort();
            for name in names {
                let entry = &config.services[name];
                if entry.covers(cmd_id) {
                    return Ok(to_resolution(entry));
                }
            }
            return Err(RouterError::NoService(cmd_id));
        }

        Err(RouterError::NoService(0))
    }

    pub fn api_prefix(&self) -> String {
        self.config.read().expect("router config lock poisoned").api_prefix.clone()
    }

    pub fn stats(&self) -> RouterStats {
        let config = self.config.read().expect("router config lock poisoned");
        RouterStats {
            route_count: config.routes.len(),
            service_count: config.services.len(),
        }
    }
}

fn to_resolution(entry: &ServiceEntry) -> ServiceResolution {
    ServiceResolution {
        endpoint: entry.endpoint.clone(),
        timeout_ms: entry.timeout_ms,
        max_connections: entry.max_connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RouteConfig {
        RouteConfig::new("/api/v1")
            .with_route("POST", "/message/send", 2001, "messaging")
            .with_service("messaging", "http://messaging:9000", 3000, 10, (2000, 2999))
    }

    #[test]
    fn resolves_exact_path_case_insensitive_method() {
        let router = Router::new(sample_config());
        let res = router
            .resolve_reqresp("post", "/api/v1/message/send")
            .unwrap();
        assert_eq!(res.cmd_id, 2001);
        assert_eq!(res.service_name, "messaging");
    }

    #[test]
    fn routing_is_deterministic() {
        let router = Router::new(sample_config());
        let a = router.resolve_reqresp("POST", "/api/v1/message/send").unwrap();
        let b = router.resolve_reqresp("POST", "/api/v1/message/send").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_path_is_routing_failed() {
        let router = Router::new(sample_config());
        assert!(router.resolve_reqresp("GET", "/api/v1/no/such/path").is_err());
    }

    #[test]
    fn resolves_service_by_cmd_id_range() {
        let router = Router::new(sample_config());
        let res = router.resolve_service("2001").unwrap();
        assert_eq!(res.endpoint, "http://messaging:9000");
    }

    #[test]
    fn reload_replaces_tables_atomically() {
        let router = Router::new(sample_config());
        router.reload(RouteConfig::new("/api/v2"));
        assert!(router.resolve_reqresp("POST", "/api/v1/message/send").is_err());
        let stats = router.stats();
        assert_eq!(stats.route_count, 0);
    }
}
