//! First-match route table.

use crate::config::ProxyConfig;
use crate::route::Route;
use opsmith_core::Result;
use std::sync::Arc;

/// An immutable, order-sensitive set of compiled routes.
///
/// Reload builds a fresh table and swaps the `Arc`; in-flight requests keep
/// the table they started with.
pub struct RouterTable {
    routes: Vec<Arc<Route>>,
}

impl RouterTable {
    /// Compile every route in a configuration, preserving declaration order.
    pub fn build(config: &ProxyConfig) -> Result<Self> {
        let routes = config
            .routes
            .iter()
            .map(|r| Route::build(r).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// First route matching the request, or `None` for a 404.
    #[must_use]
    pub fn find(&self, host: &str, path: &str, method: &str) -> Option<Arc<Route>> {
        self.routes
            .iter()
            .find(|route| route.matches(host, path, method))
            .cloned()
    }

    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn table(routes: Vec<RouteConfig>) -> RouterTable {
        RouterTable::build(&ProxyConfig {
            routes,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_declaration_order_wins() {
        // A broad wildcard route declared first shadows the exact one.
        let table = table(vec![
            RouteConfig {
                host: "*.ex.com".into(),
                target: Some("http://127.0.0.1:9001".into()),
                ..Default::default()
            },
            RouteConfig {
                host: "api.ex.com".into(),
                target: Some("http://127.0.0.1:9002".into()),
                ..Default::default()
            },
        ]);

        let route = table.find("api.ex.com", "/", "GET").unwrap();
        assert_eq!(route.host, "*.ex.com");
    }

    #[test]
    fn test_no_match_is_none() {
        let table = table(vec![RouteConfig {
            host: "only.example.com".into(),
            ..Default::default()
        }]);
        assert!(table.find("other.example.com", "/", "GET").is_none());
    }

    #[test]
    fn test_path_and_method_participate() {
        let table = table(vec![
            RouteConfig {
                path: "/api/*".into(),
                method: "POST".into(),
                ..Default::default()
            },
            RouteConfig {
                path: "/api/*".into(),
                ..Default::default()
            },
        ]);

        let post = table.find("h", "/api/x", "POST").unwrap();
        assert_eq!(post.method, "POST");
        let get = table.find("h", "/api/x", "GET").unwrap();
        assert_eq!(get.method, "");
    }
}
