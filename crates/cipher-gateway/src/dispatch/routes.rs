//! Method route table and its cache.
//!
//! The table maps opaque method names to handler target names. It is read
//! from configuration on first use and served from memory until
//! [`RouteCache::invalidate`] drops it.

use super::handler::HandlerRegistry;
use crate::domain::config::DispatchConfig;
use crate::domain::error::{GatewayError, GatewayResult};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Read-only method -> target map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    pub fn target(&self, method: &str) -> Option<&str> {
        self.routes.get(method).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `(method, target)` pairs ordered by method
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .routes
            .iter()
            .map(|(m, t)| (m.as_str(), t.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }

    /// Check method names and targets against `registry`.
    ///
    /// Errors: a method name outside `[A-Za-z0-9._-]`, or a target with no
    /// registered handler. Warnings: several methods sharing one target.
    pub fn validate(&self, registry: &HandlerRegistry) -> RouteReport {
        let mut report = RouteReport::default();
        let mut by_target: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (method, target) in self.entries() {
            if !is_valid_method(method) {
                report.errors.push(format!("invalid method name: {:?}", method));
            }
            if !registry.contains(target) {
                report
                    .errors
                    .push(format!("{} => {}: no handler registered", method, target));
            }
            by_target.entry(target).or_default().push(method);
        }

        for (target, methods) in by_target {
            if methods.len() > 1 {
                report.warnings.push(format!(
                    "{} is reachable through {} methods: {}",
                    target,
                    methods.len(),
                    methods.join(", ")
                ));
            }
        }
        report
    }
}

fn is_valid_method(method: &str) -> bool {
    !method.is_empty()
        && method
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Outcome of [`RouteTable::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RouteReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Where the route table is loaded from
#[derive(Debug, Clone)]
pub enum RouteSource {
    /// `[dispatch.routes]` from the gateway config
    Inline(BTreeMap<String, String>),
    /// Separate TOML file with a `[routes]` table, re-read on each load
    File(PathBuf),
}

#[derive(Deserialize)]
struct RoutesFile {
    #[serde(default)]
    routes: BTreeMap<String, String>,
}

impl RouteSource {
    /// The routes file wins over inline routes when both are configured
    pub fn from_config(config: &DispatchConfig) -> Self {
        match &config.routes_file {
            Some(path) => RouteSource::File(path.clone()),
            None => RouteSource::Inline(config.routes.clone()),
        }
    }

    pub fn load(&self) -> GatewayResult<RouteTable> {
        match self {
            RouteSource::Inline(routes) => Ok(RouteTable::new(routes.clone())),
            RouteSource::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    GatewayError::ServerConfig(format!("routes file {}: {}", path.display(), e))
                })?;
                let parsed: RoutesFile = toml::from_str(&content).map_err(|e| {
                    GatewayError::ServerConfig(format!("routes file {}: {}", path.display(), e))
                })?;
                Ok(RouteTable::new(parsed.routes))
            }
        }
    }
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteSource::Inline(_) => f.write_str("config"),
            RouteSource::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Lazily loaded, explicitly invalidated route table
pub struct RouteCache {
    source: RouteSource,
    table: RwLock<Option<Arc<RouteTable>>>,
}

impl RouteCache {
    pub fn new(source: RouteSource) -> Self {
        Self {
            source,
            table: RwLock::new(None),
        }
    }

    /// Target name for `method`, loading the table if needed
    pub fn resolve(&self, method: &str) -> GatewayResult<Option<String>> {
        Ok(self.table()?.target(method).map(str::to_string))
    }

    /// Current table, loading it on first use
    pub fn table(&self) -> GatewayResult<Arc<RouteTable>> {
        if let Some(table) = self.table.read().as_ref() {
            return Ok(table.clone());
        }

        let mut slot = self.table.write();
        // Another caller may have loaded it while we waited
        if let Some(table) = slot.as_ref() {
            return Ok(table.clone());
        }
        let table = Arc::new(self.source.load()?);
        info!(source = %self.source, count = table.len(), "Route table loaded");
        *slot = Some(table.clone());
        Ok(table)
    }

    /// Drop the cached table; the next resolve reloads from the source
    pub fn invalidate(&self) {
        self.table.write().take();
        info!(source = %self.source, "Route table cache cleared");
    }

    pub fn is_loaded(&self) -> bool {
        self.table.read().is_some()
    }
}
