use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::elements::Engine;

/// Rule consulted when a query's tables live on more than one engine and no cached decision applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingRule {
    AlwaysRoute(Engine),
    PreferenceOrder(Vec<Engine>),
}

impl Default for RoutingRule {
    fn default() -> Self {
        Self::PreferenceOrder(vec![Engine::Warehouse, Engine::OltpRow, Engine::Serverless])
    }
}

/// Per-query engine decisions recorded by the planner, keyed by normalized query text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLocations(BTreeMap<String, Engine>);

impl CachedLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query_text: &str, engine: Engine) -> Option<Engine> {
        self.0.insert(normalize_query_text(query_text), engine)
    }

    pub fn get(&self, query_text: &str) -> Option<Engine> {
        self.0.get(&normalize_query_text(query_text)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_by_engine(&self) -> BTreeMap<Engine, usize> {
        let mut counts = BTreeMap::new();
        for engine in self.0.values() {
            *counts.entry(*engine).or_insert(0) += 1;
        }
        counts
    }
}

impl FromIterator<(String, Engine)> for CachedLocations {
    fn from_iter<T: IntoIterator<Item = (String, Engine)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(q, e)| (normalize_query_text(&q), e)).collect())
    }
}

/// Collapses whitespace and a trailing semicolon so cosmetically different texts share a decision.
pub fn normalize_query_text(query_text: &str) -> String {
    let trimmed = query_text.trim().trim_end_matches(';');
    trimmed.split_whitespace().join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub definite: RoutingRule,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<CachedLocations>,
}

impl RoutingPolicy {
    pub fn new(definite: RoutingRule) -> Self {
        Self { definite, cached: None }
    }

    #[must_use]
    pub fn with_cached(self, cached: CachedLocations) -> Self {
        Self { cached: Some(cached), ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cached_locations_normalize_text() {
        let mut cached = CachedLocations::new();
        cached.insert("SELECT  *\n FROM orders;", Engine::Warehouse);
        assert_eq!(cached.get("SELECT * FROM orders"), Some(Engine::Warehouse));
        assert_eq!(cached.get("SELECT * FROM customers"), None);
        assert_eq!(cached.count_by_engine().get(&Engine::Warehouse), Some(&1));
    }

    #[test]
    fn test_routing_policy_json() -> anyhow::Result<()> {
        let policy = RoutingPolicy::new(RoutingRule::AlwaysRoute(Engine::Serverless));
        let json = serde_json::to_string(&policy)?;
        assert_eq!(json, r#"{"definite":{"always_route":"serverless"}}"#);
        let actual: RoutingPolicy = serde_json::from_str(&json)?;
        assert_eq!(actual, policy);
        Ok(())
    }
}
