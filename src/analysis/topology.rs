//! Service dependency graph consulted by the ranker.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Pluggable source of "who calls whom".
pub trait DependencyGraph: Send + Sync {
    /// Services `service` calls directly. `None` when the graph does not know
    /// the service at all.
    fn callees(&self, service: &str) -> Option<Vec<String>>;

    /// Every service the graph knows about.
    fn services(&self) -> Vec<String>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Used when no topology is configured.
pub struct NoDependencyGraph;

impl DependencyGraph for NoDependencyGraph {
    fn callees(&self, _service: &str) -> Option<Vec<String>> {
        None
    }

    fn services(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Fixed edge list, `caller -> [callees]`.
pub struct StaticDependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl StaticDependencyGraph {
    pub fn new(edges: &BTreeMap<String, Vec<String>>) -> Self {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (caller, callees) in edges {
            map.entry(caller.clone())
                .or_default()
                .extend(callees.iter().cloned());
            for callee in callees {
                map.entry(callee.clone()).or_default();
            }
        }
        Self { edges: map }
    }
}

impl DependencyGraph for StaticDependencyGraph {
    fn callees(&self, service: &str) -> Option<Vec<String>> {
        self.edges
            .get(service)
            .map(|set| set.iter().cloned().collect())
    }

    fn services(&self) -> Vec<String> {
        self.edges.keys().cloned().collect()
    }
}

/// `StaticDependencyGraph` when edges are configured, else `NoDependencyGraph`.
pub fn from_config(edges: &BTreeMap<String, Vec<String>>) -> Arc<dyn DependencyGraph> {
    if edges.is_empty() {
        Arc::new(NoDependencyGraph)
    } else {
        Arc::new(StaticDependencyGraph::new(edges))
    }
}

/// Hops from `service` to the nearest root of the subgraph induced by
/// `members`, following caller -> callee edges. A root is a member that calls
/// no other member; failures propagate from roots back up to their callers.
/// `None` when the graph is unavailable, does not know `service`, or no root
/// is reachable.
pub fn distance_to_root(graph: &dyn DependencyGraph, service: &str, members: &[String]) -> Option<usize> {
    if !graph.is_available() {
        return None;
    }
    graph.callees(service)?;

    let member_set: BTreeSet<&str> = members.iter().map(String::as_str).collect();
    let inside = |s: &str| -> Vec<String> {
        graph
            .callees(s)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| member_set.contains(c.as_str()) && c != s)
            .collect()
    };

    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([(service.to_string(), 0usize)]);
    while let Some((current, depth)) = queue.pop_front() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let next = inside(&current);
        if next.is_empty() {
            return Some(depth);
        }
        for n in next {
            queue.push_back((n, depth + 1));
        }
    }
    None
}

/// True when `caller` reaches `callee` through one or more calls.
pub fn depends_on(graph: &dyn DependencyGraph, caller: &str, callee: &str) -> Option<bool> {
    if !graph.is_available() {
        return None;
    }
    graph.callees(caller)?;
    graph.callees(callee)?;

    let mut seen = BTreeSet::new();
    let mut stack = vec![caller.to_string()];
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        for next in graph.callees(&current).unwrap_or_default() {
            if next == callee {
                return Some(true);
            }
            stack.push(next);
        }
    }
    Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> StaticDependencyGraph {
        let mut edges = BTreeMap::new();
        edges.insert("api-gateway".to_string(), vec!["checkout-service".to_string()]);
        edges.insert(
            "checkout-service".to_string(),
            vec!["payment-service".to_string(), "inventory-service".to_string()],
        );
        StaticDependencyGraph::new(&edges)
    }

    fn members(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_distance_to_root() {
        let g = graph();
        let m = members(&["api-gateway", "checkout-service", "payment-service"]);
        assert_eq!(distance_to_root(&g, "payment-service", &m), Some(0));
        assert_eq!(distance_to_root(&g, "checkout-service", &m), Some(1));
        assert_eq!(distance_to_root(&g, "api-gateway", &m), Some(2));
        assert_eq!(distance_to_root(&g, "search-service", &m), None);
    }

    #[test]
    fn test_root_depends_on_members_only() {
        // inventory-service is not in the group, so checkout is the root here.
        let g = graph();
        let m = members(&["api-gateway", "checkout-service"]);
        assert_eq!(distance_to_root(&g, "checkout-service", &m), Some(0));
    }

    #[test]
    fn test_depends_on() {
        let g = graph();
        assert_eq!(depends_on(&g, "api-gateway", "payment-service"), Some(true));
        assert_eq!(depends_on(&g, "payment-service", "api-gateway"), Some(false));
        assert_eq!(depends_on(&g, "api-gateway", "unknown"), None);
    }

    #[test]
    fn test_absent_graph() {
        let g = NoDependencyGraph;
        assert_eq!(distance_to_root(&g, "payment-service", &members(&["payment-service"])), None);
        assert!(from_config(&BTreeMap::new()).services().is_empty());
    }
}
