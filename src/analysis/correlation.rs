//! Groups log events from different services into causally linked clusters.
//!
//! Two events link when they are at most `window` apart and either carry the
//! same trace id, or (when at least one of them is untraced) share a join key.
//! Join keys are the event's own service, every known service it references,
//! each direct dependency-graph edge touching its service, and the values of
//! the configured join attributes. A service is referenced when its message or
//! error type names it, in any casing and with `-`, `_` or spaces between the
//! words, or when an attribute value is the service name. Groups are the
//! connected components of that link relation, so a chain of events that are
//! each within the window of the next stays together, and two events with the
//! same trace id but no link path inside the window end up in separate groups.

use super::topology::DependencyGraph;
use crate::config::CorrelationConfig;
use crate::gateway::{LogEvent, LogFilter, LogLevel, QueryPool, TimeRange};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, instrument, warn};

/// An immutable set of related events, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationGroup {
    key: String,
    events: Vec<LogEvent>,
    /// In order of first occurrence; this is the observed propagation order.
    services: Vec<String>,
}

impl CorrelationGroup {
    pub fn new(key: impl Into<String>, mut events: Vec<LogEvent>) -> Self {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let mut services: Vec<String> = Vec::new();
        for e in &events {
            if !services.contains(&e.service) {
                services.push(e.service.clone());
            }
        }
        Self {
            key: key.into(),
            events,
            services,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_event(&self) -> Option<&LogEvent> {
        self.events.first()
    }

    pub fn contains_event(&self, id: &str) -> bool {
        self.events.iter().any(|e| e.id == id)
    }

    /// Earliest and latest timestamps. `None` for an empty group.
    pub fn span(&self) -> Option<TimeRange> {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    fn start(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }
}

/// Largest first; ties by earliest start, then key.
fn sort_groups(groups: &mut [CorrelationGroup]) {
    groups.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.start().cmp(&b.start()))
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// True when two or more groups are within `ratio` of the largest group's size
/// and the largest group has at least `min_size` events.
pub fn is_ambiguous(groups: &[CorrelationGroup], ratio: f64, min_size: usize) -> bool {
    let Some(largest) = groups.iter().map(CorrelationGroup::len).max() else {
        return false;
    };
    if largest < min_size {
        return false;
    }
    let floor = largest as f64 * ratio;
    groups.iter().filter(|g| g.len() as f64 >= floor).count() >= 2
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Lowercase, with each run of whitespace, `-` and `_` folded into one `-`.
fn canonical(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut gap = false;
    for c in text.chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            gap = true;
            continue;
        }
        if gap && !out.is_empty() {
            out.push('-');
        }
        gap = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// How logs commonly write a service name: as given, and with its separators
/// as hyphens, spaces or underscores. Used as text lookups during expansion.
fn spellings(service: &str) -> Vec<String> {
    let is_sep = |c: char| c == '-' || c == '_' || c.is_whitespace();
    let mut out = vec![service.to_string()];
    for sep in ["-", " ", "_"] {
        let spelled = service.split(is_sep).filter(|w| !w.is_empty()).collect::<Vec<_>>().join(sep);
        if !spelled.is_empty() && !out.contains(&spelled) {
            out.push(spelled);
        }
    }
    out
}

/// Canonical forms of the parts of an event that can name another service.
struct References {
    message: String,
    error_type: String,
    values: Vec<String>,
}

impl References {
    fn of(event: &LogEvent) -> Self {
        Self {
            message: canonical(&event.message),
            error_type: event.error_type.as_deref().map(canonical).unwrap_or_default(),
            values: event.attributes.values().map(|v| canonical(v)).collect(),
        }
    }

    fn names(&self, service: &str) -> bool {
        let needle = canonical(service);
        !needle.is_empty()
            && (self.message.contains(&needle)
                || self.error_type.contains(&needle)
                || self.values.iter().any(|v| v == &needle))
    }
}

/// Result of [`CorrelationEngine::expand`].
#[derive(Debug, Clone)]
pub struct Expansion {
    pub groups: Vec<CorrelationGroup>,
    /// False when a query failed or the investigation was cancelled mid-way.
    pub complete: bool,
    pub errors: Vec<String>,
}

enum Lookup {
    /// Events naming the service.
    Mentions(String),
    /// Events from a service the graph says calls one already in the group.
    Caller(String),
    Trace(String),
}

struct Growing {
    key: String,
    events: Vec<LogEvent>,
    services: BTreeSet<String>,
    traces: BTreeSet<String>,
    frontier: Vec<String>,
    window: TimeRange,
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
    known_services: BTreeSet<String>,
    /// callee -> direct callers
    callers: BTreeMap<String, BTreeSet<String>>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            known_services: BTreeSet::new(),
            callers: BTreeMap::new(),
        }
    }

    /// Recognise the graph's services in messages and attributes, link events
    /// of directly connected services, and fetch callers during expansion.
    pub fn with_dependency_graph(mut self, graph: &dyn DependencyGraph) -> Self {
        for service in graph.services() {
            for callee in graph.callees(&service).unwrap_or_default() {
                if callee != service {
                    self.callers.entry(callee).or_default().insert(service.clone());
                }
            }
            self.known_services.insert(service);
        }
        self
    }

    fn linked(&self, a: &str, b: &str) -> bool {
        let calls = |caller: &str, callee: &str| {
            self.callers
                .get(callee)
                .map(|c| c.contains(caller))
                .unwrap_or(false)
        };
        calls(a, b) || calls(b, a)
    }

    fn edge_keys(&self, service: &str) -> Vec<String> {
        self.known_services
            .iter()
            .filter(|other| other.as_str() != service && self.linked(service, other))
            .map(|other| {
                let (a, b) = if service < other.as_str() {
                    (service, other.as_str())
                } else {
                    (other.as_str(), service)
                };
                format!("dep:{a}|{b}")
            })
            .collect()
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.config.window_minutes)
    }

    fn join_keys(&self, event: &LogEvent, services: &BTreeSet<String>) -> Vec<String> {
        let mut keys = vec![format!("svc:{}", event.service)];
        let refs = References::of(event);
        for s in services {
            if s != &event.service && refs.names(s) {
                keys.push(format!("svc:{s}"));
            }
        }
        keys.extend(self.edge_keys(&event.service));
        for attr in &self.config.join_attributes {
            if let Some(v) = event.attributes.get(attr).filter(|v| !v.is_empty()) {
                keys.push(format!("attr:{attr}={v}"));
            }
        }
        keys
    }

    /// Partition `seeds` into groups. Duplicate event ids are dropped.
    #[instrument(skip_all, fields(seeds = seeds.len()))]
    pub fn group(&self, seeds: Vec<LogEvent>) -> Vec<CorrelationGroup> {
        let mut seen = HashSet::new();
        let mut events: Vec<LogEvent> = seeds
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if events.is_empty() {
            return Vec::new();
        }

        let window = self.window();
        let mut services = self.known_services.clone();
        services.extend(events.iter().map(|e| e.service.clone()));

        // Buckets hold indices in timestamp order.
        let mut by_trace: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, e) in events.iter().enumerate() {
            if let Some(t) = e.trace_id.as_deref() {
                by_trace.entry(t).or_default().push(i);
            }
            for k in self.join_keys(e, &services) {
                by_key.entry(k).or_default().push(i);
            }
        }

        let mut sets = DisjointSet::new(events.len());
        for idx in by_trace.values() {
            for pair in idx.windows(2) {
                if events[pair[1]].timestamp - events[pair[0]].timestamp <= window {
                    sets.union(pair[0], pair[1]);
                }
            }
        }
        for idx in by_key.values() {
            for (n, &i) in idx.iter().enumerate() {
                for &j in &idx[n + 1..] {
                    if events[j].timestamp - events[i].timestamp > window {
                        break;
                    }
                    let traced_apart = matches!(
                        (&events[i].trace_id, &events[j].trace_id),
                        (Some(a), Some(b)) if a != b
                    );
                    if !traced_apart {
                        sets.union(i, j);
                    }
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<LogEvent>> = BTreeMap::new();
        for i in 0..events.len() {
            let root = sets.find(i);
            components.entry(root).or_default().push(events[i].clone());
        }

        let mut groups: Vec<CorrelationGroup> = components
            .into_values()
            .map(|members| {
                let traces: BTreeSet<&str> =
                    members.iter().filter_map(|e| e.trace_id.as_deref()).collect();
                let key = match (traces.len(), traces.iter().next()) {
                    (1, Some(t)) if members.iter().all(|e| e.trace_id.is_some()) => {
                        format!("trace:{t}")
                    }
                    _ => format!("proximity:{}", members[0].id),
                };
                CorrelationGroup::new(key, members)
            })
            .collect();
        sort_groups(&mut groups);
        debug!(groups = groups.len(), "seed events grouped");
        groups
    }

    /// One-hop dependency expansion, repeated up to `max_hops` times.
    ///
    /// Each hop queries, per group, every service newly added to it for events
    /// from other services that reference it within the group's span widened
    /// by the correlation window, and for events of its callers in the
    /// dependency graph. The first hop also fetches the other services'
    /// events on the group's trace ids. An event joins at most one group.
    #[instrument(skip_all, fields(groups = groups.len()))]
    pub async fn expand(&self, groups: Vec<CorrelationGroup>, pool: &QueryPool) -> Expansion {
        let window = self.window();
        let mut claimed: HashSet<String> = groups
            .iter()
            .flat_map(|g| g.events().iter().map(|e| e.id.clone()))
            .collect();

        let mut growing: Vec<Growing> = groups
            .into_iter()
            .filter_map(|g| {
                let span = g.span()?;
                Some(Growing {
                    key: g.key.clone(),
                    services: g.services.iter().cloned().collect(),
                    traces: g.events.iter().filter_map(|e| e.trace_id.clone()).collect(),
                    frontier: g.services.clone(),
                    window: TimeRange::new(span.start - window, span.end + window),
                    events: g.events,
                })
            })
            .collect();

        let mut complete = true;
        let mut errors = Vec::new();
        let min_level: LogLevel = self.config.min_expansion_level;

        for hop in 0..self.config.max_hops {
            if pool.is_cancelled() {
                complete = false;
                break;
            }

            let mut lookups: Vec<(usize, Lookup)> = Vec::new();
            let mut filters: Vec<LogFilter> = Vec::new();
            for (gi, g) in growing.iter_mut().enumerate() {
                if g.events.len() >= self.config.max_group_events {
                    g.frontier.clear();
                    continue;
                }
                let range = g.window;
                let mut callers = BTreeSet::new();
                for s in g.frontier.drain(..) {
                    for spelling in spellings(&s) {
                        filters.push(LogFilter::new(range).text(spelling).min_level(min_level));
                        lookups.push((gi, Lookup::Mentions(s.clone())));
                    }
                    if let Some(found) = self.callers.get(&s) {
                        callers.extend(found.iter().filter(|c| !g.services.contains(*c)).cloned());
                    }
                }
                for c in callers {
                    filters.push(LogFilter::new(range).service(c.clone()).min_level(min_level));
                    lookups.push((gi, Lookup::Caller(c)));
                }
                if hop == 0 {
                    for t in &g.traces {
                        filters.push(LogFilter::new(range).trace_id(t.clone()).min_level(min_level));
                        lookups.push((gi, Lookup::Trace(t.clone())));
                    }
                }
            }
            if filters.is_empty() {
                break;
            }
            debug!(hop, queries = filters.len(), "expanding groups");

            let results = pool.run_all(filters).await;
            for ((gi, lookup), (_, result)) in lookups.into_iter().zip(results) {
                let fetched = match result {
                    Ok(events) => events,
                    Err(e) => {
                        complete = false;
                        if !e.is_cancelled() {
                            let target = match &lookup {
                                Lookup::Mentions(s) => format!("service {s}"),
                                Lookup::Caller(c) => format!("caller {c}"),
                                Lookup::Trace(t) => format!("trace {t}"),
                            };
                            warn!(%target, error = %e, "expansion query failed");
                            errors.push(format!("expansion query for {target} failed: {e}"));
                        }
                        e.partial.unwrap_or_default()
                    }
                };

                let g = &mut growing[gi];
                for ev in fetched {
                    if g.events.len() >= self.config.max_group_events {
                        break;
                    }
                    if ev.level < min_level || !g.window.contains(ev.timestamp) {
                        continue;
                    }
                    let related = match &lookup {
                        Lookup::Mentions(s) => &ev.service != s && References::of(&ev).names(s),
                        Lookup::Caller(c) => &ev.service == c,
                        Lookup::Trace(t) => {
                            ev.trace_id.as_deref() == Some(t.as_str()) && !g.services.contains(&ev.service)
                        }
                    };
                    if !related || !claimed.insert(ev.id.clone()) {
                        continue;
                    }
                    if g.services.insert(ev.service.clone()) {
                        g.frontier.push(ev.service.clone());
                    }
                    g.events.push(ev);
                }
            }
        }

        let mut groups: Vec<CorrelationGroup> = growing
            .into_iter()
            .map(|g| CorrelationGroup::new(g.key, g.events))
            .collect();
        sort_groups(&mut groups);
        info!(
            groups = groups.len(),
            largest = groups.first().map(CorrelationGroup::len).unwrap_or(0),
            complete,
            "correlation expansion finished"
        );
        Expansion {
            groups,
            complete,
            errors,
        }
    }
}
