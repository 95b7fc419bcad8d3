//! The physical adjacency graph: an undirected multigraph keyed by device
//! name, one edge per LLDP-discovered link between two managed devices.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
    /// Port name on each endpoint.
    pub port_a: String,
    pub port_b: String,
    pub carried_vlans: BTreeSet<u16>,
    pub weight: u32,
    /// Set when the adjacency was only confirmed from one side's LLDP
    /// table (§4.4 "missing-VLAN diagnostic").
    pub asymmetric_vlans: BTreeSet<u16>,
}

impl Edge {
    pub fn other_end(&self, device: &str) -> Option<&str> {
        if self.a == device {
            Some(&self.b)
        } else if self.b == device {
            Some(&self.a)
        } else {
            None
        }
    }

    pub fn port_for(&self, device: &str) -> Option<&str> {
        if self.a == device {
            Some(&self.port_a)
        } else if self.b == device {
            Some(&self.port_b)
        } else {
            None
        }
    }
}

/// Undirected multigraph over managed device names.
#[derive(Debug, Clone, Default)]
pub struct PhysicalGraph {
    pub nodes: BTreeSet<String>,
    pub edges: Vec<Edge>,
}

impl PhysicalGraph {
    pub fn edges_at(&self, device: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.a == device || e.b == device)
    }

    /// Dijkstra shortest path by edge weight, restricted to nodes whose
    /// state predicate returns true (§4.4 "a path is valid only if every
    /// hop's device state is ready").
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        is_ready: impl Fn(&str) -> bool,
    ) -> Option<Vec<String>> {
        if !self.nodes.contains(from) || !self.nodes.contains(to) || !is_ready(from) || !is_ready(to) {
            return None;
        }
        let mut dist: BTreeMap<&str, u64> = BTreeMap::new();
        let mut prev: BTreeMap<&str, &str> = BTreeMap::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        dist.insert(from, 0);
        loop {
            let current = dist
                .iter()
                .filter(|(node, _)| !visited.contains(*node))
                .min_by_key(|(_, d)| **d)
                .map(|(node, d)| (*node, *d));
            let Some((current, current_dist)) = current else {
                break;
            };
            if current == to {
                break;
            }
            visited.insert(current);
            for edge in self.edges_at(current) {
                let Some(neighbor) = edge.other_end(current) else {
                    continue;
                };
                if !is_ready(neighbor) || visited.contains(neighbor) {
                    continue;
                }
                let candidate = current_dist + edge.weight as u64;
                if candidate < *dist.get(neighbor).unwrap_or(&u64::MAX) {
                    dist.insert(neighbor, candidate);
                    prev.insert(neighbor, current);
                }
            }
        }
        if !dist.contains_key(to) {
            return None;
        }
        let mut path = vec![to.to_string()];
        let mut cursor = to;
        while cursor != from {
            let p = *prev.get(cursor)?;
            path.push(p.to_string());
            cursor = p;
        }
        path.reverse();
        Some(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn edge(a: &str, b: &str, weight: u32) -> Edge {
        Edge {
            a: a.into(),
            b: b.into(),
            port_a: "p0".into(),
            port_b: "p0".into(),
            carried_vlans: BTreeSet::new(),
            weight,
            asymmetric_vlans: BTreeSet::new(),
        }
    }

    #[test]
    fn picks_lower_weight_path_over_direct_hop() {
        let mut graph = PhysicalGraph::default();
        graph.nodes.extend(["a".to_string(), "b".to_string(), "c".to_string()]);
        graph.edges.push(edge("a", "b", 10));
        graph.edges.push(edge("a", "c", 1));
        graph.edges.push(edge("c", "b", 1));
        let path = graph.shortest_path("a", "b", |_| true).unwrap();
        assert_eq!(path, vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn path_through_non_ready_device_is_rejected() {
        let mut graph = PhysicalGraph::default();
        graph.nodes.extend(["a".to_string(), "b".to_string(), "c".to_string()]);
        graph.edges.push(edge("a", "c", 1));
        graph.edges.push(edge("c", "b", 1));
        let path = graph.shortest_path("a", "b", |n| n != "c");
        assert!(path.is_none());
    }
}
