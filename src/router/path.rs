// Multi-hop bridge path planning
// Builds a fully-connected graph over registered chains and runs Dijkstra
// to the target. Edge weight blends the destination chain's fee, latency,
// and health; the weights are tunable defaults, not a proven formula.

use serde::Serialize;
use tracing::debug;

/// Per-chain cost inputs for path planning.
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub chain_id: String,
    pub fee: f64,
    pub latency_ms: f64,
    /// Aggregated health score in [0, 1].
    pub health: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub path: Vec<String>,
    pub total_fee: f64,
    pub total_latency_ms: f64,
    pub min_health: f64,
}

fn edge_weight(to: &ChainNode) -> f64 {
    to.fee + 0.1 * to.latency_ms - 10.0 * to.health
}

/// Dijkstra over the fully-connected chain graph. Returns None when source
/// or target is unknown, or the target is unreachable.
pub fn find_optimal_path(nodes: &[ChainNode], source: &str, target: &str) -> Option<PathResult> {
    let src = nodes.iter().position(|n| n.chain_id == source)?;
    let dst = nodes.iter().position(|n| n.chain_id == target)?;

    if src == dst {
        let node = &nodes[src];
        return Some(PathResult {
            path: vec![node.chain_id.clone()],
            total_fee: 0.0,
            total_latency_ms: 0.0,
            min_health: node.health,
        });
    }

    let n = nodes.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut prev = vec![usize::MAX; n];
    let mut visited = vec![false; n];
    dist[src] = 0.0;

    for _ in 0..n {
        let current = (0..n)
            .filter(|&i| !visited[i] && dist[i].is_finite())
            .min_by(|&a, &b| dist[a].partial_cmp(&dist[b]).unwrap_or(std::cmp::Ordering::Equal))?;
        visited[current] = true;
        if current == dst {
            break;
        }
        for next in 0..n {
            if next == current || visited[next] {
                continue;
            }
            let candidate = dist[current] + edge_weight(&nodes[next]);
            if candidate < dist[next] {
                dist[next] = candidate;
                prev[next] = current;
            }
        }
    }

    if !dist[dst].is_finite() {
        return None;
    }

    let mut order = vec![dst];
    let mut cursor = dst;
    while cursor != src {
        cursor = prev[cursor];
        if cursor == usize::MAX {
            return None;
        }
        order.push(cursor);
    }
    order.reverse();

    let mut total_fee = 0.0;
    let mut total_latency_ms = 0.0;
    let mut min_health = nodes[src].health;
    for &idx in &order {
        let node = &nodes[idx];
        if idx != src {
            total_fee += node.fee;
            total_latency_ms += node.latency_ms;
        }
        min_health = min_health.min(node.health);
    }

    let path: Vec<String> = order.iter().map(|&i| nodes[i].chain_id.clone()).collect();
    debug!(?path, total_fee, total_latency_ms, min_health, "optimal bridge path");
    Some(PathResult {
        path,
        total_fee,
        total_latency_ms,
        min_health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(chain: &str, fee: f64, latency: f64, health: f64) -> ChainNode {
        ChainNode {
            chain_id: chain.to_string(),
            fee,
            latency_ms: latency,
            health,
        }
    }

    #[test]
    fn total_fee_is_sum_of_traversed_edges() {
        let nodes = vec![
            node("ethereum", 0.01, 100.0, 0.9),
            node("solana", 0.0001, 50.0, 0.9),
            node("cosmos", 0.002, 80.0, 0.9),
        ];
        let result = find_optimal_path(&nodes, "ethereum", "cosmos").unwrap();
        assert_eq!(result.path.first().map(String::as_str), Some("ethereum"));
        assert_eq!(result.path.last().map(String::as_str), Some("cosmos"));
        let expected_fee: f64 = result
            .path
            .iter()
            .skip(1)
            .map(|id| nodes.iter().find(|n| &n.chain_id == id).unwrap().fee)
            .sum();
        assert!((result.total_fee - expected_fee).abs() < 1e-12);
    }

    #[test]
    fn unknown_target_returns_none() {
        let nodes = vec![node("ethereum", 0.01, 100.0, 0.9)];
        assert!(find_optimal_path(&nodes, "ethereum", "osmosis").is_none());
    }

    #[test]
    fn source_equals_target_is_a_trivial_path() {
        let nodes = vec![node("ethereum", 0.01, 100.0, 0.9)];
        let result = find_optimal_path(&nodes, "ethereum", "ethereum").unwrap();
        assert_eq!(result.path, vec!["ethereum".to_string()]);
        assert_eq!(result.total_fee, 0.0);
    }

    #[test]
    fn min_health_tracks_weakest_hop() {
        let nodes = vec![
            node("ethereum", 0.01, 100.0, 0.9),
            node("solana", 0.0001, 50.0, 0.4),
            node("cosmos", 0.002, 80.0, 0.8),
        ];
        let result = find_optimal_path(&nodes, "ethereum", "solana").unwrap();
        assert!((result.min_health - 0.4).abs() < 1e-12);
    }
}
