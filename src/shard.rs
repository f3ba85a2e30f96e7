//! Shard planning - partitioning the catalog across ranks
//!
//! For a fixed strategy and a fixed catalog, the shards over all ranks
//! form a partition: disjoint and covering. Every strategy is
//! deterministic given the same inputs, so independently-restarted node
//! processes always agree on who owns which job.

use crate::catalog::{Catalog, JobId};
use crate::config::ShardStrategy;
use crate::cost::CostCache;
use crate::error::ConfigError;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// Compute this rank's shard of the catalog.
///
/// `costs` is required for [`ShardStrategy::SizeBalanced`] and ignored by
/// the other strategies.
pub fn assign(
    catalog: &Catalog,
    rank: usize,
    world_size: usize,
    strategy: ShardStrategy,
    costs: Option<&CostCache>,
) -> Result<Vec<JobId>, ConfigError> {
    if world_size == 0 {
        return Err(ConfigError::InvalidWorldSize { world_size });
    }
    if rank >= world_size {
        return Err(ConfigError::InvalidRank { rank, world_size });
    }

    let shard = match strategy {
        ShardStrategy::RoundRobin => round_robin(catalog.ids(), rank, world_size),
        ShardStrategy::Contiguous => contiguous(catalog.ids(), rank, world_size),
        ShardStrategy::SizeBalanced => {
            let costs = costs.ok_or(ConfigError::MissingCostEstimate)?;
            size_balanced(catalog.ids(), rank, world_size, costs)
        }
    };

    debug!(
        rank,
        world_size,
        strategy = ?strategy,
        shard_len = shard.len(),
        catalog_len = catalog.len(),
        "Shard assigned"
    );

    Ok(shard)
}

/// Job at catalog index i goes to rank i mod world_size.
/// Guarantees even +-1 count balance; ignores cost.
fn round_robin(ids: &[JobId], rank: usize, world_size: usize) -> Vec<JobId> {
    ids.iter()
        .enumerate()
        .filter(|(i, _)| i % world_size == rank)
        .map(|(_, id)| id.clone())
        .collect()
}

/// Catalog split into world_size blocks of ceil(len / world_size);
/// the last block may be shorter (or empty when world_size > len).
fn contiguous(ids: &[JobId], rank: usize, world_size: usize) -> Vec<JobId> {
    let chunk = ids.len().div_ceil(world_size);
    if chunk == 0 {
        return Vec::new();
    }
    let start = (rank * chunk).min(ids.len());
    let end = (start + chunk).min(ids.len());
    ids[start..end].to_vec()
}

/// Longest-processing-time-first greedy balancing.
///
/// Jobs are taken in descending cost order and each goes to the rank with
/// the lowest cumulative assigned cost so far. Ties (equal cost, equal
/// load) resolve to the lowest catalog index and lowest rank, so the
/// result is deterministic. The max rank load exceeds the optimal balance
/// by at most the single largest job's cost.
fn size_balanced(ids: &[JobId], rank: usize, world_size: usize, costs: &CostCache) -> Vec<JobId> {
    // Descending cost, catalog index as tiebreak
    let mut order: Vec<(usize, u64)> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (i, costs.cost(id)))
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    // Min-heap of (load, rank): pop yields the least-loaded rank,
    // lowest rank index on equal loads
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..world_size).map(|r| Reverse((0u64, r))).collect();

    let mut mine = Vec::new();
    for (idx, cost) in order {
        let Reverse((load, r)) = heap.pop().unwrap_or(Reverse((0, 0)));
        if r == rank {
            mine.push(idx);
        }
        heap.push(Reverse((load + cost, r)));
    }

    // Restore catalog order within the shard
    mine.sort_unstable();
    mine.into_iter().map(|i| ids[i].clone()).collect()
}
