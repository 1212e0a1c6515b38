//! Hierarchical Louvain community detection.
//!
//! Modularity-optimizing partitioning in two repeating phases: local moves
//! until no node improves modularity, then aggregation of communities into
//! super-nodes. Intra-community mass is dropped at aggregation, so each
//! level keeps merging what the previous level separated; the hierarchy is
//! the point, not a single optimal cut.

// Score math is f64 throughout; precision-loss casts are counts into ratios,
// and the xorshift state only needs the low bits of the clock.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use crate::models::{Community, Entity, Relationship};
use std::collections::HashMap;

/// Tuning for the detector.
#[derive(Debug, Clone)]
pub struct LouvainConfig {
    /// Resolution parameter γ; 1.0 is classic modularity.
    pub resolution: f64,
    /// Cap on local-move sweeps per level.
    pub max_iterations: usize,
    /// Minimum modularity gain required to move a node.
    pub min_improvement: f64,
    /// Cap on hierarchy levels.
    pub max_depth: u32,
    /// Communities smaller than this are filtered out per level.
    pub min_community_size: usize,
    /// Fixed shuffle seed for deterministic runs.
    pub random_seed: Option<u64>,
}

impl Default for LouvainConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 100,
            min_improvement: 1e-3,
            max_depth: 2,
            min_community_size: 2,
            random_seed: None,
        }
    }
}

impl LouvainConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resolution parameter.
    #[must_use]
    pub const fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sets the hierarchy depth cap.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the minimum community size.
    #[must_use]
    pub const fn with_min_community_size(mut self, size: usize) -> Self {
        self.min_community_size = size;
        self
    }

    /// Fixes the shuffle seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

/// Outcome of one detection run.
#[derive(Debug, Clone, Default)]
pub struct CommunityDetectionResult {
    /// All communities across all levels, unsummarized.
    pub communities: Vec<Community>,
    /// Entity id → community ids it belongs to, across levels.
    pub entity_to_community: HashMap<String, Vec<String>>,
    /// Modularity of the coarsest partition over the original graph.
    pub overall_modularity: f64,
    /// Number of hierarchy levels produced.
    pub hierarchy_depth: u32,
}

/// Weighted undirected graph in adjacency form.
struct WorkGraph {
    /// Neighbor weights per node; no self entries.
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Sum of directed edge weights (2 × undirected total).
    m2: f64,
}

impl WorkGraph {
    fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|(_, w)| w).sum()
    }

    fn node_count(&self) -> usize {
        self.adjacency.len()
    }
}

/// Deterministic xorshift64 shuffler.
struct Shuffler {
    state: u64,
}

impl Shuffler {
    fn new(seed: Option<u64>) -> Self {
        let state = seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0x9e37_79b9, |d| d.as_nanos() as u64)
        });
        Self {
            state: state.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        s
    }

    fn shuffle(&mut self, order: &mut [usize]) {
        for i in (1..order.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }
    }
}

/// Hierarchical Louvain detector.
pub struct LouvainDetector {
    config: LouvainConfig,
}

impl LouvainDetector {
    /// Creates a detector.
    #[must_use]
    pub const fn new(config: LouvainConfig) -> Self {
        Self { config }
    }

    /// Partitions the given subgraph into hierarchical communities.
    ///
    /// Edges are treated as undirected; parallel edges sum. An empty entity
    /// list yields an empty result.
    #[must_use]
    pub fn detect(
        &self,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> CommunityDetectionResult {
        if entities.is_empty() {
            return CommunityDetectionResult::default();
        }

        let index_of: HashMap<&str, usize> = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();
        let graph = build_graph(entities.len(), &index_of, relationships);

        let mut shuffler = Shuffler::new(self.config.random_seed);

        // Each work-graph node carries the original entity ids it stands for.
        let mut node_members: Vec<Vec<String>> =
            entities.iter().map(|e| vec![e.id.clone()]).collect();
        // And, past level 0, the community ids it absorbed one level down.
        let mut node_children: Vec<Vec<String>> = vec![Vec::new(); entities.len()];

        let mut current = graph;
        let mut result = CommunityDetectionResult::default();
        let mut level0_assignment: HashMap<String, usize> = HashMap::new();

        for level in 0..self.config.max_depth {
            if current.node_count() < 2 {
                break;
            }

            let assignment = self.local_phase(&current, &mut shuffler);
            let groups = group_nodes(&assignment);
            if groups.len() == current.node_count() && level > 0 {
                // Graph stopped shrinking.
                break;
            }

            // Materialize this level's communities, filtering small ones.
            let mut kept_groups: Vec<Vec<usize>> = Vec::new();
            let mut level_communities: Vec<Community> = Vec::new();
            for group in groups {
                let members: Vec<String> = group
                    .iter()
                    .flat_map(|&node| node_members[node].iter().cloned())
                    .collect();
                if members.len() < self.config.min_community_size {
                    continue;
                }
                let seed = level_communities.len();
                let mut community = Community::new(level, seed, members);
                community.child_ids = group
                    .iter()
                    .flat_map(|&node| node_children[node].iter().cloned())
                    .collect();
                level_communities.push(community);
                kept_groups.push(group);
            }

            if level_communities.is_empty() {
                break;
            }

            // Wire parents one level down.
            for community in &level_communities {
                for child_id in &community.child_ids {
                    if let Some(child) = result
                        .communities
                        .iter_mut()
                        .find(|c| c.id == *child_id)
                    {
                        child.parent_id = Some(community.id.clone());
                    }
                }
            }

            // The finest partition is the one whose modularity the run
            // reports; deeper levels trade modularity for hierarchy.
            if level == 0 {
                for (seed, community) in level_communities.iter().enumerate() {
                    for member in &community.member_ids {
                        level0_assignment.insert(member.clone(), seed);
                    }
                }
            }

            for community in &level_communities {
                for member in &community.member_ids {
                    result
                        .entity_to_community
                        .entry(member.clone())
                        .or_default()
                        .push(community.id.clone());
                }
            }

            result.hierarchy_depth = level + 1;

            let stop = kept_groups.len() < 2;

            // Aggregate for the next level.
            let (aggregated, members, children) =
                aggregate(&current, &kept_groups, &node_members, &level_communities);
            current = aggregated;
            node_members = members;
            node_children = children;
            result.communities.extend(level_communities);

            if stop {
                break;
            }
        }

        let modularity = modularity_of(
            entities,
            relationships,
            &level0_assignment,
            self.config.resolution,
        );
        result.overall_modularity = modularity;
        for community in &mut result.communities {
            community
                .metadata
                .insert("modularity".to_string(), serde_json::json!(modularity));
        }

        result
    }

    /// Phase 1: local optimization until no node moves or the sweep cap.
    fn local_phase(&self, graph: &WorkGraph, shuffler: &mut Shuffler) -> Vec<usize> {
        let n = graph.node_count();
        let m2 = graph.m2;
        if m2 == 0.0 {
            return (0..n).collect();
        }

        let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
        let mut community: Vec<usize> = (0..n).collect();
        let mut community_tot: Vec<f64> = degrees.clone();
        let mut order: Vec<usize> = (0..n).collect();

        for _ in 0..self.config.max_iterations {
            shuffler.shuffle(&mut order);
            let mut moved = false;

            for &node in &order {
                let old_community = community[node];
                community_tot[old_community] -= degrees[node];

                // Candidate communities in first-seen order over the
                // adjacency list; the old community is always a candidate.
                let mut candidates: Vec<(usize, f64)> = Vec::new();
                let mut seen: HashMap<usize, usize> = HashMap::new();
                seen.insert(old_community, 0);
                candidates.push((old_community, 0.0));
                for &(neighbor, weight) in &graph.adjacency[node] {
                    let c = community[neighbor];
                    match seen.get(&c) {
                        Some(&slot) => candidates[slot].1 += weight,
                        None => {
                            seen.insert(c, candidates.len());
                            candidates.push((c, weight));
                        },
                    }
                }

                let mut best_community = old_community;
                let mut best_delta = f64::NEG_INFINITY;
                let mut old_delta = 0.0;
                for &(candidate, k_in) in &candidates {
                    let delta = k_in / m2
                        - self.config.resolution * (community_tot[candidate] * degrees[node])
                            / (m2 * m2);
                    if candidate == old_community {
                        old_delta = delta;
                    }
                    if delta > best_delta {
                        best_delta = delta;
                        best_community = candidate;
                    }
                }

                let target = if best_community != old_community
                    && best_delta - old_delta > self.config.min_improvement
                {
                    moved = true;
                    best_community
                } else {
                    old_community
                };

                community[node] = target;
                community_tot[target] += degrees[node];
            }

            if !moved {
                break;
            }
        }

        community
    }
}

impl Default for LouvainDetector {
    fn default() -> Self {
        Self::new(LouvainConfig::default())
    }
}

/// Builds the undirected work graph; parallel edges sum, self-loops and
/// edges referencing unknown entities are dropped.
fn build_graph(
    node_count: usize,
    index_of: &HashMap<&str, usize>,
    relationships: &[Relationship],
) -> WorkGraph {
    let mut weight_maps: Vec<HashMap<usize, f64>> = vec![HashMap::new(); node_count];
    for rel in relationships {
        let (Some(&a), Some(&b)) = (
            index_of.get(rel.source_id.as_str()),
            index_of.get(rel.target_id.as_str()),
        ) else {
            continue;
        };
        if a == b {
            continue;
        }
        let w = f64::from(rel.weight);
        *weight_maps[a].entry(b).or_insert(0.0) += w;
        *weight_maps[b].entry(a).or_insert(0.0) += w;
    }

    let mut m2 = 0.0;
    let adjacency: Vec<Vec<(usize, f64)>> = weight_maps
        .into_iter()
        .map(|map| {
            let mut row: Vec<(usize, f64)> = map.into_iter().collect();
            row.sort_unstable_by_key(|(neighbor, _)| *neighbor);
            m2 += row.iter().map(|(_, w)| w).sum::<f64>();
            row
        })
        .collect();

    WorkGraph { adjacency, m2 }
}

/// Groups node indices by community label, ordered by first member index.
fn group_nodes(assignment: &[usize]) -> Vec<Vec<usize>> {
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (node, &label) in assignment.iter().enumerate() {
        match slot_of.get(&label) {
            Some(&slot) => groups[slot].push(node),
            None => {
                slot_of.insert(label, groups.len());
                groups.push(vec![node]);
            },
        }
    }
    groups
}

/// Phase 2: collapses each kept group into a super-node. Inter-community
/// weights sum; intra-community mass is dropped.
fn aggregate(
    graph: &WorkGraph,
    kept_groups: &[Vec<usize>],
    node_members: &[Vec<String>],
    level_communities: &[Community],
) -> (WorkGraph, Vec<Vec<String>>, Vec<Vec<String>>) {
    let mut super_of: HashMap<usize, usize> = HashMap::new();
    for (super_index, group) in kept_groups.iter().enumerate() {
        for &node in group {
            super_of.insert(node, super_index);
        }
    }

    let n = kept_groups.len();
    let mut weight_maps: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
    for (node, row) in graph.adjacency.iter().enumerate() {
        let Some(&a) = super_of.get(&node) else {
            continue;
        };
        for &(neighbor, weight) in row {
            let Some(&b) = super_of.get(&neighbor) else {
                continue;
            };
            if a == b {
                continue;
            }
            *weight_maps[a].entry(b).or_insert(0.0) += weight;
        }
    }

    let mut m2 = 0.0;
    let adjacency: Vec<Vec<(usize, f64)>> = weight_maps
        .into_iter()
        .map(|map| {
            let mut row: Vec<(usize, f64)> = map.into_iter().collect();
            row.sort_unstable_by_key(|(neighbor, _)| *neighbor);
            m2 += row.iter().map(|(_, w)| w).sum::<f64>();
            row
        })
        .collect();

    let members: Vec<Vec<String>> = kept_groups
        .iter()
        .map(|group| {
            group
                .iter()
                .flat_map(|&node| node_members[node].iter().cloned())
                .collect()
        })
        .collect();
    let children: Vec<Vec<String>> = level_communities
        .iter()
        .map(|c| vec![c.id.clone()])
        .collect();

    (WorkGraph { adjacency, m2 }, members, children)
}

/// Modularity `Q = (1/2m) Σ_ij (A_ij − γ·k_i·k_j/2m) δ(c_i, c_j)` of an
/// assignment over the original graph.
fn modularity_of(
    entities: &[Entity],
    relationships: &[Relationship],
    assignment: &HashMap<String, usize>,
    resolution: f64,
) -> f64 {
    let index_of: HashMap<&str, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();
    let graph = build_graph(entities.len(), &index_of, relationships);
    if graph.m2 == 0.0 {
        return 0.0;
    }

    let label_of = |entity: &Entity| assignment.get(&entity.id).copied();

    let mut community_in: HashMap<usize, f64> = HashMap::new();
    let mut community_tot: HashMap<usize, f64> = HashMap::new();
    for (i, entity) in entities.iter().enumerate() {
        let Some(label) = label_of(entity) else {
            continue;
        };
        *community_tot.entry(label).or_insert(0.0) += graph.degree(i);
        for &(neighbor, weight) in &graph.adjacency[i] {
            if label_of(&entities[neighbor]) == Some(label) {
                *community_in.entry(label).or_insert(0.0) += weight;
            }
        }
    }

    community_tot
        .iter()
        .map(|(label, tot)| {
            let within = community_in.get(label).copied().unwrap_or(0.0);
            within / graph.m2 - resolution * (tot / graph.m2).powi(2)
        })
        .sum()
}
