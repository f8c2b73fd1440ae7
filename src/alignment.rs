use std::collections::VecDeque;

use glam::DVec2;
use log::{debug, info};
use rayon::prelude::*;

use crate::config::{MatchParams, RansacParams};
use crate::features::{FrameFeatures, candidate_pairs, match_features};
use crate::optimization::homography::{Transform2D, is_plausible_outline};
use crate::optimization::ransac::ransac;

/// Geometric relation between two frames: `transform` maps pixels of `from`
/// into pixels of `to`. Node indices refer to [`AlignmentGraph::nodes`].
#[derive(Debug, Clone)]
pub struct PairwiseTransform {
    pub from: usize,
    pub to: usize,
    pub transform: Transform2D,
    pub matches: usize,
    pub inliers: usize,
    pub inlier_ratio: f64,
    pub residual: f64,
}

impl PairwiseTransform {
    pub fn is_valid(&self, params: &RansacParams) -> bool {
        self.inlier_ratio >= params.min_inlier_ratio && self.inliers >= params.required_inliers()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNode {
    pub frame_id: usize,
    pub timestamp_ms: i64,
}

/// Frames as a flat arena, valid pairwise transforms as edges between arena
/// indices.
#[derive(Debug, Clone, Default)]
pub struct AlignmentGraph {
    pub nodes: Vec<FrameNode>,
    pub edges: Vec<PairwiseTransform>,
}

#[derive(Debug, Clone)]
pub struct AlignmentSolution {
    /// Node index of the reference frame.
    pub anchor: usize,
    /// Frame-to-mosaic transform per node, `None` when the node is unreachable.
    pub global: Vec<Option<Transform2D>>,
    /// Indices into `AlignmentGraph::edges` that form the spanning tree.
    pub tree_edges: Vec<usize>,
}

impl AlignmentSolution {
    pub fn unaligned(&self) -> Vec<usize> {
        self.global
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn aligned_count(&self) -> usize {
        self.global.iter().filter(|g| g.is_some()).count()
    }
}

/// Estimates a pairwise transform for one candidate pair, `None` if the pair
/// does not meet the match, inlier and plausibility requirements.
pub fn estimate_pair(
    a: &FrameFeatures,
    b: &FrameFeatures,
    nodes: (usize, usize),
    match_params: &MatchParams,
    ransac_params: &RansacParams,
    seed: u64,
) -> Option<PairwiseTransform> {
    let matches = match_features(a, b, match_params);
    if matches.len() < match_params.min_matches.max(ransac_params.model.min_samples()) {
        debug!(
            "frames {} -> {}: {} matches, pair skipped",
            a.frame_id,
            b.frame_id,
            matches.len()
        );
        return None;
    }
    let (src, dst): (Vec<DVec2>, Vec<DVec2>) = matches
        .iter()
        .map(|m| {
            (
                a.keypoints[m.query].p2d.as_dvec2(),
                b.keypoints[m.train].p2d.as_dvec2(),
            )
        })
        .unzip();
    let result = ransac(&src, &dst, ransac_params, seed)?;
    let edge = PairwiseTransform {
        from: nodes.0,
        to: nodes.1,
        transform: result.transform,
        matches: matches.len(),
        inliers: result.inliers.len(),
        inlier_ratio: result.inlier_ratio(matches.len()),
        residual: result.residual,
    };
    if !edge.is_valid(ransac_params) {
        debug!(
            "frames {} -> {}: {}/{} inliers, pair rejected",
            a.frame_id, b.frame_id, edge.inliers, edge.matches
        );
        return None;
    }
    let (w, h) = (a.img_w_h.0 as f64, a.img_w_h.1 as f64);
    if !is_plausible_outline(&edge.transform, w, h, ransac_params.max_scale_change) {
        debug!(
            "frames {} -> {}: implausible transform, pair rejected",
            a.frame_id, b.frame_id
        );
        return None;
    }
    debug!(
        "frames {} -> {}: {}/{} inliers, rms {:.3} px",
        a.frame_id, b.frame_id, edge.inliers, edge.matches, edge.residual
    );
    Some(edge)
}

impl AlignmentGraph {
    /// Matches temporally adjacent frames in parallel and keeps the valid
    /// pairs as edges. `features` must be in capture order.
    pub fn build(
        features: &[FrameFeatures],
        match_params: &MatchParams,
        ransac_params: &RansacParams,
    ) -> AlignmentGraph {
        let nodes: Vec<FrameNode> = features
            .iter()
            .map(|f| FrameNode {
                frame_id: f.frame_id,
                timestamp_ms: f.timestamp_ms,
            })
            .collect();
        let pairs = candidate_pairs(features.len(), match_params.window);
        let edges: Vec<PairwiseTransform> = pairs
            .par_iter()
            .enumerate()
            .filter_map(|(pair_idx, &(i, j))| {
                let seed = ransac_params.seed.wrapping_add(pair_idx as u64);
                estimate_pair(
                    &features[i],
                    &features[j],
                    (i, j),
                    match_params,
                    ransac_params,
                    seed,
                )
            })
            .collect();
        info!(
            "{} of {} candidate pairs aligned",
            edges.len(),
            pairs.len()
        );
        AlignmentGraph { nodes, edges }
    }

    pub fn degree(&self, node: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.from == node || e.to == node)
            .count()
    }

    /// Highest degree, then earliest timestamp, then lowest index.
    pub fn select_anchor(&self) -> Option<usize> {
        (0..self.nodes.len()).min_by(|&a, &b| {
            self.degree(b)
                .cmp(&self.degree(a))
                .then(self.nodes[a].timestamp_ms.cmp(&self.nodes[b].timestamp_ms))
                .then(a.cmp(&b))
        })
    }

    /// Kruskal maximum spanning forest weighted by inlier count. Returns edge
    /// indices.
    pub fn maximum_spanning_forest(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.edges.len()).collect();
        order.sort_by(|&a, &b| {
            let (ea, eb) = (&self.edges[a], &self.edges[b]);
            eb.inliers
                .cmp(&ea.inliers)
                .then(ea.residual.total_cmp(&eb.residual))
                .then((ea.from, ea.to).cmp(&(eb.from, eb.to)))
        });
        let mut sets = DisjointSet::new(self.nodes.len());
        order
            .into_iter()
            .filter(|&e| sets.union(self.edges[e].from, self.edges[e].to))
            .collect()
    }

    /// Anchors the reference frame at identity and composes edge transforms
    /// along the spanning tree.
    pub fn solve(&self) -> Option<AlignmentSolution> {
        let anchor = self.select_anchor()?;
        let tree_edges = self.maximum_spanning_forest();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &e in &tree_edges {
            adjacency[self.edges[e].from].push(e);
            adjacency[self.edges[e].to].push(e);
        }

        let mut global: Vec<Option<Transform2D>> = vec![None; self.nodes.len()];
        global[anchor] = Some(Transform2D::identity());
        let mut queue = VecDeque::from([anchor]);
        while let Some(node) = queue.pop_front() {
            let Some(current) = global[node] else {
                continue;
            };
            for &e in &adjacency[node] {
                let edge = &self.edges[e];
                let (next, next_global) = if edge.from == node {
                    // to-frame pixels reach the mosaic through the inverse edge
                    let Some(inv) = edge.transform.inverse() else {
                        continue;
                    };
                    (edge.to, current.compose(&inv))
                } else {
                    (edge.from, current.compose(&edge.transform))
                };
                if global[next].is_none() {
                    global[next] = Some(next_global);
                    queue.push_back(next);
                }
            }
        }
        Some(AlignmentSolution {
            anchor,
            global,
            tree_edges,
        })
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> DisjointSet {
        DisjointSet {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Joins the sets of `a` and `b`, false if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}
