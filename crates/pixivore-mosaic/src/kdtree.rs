//! 3-D RGB k-d tree with draining nearest-neighbour queries.
//!
//! Built once per reconstruction over the sample colors, then queried with
//! [`ColorKdTree::take_nearest`], which marks the winner used. Every node
//! keeps an unused count for its subtree and a parent link so marking is a
//! walk to the root; search prunes both by axis distance and by exhausted
//! subtrees, which is what keeps the no-reuse constraint from degrading the
//! query to a linear scan.

/// Flat-array k-d tree node.
#[derive(Debug, Clone)]
struct KdNode {
    color: [f32; 3],
    sample: usize,
    axis: u8,
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
    used: bool,
    unused_count: u32,
}

#[derive(Debug, Default)]
pub struct ColorKdTree {
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl ColorKdTree {
    /// Builds a balanced tree by median split; deterministic for a given
    /// sample order.
    #[must_use]
    pub fn build(samples: &[[f32; 3]]) -> Self {
        let mut indices: Vec<usize> = (0..samples.len()).collect();
        let mut nodes = Vec::with_capacity(samples.len());
        let root = Self::build_span(samples, &mut indices, 0, None, &mut nodes);
        Self { nodes, root }
    }

    fn build_span(
        samples: &[[f32; 3]],
        span: &mut [usize],
        depth: usize,
        parent: Option<usize>,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if span.is_empty() {
            return None;
        }
        let axis = depth % 3;
        span.sort_unstable_by(|&a, &b| {
            samples[a][axis]
                .total_cmp(&samples[b][axis])
                .then(a.cmp(&b))
        });
        let mid = span.len() / 2;
        let sample = span[mid];
        let node_idx = nodes.len();
        nodes.push(KdNode {
            color: samples[sample],
            sample,
            axis: axis as u8,
            left: None,
            right: None,
            parent,
            used: false,
            unused_count: 1,
        });
        let (left_span, rest) = span.split_at_mut(mid);
        let right_span = &mut rest[1..];
        let left = Self::build_span(samples, left_span, depth + 1, Some(node_idx), nodes);
        let right = Self::build_span(samples, right_span, depth + 1, Some(node_idx), nodes);
        nodes[node_idx].left = left;
        nodes[node_idx].right = right;
        let mut count = 1;
        if let Some(l) = left {
            count += nodes[l].unused_count;
        }
        if let Some(r) = right {
            count += nodes[r].unused_count;
        }
        nodes[node_idx].unused_count = count;
        Some(node_idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Samples not yet claimed.
    #[must_use]
    pub fn unused(&self) -> u32 {
        self.root.map_or(0, |idx| self.nodes[idx].unused_count)
    }

    /// Finds the nearest unused sample to `query`, marks it used, and
    /// returns its index into the original sample slice. `None` once the
    /// tree is drained.
    pub fn take_nearest(&mut self, query: [f32; 3]) -> Option<usize> {
        let mut best: Option<(f32, usize)> = None;
        self.search(self.root, query, &mut best);
        let (_, node_idx) = best?;
        self.mark_used(node_idx);
        Some(self.nodes[node_idx].sample)
    }

    fn search(&self, node: Option<usize>, query: [f32; 3], best: &mut Option<(f32, usize)>) {
        let Some(idx) = node else {
            return;
        };
        let entry = &self.nodes[idx];
        if entry.unused_count == 0 {
            return;
        }
        if !entry.used {
            let dist = dist_sq(entry.color, query);
            if best.is_none_or(|(best_dist, _)| dist < best_dist) {
                *best = Some((dist, idx));
            }
        }
        let axis = entry.axis as usize;
        let delta = query[axis] - entry.color[axis];
        let (near, far) = if delta < 0.0 {
            (entry.left, entry.right)
        } else {
            (entry.right, entry.left)
        };
        self.search(near, query, best);
        if best.is_none_or(|(best_dist, _)| delta * delta < best_dist) {
            self.search(far, query, best);
        }
    }

    fn mark_used(&mut self, node_idx: usize) {
        self.nodes[node_idx].used = true;
        let mut cursor = Some(node_idx);
        while let Some(idx) = cursor {
            self.nodes[idx].unused_count -= 1;
            cursor = self.nodes[idx].parent;
        }
    }
}

fn dist_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}
