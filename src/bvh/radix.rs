//! GPU radix-sort build path, executed on the host.
//!
//! The pipeline is recorded as a [`DispatchPlan`] exactly as it would be
//! submitted to a compute queue:
//!
//! ```text
//! init -> { poll -> up-sweep -> down-sweep -> reorder } per bit group -> build -> update
//! ```
//!
//! with a barrier between every pair of stages. [`RadixMirror`] then replays
//! the plan stage by stage over double-buffered key/value arrays. Keys are the
//! complemented morton codes, so an ascending stable LSD sort yields the same
//! leaf order as the CPU path's descending stable sort, and the resulting tree
//! is identical.

use super::backend::{BuiltTree, BvhBuilder};
use super::lbvh::{check_leaf_count, compute_splits, link_nodes, MortonLeaf};
use super::node::BvhNode;
use super::refit::{refit_parallel, RefitStats};
use crate::config::BuildConfig;
use crate::util::{ensure_capacity, Result};

const KEY_BITS: u32 = 32;

/// One compute stage of the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    /// Seed ping buffer with keys and identity values.
    Init,
    /// Per-block digit histogram for bit group `group`.
    Poll { group: u32 },
    /// Reduce phase of the histogram scan.
    UpSweep { group: u32 },
    /// Distribute phase, leaving exclusive offsets.
    DownSweep { group: u32 },
    /// Stable scatter from the source to the destination buffer.
    Reorder { group: u32 },
    /// Karras split per internal node.
    Build,
    /// Atomic-counter refit.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Stage { stage: DispatchStage, workgroups: u32 },
    Barrier,
}

/// Ordered list of dispatches for one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub entries: Vec<Dispatch>,
}

impl DispatchPlan {
    /// Record the pipeline for `leaf_count` leaves.
    pub fn record(leaf_count: usize, radix_bits: u32, block_size: u32) -> Self {
        let groups = |n: usize| n.div_ceil(block_size as usize).max(1) as u32;
        let blocks = groups(leaf_count);
        let scan_groups = groups(((1usize << radix_bits) * blocks as usize).next_power_of_two() / 2);

        let mut stages = vec![(DispatchStage::Init, blocks)];
        for group in 0..KEY_BITS / radix_bits {
            stages.push((DispatchStage::Poll { group }, blocks));
            stages.push((DispatchStage::UpSweep { group }, scan_groups));
            stages.push((DispatchStage::DownSweep { group }, scan_groups));
            stages.push((DispatchStage::Reorder { group }, blocks));
        }
        stages.push((DispatchStage::Build, groups(leaf_count.saturating_sub(1))));
        stages.push((DispatchStage::Update, blocks));

        let mut entries = Vec::with_capacity(stages.len() * 2);
        for (i, (stage, workgroups)) in stages.into_iter().enumerate() {
            if i > 0 {
                entries.push(Dispatch::Barrier);
            }
            entries.push(Dispatch::Stage { stage, workgroups });
        }
        Self { entries }
    }

    /// Stages in submission order, barriers skipped.
    pub fn stages(&self) -> impl Iterator<Item = DispatchStage> + '_ {
        self.entries.iter().filter_map(|e| match e {
            Dispatch::Stage { stage, .. } => Some(*stage),
            Dispatch::Barrier => None,
        })
    }

    pub fn barrier_count(&self) -> usize {
        self.entries.iter().filter(|e| matches!(e, Dispatch::Barrier)).count()
    }
}

/// Host replay of the GPU radix-sort LBVH pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadixMirror {
    /// Bits per sort pass; must divide 32.
    pub radix_bits: u32,
    /// Elements per workgroup.
    pub block_size: u32,
    /// Size of each ping-pong buffer.
    pub capacity: usize,
}

impl RadixMirror {
    pub fn new(radix_bits: u32, block_size: u32, capacity: usize) -> Self {
        debug_assert!(radix_bits > 0 && KEY_BITS % radix_bits == 0);
        debug_assert!(block_size > 0);
        Self {
            radix_bits,
            block_size,
            capacity,
        }
    }

    /// Buffers sized for the larger of the triangle and mesh limits.
    pub fn from_config(config: &BuildConfig) -> Self {
        let capacity = config.limits.max_triangles.max(config.limits.max_meshes);
        Self::new(config.radix_bits, config.radix_block_size, capacity)
    }

    pub fn plan(&self, leaf_count: usize) -> DispatchPlan {
        DispatchPlan::record(leaf_count, self.radix_bits, self.block_size)
    }
}

impl BvhBuilder for RadixMirror {
    fn name(&self) -> &'static str {
        "gpu-mirror"
    }

    #[tracing::instrument(skip_all, fields(leaf_count = leaves.len(), radix_bits = self.radix_bits))]
    fn build<L: MortonLeaf>(&self, leaves: &mut [L]) -> Result<BuiltTree> {
        check_leaf_count(leaves.len())?;
        ensure_capacity("radix proxy buffer", leaves.len(), self.capacity)?;

        let plan = self.plan(leaves.len());
        let mut exec = Executor::new(leaves, self.radix_bits, self.block_size as usize);
        for entry in &plan.entries {
            match *entry {
                Dispatch::Barrier => exec.barrier(),
                Dispatch::Stage { stage, workgroups } => {
                    tracing::trace!(?stage, workgroups, "dispatch");
                    exec.run(stage);
                }
            }
        }
        let (sorted, nodes, stats) = exec.finish();
        leaves.clone_from_slice(&sorted);

        Ok(BuiltTree {
            nodes,
            root: stats.root,
            height: stats.height,
        })
    }
}

/// Device state for one build: ping-pong buffers, histogram and tree outputs.
struct Executor<'a, L> {
    input: &'a [L],
    radix_bits: u32,
    block_size: usize,
    keys: [Vec<u32>; 2],
    values: [Vec<u32>; 2],
    src: usize,
    /// Digit-major histogram, padded to a power of two for the scan.
    scan: Vec<u32>,
    sorted: Vec<L>,
    nodes: Vec<BvhNode>,
    stats: Option<RefitStats>,
    awaiting_barrier: bool,
}

impl<'a, L: MortonLeaf> Executor<'a, L> {
    fn new(input: &'a [L], radix_bits: u32, block_size: usize) -> Self {
        let n = input.len();
        Self {
            input,
            radix_bits,
            block_size,
            keys: [vec![0; n], vec![0; n]],
            values: [vec![0; n], vec![0; n]],
            src: 0,
            scan: Vec::new(),
            sorted: Vec::new(),
            nodes: Vec::new(),
            stats: None,
            awaiting_barrier: false,
        }
    }

    fn blocks(&self) -> usize {
        self.input.len().div_ceil(self.block_size)
    }

    fn barrier(&mut self) {
        self.awaiting_barrier = false;
    }

    fn run(&mut self, stage: DispatchStage) {
        assert!(!self.awaiting_barrier, "{stage:?} dispatched without a barrier");
        match stage {
            DispatchStage::Init => self.init(),
            DispatchStage::Poll { group } => self.poll(group),
            DispatchStage::UpSweep { .. } => up_sweep(&mut self.scan),
            DispatchStage::DownSweep { .. } => down_sweep(&mut self.scan),
            DispatchStage::Reorder { group } => self.reorder(group),
            DispatchStage::Build => self.build(),
            DispatchStage::Update => {
                self.stats = Some(refit_parallel(&mut self.nodes, &self.sorted));
            }
        }
        self.awaiting_barrier = true;
    }

    fn init(&mut self) {
        for (i, leaf) in self.input.iter().enumerate() {
            self.keys[0][i] = !leaf.morton_code();
            self.values[0][i] = i as u32;
        }
        self.src = 0;
    }

    /// Shift and mask selecting the digit of bit group `group`.
    fn digit_mask(&self, group: u32) -> (u32, u32) {
        (group * self.radix_bits, (1 << self.radix_bits) - 1)
    }

    fn poll(&mut self, group: u32) {
        let blocks = self.blocks();
        let len = (1usize << self.radix_bits) * blocks;
        self.scan.clear();
        self.scan.resize(len.next_power_of_two(), 0);
        let (shift, mask) = self.digit_mask(group);
        for (block, chunk) in self.keys[self.src].chunks(self.block_size).enumerate() {
            for &key in chunk {
                let digit = ((key >> shift) & mask) as usize;
                self.scan[digit * blocks + block] += 1;
            }
        }
    }

    fn reorder(&mut self, group: u32) {
        let blocks = self.blocks();
        let dst = 1 - self.src;
        let mut offsets = self.scan.clone();
        let (shift, mask) = self.digit_mask(group);
        let [k0, k1] = &mut self.keys;
        let [v0, v1] = &mut self.values;
        let (src_k, dst_k, src_v, dst_v) = if self.src == 0 { (k0, k1, v0, v1) } else { (k1, k0, v1, v0) };

        for (block, (keys, values)) in src_k.chunks(self.block_size).zip(src_v.chunks(self.block_size)).enumerate() {
            for (&key, &value) in keys.iter().zip(values) {
                let digit = ((key >> shift) & mask) as usize;
                let slot = &mut offsets[digit * blocks + block];
                dst_k[*slot as usize] = key;
                dst_v[*slot as usize] = value;
                *slot += 1;
            }
        }
        self.src = dst;
    }

    fn build(&mut self) {
        self.sorted = self.values[self.src].iter().map(|&v| self.input[v as usize].clone()).collect();
        let codes: Vec<u32> = self.keys[self.src].iter().map(|&k| !k).collect();
        let splits = compute_splits(&codes, true);
        self.nodes = link_nodes(&splits, &mut self.sorted).nodes;
    }

    fn finish(self) -> (Vec<L>, Vec<BvhNode>, RefitStats) {
        let Some(stats) = self.stats else {
            panic!("dispatch plan finished without an update stage");
        };
        (self.sorted, self.nodes, stats)
    }
}

/// Blelloch reduce phase over a power-of-two buffer.
pub fn up_sweep(buf: &mut [u32]) {
    let n = buf.len();
    debug_assert!(n.is_power_of_two() || n == 0);
    let mut stride = 1;
    while stride < n {
        for k in (0..n).step_by(stride * 2) {
            buf[k + stride * 2 - 1] += buf[k + stride - 1];
        }
        stride *= 2;
    }
}

/// Blelloch distribute phase; after [`up_sweep`] leaves exclusive prefix sums.
pub fn down_sweep(buf: &mut [u32]) {
    let n = buf.len();
    if n == 0 {
        return;
    }
    buf[n - 1] = 0;
    let mut stride = n / 2;
    while stride >= 1 {
        for k in (0..n).step_by(stride * 2) {
            let (l, r) = (k + stride - 1, k + stride * 2 - 1);
            let t = buf[l];
            buf[l] = buf[r];
            buf[r] += t;
        }
        stride /= 2;
    }
}
