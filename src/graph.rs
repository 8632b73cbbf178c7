//! Audio graph - node registry, branch wiring, and block evaluation.
//!
//! The graph owns every processing node, the edge list, and the branch
//! records that group nodes into switchable processing chains. All
//! mutation happens between blocks on one thread; `process_block` then
//! evaluates nodes in dependency order, recomputing that order only when
//! the topology changed.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::context::{AudioContext, RENDER_QUANTUM};
use crate::dsp::analyser::{Analyser, FftSize, DEFAULT_SMOOTHING};
use crate::dsp::buffer::SampleBuffer;
use crate::dsp::convolver::Convolver;
use crate::dsp::gain::Gain;
use crate::dsp::impulse::{ImpulseBuffer, ImpulseGenerator, ImpulseParameters};
use crate::error::GraphError;

/// Handle to a node in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        NodeId(raw)
    }
}

/// Handle to a branch. Operations against an id the registry never issued
/// fail with `GraphError::UnknownBranch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(u32);

impl BranchId {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        BranchId(raw)
    }
}

/// The two branch shapes the registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BranchKind {
    /// Convolver feeding a gain stage; the gain's edge to the target is
    /// what `set_power` toggles.
    Convolver,
    /// Analyser fed from the target; the tap edge is what `set_power`
    /// toggles.
    AnalyserTap,
}

/// Whether a branch's designated edge is currently present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    Connected,
    Disconnected,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

enum Processor {
    /// Externally fed block input; the graph never overwrites it mid-block.
    Source,
    Convolver(Convolver),
    Gain(Gain),
    Analyser(Analyser),
    /// Fan-in point that sums its inputs.
    Mix,
    /// Terminal sink whose output the host reads back.
    Destination,
}

struct Node {
    processor: Processor,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
}

struct Branch {
    kind: BranchKind,
    /// Entry node for audio into the branch; `None` for taps, which pull
    /// from their target instead.
    input: Option<NodeId>,
    output: NodeId,
    /// The single edge `set_power` connects or disconnects.
    designated: Connection,
    power: PowerState,
    /// Parameters behind the current synthesized kernel, the cache guard
    /// for `update_impulse`. Cleared when a file kernel replaces it.
    params: Option<ImpulseParameters>,
    recomputes: u64,
}

/// The audio graph. Owns nodes, edges, and branches; evaluates one render
/// quantum at a time.
pub struct AudioGraph {
    sample_rate: u32,
    block_size: usize,
    nodes: HashMap<NodeId, Node>,
    connections: Vec<Connection>,
    branches: HashMap<BranchId, Branch>,
    order: Vec<NodeId>,
    dirty: bool,
    next_node: u32,
    next_branch: u32,
    mix: NodeId,
    destination: NodeId,
    generator: ImpulseGenerator,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl AudioGraph {
    pub fn new(context: &AudioContext) -> Self {
        Self::with_generator(context, ImpulseGenerator::new())
    }

    /// Build a graph around a caller-supplied generator, which keeps
    /// kernel synthesis reproducible under a seeded generator.
    pub fn with_generator(context: &AudioContext, generator: ImpulseGenerator) -> Self {
        let mut graph = AudioGraph {
            sample_rate: context.sample_rate(),
            block_size: RENDER_QUANTUM,
            nodes: HashMap::new(),
            connections: Vec::new(),
            branches: HashMap::new(),
            order: Vec::new(),
            dirty: true,
            next_node: 1,
            next_branch: 1,
            mix: NodeId(0),
            destination: NodeId(0),
            generator,
            scratch_left: vec![0.0; RENDER_QUANTUM],
            scratch_right: vec![0.0; RENDER_QUANTUM],
        };
        graph.mix = graph.add_node(Processor::Mix);
        graph.destination = graph.add_node(Processor::Destination);
        graph.connections.push(Connection {
            from: graph.mix,
            to: graph.destination,
        });
        graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The fan-in point branches usually target.
    pub fn mix_node(&self) -> NodeId {
        self.mix
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    fn add_node(&mut self, processor: Processor) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                processor,
                out_left: vec![0.0; self.block_size],
                out_right: vec![0.0; self.block_size],
            },
        );
        self.dirty = true;
        id
    }

    /// Register an externally fed input node.
    pub fn add_source(&mut self) -> NodeId {
        let id = self.add_node(Processor::Source);
        debug!("added source node {id:?}");
        id
    }

    // ── Edges ────────────────────────────────────────────────────────────

    /// Add an edge. Returns `Ok(false)` when the edge already exists, so
    /// repeated wiring never fans out twice.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.require_node(from)?;
        self.require_node(to)?;
        let edge = Connection { from, to };
        if self.connections.contains(&edge) {
            debug!("connect {from:?} -> {to:?} skipped, edge already present");
            return Ok(false);
        }
        self.connections.push(edge);
        self.dirty = true;
        Ok(true)
    }

    /// Remove an edge. Returns `Ok(false)` when no such edge existed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool, GraphError> {
        self.require_node(from)?;
        self.require_node(to)?;
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        let removed = self.connections.len() != before;
        if removed {
            self.dirty = true;
        }
        Ok(removed)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections_between(&self, from: NodeId, to: NodeId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.from == from && c.to == to)
            .count()
    }

    fn require_node(&self, node: NodeId) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node) {
            Ok(())
        } else {
            Err(GraphError::UnknownNode { node })
        }
    }

    // ── Branches ─────────────────────────────────────────────────────────

    /// Build a branch's internal subgraph and record its designated edge
    /// to `target`. The designated edge itself is not added; a new branch
    /// starts `Disconnected` until `set_power` turns it on.
    pub fn create_branch(
        &mut self,
        kind: BranchKind,
        target: NodeId,
    ) -> Result<BranchId, GraphError> {
        self.require_node(target)?;
        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        let branch = match kind {
            BranchKind::Convolver => {
                let convolver = self.add_node(Processor::Convolver(Convolver::new(self.block_size)));
                let gain = self.add_node(Processor::Gain(Gain::new()));
                self.connections.push(Connection {
                    from: convolver,
                    to: gain,
                });
                self.dirty = true;
                Branch {
                    kind,
                    input: Some(convolver),
                    output: gain,
                    designated: Connection {
                        from: gain,
                        to: target,
                    },
                    power: PowerState::Disconnected,
                    params: None,
                    recomputes: 0,
                }
            }
            BranchKind::AnalyserTap => {
                let analyser = self.add_node(Processor::Analyser(Analyser::new(
                    FftSize::default(),
                    DEFAULT_SMOOTHING,
                )));
                Branch {
                    kind,
                    input: None,
                    output: analyser,
                    designated: Connection {
                        from: target,
                        to: analyser,
                    },
                    power: PowerState::Disconnected,
                    params: None,
                    recomputes: 0,
                }
            }
        };
        debug!("created {kind:?} branch {id:?} targeting {target:?}");
        self.branches.insert(id, branch);
        Ok(id)
    }

    pub fn branch_ids(&self) -> Vec<BranchId> {
        let mut ids: Vec<BranchId> = self.branches.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn branch_kind(&self, branch: BranchId) -> Result<BranchKind, GraphError> {
        self.branch_record(branch).map(|b| b.kind)
    }

    /// Entry node for feeding audio into a convolver branch.
    pub fn branch_input(&self, branch: BranchId) -> Result<Option<NodeId>, GraphError> {
        self.branch_record(branch).map(|b| b.input)
    }

    pub fn branch_output(&self, branch: BranchId) -> Result<NodeId, GraphError> {
        self.branch_record(branch).map(|b| b.output)
    }

    pub fn designated_edge(&self, branch: BranchId) -> Result<Connection, GraphError> {
        self.branch_record(branch).map(|b| b.designated)
    }

    pub fn power_state(&self, branch: BranchId) -> Result<PowerState, GraphError> {
        self.branch_record(branch).map(|b| b.power)
    }

    /// How many times this branch's kernel has actually been resynthesized.
    pub fn recompute_count(&self, branch: BranchId) -> Result<u64, GraphError> {
        self.branch_record(branch).map(|b| b.recomputes)
    }

    fn branch_record(&self, branch: BranchId) -> Result<&Branch, GraphError> {
        self.branches
            .get(&branch)
            .ok_or(GraphError::UnknownBranch { branch })
    }

    fn convolver_node(&self, branch: BranchId, op: &'static str) -> Result<NodeId, GraphError> {
        let b = self.branch_record(branch)?;
        match (b.kind, b.input) {
            (BranchKind::Convolver, Some(node)) => Ok(node),
            _ => Err(GraphError::WrongBranchKind { branch, op }),
        }
    }

    fn gain_node(&self, branch: BranchId, op: &'static str) -> Result<NodeId, GraphError> {
        let b = self.branch_record(branch)?;
        if b.kind != BranchKind::Convolver {
            return Err(GraphError::WrongBranchKind { branch, op });
        }
        Ok(b.output)
    }

    /// Connect or disconnect the branch's designated edge. Idempotent: a
    /// branch already in the requested state is left untouched.
    pub fn set_power(&mut self, branch: BranchId, on: bool) -> Result<PowerState, GraphError> {
        let desired = if on {
            PowerState::Connected
        } else {
            PowerState::Disconnected
        };
        let (current, edge) = {
            let b = self.branch_record(branch)?;
            (b.power, b.designated)
        };
        if current == desired {
            return Ok(current);
        }
        if on {
            self.connect(edge.from, edge.to)?;
        } else {
            self.disconnect(edge.from, edge.to)?;
        }
        if let Some(b) = self.branches.get_mut(&branch) {
            b.power = desired;
        }
        debug!("branch {branch:?} power -> {desired:?}");
        Ok(desired)
    }

    /// Resynthesize the branch's impulse kernel if `params` differ from the
    /// parameters behind the current one. Returns whether a recompute
    /// actually happened.
    pub fn update_impulse(
        &mut self,
        branch: BranchId,
        params: &ImpulseParameters,
    ) -> Result<bool, GraphError> {
        let node = self.convolver_node(branch, "update impulse")?;
        let cached = self.branches.get(&branch).and_then(|b| b.params);
        if cached.as_ref() == Some(params) {
            debug!("impulse for branch {branch:?} unchanged, skipping recompute");
            return Ok(false);
        }
        let buffer = self.generator.generate(params, self.sample_rate);
        if let Some(Processor::Convolver(c)) = self.nodes.get_mut(&node).map(|n| &mut n.processor)
        {
            c.set_kernel(&buffer);
        }
        if let Some(b) = self.branches.get_mut(&branch) {
            b.params = Some(*params);
            b.recomputes += 1;
        }
        debug!(
            "set impulse buffer for branch {branch:?}: duration {}s decay {} reverse {}",
            params.duration, params.decay, params.reverse
        );
        Ok(true)
    }

    /// Install decoded audio as the branch's kernel in place of the
    /// synthesized one. The parameter cache is cleared so the next
    /// `update_impulse` always recomputes.
    pub fn load_impulse(
        &mut self,
        branch: BranchId,
        samples: &SampleBuffer,
    ) -> Result<(), GraphError> {
        let node = self.convolver_node(branch, "load impulse")?;
        if samples.is_empty() {
            return Err(GraphError::EmptyImpulse { branch });
        }
        let resampled = samples.resampled_to(self.sample_rate);
        let buffer = ImpulseBuffer::from_sample_buffer(&resampled);
        if let Some(Processor::Convolver(c)) = self.nodes.get_mut(&node).map(|n| &mut n.processor)
        {
            c.set_kernel(&buffer);
        }
        if let Some(b) = self.branches.get_mut(&branch) {
            b.params = None;
        }
        debug!("set impulse buffer for branch {branch:?} from file, {} samples", buffer.len());
        Ok(())
    }

    /// Set the branch's wet gain, clamped to its declared range. Returns
    /// the effective value.
    pub fn set_gain(&mut self, branch: BranchId, value: f32) -> Result<f32, GraphError> {
        let node = self.gain_node(branch, "set gain")?;
        match self.nodes.get_mut(&node).map(|n| &mut n.processor) {
            Some(Processor::Gain(g)) => Ok(g.set(value)),
            _ => Err(GraphError::UnknownNode { node }),
        }
    }

    pub fn set_gain_range(
        &mut self,
        branch: BranchId,
        min: f32,
        max: f32,
    ) -> Result<f32, GraphError> {
        let node = self.gain_node(branch, "set gain range")?;
        match self.nodes.get_mut(&node).map(|n| &mut n.processor) {
            Some(Processor::Gain(g)) => {
                g.set_range(min, max);
                Ok(g.value())
            }
            _ => Err(GraphError::UnknownNode { node }),
        }
    }

    /// Toggle kernel RMS normalization; applies from the next kernel swap.
    pub fn set_normalize(&mut self, branch: BranchId, normalize: bool) -> Result<(), GraphError> {
        let node = self.convolver_node(branch, "set normalize")?;
        if let Some(Processor::Convolver(c)) = self.nodes.get_mut(&node).map(|n| &mut n.processor)
        {
            c.set_normalize(normalize);
        }
        Ok(())
    }

    /// Mutable access to a tap branch's analyser for configuration and
    /// readout.
    pub fn analyser_mut(&mut self, branch: BranchId) -> Result<&mut Analyser, GraphError> {
        let b = self.branch_record(branch)?;
        if b.kind != BranchKind::AnalyserTap {
            return Err(GraphError::WrongBranchKind {
                branch,
                op: "configure analyser",
            });
        }
        let node = b.output;
        match self.nodes.get_mut(&node).map(|n| &mut n.processor) {
            Some(Processor::Analyser(a)) => Ok(a),
            _ => Err(GraphError::UnknownNode { node }),
        }
    }

    // ── Block evaluation ─────────────────────────────────────────────────

    /// Zero all source node outputs ahead of feeding the next block.
    pub fn begin_block(&mut self) {
        for node in self.nodes.values_mut() {
            if matches!(node.processor, Processor::Source) {
                node.out_left.fill(0.0);
                node.out_right.fill(0.0);
            }
        }
    }

    /// Write one block of samples into a source node. Short slices leave
    /// the remainder of the block silent.
    pub fn feed_source(
        &mut self,
        node: NodeId,
        left: &[f32],
        right: &[f32],
    ) -> Result<(), GraphError> {
        let block = self.block_size;
        let n = self
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode { node })?;
        if !matches!(n.processor, Processor::Source) {
            return Err(GraphError::NotASource { node });
        }
        let take = left.len().min(block);
        n.out_left[..take].copy_from_slice(&left[..take]);
        let take = right.len().min(block);
        n.out_right[..take].copy_from_slice(&right[..take]);
        Ok(())
    }

    /// Evaluate one render quantum: every node consumes the summed outputs
    /// of its in-edges and produces its own block.
    pub fn process_block(&mut self) {
        if self.dirty {
            self.rebuild_order();
        }
        for idx in 0..self.order.len() {
            let id = self.order[idx];
            self.scratch_left.fill(0.0);
            self.scratch_right.fill(0.0);
            for c in &self.connections {
                if c.to != id {
                    continue;
                }
                if let Some(src) = self.nodes.get(&c.from) {
                    for i in 0..self.block_size {
                        self.scratch_left[i] += src.out_left[i];
                        self.scratch_right[i] += src.out_right[i];
                    }
                }
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            match &mut node.processor {
                Processor::Source => {}
                Processor::Convolver(c) => c.process_block(
                    &self.scratch_left,
                    &self.scratch_right,
                    &mut node.out_left,
                    &mut node.out_right,
                ),
                Processor::Gain(g) => {
                    node.out_left.copy_from_slice(&self.scratch_left);
                    node.out_right.copy_from_slice(&self.scratch_right);
                    g.apply(&mut node.out_left, &mut node.out_right);
                }
                Processor::Analyser(a) => {
                    a.push_block(&self.scratch_left, &self.scratch_right);
                    node.out_left.copy_from_slice(&self.scratch_left);
                    node.out_right.copy_from_slice(&self.scratch_right);
                }
                Processor::Mix | Processor::Destination => {
                    node.out_left.copy_from_slice(&self.scratch_left);
                    node.out_right.copy_from_slice(&self.scratch_right);
                }
            }
        }
    }

    /// The destination node's most recent block.
    pub fn destination_block(&self) -> (&[f32], &[f32]) {
        match self.nodes.get(&self.destination) {
            Some(node) => (&node.out_left, &node.out_right),
            None => (&[], &[]),
        }
    }

    /// Kahn's algorithm over the edge list, with node ids as the
    /// tie-breaker so evaluation order is deterministic.
    fn rebuild_order(&mut self) {
        let mut indegree: HashMap<NodeId, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for c in &self.connections {
            if let Some(d) = indegree.get_mut(&c.to) {
                *d += 1;
            }
        }
        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort();
        let mut queue: VecDeque<NodeId> = ready.into();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let mut next = Vec::new();
            for c in &self.connections {
                if c.from != id {
                    continue;
                }
                if let Some(d) = indegree.get_mut(&c.to) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(c.to);
                    }
                }
            }
            next.sort();
            queue.extend(next);
        }
        if order.len() < self.nodes.len() {
            warn!(
                "audio graph contains a cycle; {} node(s) evaluate on stale input",
                self.nodes.len() - order.len()
            );
            let mut leftover: Vec<NodeId> = self
                .nodes
                .keys()
                .filter(|id| !order.contains(id))
                .copied()
                .collect();
            leftover.sort();
            order.extend(leftover);
        }
        self.order = order;
        self.dirty = false;
    }
}
