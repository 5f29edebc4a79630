// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Directed signal-flow graph and its scheduler thread.
//!
//! The graph owns every stage as `Arc<Mutex<dyn Block>>`; callers keep typed
//! [`Stage`] handles for parameter updates. Edges are unique and every input
//! port has at most one driver. A tick runs all connected stages once in
//! topological order, passing each output buffer to every consumer.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use trx_core::{RxError, RxResult};

use crate::stage::{lock, Block, Buffer, PortType, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u32);

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub src: StageId,
    pub src_port: usize,
    pub dst: StageId,
    pub dst_port: usize,
}

impl Edge {
    pub fn new(src: StageId, src_port: usize, dst: StageId, dst_port: usize) -> Self {
        Self {
            src,
            src_port,
            dst,
            dst_port,
        }
    }
}

/// Typed handle to a stage owned by a [`Flowgraph`].
pub struct Stage<B: ?Sized> {
    id: StageId,
    block: Arc<Mutex<B>>,
}

impl<B: ?Sized> Clone for Stage<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            block: self.block.clone(),
        }
    }
}

impl<B: ?Sized> Stage<B> {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, B> {
        lock(&self.block)
    }
}

struct Node {
    kind: StageKind,
    inputs: &'static [PortType],
    outputs: &'static [PortType],
    block: Arc<Mutex<dyn Block>>,
}

/// Execution plan: stages in topological order with the driver of each input.
struct PlanStep {
    id: StageId,
    drivers: Vec<(StageId, usize)>,
}

#[derive(Default)]
pub struct Flowgraph {
    nodes: BTreeMap<StageId, Node>,
    edges: BTreeSet<Edge>,
    next_id: u32,
    plan: Option<Vec<PlanStep>>,
}

impl Flowgraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<B: Block + 'static>(&mut self, block: B) -> Stage<B> {
        let id = StageId(self.next_id);
        self.next_id += 1;
        let kind = block.kind();
        let inputs = block.inputs();
        let outputs = block.outputs();
        let shared = Arc::new(Mutex::new(block));
        let erased: Arc<Mutex<dyn Block>> = shared.clone();
        self.nodes.insert(
            id,
            Node {
                kind,
                inputs,
                outputs,
                block: erased,
            },
        );
        self.plan = None;
        tracing::trace!("flowgraph: added {} {}", kind, id);
        Stage { id, block: shared }
    }

    /// Drop a stage and every edge touching it.
    pub fn remove(&mut self, id: StageId) {
        if self.nodes.remove(&id).is_none() {
            return;
        }
        self.edges.retain(|e| e.src != id && e.dst != id);
        self.plan = None;
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: StageId) -> Option<StageKind> {
        self.nodes.get(&id).map(|n| n.kind)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn has_edge(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    /// True when the stage has at least one edge.
    pub fn is_connected(&self, id: StageId) -> bool {
        self.edges.iter().any(|e| e.src == id || e.dst == id)
    }

    pub fn connect(
        &mut self,
        src: StageId,
        src_port: usize,
        dst: StageId,
        dst_port: usize,
    ) -> RxResult<()> {
        let edge = Edge::new(src, src_port, dst, dst_port);
        let src_node = self
            .nodes
            .get(&src)
            .ok_or_else(|| RxError::Graph(format!("connect: no stage {}", src)))?;
        let dst_node = self
            .nodes
            .get(&dst)
            .ok_or_else(|| RxError::Graph(format!("connect: no stage {}", dst)))?;
        let out_type = src_node.outputs.get(src_port).ok_or_else(|| {
            RxError::Graph(format!("{} {} has no output {}", src_node.kind, src, src_port))
        })?;
        let in_type = dst_node.inputs.get(dst_port).ok_or_else(|| {
            RxError::Graph(format!("{} {} has no input {}", dst_node.kind, dst, dst_port))
        })?;
        if out_type != in_type {
            return Err(RxError::Graph(format!(
                "port type mismatch {} {}:{} -> {} {}:{}",
                src_node.kind, src, src_port, dst_node.kind, dst, dst_port
            )));
        }
        if self.edges.contains(&edge) {
            return Err(RxError::Graph(format!(
                "duplicate edge {}:{} -> {}:{}",
                src, src_port, dst, dst_port
            )));
        }
        if self
            .edges
            .iter()
            .any(|e| e.dst == dst && e.dst_port == dst_port)
        {
            return Err(RxError::Graph(format!(
                "input {} of {} {} already driven",
                dst_port, dst_node.kind, dst
            )));
        }
        self.edges.insert(edge);
        self.plan = None;
        Ok(())
    }

    pub fn disconnect(
        &mut self,
        src: StageId,
        src_port: usize,
        dst: StageId,
        dst_port: usize,
    ) -> RxResult<()> {
        if !self.edges.remove(&Edge::new(src, src_port, dst, dst_port)) {
            return Err(RxError::Graph(format!(
                "no edge {}:{} -> {}:{}",
                src, src_port, dst, dst_port
            )));
        }
        self.plan = None;
        Ok(())
    }

    /// Remove every edge leaving `id`.
    pub fn disconnect_outputs(&mut self, id: StageId) {
        let before = self.edges.len();
        self.edges.retain(|e| e.src != id);
        if self.edges.len() != before {
            self.plan = None;
        }
    }

    pub fn disconnect_all(&mut self) {
        self.edges.clear();
        self.plan = None;
    }

    /// Every connected stage must have all of its inputs driven and the
    /// connected part must be acyclic.
    pub fn validate(&self) -> RxResult<()> {
        self.build_plan().map(|_| ())
    }

    fn build_plan(&self) -> RxResult<Vec<PlanStep>> {
        let mut drivers: HashMap<(StageId, usize), (StageId, usize)> = HashMap::new();
        let mut indegree: BTreeMap<StageId, usize> = BTreeMap::new();
        let mut downstream: HashMap<StageId, BTreeSet<StageId>> = HashMap::new();

        for e in &self.edges {
            drivers.insert((e.dst, e.dst_port), (e.src, e.src_port));
            indegree.entry(e.src).or_insert(0);
            indegree.entry(e.dst).or_insert(0);
            if downstream.entry(e.src).or_default().insert(e.dst) {
                *indegree.entry(e.dst).or_insert(0) += 1;
            }
        }

        let mut steps_by_id: BTreeMap<StageId, PlanStep> = BTreeMap::new();
        for &id in indegree.keys() {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| RxError::Graph(format!("edge references missing stage {}", id)))?;
            let mut step = PlanStep {
                id,
                drivers: Vec::with_capacity(node.inputs.len()),
            };
            for port in 0..node.inputs.len() {
                let driver = drivers.get(&(id, port)).ok_or_else(|| {
                    RxError::Graph(format!("input {} of {} {} is not connected", port, node.kind, id))
                })?;
                step.drivers.push(*driver);
            }
            steps_by_id.insert(id, step);
        }

        let mut ready: VecDeque<StageId> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut plan = Vec::with_capacity(steps_by_id.len());
        while let Some(id) = ready.pop_front() {
            if let Some(next) = downstream.get(&id) {
                for dst in next {
                    if let Some(deg) = indegree.get_mut(dst) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push_back(*dst);
                        }
                    }
                }
            }
            if let Some(step) = steps_by_id.remove(&id) {
                plan.push(step);
            }
        }
        if !steps_by_id.is_empty() {
            return Err(RxError::Graph("flowgraph contains a cycle".to_string()));
        }
        Ok(plan)
    }

    /// Run every connected stage once. Returns the longest pacing hint.
    pub fn run_once(&mut self) -> RxResult<Option<Duration>> {
        if self.plan.is_none() {
            self.plan = Some(self.build_plan()?);
        }
        let Some(plan) = self.plan.as_ref() else {
            return Ok(None);
        };

        let mut produced: HashMap<(StageId, usize), Buffer> = HashMap::new();
        let mut pace: Option<Duration> = None;
        for step in plan {
            let Some(node) = self.nodes.get(&step.id) else {
                continue;
            };
            let outputs = {
                let mut inputs = Vec::with_capacity(step.drivers.len());
                for driver in &step.drivers {
                    let buf = produced.get(driver).ok_or_else(|| {
                        RxError::Graph(format!("no buffer from {}:{}", driver.0, driver.1))
                    })?;
                    inputs.push(buf);
                }
                let mut block = lock(&node.block);
                let outputs = block.work(&inputs)?;
                if let Some(p) = block.pace() {
                    pace = Some(pace.map_or(p, |cur| cur.max(p)));
                }
                outputs
            };
            if outputs.len() != node.outputs.len() {
                return Err(RxError::Graph(format!(
                    "{} {} produced {} buffers for {} outputs",
                    node.kind,
                    step.id,
                    outputs.len(),
                    node.outputs.len()
                )));
            }
            for (port, buf) in outputs.into_iter().enumerate() {
                produced.insert((step.id, port), buf);
            }
        }
        Ok(pace)
    }

    /// Give every stage its stop hook.
    pub fn stop_all(&mut self) {
        for node in self.nodes.values() {
            lock(&node.block).stop();
        }
    }
}

/// Scheduler thread driving a shared flowgraph.
pub struct Runner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

const ERROR_BACKOFF: Duration = Duration::from_millis(10);

impl Runner {
    pub fn spawn(graph: Arc<Mutex<Flowgraph>>) -> RxResult<Self> {
        lock(&graph).validate()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("rx-flowgraph".to_string())
            .spawn(move || run_loop(graph, thread_stop))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and block until it has exited.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("flowgraph thread panicked");
            }
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run_loop(graph: Arc<Mutex<Flowgraph>>, stop: Arc<AtomicBool>) {
    tracing::debug!("flowgraph thread started");
    let mut last_error: Option<String> = None;
    while !stop.load(Ordering::Acquire) {
        let result = lock(&graph).run_once();
        match result {
            Ok(Some(pace)) => std::thread::sleep(pace),
            Ok(None) => std::thread::yield_now(),
            Err(e) => {
                let msg = e.to_string();
                if last_error.as_deref() != Some(msg.as_str()) {
                    tracing::error!("flowgraph tick failed: {}", msg);
                    last_error = Some(msg);
                }
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    tracing::debug!("flowgraph thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{NullSink, NO_PORTS, REAL_1};

    struct Ramp {
        next: f32,
    }

    impl Block for Ramp {
        fn kind(&self) -> StageKind {
            StageKind::Source
        }
        fn inputs(&self) -> &'static [PortType] {
            NO_PORTS
        }
        fn outputs(&self) -> &'static [PortType] {
            REAL_1
        }
        fn work(&mut self, _inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
            let out: Vec<f32> = (0..4).map(|i| self.next + i as f32).collect();
            self.next += 4.0;
            Ok(vec![Buffer::Real(out)])
        }
        fn pace(&self) -> Option<Duration> {
            Some(Duration::from_millis(1))
        }
    }

    struct Double;

    impl Block for Double {
        fn kind(&self) -> StageKind {
            StageKind::Gain
        }
        fn inputs(&self) -> &'static [PortType] {
            REAL_1
        }
        fn outputs(&self) -> &'static [PortType] {
            REAL_1
        }
        fn work(&mut self, inputs: &[&Buffer]) -> RxResult<Vec<Buffer>> {
            let input = crate::stage::real_input(inputs, 0)?;
            Ok(vec![Buffer::Real(input.iter().map(|x| x * 2.0).collect())])
        }
    }

    #[test]
    fn connect_rejects_second_driver_and_bad_ports() {
        let mut g = Flowgraph::new();
        let a = g.add(Ramp { next: 0.0 });
        let b = g.add(Ramp { next: 0.0 });
        let sink = g.add(NullSink::new());
        g.connect(a.id(), 0, sink.id(), 0).unwrap();
        assert!(g.connect(a.id(), 0, sink.id(), 0).is_err());
        assert!(g.connect(b.id(), 0, sink.id(), 0).is_err());
        assert!(g.connect(b.id(), 1, sink.id(), 0).is_err());
        assert!(g.connect(sink.id(), 0, b.id(), 0).is_err());
    }

    #[test]
    fn validate_requires_all_inputs_of_connected_stages() {
        let mut g = Flowgraph::new();
        let src = g.add(Ramp { next: 0.0 });
        let gain = g.add(Double);
        let sink = g.add(NullSink::new());
        g.connect(gain.id(), 0, sink.id(), 0).unwrap();
        assert!(g.validate().is_err());
        g.connect(src.id(), 0, gain.id(), 0).unwrap();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn run_once_flows_in_topological_order() {
        let mut g = Flowgraph::new();
        let sink = g.add(NullSink::new());
        let gain = g.add(Double);
        let src = g.add(Ramp { next: 1.0 });
        g.connect(gain.id(), 0, sink.id(), 0).unwrap();
        g.connect(src.id(), 0, gain.id(), 0).unwrap();
        let pace = g.run_once().unwrap();
        assert_eq!(pace, Some(Duration::from_millis(1)));
        assert_eq!(sink.lock().consumed(), 4);
        g.run_once().unwrap();
        assert_eq!(sink.lock().consumed(), 8);
    }

    #[test]
    fn removing_a_stage_drops_its_edges() {
        let mut g = Flowgraph::new();
        let src = g.add(Ramp { next: 0.0 });
        let sink = g.add(NullSink::new());
        g.connect(src.id(), 0, sink.id(), 0).unwrap();
        g.remove(sink.id());
        assert_eq!(g.edges().count(), 0);
        assert!(!g.contains(sink.id()));
        assert!(!g.is_connected(src.id()));
    }

    #[test]
    fn disconnected_stages_are_not_scheduled() {
        let mut g = Flowgraph::new();
        let _idle = g.add(Double);
        let src = g.add(Ramp { next: 0.0 });
        let sink = g.add(NullSink::new());
        g.connect(src.id(), 0, sink.id(), 0).unwrap();
        assert!(g.run_once().is_ok());
    }

    #[test]
    fn runner_processes_until_stopped() {
        let graph = Arc::new(Mutex::new(Flowgraph::new()));
        let sink = {
            let mut g = graph.lock().unwrap();
            let src = g.add(Ramp { next: 0.0 });
            let sink = g.add(NullSink::new());
            g.connect(src.id(), 0, sink.id(), 0).unwrap();
            sink
        };
        let runner = Runner::spawn(graph.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        runner.stop();
        let consumed = sink.lock().consumed();
        assert!(consumed > 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(sink.lock().consumed(), consumed);
    }
}
