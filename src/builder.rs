//! Declarative task construction.
//!
//! A spec is validated as a whole before any task exists, so a rejected spec
//! never leaves a half-built task behind in the simulator.

#![forbid(unsafe_code)]

use crate::affinity::Affinity;
use crate::error::{SimError, SimResult};
use crate::segment::SegmentId;
use crate::task::{Task, TaskId};
use std::collections::VecDeque;

/// A task with an arbitrary precedence DAG.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DagSpec {
    /// Release period in ticks.
    pub period: u64,
    /// Number of nodes; must match `segments`.
    pub node_count: usize,
    /// Affinity and length of each node, by index.
    pub segments: Vec<(Affinity, f64)>,
    /// `(upstream, downstream)` node index pairs.
    pub edges: Vec<(usize, usize)>,
}

/// A straight-line chain whose affinities cycle through a fixed pattern.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineSpec {
    /// Affinities assigned round-robin along the chain.
    pub affinity_cycle: Vec<Affinity>,
    /// Length of each stage, in chain order.
    pub lengths: Vec<f64>,
    /// Release period in ticks.
    pub period: u64,
}

impl DagSpec {
    /// Spec whose node count is taken from `segments`.
    pub fn new(period: u64, segments: Vec<(Affinity, f64)>, edges: Vec<(usize, usize)>) -> Self {
        Self {
            period,
            node_count: segments.len(),
            segments,
            edges,
        }
    }

    /// Check shape, edge bounds and acyclicity.
    pub fn validate(&self) -> SimResult<()> {
        validate_period(self.period)?;
        if self.node_count != self.segments.len() {
            return Err(SimError::InvalidParameter(format!(
                "node count {} does not match {} segment specs",
                self.node_count,
                self.segments.len()
            )));
        }
        for (_, length) in &self.segments {
            validate_length(*length)?;
        }
        for &(u, v) in &self.edges {
            if u == v || u >= self.node_count || v >= self.node_count {
                return Err(SimError::InvalidEdge {
                    upstream: SegmentId(u),
                    downstream: SegmentId(v),
                });
            }
        }
        topo_order(self.node_count, &self.edges).map(|_| ())
    }

    /// Build the task with handle `id`.
    pub fn build(&self, id: TaskId) -> SimResult<Task> {
        self.validate()?;
        let mut task = Task::new(id);
        for &(affinity, length) in &self.segments {
            task.add_segment(affinity, length);
        }
        for &(u, v) in &self.edges {
            task.set_dependency(SegmentId(u), SegmentId(v))?;
        }
        task.set_period(self.period);
        Ok(task)
    }
}

impl PipelineSpec {
    /// Chain of `lengths.len()` stages.
    pub fn new(affinity_cycle: Vec<Affinity>, lengths: Vec<f64>, period: u64) -> Self {
        Self {
            affinity_cycle,
            lengths,
            period,
        }
    }

    /// Check the period, the cycle and every length.
    pub fn validate(&self) -> SimResult<()> {
        validate_period(self.period)?;
        if self.affinity_cycle.is_empty() {
            return Err(SimError::InvalidParameter(
                "pipeline affinity cycle is empty".to_string(),
            ));
        }
        self.lengths.iter().try_for_each(|&l| validate_length(l))
    }

    /// Segment `i` takes affinity `cycle[i % cycle.len()]` and depends on `i - 1`.
    pub fn build(&self, id: TaskId) -> SimResult<Task> {
        self.validate()?;
        let mut task = Task::new(id);
        let affinities = self.affinity_cycle.iter().cycle();
        for (i, (&length, &affinity)) in self.lengths.iter().zip(affinities).enumerate() {
            let seg = task.add_segment(affinity, length);
            if i > 0 {
                task.set_dependency(SegmentId(i - 1), seg)?;
            }
        }
        task.set_period(self.period);
        Ok(task)
    }
}

fn validate_period(period: u64) -> SimResult<()> {
    if period == 0 {
        return Err(SimError::InvalidParameter(
            "period must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_length(length: f64) -> SimResult<()> {
    if !length.is_finite() || length < 0.0 {
        return Err(SimError::InvalidParameter(format!(
            "segment length {} is not a non-negative number",
            length
        )));
    }
    Ok(())
}

/// Kahn's algorithm. Fails with the first edge found on a cycle.
pub fn topo_order(node_count: usize, edges: &[(usize, usize)]) -> SimResult<Vec<SegmentId>> {
    let mut in_degree = vec![0usize; node_count];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(u, v) in edges {
        adj[u].push(v);
        in_degree[v] += 1;
    }

    let mut queue: VecDeque<usize> = (0..node_count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(node_count);
    while let Some(node) = queue.pop_front() {
        order.push(SegmentId(node));
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == node_count {
        return Ok(order);
    }
    // Every edge between two unvisited nodes lies on or behind a cycle.
    let (u, v) = edges
        .iter()
        .copied()
        .find(|&(u, v)| in_degree[u] > 0 && in_degree[v] > 0)
        .unwrap_or((0, 0));
    Err(SimError::CycleDetected {
        upstream: SegmentId(u),
        downstream: SegmentId(v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_alternates_affinities() {
        let spec = PipelineSpec::new(
            vec![Affinity::Cpu, Affinity::Gpu],
            vec![3.0, 1.0, 2.0, 4.0, 5.0],
            20,
        );
        let task = spec.build(TaskId(0)).unwrap();
        let affinities: Vec<_> = task.segments().iter().map(|s| s.affinity()).collect();
        assert_eq!(
            affinities,
            vec![
                Affinity::Cpu,
                Affinity::Gpu,
                Affinity::Cpu,
                Affinity::Gpu,
                Affinity::Cpu
            ]
        );
        assert_eq!(task.predecessors(SegmentId(3)), &[SegmentId(2)]);
        assert_eq!(task.max_concurrency(), 1);
        assert_eq!(task.period(), 20);
    }

    #[test]
    fn empty_cycle_rejected() {
        let spec = PipelineSpec::new(vec![], vec![1.0], 10);
        assert!(matches!(
            spec.build(TaskId(0)),
            Err(SimError::InvalidParameter(_))
        ));
    }

    #[test]
    fn diamond_dag_builds() {
        let spec = DagSpec::new(
            30,
            vec![
                (Affinity::Cpu, 1.0),
                (Affinity::Gpu, 2.0),
                (Affinity::Fpga, 2.0),
                (Affinity::Cpu, 1.0),
            ],
            vec![(0, 1), (0, 2), (1, 3), (2, 3)],
        );
        let task = spec.build(TaskId(3)).unwrap();
        assert_eq!(task.max_concurrency(), 2);
        assert_eq!(task.predecessors(SegmentId(3)).len(), 2);
    }

    #[test]
    fn cyclic_dag_rejected() {
        let spec = DagSpec::new(
            10,
            vec![(Affinity::Cpu, 1.0); 3],
            vec![(0, 1), (1, 2), (2, 1)],
        );
        assert!(matches!(
            spec.validate(),
            Err(SimError::CycleDetected { .. })
        ));
    }

    #[test]
    fn node_count_mismatch_rejected() {
        let mut spec = DagSpec::new(10, vec![(Affinity::Cpu, 1.0); 2], vec![(0, 1)]);
        spec.node_count = 3;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn out_of_range_edge_rejected() {
        let spec = DagSpec::new(10, vec![(Affinity::Cpu, 1.0); 2], vec![(0, 5)]);
        assert_eq!(
            spec.validate(),
            Err(SimError::InvalidEdge {
                upstream: SegmentId(0),
                downstream: SegmentId(5)
            })
        );
    }

    #[test]
    fn topo_order_is_stable() {
        let edges = [(0, 2), (1, 2), (2, 3)];
        let a = topo_order(4, &edges).unwrap();
        let b = topo_order(4, &edges).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.last(), Some(&SegmentId(3)));
    }
}
