//! Named cross-queue dependencies for one frame
//!
//! Every GPU-side ordering between submissions is an edge `producer -> consumer : signal`
//! in a single table. Submission code asks the table which signals to wait on instead
//! of wiring semaphores ad hoc.

use ash::vk;
use std::collections::HashMap;
use thiserror::Error;

/// Unit of GPU work within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ImageAcquire,
    ParticleCompute,
    GraphicsPasses,
    Present,
}

/// Semaphore role connecting two stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ImageAcquired,
    ComputeFinished,
    GraphicsFinished,
}

/// `producer -> consumer`, with the pipeline stage at which the consumer waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    pub producer: Stage,
    pub consumer: Stage,
    pub signal: Signal,
    pub wait_stage: vk::PipelineStageFlags,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Signal {signal:?} produced by both {first:?} and {second:?}")]
    DuplicateProducer {
        signal: Signal,
        first: Stage,
        second: Stage,
    },

    #[error("Dependency cycle through {0:?}")]
    Cycle(Stage),
}

/// Validated edge list
#[derive(Debug, Clone)]
pub struct DependencyTable {
    edges: Vec<DependencyEdge>,
}

impl DependencyTable {
    /// Validate `edges`: one producer per signal, no cycles
    pub fn new(edges: Vec<DependencyEdge>) -> Result<Self, DependencyError> {
        let mut producers: HashMap<Signal, Stage> = HashMap::new();
        for edge in &edges {
            if let Some(&first) = producers.get(&edge.signal) {
                if first != edge.producer {
                    return Err(DependencyError::DuplicateProducer {
                        signal: edge.signal,
                        first,
                        second: edge.producer,
                    });
                }
            }
            producers.insert(edge.signal, edge.producer);
        }

        let table = Self { edges };
        table.check_acyclic()?;
        Ok(table)
    }

    /// The renderer's frame: acquire and compute feed graphics, graphics feeds present
    pub fn frame() -> Result<Self, DependencyError> {
        Self::new(vec![
            DependencyEdge {
                producer: Stage::ImageAcquire,
                consumer: Stage::GraphicsPasses,
                signal: Signal::ImageAcquired,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            },
            DependencyEdge {
                producer: Stage::ParticleCompute,
                consumer: Stage::GraphicsPasses,
                signal: Signal::ComputeFinished,
                wait_stage: vk::PipelineStageFlags::VERTEX_INPUT,
            },
            DependencyEdge {
                producer: Stage::GraphicsPasses,
                consumer: Stage::Present,
                signal: Signal::GraphicsFinished,
                wait_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            },
        ])
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Signals `consumer` waits on, skipping producers that did not run this frame
    pub fn waits_for(&self, consumer: Stage, ran: &[Stage]) -> Vec<(Signal, vk::PipelineStageFlags)> {
        self.edges
            .iter()
            .filter(|edge| edge.consumer == consumer && ran.contains(&edge.producer))
            .map(|edge| (edge.signal, edge.wait_stage))
            .collect()
    }

    /// Signals raised when `producer` completes
    pub fn signals_of(&self, producer: Stage) -> Vec<Signal> {
        let mut signals: Vec<Signal> = Vec::new();
        for edge in self.edges.iter().filter(|edge| edge.producer == producer) {
            if !signals.contains(&edge.signal) {
                signals.push(edge.signal);
            }
        }
        signals
    }

    fn check_acyclic(&self) -> Result<(), DependencyError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            table: &DependencyTable,
            stage: Stage,
            marks: &mut HashMap<Stage, Mark>,
        ) -> Result<(), DependencyError> {
            match marks.get(&stage) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(DependencyError::Cycle(stage)),
                None => {}
            }
            marks.insert(stage, Mark::Visiting);
            for edge in table.edges.iter().filter(|edge| edge.producer == stage) {
                visit(table, edge.consumer, marks)?;
            }
            marks.insert(stage, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for edge in &self.edges {
            visit(self, edge.producer, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_table_is_valid() {
        let table = DependencyTable::frame().unwrap();
        assert_eq!(table.edges().len(), 3);
        assert_eq!(table.signals_of(Stage::GraphicsPasses), vec![Signal::GraphicsFinished]);
    }

    #[test]
    fn test_graphics_waits_on_compute_only_when_dispatched() {
        let table = DependencyTable::frame().unwrap();

        let with_compute = table.waits_for(
            Stage::GraphicsPasses,
            &[Stage::ImageAcquire, Stage::ParticleCompute],
        );
        assert_eq!(
            with_compute,
            vec![
                (Signal::ImageAcquired, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                (Signal::ComputeFinished, vk::PipelineStageFlags::VERTEX_INPUT),
            ]
        );

        let without = table.waits_for(Stage::GraphicsPasses, &[Stage::ImageAcquire]);
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].0, Signal::ImageAcquired);
    }

    #[test]
    fn test_present_waits_for_graphics() {
        let table = DependencyTable::frame().unwrap();
        let waits = table.waits_for(Stage::Present, &[Stage::GraphicsPasses]);
        assert_eq!(waits[0].0, Signal::GraphicsFinished);
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let edge = |producer| DependencyEdge {
            producer,
            consumer: Stage::Present,
            signal: Signal::GraphicsFinished,
            wait_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        };
        let result = DependencyTable::new(vec![edge(Stage::GraphicsPasses), edge(Stage::ParticleCompute)]);
        assert!(matches!(result, Err(DependencyError::DuplicateProducer { .. })));
    }

    #[test]
    fn test_cycle_rejected() {
        let result = DependencyTable::new(vec![
            DependencyEdge {
                producer: Stage::ParticleCompute,
                consumer: Stage::GraphicsPasses,
                signal: Signal::ComputeFinished,
                wait_stage: vk::PipelineStageFlags::VERTEX_INPUT,
            },
            DependencyEdge {
                producer: Stage::GraphicsPasses,
                consumer: Stage::ParticleCompute,
                signal: Signal::GraphicsFinished,
                wait_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            },
        ]);
        assert!(matches!(result, Err(DependencyError::Cycle(_))));
    }
}
