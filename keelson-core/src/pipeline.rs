//! Ordered chains of byte-stream transforms.
//!
//! A [`Pipeline`] holds transform stages; each stage reads a [`Consumer`]
//! and writes its output through a [`Producer`]. Processing either runs the
//! whole chain on the caller's thread (`Sync`, fully materialized before
//! returning) or spawns one worker thread per stage (`Async`, stages stream
//! bytes through as they arrive). A failing stage posts the `Error` status
//! on its producer, which propagates to the terminal consumer.

use crate::buffer::stream::{stream_pair, Consumer, Producer};
use crate::error::TransformError;
use smallvec::SmallVec;
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// A single transform over byte streams.
///
/// The stage owns the input consumer and the output producer for its slot in
/// the chain; the pipeline closes or fails the producer based on the stage's
/// result, so stages only write payload bytes.
pub type Stage = Arc<dyn Fn(Consumer, Producer) -> Result<(), TransformError> + Send + Sync>;

/// How a pipeline run is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run every stage to completion on the caller's thread
    Sync,
    /// Run each stage on its own thread, streaming between stages
    Async,
}

/// An ordered list of transform stages. The empty pipeline is the identity.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: SmallVec<[Stage; 4]>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Append a stage to the end of the chain.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Builder-style [`Pipeline::push`].
    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.push(stage);
        self
    }

    /// Run `input` through the chain, returning the terminal consumer.
    ///
    /// An empty pipeline forwards `input` unchanged. In `Sync` mode the
    /// caller's thread drives every stage before this returns; `Async` mode
    /// returns immediately while worker threads stream the data through.
    #[must_use]
    pub fn process(&self, input: Consumer, mode: ExecutionMode) -> Consumer {
        if self.stages.is_empty() {
            return input;
        }

        let mut current = input;
        for stage in &self.stages {
            let (producer, consumer) = stream_pair();
            match mode {
                ExecutionMode::Sync => {
                    run_stage(stage, current, producer);
                }
                ExecutionMode::Async => {
                    let stage = Arc::clone(stage);
                    thread::spawn(move || run_stage(&stage, current, producer));
                }
            }
            current = consumer;
        }
        current
    }
}

fn run_stage(stage: &Stage, input: Consumer, producer: Producer) {
    let out = producer.clone();
    let result =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| stage(input, producer)));
    match result {
        Ok(Ok(())) => out.close(),
        Ok(Err(err)) => {
            warn!(error = %err, "pipeline stage failed");
            out.fail(err.to_string());
        }
        Err(_) => {
            warn!("pipeline stage panicked");
            out.fail("pipeline stage panicked");
        }
    }
}
