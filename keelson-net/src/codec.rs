//! Frame bytes ↔ typed packets.
//!
//! The codec owns its own pipeline pair (identity by default) and an
//! application-supplied factory that rebuilds typed packets from decoded
//! opcode/payload pairs. One frame per [`Codec::decode`] call; batching
//! several frames into a single decode is rejected by construction since
//! the factory receives exactly one frame's payload.

use crate::error::{NetError, NetResult};
use crate::packet::Packet;
use crate::wire;
use keelson_core::buffer::fifo::Fifo;
use keelson_core::buffer::stream::{stream_pair, Consumer};
use keelson_core::pipeline::{ExecutionMode, Pipeline};
use std::sync::Arc;
use tracing::trace;

/// Application hook turning `(opcode, payload_size, payload)` into a packet.
pub type PacketFactory =
    Arc<dyn Fn(u16, usize, &Consumer) -> NetResult<Packet> + Send + Sync>;

/// Boundary component between frames and typed packets.
#[derive(Clone)]
pub struct Codec {
    in_pipeline: Pipeline,
    out_pipeline: Pipeline,
    factory: PacketFactory,
}

impl Codec {
    /// A codec with identity pipelines.
    #[must_use]
    pub fn new(factory: PacketFactory) -> Self {
        Self {
            in_pipeline: Pipeline::new(),
            out_pipeline: Pipeline::new(),
            factory,
        }
    }

    /// Replace the codec's pipeline pair.
    #[must_use]
    pub fn with_pipelines(mut self, in_pipeline: Pipeline, out_pipeline: Pipeline) -> Self {
        self.in_pipeline = in_pipeline;
        self.out_pipeline = out_pipeline;
        self
    }

    /// Decode one frame's `opcode | payload` stream into a typed packet.
    ///
    /// The opcode is taken raw off the front; the remainder runs through the
    /// codec's input pipeline synchronously before the factory sees it.
    pub fn decode(&self, consumer: &Consumer) -> NetResult<Packet> {
        let opcode_bytes = consumer.read(wire::OPCODE_LEN)?;
        if opcode_bytes.len() < wire::OPCODE_LEN {
            trace!("insufficient data to read opcode");
            return Err(NetError::packet("insufficient data to read opcode"));
        }
        let opcode = wire::decode_opcode(&opcode_bytes)
            .map_err(|e| NetError::packet(format!("failed to deserialize opcode: {e}")))?;

        let processed = self
            .in_pipeline
            .process(consumer.clone(), ExecutionMode::Sync);
        let payload_size = processed.available_bytes();

        (self.factory)(opcode, payload_size, &processed)
            .map_err(|e| NetError::packet(format!("opcode {opcode}: {e}")))
    }

    /// Serialize a packet into socket-ready bytes.
    ///
    /// The opcode never runs through a pipeline; peers must be able to
    /// decode it raw. The body runs through the codec's output pipeline
    /// synchronously.
    pub fn encode(&self, packet: &Packet) -> NetResult<Fifo> {
        let mut result = Fifo::new();
        result.write(wire::encode_opcode(packet.opcode()));

        let (producer, consumer) = stream_pair();
        producer.write(packet.body().clone())?;
        producer.close();

        let processed = self.out_pipeline.process(consumer, ExecutionMode::Sync);
        result.write(processed.extract_until_eof()?);
        Ok(result)
    }
}
