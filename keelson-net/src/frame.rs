//! On-wire frame: opcode, payload size, payload.
//!
//! Wire layout (integers little-endian through [`crate::wire`]):
//!
//! ```text
//! +--------+------------------+----------------------+
//! | opcode |   payload_size   |      payload[0..N]   |
//! | 2 B    |       8 B        |       N bytes        |
//! +--------+------------------+----------------------+
//! ```
//!
//! Payloads of at least [`Packet::PROCESS_THRESHOLD`] bytes run through the
//! connection pipeline in both directions; the opcode and size fields are
//! always raw. The reader performs three size-exact receives, so from its
//! perspective a frame is never partially on the wire.

use crate::error::NetResult;
use crate::packet::Packet;
use crate::sock::client::ClientSock;
use crate::wire;
use bytes::Bytes;
use keelson_core::buffer::stream::{stream_pair, Consumer};
use keelson_core::pipeline::{ExecutionMode, Pipeline};
use tracing::error;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    opcode: u16,
    payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(opcode: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// The empty frame returned when reading fails; callers validate it
    /// through the codec.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn opcode(&self) -> u16 {
        self.opcode
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Build a frame from a packet, dropping the opcode prefix from the
    /// serialized form (the frame carries it separately).
    #[must_use]
    pub fn from_packet(packet: &Packet) -> Self {
        let mut raw = packet.serialize();
        raw.skip(wire::OPCODE_LEN);
        Self::new(packet.opcode(), raw.extract())
    }

    /// Read one frame off a socket.
    ///
    /// Three size-exact receives: opcode, payload size, payload. Payloads at
    /// or above the process threshold are run through `in_pipeline`
    /// asynchronously and replaced by the processed bytes. Any failure is
    /// logged and the empty frame is returned for the codec to reject.
    #[must_use]
    pub fn read_from(client: &ClientSock, in_pipeline: &Pipeline) -> Self {
        match Self::try_read_from(client, in_pipeline) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to read frame from socket");
                Self::empty()
            }
        }
    }

    fn try_read_from(client: &ClientSock, in_pipeline: &Pipeline) -> NetResult<Self> {
        let mut opcode_buf = client.receive(wire::OPCODE_LEN)?;
        let opcode = wire::decode_opcode(&opcode_buf.extract())?;

        let mut size_buf = client.receive(wire::SIZE_LEN)?;
        let payload_size = wire::decode_size(&size_buf.extract())? as usize;

        if payload_size == 0 {
            return Ok(Self::new(opcode, Bytes::new()));
        }

        let mut payload = client.receive(payload_size)?.extract();

        if payload.len() >= Packet::PROCESS_THRESHOLD {
            payload = run_pipeline(in_pipeline, payload)?;
        }

        Ok(Self::new(opcode, payload))
    }

    /// Assemble the wire form: raw opcode, processed-payload size, payload.
    ///
    /// Payloads at or above the process threshold are run through
    /// `out_pipeline` first; the size field always describes the bytes that
    /// actually follow it.
    pub fn to_wire(&self, out_pipeline: &Pipeline) -> NetResult<Consumer> {
        let payload = if self.payload.len() >= Packet::PROCESS_THRESHOLD {
            run_pipeline(out_pipeline, self.payload.clone())?
        } else {
            self.payload.clone()
        };

        let (producer, consumer) = stream_pair();
        producer.write(wire::encode_opcode(self.opcode))?;
        producer.write(wire::encode_size(payload.len() as u64))?;
        if !payload.is_empty() {
            producer.write(payload)?;
        }
        producer.close();
        Ok(consumer)
    }

    /// Expose the frame as a `opcode | payload` stream for the codec.
    #[must_use]
    pub fn to_consumer(&self) -> Consumer {
        let (producer, consumer) = stream_pair();
        let _ = producer.write(wire::encode_opcode(self.opcode));
        if !self.payload.is_empty() {
            let _ = producer.write(self.payload.clone());
        }
        producer.close();
        consumer
    }
}

fn run_pipeline(pipeline: &Pipeline, payload: Bytes) -> NetResult<Bytes> {
    let (producer, consumer) = stream_pair();
    producer.write(payload)?;
    producer.close();
    let processed = pipeline.process(consumer, ExecutionMode::Async);
    Ok(processed.extract_until_eof()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_core::error::TransformError;
    use std::sync::Arc;

    fn doubling_pipeline() -> Pipeline {
        Pipeline::new().with_stage(Arc::new(|input, out| {
            while let Some(chunk) = input.read_chunk()? {
                out.write(chunk.clone())?;
                out.write(chunk)?;
            }
            Ok(())
        }))
    }

    fn failing_pipeline() -> Pipeline {
        Pipeline::new().with_stage(Arc::new(|input, _out| {
            let _ = input.extract_until_eof()?;
            Err(TransformError::compression("stage down"))
        }))
    }

    #[test]
    fn from_packet_strips_opcode_prefix() {
        let packet = Packet::new(0x0001, Bytes::from_static(b"Hello World!"));
        let frame = Frame::from_packet(&packet);
        assert_eq!(frame.opcode(), 0x0001);
        assert_eq!(frame.payload(), &Bytes::from_static(b"Hello World!"));
    }

    #[test]
    fn wire_layout_for_identity_pipeline() {
        let frame = Frame::new(0x0001, Bytes::from_static(b"Hello World!"));
        let consumer = frame.to_wire(&Pipeline::new()).unwrap();
        let bytes = consumer.extract_until_eof().unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x00]);
        assert_eq!(&bytes[2..10], &12u64.to_le_bytes());
        assert_eq!(&bytes[10..], b"Hello World!");
    }

    #[test]
    fn zero_length_payload_has_no_payload_bytes() {
        let frame = Frame::new(9, Bytes::new());
        let consumer = frame.to_wire(&Pipeline::new()).unwrap();
        let bytes = consumer.extract_until_eof().unwrap();
        assert_eq!(bytes.len(), wire::OPCODE_LEN + wire::SIZE_LEN);
        assert_eq!(&bytes[2..10], &0u64.to_le_bytes());
    }

    #[test]
    fn payload_below_threshold_skips_pipeline() {
        let payload = vec![b'x'; Packet::PROCESS_THRESHOLD - 1];
        let frame = Frame::new(1, payload.clone());
        let consumer = frame.to_wire(&doubling_pipeline()).unwrap();
        let bytes = consumer.extract_until_eof().unwrap();
        // Untouched by the doubling stage.
        assert_eq!(bytes.len(), 10 + payload.len());
    }

    #[test]
    fn payload_at_threshold_runs_pipeline() {
        let payload = vec![b'x'; Packet::PROCESS_THRESHOLD];
        let frame = Frame::new(1, payload.clone());
        let consumer = frame.to_wire(&doubling_pipeline()).unwrap();
        let bytes = consumer.extract_until_eof().unwrap();
        assert_eq!(bytes.len(), 10 + payload.len() * 2);
        assert_eq!(&bytes[2..10], &(payload.len() as u64 * 2).to_le_bytes());
    }

    #[test]
    fn pipeline_failure_surfaces_on_output() {
        let payload = vec![b'x'; Packet::PROCESS_THRESHOLD];
        let frame = Frame::new(1, payload);
        assert!(frame.to_wire(&failing_pipeline()).is_err());
    }

    #[test]
    fn to_consumer_round_trips_opcode_and_payload() {
        let frame = Frame::new(0x0203, Bytes::from_static(b"body"));
        let bytes = frame.to_consumer().extract_until_eof().unwrap();
        assert_eq!(wire::decode_opcode(&bytes).unwrap(), 0x0203);
        assert_eq!(&bytes[2..], b"body");
    }
}
