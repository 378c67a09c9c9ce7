//! Gzip and BZip2 compression transforms.

/// Gzip (DEFLATE) compression via `flate2`.
pub mod gzip {
    use crate::error::TransformError;
    use crate::pipeline::Stage;
    use crate::transform::ProducerWriter;
    use flate2::write::{GzDecoder, GzEncoder};
    use flate2::Compression;
    use std::io::Write;
    use std::sync::Arc;

    pub fn compress(data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder
            .finish()
            .map_err(|e| TransformError::compression(e.to_string()))
    }

    pub fn decompress(data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder
            .write_all(data)
            .map_err(|e| TransformError::compression(e.to_string()))?;
        decoder
            .finish()
            .map_err(|e| TransformError::compression(e.to_string()))
    }

    /// Streaming stage compressing everything that flows through it.
    #[must_use]
    pub fn compression_stage() -> Stage {
        Arc::new(|input, out| {
            let mut encoder = GzEncoder::new(ProducerWriter(out), Compression::default());
            while let Some(chunk) = input.read_chunk()? {
                encoder.write_all(&chunk)?;
            }
            encoder
                .finish()
                .map_err(|e| TransformError::compression(e.to_string()))?;
            Ok(())
        })
    }

    /// Streaming stage undoing [`compression_stage`].
    #[must_use]
    pub fn decompression_stage() -> Stage {
        Arc::new(|input, out| {
            let mut decoder = GzDecoder::new(ProducerWriter(out));
            while let Some(chunk) = input.read_chunk()? {
                decoder
                    .write_all(&chunk)
                    .map_err(|e| TransformError::compression(e.to_string()))?;
            }
            decoder
                .finish()
                .map_err(|e| TransformError::compression(e.to_string()))?;
            Ok(())
        })
    }
}

/// BZip2 compression via the `bzip2` crate.
pub mod bzip2 {
    use crate::error::TransformError;
    use crate::pipeline::Stage;
    use crate::transform::ProducerWriter;
    use ::bzip2::write::{BzDecoder, BzEncoder};
    use ::bzip2::Compression;
    use std::io::Write;
    use std::sync::Arc;

    pub fn compress(data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder
            .finish()
            .map_err(|e| TransformError::compression(e.to_string()))
    }

    pub fn decompress(data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut decoder = BzDecoder::new(Vec::new());
        decoder
            .write_all(data)
            .map_err(|e| TransformError::compression(e.to_string()))?;
        decoder
            .finish()
            .map_err(|e| TransformError::compression(e.to_string()))
    }

    /// Streaming stage compressing everything that flows through it.
    #[must_use]
    pub fn compression_stage() -> Stage {
        Arc::new(|input, out| {
            let mut encoder = BzEncoder::new(ProducerWriter(out), Compression::default());
            while let Some(chunk) = input.read_chunk()? {
                encoder.write_all(&chunk)?;
            }
            encoder
                .finish()
                .map_err(|e| TransformError::compression(e.to_string()))?;
            Ok(())
        })
    }

    /// Streaming stage undoing [`compression_stage`].
    #[must_use]
    pub fn decompression_stage() -> Stage {
        Arc::new(|input, out| {
            let mut decoder = BzDecoder::new(ProducerWriter(out));
            while let Some(chunk) = input.read_chunk()? {
                decoder
                    .write_all(&chunk)
                    .map_err(|e| TransformError::compression(e.to_string()))?;
            }
            decoder
                .finish()
                .map_err(|e| TransformError::compression(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::stream::stream_pair;
    use crate::pipeline::{ExecutionMode, Pipeline};
    use bytes::Bytes;

    const SAMPLE: &[u8] = b"OriginalDataForIntegrityCheck";

    #[test]
    fn gzip_round_trip() {
        let packed = gzip::compress(SAMPLE).unwrap();
        assert_eq!(gzip::decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn gzip_rejects_garbage() {
        assert!(gzip::decompress(b"definitely not a gzip stream").is_err());
    }

    #[test]
    fn bzip2_round_trip() {
        let packed = bzip2::compress(SAMPLE).unwrap();
        assert_eq!(bzip2::decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn gzip_stages_compose_to_identity() {
        let pipeline = Pipeline::new()
            .with_stage(gzip::compression_stage())
            .with_stage(gzip::decompression_stage());

        let (producer, consumer) = stream_pair();
        let payload: Vec<u8> = (0..u8::MAX).cycle().take(64 * 1024).collect();
        producer.write(payload.clone()).unwrap();
        producer.close();

        let out = pipeline.process(consumer, ExecutionMode::Async);
        assert_eq!(out.extract_until_eof().unwrap(), Bytes::from(payload));
    }

    #[test]
    fn compression_shrinks_repetitive_input() {
        let input = vec![b'A'; 100_000];
        let packed = gzip::compress(&input).unwrap();
        assert!(packed.len() < input.len() / 10);
    }
}
