use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - Fast compression/decompression (default)
    #[default]
    Lz4,
    /// Zstandard - Better compression ratio
    Zstd,
}

/// Compression configuration for the remote tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Only payloads larger than this are compressed (bytes)
    pub min_payload_size: usize,
    pub algorithm: CompressionAlgorithm,
    /// Zstd compression level (1-22)
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_payload_size: 1024, // Don't compress <= 1KB
            algorithm: CompressionAlgorithm::Lz4,
            zstd_level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=22).contains(&self.zstd_level) {
            return Err(CacheError::Config(format!(
                "zstd_level must be within 1..=22, got {}",
                self.zstd_level
            )));
        }
        Ok(())
    }
}

/// Payload compressor with a size threshold
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Estimate if compression would be beneficial
    pub fn should_compress(&self, data: &[u8]) -> bool {
        self.config.enabled
            && self.config.algorithm != CompressionAlgorithm::None
            && data.len() > self.config.min_payload_size
    }

    /// Compress `data`, returning the algorithm actually applied.
    ///
    /// Small payloads (or a disabled compressor) come back untouched with
    /// [`CompressionAlgorithm::None`].
    pub fn compress(&self, data: &[u8]) -> Result<(CompressionAlgorithm, Vec<u8>)> {
        if !self.should_compress(data) {
            debug!("Skipping compression: size={} bytes", data.len());
            return Ok((CompressionAlgorithm::None, data.to_vec()));
        }

        let algo = self.config.algorithm;
        let compressed = match algo {
            CompressionAlgorithm::None => data.to_vec(),
            CompressionAlgorithm::Lz4 => self.compress_lz4(data)?,
            CompressionAlgorithm::Zstd => self.compress_zstd(data)?,
        };

        Ok((algo, compressed))
    }

    /// Decompress data produced with `algorithm`
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => self.decompress_lz4(data),
            CompressionAlgorithm::Zstd => self.decompress_zstd(data),
        }
    }

    fn compress_lz4(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(4) // Fast compression
            .build(Vec::new())?;

        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;

        debug!(
            "LZ4 compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    fn decompress_lz4(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    fn compress_zstd(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = zstd::encode_all(data, self.config.zstd_level)?;

        debug!(
            "Zstd compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    fn decompress_zstd(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(zstd::decode_all(data)?)
    }
}

/// Calculate compression ratio
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}
