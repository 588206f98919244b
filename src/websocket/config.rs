//! Frame decoder configuration.

use crate::pipeline::CodecError;

/// Immutable configuration for a server-side frame decoder.
///
/// Built via [`WebSocketDecoderConfig::builder`]; the defaults match a
/// conservative server: 64 KiB frames, no extensions, masked client frames
/// required.
#[derive(Debug, Clone)]
pub struct WebSocketDecoderConfig {
    max_frame_payload_length: usize,
    allow_extensions: bool,
    allow_mask_mismatch: bool,
    expect_masked_frames: bool,
}

impl Default for WebSocketDecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_payload_length: 65536,
            allow_extensions: false,
            allow_mask_mismatch: false,
            expect_masked_frames: true,
        }
    }
}

impl WebSocketDecoderConfig {
    pub fn builder() -> WebSocketDecoderConfigBuilder {
        WebSocketDecoderConfigBuilder::default()
    }

    /// Maximum payload length a single frame may carry.
    pub fn max_frame_payload_length(&self) -> usize {
        self.max_frame_payload_length
    }

    /// Whether frames with reserved bits are tolerated (required for
    /// permessage-deflate).
    pub fn allow_extensions(&self) -> bool {
        self.allow_extensions
    }

    /// Whether frames violating the masking expectation are tolerated.
    pub fn allow_mask_mismatch(&self) -> bool {
        self.allow_mask_mismatch
    }

    /// Whether inbound frames must be masked (true for servers).
    pub fn expect_masked_frames(&self) -> bool {
        self.expect_masked_frames
    }
}

/// Builder for [`WebSocketDecoderConfig`].
#[derive(Debug, Default)]
pub struct WebSocketDecoderConfigBuilder {
    config: WebSocketDecoderConfig,
}

impl WebSocketDecoderConfigBuilder {
    pub fn max_frame_payload_length(mut self, length: usize) -> Self {
        self.config.max_frame_payload_length = length;
        self
    }

    pub fn allow_extensions(mut self, allow: bool) -> Self {
        self.config.allow_extensions = allow;
        self
    }

    pub fn allow_mask_mismatch(mut self, allow: bool) -> Self {
        self.config.allow_mask_mismatch = allow;
        self
    }

    pub fn expect_masked_frames(mut self, expect: bool) -> Self {
        self.config.expect_masked_frames = expect;
        self
    }

    pub fn build(self) -> Result<WebSocketDecoderConfig, CodecError> {
        if self.config.max_frame_payload_length == 0 {
            return Err(CodecError::invalid_argument("max frame payload length must be positive"));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_server() {
        let config = WebSocketDecoderConfig::default();
        assert_eq!(config.max_frame_payload_length(), 65536);
        assert!(!config.allow_extensions());
        assert!(!config.allow_mask_mismatch());
        assert!(config.expect_masked_frames());
    }

    #[test]
    fn builder_validates_payload_length() {
        let config = WebSocketDecoderConfig::builder()
            .max_frame_payload_length(1 << 20)
            .allow_extensions(true)
            .build()
            .unwrap();
        assert_eq!(config.max_frame_payload_length(), 1 << 20);
        assert!(config.allow_extensions());

        assert!(WebSocketDecoderConfig::builder().max_frame_payload_length(0).build().is_err());
    }
}
