//! Response compression layer.

use tower_http::compression::CompressionLayer;

/// Gzip for JSON endpoints. Streaming routes are mounted outside it.
pub fn build_compression_layer() -> CompressionLayer {
    CompressionLayer::new().gzip(true)
}
