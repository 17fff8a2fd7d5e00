use std::collections::{HashMap, HashSet};

/// Server configuration: buffer sizes, protocol limits, and the MIME tables
/// used by file-serving handlers.
///
/// Buffer sizes directly affect per-connection memory use. A larger input
/// buffer buys little; a larger output buffer improves throughput for big
/// responses. The defaults favor a development-server workload with few
/// concurrent connections.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the connection read buffer. Must be at least as large as the
    /// header field limits so a full field always fits.
    pub input_buffer_size: usize,
    /// Size of the connection write buffer.
    pub output_buffer_size: usize,
    /// Requests declaring a larger Content-Length are rejected with a 400.
    pub maximum_request_body_size: u64,
    /// Upper bound for a single chunk in a chunked request body.
    pub maximum_chunk_size: usize,
    /// Upper bound for a single WebSocket frame payload.
    pub maximum_ws_payload_size: u64,
    /// File extension (lowercase, without dot) to MIME type.
    pub mime_types: HashMap<String, String>,
    /// MIME types worth gzip-compressing.
    pub compressible_types: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mime_types = [
            ("html", "text/html"),
            ("htm", "text/html"),
            ("css", "text/css"),
            ("js", "application/javascript"),
            ("mjs", "application/javascript"),
            ("json", "application/json"),
            ("map", "application/json"),
            ("xml", "application/xml"),
            ("txt", "text/plain"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("gif", "image/gif"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("ico", "image/x-icon"),
            ("woff", "font/woff"),
            ("woff2", "font/woff2"),
            ("ttf", "font/ttf"),
            ("otf", "font/otf"),
            ("pdf", "application/pdf"),
            ("zip", "application/zip"),
            ("wasm", "application/wasm"),
            ("mp4", "video/mp4"),
            ("webm", "video/webm"),
            ("mp3", "audio/mpeg"),
            ("wav", "audio/wav"),
        ]
        .into_iter()
        .map(|(ext, mime)| (ext.to_owned(), mime.to_owned()))
        .collect();

        let compressible_types = [
            "text/html",
            "text/css",
            "text/plain",
            "application/javascript",
            "application/json",
            "application/xml",
            "image/svg+xml",
            "application/wasm",
            "font/woff",
            "font/woff2",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();

        Self {
            input_buffer_size: 8192,
            output_buffer_size: 65536,
            maximum_request_body_size: 10_000_000,
            maximum_chunk_size: 8 * 1024 * 1024,
            maximum_ws_payload_size: 16 * 1024 * 1024,
            mime_types,
            compressible_types,
        }
    }
}

impl Config {
    /// Guesses the MIME type from a file name's extension, falling back to
    /// `application/octet-stream`.
    pub fn guess_mime_type(&self, filename: &str) -> &str {
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => self
                .mime_types
                .get(&ext.to_ascii_lowercase())
                .map(String::as_str)
                .unwrap_or("application/octet-stream"),
            _ => "application/octet-stream",
        }
    }

    pub fn is_compressible(&self, mime_type: &str) -> bool {
        self.compressible_types.contains(mime_type)
    }
}
