use crate::protocol::Header;
use bytes::Bytes;

/// A single chunk from a chunked Transfer-Encoding message body, per
/// RFC 9112 Section 7.1.
///
/// If [`is_last`](Chunk::is_last) returns true the data is empty and
/// [`trailers`](Chunk::trailers) may contain fields from the trailer section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
    extensions: Vec<(String, Option<String>)>,
    trailers: Vec<Header>,
}

impl Chunk {
    pub(crate) fn data_chunk(data: Bytes, extensions: Vec<(String, Option<String>)>) -> Self {
        Self { data, extensions, trailers: Vec::new() }
    }

    pub(crate) fn last(extensions: Vec<(String, Option<String>)>, trailers: Vec<Header>) -> Self {
        Self { data: Bytes::new(), extensions, trailers }
    }

    /// The chunk data bytes. Empty for the terminal (last) chunk.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Chunk extensions as ordered name/value pairs. Values are `None` for
    /// extensions without a value. Unrecognized extensions are preserved but
    /// never acted on, per RFC 9112 Section 7.1.1.
    pub fn extensions(&self) -> &[(String, Option<String>)] {
        &self.extensions
    }

    /// Trailer fields collected from the terminal chunk's trailer section.
    /// Empty for non-terminal chunks.
    pub fn trailers(&self) -> &[Header] {
        &self.trailers
    }

    /// Returns true if this is the terminal zero-length chunk.
    pub fn is_last(&self) -> bool {
        self.data.is_empty()
    }
}
