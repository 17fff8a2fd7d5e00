/// A single header field as received from the wire.
///
/// The name is kept in its original casing for callers that iterate headers
/// in order; the lowercased form is cached for by-name lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    lower: String,
    value: String,
}

impl Header {
    pub fn new(name: String, value: String) -> Self {
        let lower = name.to_ascii_lowercase();
        Self { name, lower, value }
    }

    /// The field name exactly as received.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field name lowercased.
    pub fn lowercase_name(&self) -> &str {
        &self.lower
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}
