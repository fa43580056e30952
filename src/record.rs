//! In-memory record value type.

/// One record: a topic-assigned id plus an opaque payload.
///
/// Ids are assigned by the owning log's topic summary, strictly increasing
/// per topic, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: u32,
    payload: Vec<u8>,
}

impl Record {
    /// Construct a record with an already-assigned id.
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// The record's topic-scoped id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The opaque payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the record, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
