//! The `Statement` data model (§3): what the session hands to a connection.

use crate::types::Consistency;
use bytes::Bytes;

/// A bound value slot: `None` encodes the wire's length `-1` (unset/null).
pub type BoundValue = Option<Bytes>;

/// A query, prepared or not, with everything a connection needs to frame it.
#[derive(Clone, Debug)]
pub struct Statement {
    pub text: String,
    pub consistency: Consistency,
    pub prepared_id: Option<Bytes>,
    pub values: Vec<BoundValue>,
    pub partition_key_indices: Vec<u16>,
    pub partition_key_count: usize,
    /// Opaque handle over the trailing RESULT metadata (§3); see
    /// [`crate::result::ResultBody::Prepared::result_metadata`].
    pub result_metadata: Option<Bytes>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub compression: bool,
    pub tracing: bool,
}

impl Statement {
    /// A fresh unprepared statement with the session's default consistency.
    pub fn new(text: impl Into<String>, consistency: Consistency) -> Self {
        Self {
            text: text.into(),
            consistency,
            prepared_id: None,
            values: Vec::new(),
            partition_key_indices: Vec::new(),
            partition_key_count: 0,
            result_metadata: None,
            page_size: None,
            paging_state: None,
            compression: false,
            tracing: false,
        }
    }

    pub fn bind(mut self, values: Vec<BoundValue>) -> Self {
        self.values = values;
        self
    }

    pub fn with_paging_state(mut self, paging_state: Option<Bytes>) -> Self {
        self.paging_state = paging_state;
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// The partition key, as the ordered component slices named by
    /// `partition_key_indices`, suitable for [`crate::token::token_of`].
    /// Returns `None` if any named index has no bound value (null partition
    /// key columns cannot be routed).
    pub fn partition_key<'a>(&'a self) -> Option<Vec<&'a [u8]>> {
        if self.partition_key_indices.is_empty() {
            return None;
        }
        self.partition_key_indices
            .iter()
            .map(|&idx| self.values.get(idx as usize)?.as_deref())
            .collect()
    }
}
