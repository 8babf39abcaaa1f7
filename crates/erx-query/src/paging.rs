//! Offset and id paging state.

use chrono::{DateTime, Utc};

use erx_types::{ErxError, ErxResult};

pub const COUNT_KEY: &str = "_count";
pub const OFFSET_KEY: &str = "__offset";
pub const ID_KEY: &str = "_id";

/// Page size applied when the client does not send `_count`.
pub const DEFAULT_COUNT: usize = 50;

/// Paging state of one request.
#[derive(Debug, Clone)]
pub struct PagingArgument {
    count: usize,
    offset: usize,
    explicitly_set: bool,
    total_search_matches: usize,
    /// Sent-times of the first and last entry of the current result page,
    /// set by the caller for id-based link generation.
    entry_timestamp_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Default for PagingArgument {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            offset: 0,
            explicitly_set: false,
            total_search_matches: 0,
            entry_timestamp_range: None,
        }
    }
}

impl PagingArgument {
    pub fn set_count(&mut self, value: &str) -> ErxResult<()> {
        let count: usize = value
            .parse()
            .map_err(|_| ErxError::bad_request(format!("invalid _count value: {value}")))?;
        if count == 0 {
            return Err(ErxError::bad_request("_count must be positive"));
        }
        self.count = count;
        self.explicitly_set = true;
        Ok(())
    }

    pub fn set_offset(&mut self, value: &str) -> ErxResult<()> {
        self.offset = value
            .parse()
            .map_err(|_| ErxError::bad_request(format!("invalid __offset value: {value}")))?;
        self.explicitly_set = true;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the client asked for paging explicitly.
    pub fn is_set(&self) -> bool {
        self.explicitly_set
    }

    pub fn has_previous_page(&self) -> bool {
        self.offset > 0
    }

    pub fn has_next_page(&self, total_search_matches: usize) -> bool {
        self.offset + self.count < total_search_matches
    }

    pub fn set_total_search_matches(&mut self, total: usize) {
        self.total_search_matches = total;
    }

    pub fn total_search_matches(&self) -> usize {
        self.total_search_matches
    }

    /// Offset of the last page under the current page size.
    pub fn offset_last_page(&self) -> usize {
        if self.total_search_matches == 0 {
            return 0;
        }
        (self.total_search_matches - 1) / self.count * self.count
    }

    pub fn set_entry_timestamp_range(&mut self, first: DateTime<Utc>, last: DateTime<Utc>) {
        self.entry_timestamp_range = Some((first, last));
    }

    pub fn entry_timestamp_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.entry_timestamp_range
    }
}
