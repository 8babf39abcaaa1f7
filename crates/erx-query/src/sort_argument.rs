//! Sort arguments extracted from `_sort=a,-b`.
//!
//! Sorting is only supported on searchable parameters; a leading `-`
//! inverts the direction, which defaults to increasing.

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Increasing,
    Decreasing,
}

/// One sort argument. The database column name is filled in after the
/// parameter lookup.
#[derive(Debug, Clone)]
pub struct SortArgument {
    pub name_url: String,
    pub name_db: String,
    pub order: SortOrder,
}

pub const SORT_KEY: &str = "_sort";
pub const ARGUMENT_SEPARATOR: char = ',';
const ORDER_KEY: char = '-';

impl SortArgument {
    /// Parse a single `_sort` component; must not be empty.
    pub fn parse(name: &str) -> Self {
        let (name_url, order) = match name.strip_prefix(ORDER_KEY) {
            Some(rest) => (rest.to_string(), SortOrder::Decreasing),
            None => (name.to_string(), SortOrder::Increasing),
        };
        Self {
            name_db: name_url.clone(),
            name_url,
            order,
        }
    }

    /// Render for bundle links: `-name` when decreasing.
    pub fn link_string(&self) -> String {
        match self.order {
            SortOrder::Increasing => self.name_url.clone(),
            SortOrder::Decreasing => format!("-{}", self.name_url),
        }
    }
}
