//! # URL Query Translation
//!
//! Parses FHIR-style search, sort and paging parameters from a flat list of
//! query-string pairs into a typed [`UrlArguments`] object, and renders that
//! object into SQL WHERE/ORDER/LIMIT fragments that respect hashed-column
//! semantics.
//!
//! The set of parameters an endpoint supports is an allow-list of
//! [`SearchParameter`] descriptors handed to [`UrlArguments::new`]; unknown
//! parameters are silently ignored per FHIR rules. Identity search values
//! never reach SQL in plaintext — they are hashed through the
//! [`erx_types::IdentityHasher`] seam first.

pub mod paging;
pub mod search_argument;
pub mod search_parameter;
pub mod sort_argument;
pub mod time_period;
pub mod url_arguments;

pub use paging::PagingArgument;
pub use search_argument::{ArgumentValues, Prefix, SearchArgument};
pub use search_parameter::{ParameterType, SearchParameter};
pub use sort_argument::{SortArgument, SortOrder};
pub use time_period::TimePeriod;
pub use url_arguments::{LinkMode, LinkType, UrlArguments};
