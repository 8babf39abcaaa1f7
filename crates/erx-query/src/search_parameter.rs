//! Search parameter descriptors.
//!
//! A search parameter (as opposed to a search argument) declares which URL
//! names an endpoint supports and how their values translate to a database
//! column. The feature set is restricted to what the prescription service
//! actually searches on.

/// Value type of a search parameter.
///
/// These follow the FHIR search parameter types only as far as the service
/// needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    /// Date values in plain date form (YYYY, YYYY-MM, YYYY-MM-DD) against a
    /// date column. Distinct from `Date` because rendering must not append a
    /// time of day.
    SqlDate,

    /// Date/time values with the prefixes eq, ne, gt, ge, lt, le, sa, eb
    /// (ap is unsupported). Stored values are treated as instants, not
    /// implicit ranges, so `sa` ≡ `gt` and `eb` ≡ `lt`.
    Date,

    /// Same operations as `Date`, but the target column holds time-prefixed
    /// uuids; date bounds are rewritten as lexicographic uuid comparisons.
    DateAsUuid,

    /// Exact string equality. Only KVNRs and TelematikIds are subject to
    /// text search, so no whitespace or UTF-8 interpretation is needed.
    String,

    /// Task status name, compared by its numeric representation.
    TaskStatus,

    /// Hashed identity value (KVNR/TelematikId); the search value is hashed
    /// before comparison against the indexed column.
    HashedIdentity,

    /// `naming_system|id` prescription id values, normalized and compared
    /// numerically.
    PrescriptionId,
}

/// Maps a raw search value to its database form before comparison
/// (e.g. uppercasing KVNRs for case-insensitive matching).
pub type SearchToDbValue = fn(&str) -> String;

/// One supported search parameter of an endpoint.
#[derive(Debug, Clone)]
pub struct SearchParameter {
    pub name_url: String,
    pub name_db: String,
    pub parameter_type: ParameterType,
    pub search_to_db_value: Option<SearchToDbValue>,
}

impl SearchParameter {
    /// Parameter whose URL name doubles as the column name.
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        let name = name.into();
        Self {
            name_db: name.clone(),
            name_url: name,
            parameter_type,
            search_to_db_value: None,
        }
    }

    /// Parameter with a distinct database column name.
    pub fn with_db_name(
        name_url: impl Into<String>,
        name_db: impl Into<String>,
        parameter_type: ParameterType,
    ) -> Self {
        Self {
            name_url: name_url.into(),
            name_db: name_db.into(),
            parameter_type,
            search_to_db_value: None,
        }
    }

    /// Attach a value mapper applied before hashing/comparison.
    pub fn with_value_mapper(mut self, mapper: SearchToDbValue) -> Self {
        self.search_to_db_value = Some(mapper);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uppercase(value: &str) -> String {
        value.to_uppercase()
    }

    #[test]
    fn test_url_name_defaults_to_db_name() {
        let param = SearchParameter::new("sent", ParameterType::DateAsUuid);
        assert_eq!(param.name_url, "sent");
        assert_eq!(param.name_db, "sent");
    }

    #[test]
    fn test_distinct_db_name() {
        let param =
            SearchParameter::with_db_name("authored-on", "authored_on", ParameterType::Date);
        assert_eq!(param.name_url, "authored-on");
        assert_eq!(param.name_db, "authored_on");
    }

    #[test]
    fn test_value_mapper() {
        let param = SearchParameter::new("patient", ParameterType::HashedIdentity)
            .with_value_mapper(uppercase);
        assert_eq!((param.search_to_db_value.unwrap())("x123456789"), "X123456789");
    }
}
