//! Parsed search arguments.
//!
//! A search argument is one `name=value[,value]*` pair after validation:
//! prefix split off, values converted to their typed database form, original
//! text retained for link generation.

use erx_types::{HashedId, PrescriptionId, TaskStatus};

use crate::search_parameter::ParameterType;
use crate::time_period::TimePeriod;

/// FHIR comparison prefix of a search value. `ap` is unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// starts-after; equivalent to `Gt` for instant-valued columns
    Sa,
    /// ends-before; equivalent to `Lt` for instant-valued columns
    Eb,
}

impl Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Prefix::Eq => "eq",
            Prefix::Ne => "ne",
            Prefix::Gt => "gt",
            Prefix::Ge => "ge",
            Prefix::Lt => "lt",
            Prefix::Le => "le",
            Prefix::Sa => "sa",
            Prefix::Eb => "eb",
        }
    }

    fn from_two_letters(letters: &str) -> Option<Self> {
        match letters {
            "eq" => Some(Prefix::Eq),
            "ne" => Some(Prefix::Ne),
            "gt" => Some(Prefix::Gt),
            "ge" => Some(Prefix::Ge),
            "lt" => Some(Prefix::Lt),
            "le" => Some(Prefix::Le),
            "sa" => Some(Prefix::Sa),
            "eb" => Some(Prefix::Eb),
            _ => None,
        }
    }
}

/// Typed values of one search argument.
#[derive(Debug, Clone)]
pub enum ArgumentValues {
    /// `None` entries match SQL NULL (the literal search value `"NULL"`).
    Dates(Vec<Option<TimePeriod>>),
    Strings(Vec<String>),
    Identities(Vec<HashedId>),
    Statuses(Vec<TaskStatus>),
    PrescriptionIds(Vec<PrescriptionId>),
}

impl ArgumentValues {
    pub fn len(&self) -> usize {
        match self {
            ArgumentValues::Dates(values) => values.len(),
            ArgumentValues::Strings(values) => values.len(),
            ArgumentValues::Identities(values) => values.len(),
            ArgumentValues::Statuses(values) => values.len(),
            ArgumentValues::PrescriptionIds(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One validated search argument.
#[derive(Debug, Clone)]
pub struct SearchArgument {
    pub prefix: Prefix,
    /// Database column the comparison targets.
    pub name_db: String,
    /// URL name as supplied by the client, used in links.
    pub original_name: String,
    pub parameter_type: ParameterType,
    pub values: ArgumentValues,
    /// Raw values as supplied (prefix included), used in links.
    pub original_values: Vec<String>,
}

impl SearchArgument {
    /// Split an optional two-letter prefix off a date search value.
    /// Values without a recognized prefix compare with `eq`.
    pub fn split_prefix_from_values(raw: &str) -> (Prefix, &str) {
        if raw.len() >= 2 {
            if let Some(prefix) = Prefix::from_two_letters(&raw[0..2]) {
                return (prefix, &raw[2..]);
            }
        }
        (Prefix::Eq, raw)
    }

    pub fn values_count(&self) -> usize {
        self.values.len()
    }

    /// Render `name=rawvalue[,rawvalue]*` for bundle links.
    pub fn append_link_string(&self, out: &mut String) {
        out.push_str(&self.original_name);
        out.push('=');
        out.push_str(&self.original_values.join(","));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_split() {
        let (prefix, rest) = SearchArgument::split_prefix_from_values("ge2024-02-01");
        assert_eq!(prefix, Prefix::Ge);
        assert_eq!(rest, "2024-02-01");
    }

    #[test]
    fn test_missing_prefix_defaults_to_eq() {
        let (prefix, rest) = SearchArgument::split_prefix_from_values("2024-02-01");
        assert_eq!(prefix, Prefix::Eq);
        assert_eq!(rest, "2024-02-01");
    }

    #[test]
    fn test_short_value_keeps_eq() {
        let (prefix, rest) = SearchArgument::split_prefix_from_values("x");
        assert_eq!(prefix, Prefix::Eq);
        assert_eq!(rest, "x");
    }

    #[test]
    fn test_link_rendering_keeps_original_text() {
        let argument = SearchArgument {
            prefix: Prefix::Ge,
            name_db: "authored_on".to_string(),
            original_name: "authored-on".to_string(),
            parameter_type: ParameterType::Date,
            values: ArgumentValues::Dates(vec![None]),
            original_values: vec!["ge2024-02-01".to_string(), "lt2024-03-01".to_string()],
        };
        let mut out = String::new();
        argument.append_link_string(&mut out);
        assert_eq!(out, "authored-on=ge2024-02-01,lt2024-03-01");
    }
}
