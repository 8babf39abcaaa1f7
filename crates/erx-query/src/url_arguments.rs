//! The URL-arguments object: allow-list construction, parsing, SQL rendering
//! and bundle link generation.
//!
//! Construction takes the endpoint's supported search parameters (and
//! optionally a default sort). `parse` populates the object from raw query
//! pairs; rendering is a pure function over the populated state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use erx_types::{
    ErxError, ErxResult, IdentityHasher, PrescriptionId, Suuid, TaskStatus,
    PRESCRIPTION_ID_NAMING_SYSTEM,
};

use crate::paging::{PagingArgument, COUNT_KEY, ID_KEY, OFFSET_KEY};
use crate::search_argument::{ArgumentValues, Prefix, SearchArgument};
use crate::search_parameter::{ParameterType, SearchParameter};
use crate::sort_argument::{SortArgument, ARGUMENT_SEPARATOR, SORT_KEY};
use crate::time_period::TimePeriod;

pub const REV_INCLUDE_KEY: &str = "_revinclude";
pub const REV_INCLUDE_AUDIT_EVENT: &str = "AuditEvent:entity.what";

/// Bundle link kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    SelfLink,
    Prev,
    Next,
    First,
    Last,
}

/// How prev/next links bracket the result: by offset or by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Offset,
    Id,
}

/// Parsed search/sort/paging state of one request.
pub struct UrlArguments {
    supported_parameters: Vec<SearchParameter>,
    search_arguments: Vec<SearchArgument>,
    /// Predicates that join the WHERE fragment but never appear in links
    /// (id-based paging brackets).
    hidden_search_arguments: Vec<SearchArgument>,
    sort_arguments: Vec<SortArgument>,
    paging_argument: PagingArgument,
    paging_disabled: bool,
    default_sort_argument: Option<String>,
    reverse_include_audit_events: bool,
}

impl UrlArguments {
    pub fn new(search_parameters: Vec<SearchParameter>) -> Self {
        Self {
            supported_parameters: search_parameters,
            search_arguments: Vec::new(),
            hidden_search_arguments: Vec::new(),
            sort_arguments: Vec::new(),
            paging_argument: PagingArgument::default(),
            paging_disabled: false,
            default_sort_argument: None,
            reverse_include_audit_events: false,
        }
    }

    /// Construct with a sort applied whenever the client sends none.
    pub fn with_default_sort(
        search_parameters: Vec<SearchParameter>,
        default_sort: impl Into<String>,
    ) -> Self {
        let mut arguments = Self::new(search_parameters);
        arguments.default_sort_argument = Some(default_sort.into());
        arguments
    }

    // ----- parsing ----------------------------------------------------------

    /// Populate from raw query pairs.
    pub fn parse(
        &mut self,
        query_parameters: &[(String, String)],
        hasher: &dyn IdentityHasher,
    ) -> ErxResult<()> {
        let mut has_offset = false;
        let mut has_id = false;
        for (key, value) in query_parameters {
            if key.is_empty() {
                return Err(ErxError::bad_request("empty arguments are not permitted"));
            }
            if key == SORT_KEY {
                self.add_sort_arguments(value);
            } else if key == COUNT_KEY {
                self.paging_argument.set_count(value)?;
            } else if key == OFFSET_KEY {
                self.paging_argument.set_offset(value)?;
                has_offset = true;
            } else if key == ID_KEY {
                // paging via ids becomes a hidden search argument so that it
                // does not end up in the bundle links again
                self.add_id_paging_argument(value)?;
                has_id = true;
            } else if key == REV_INCLUDE_KEY && value == REV_INCLUDE_AUDIT_EVENT {
                self.reverse_include_audit_events = true;
            } else {
                self.add_search_arguments(key, value, hasher)?;
            }
        }
        if has_offset && has_id {
            return Err(ErxError::bad_request(
                "Cannot combine _id and __offset paging arguments",
            ));
        }
        if self.sort_arguments.is_empty() {
            if let Some(default_sort) = self.default_sort_argument.clone() {
                self.add_sort_arguments(&default_sort);
            }
        }
        Ok(())
    }

    fn add_id_paging_argument(&mut self, raw_value: &str) -> ErxResult<()> {
        let (prefix, value) = SearchArgument::split_prefix_from_values(raw_value);
        let suuid = Suuid::parse(value)?;
        let period = TimePeriod::from_suuid_timestamp(suuid.timestamp());
        self.add_hidden_search_argument(SearchArgument {
            prefix,
            name_db: "id".to_string(),
            original_name: ID_KEY.to_string(),
            parameter_type: ParameterType::DateAsUuid,
            values: ArgumentValues::Dates(vec![Some(period)]),
            original_values: vec![String::new()],
        });
        Ok(())
    }

    /// Values of one parameter split at `,`; empty parts are an error.
    fn split_checked_args(raw_values: &str) -> ErxResult<Vec<String>> {
        let parts: Vec<String> = raw_values.split(',').map(str::to_string).collect();
        for part in &parts {
            if part.is_empty() {
                return Err(ErxError::bad_request("invalid value"));
            }
        }
        Ok(parts)
    }

    fn add_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        hasher: &dyn IdentityHasher,
    ) -> ErxResult<()> {
        let Some(parameter) = self.find_parameter(name).cloned() else {
            // unsupported argument names are ignored per FHIR specification
            tracing::trace!("ignoring unsupported parameter {name}={raw_values}");
            return Ok(());
        };
        match parameter.parameter_type {
            ParameterType::SqlDate | ParameterType::Date | ParameterType::DateAsUuid => {
                self.add_date_search_arguments(name, raw_values, &parameter)
            }
            ParameterType::String => self.add_string_search_arguments(name, raw_values, &parameter),
            ParameterType::HashedIdentity => {
                self.add_identity_search_arguments(name, raw_values, &parameter, hasher)
            }
            ParameterType::TaskStatus => {
                self.add_task_status_search_arguments(name, raw_values, &parameter)
            }
            ParameterType::PrescriptionId => {
                self.add_prescription_id_search_arguments(name, raw_values, &parameter)
            }
        }
    }

    fn add_date_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        parameter: &SearchParameter,
    ) -> ErxResult<()> {
        let (prefix, values) = SearchArgument::split_prefix_from_values(raw_values);
        if values.is_empty() {
            return Ok(());
        }
        let raw_list = Self::split_checked_args(values)?;
        let mut periods = Vec::with_capacity(raw_list.len());
        for raw_value in &raw_list {
            if raw_value == "NULL" {
                periods.push(None);
            } else if parameter.parameter_type == ParameterType::SqlDate {
                periods.push(Some(TimePeriod::from_sql_date(raw_value)?));
            } else {
                periods.push(Some(TimePeriod::from_fhir_search_date(raw_value)?));
            }
        }
        // the original values carry the prefix for the first entry only,
        // exactly as the client sent them
        let mut original_values = raw_list;
        if prefix != Prefix::Eq || raw_values.starts_with(prefix.as_str()) {
            if let Some(first) = original_values.first_mut() {
                *first = format!("{}{}", prefix.as_str(), first);
            }
        }
        self.search_arguments.push(SearchArgument {
            prefix,
            name_db: parameter.name_db.clone(),
            original_name: name.to_string(),
            parameter_type: parameter.parameter_type,
            values: ArgumentValues::Dates(periods),
            original_values,
        });
        Ok(())
    }

    fn add_string_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        parameter: &SearchParameter,
    ) -> ErxResult<()> {
        if raw_values.is_empty() {
            return Ok(());
        }
        let raw_list = Self::split_checked_args(raw_values)?;
        let mut db_values = Vec::with_capacity(raw_list.len());
        for raw_value in &raw_list {
            db_values.push(match parameter.search_to_db_value {
                Some(mapper) => mapper(raw_value),
                None => raw_value.clone(),
            });
        }
        self.search_arguments.push(SearchArgument {
            prefix: Prefix::Eq,
            name_db: parameter.name_db.clone(),
            original_name: name.to_string(),
            parameter_type: ParameterType::String,
            values: ArgumentValues::Strings(db_values),
            original_values: raw_list,
        });
        Ok(())
    }

    fn add_identity_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        parameter: &SearchParameter,
        hasher: &dyn IdentityHasher,
    ) -> ErxResult<()> {
        if raw_values.is_empty() {
            return Ok(());
        }
        let raw_list = Self::split_checked_args(raw_values)?;
        let mut hashed = Vec::with_capacity(raw_list.len());
        for raw_value in &raw_list {
            let db_value = match parameter.search_to_db_value {
                Some(mapper) => mapper(raw_value),
                None => raw_value.clone(),
            };
            hashed.push(hasher.hash_identity(&db_value)?);
        }
        self.search_arguments.push(SearchArgument {
            prefix: Prefix::Eq,
            name_db: parameter.name_db.clone(),
            original_name: name.to_string(),
            parameter_type: ParameterType::HashedIdentity,
            values: ArgumentValues::Identities(hashed),
            original_values: raw_list,
        });
        Ok(())
    }

    fn add_task_status_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        parameter: &SearchParameter,
    ) -> ErxResult<()> {
        if raw_values.is_empty() {
            return Ok(());
        }
        let raw_list = Self::split_checked_args(raw_values)?;
        let mut statuses = Vec::with_capacity(raw_list.len());
        for raw_value in &raw_list {
            statuses.push(TaskStatus::from_name(raw_value)?);
        }
        self.search_arguments.push(SearchArgument {
            prefix: Prefix::Eq,
            name_db: parameter.name_db.clone(),
            original_name: name.to_string(),
            parameter_type: ParameterType::TaskStatus,
            values: ArgumentValues::Statuses(statuses),
            original_values: raw_list,
        });
        Ok(())
    }

    fn add_prescription_id_search_arguments(
        &mut self,
        name: &str,
        raw_values: &str,
        parameter: &SearchParameter,
    ) -> ErxResult<()> {
        if raw_values.is_empty() {
            return Ok(());
        }
        let raw_list = Self::split_checked_args(raw_values)?;
        let mut ids = Vec::with_capacity(raw_list.len());
        for raw_value in &raw_list {
            let value = raw_value
                .strip_prefix(PRESCRIPTION_ID_NAMING_SYSTEM)
                .and_then(|rest| rest.strip_prefix('|'))
                .ok_or_else(|| ErxError::bad_request(format!("bad search parameter: {raw_value}")))?;
            ids.push(
                PrescriptionId::parse(value)
                    .map_err(|_| ErxError::bad_request(format!("bad search parameter: {raw_value}")))?,
            );
        }
        self.search_arguments.push(SearchArgument {
            prefix: Prefix::Eq,
            name_db: parameter.name_db.clone(),
            original_name: name.to_string(),
            parameter_type: ParameterType::PrescriptionId,
            values: ArgumentValues::PrescriptionIds(ids),
            original_values: raw_list,
        });
        Ok(())
    }

    fn add_sort_arguments(&mut self, arguments_string: &str) {
        for argument in arguments_string.split(ARGUMENT_SEPARATOR) {
            let trimmed = argument.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut sort_argument = SortArgument::parse(trimmed);
            if let Some(parameter) = self.find_parameter(&sort_argument.name_url) {
                sort_argument.name_db = parameter.name_db.clone();
                self.sort_arguments.push(sort_argument);
            }
            // arguments that are not valid search parameters are ignored
        }
    }

    fn find_parameter(&self, url_name: &str) -> Option<&SearchParameter> {
        self.supported_parameters
            .iter()
            .find(|parameter| parameter.name_url == url_name)
    }

    // ----- accessors --------------------------------------------------------

    pub fn paging_argument(&self) -> &PagingArgument {
        &self.paging_argument
    }

    pub fn disable_paging_argument(&mut self) {
        self.paging_disabled = true;
    }

    pub fn has_reverse_include_audit_event_argument(&self) -> bool {
        self.reverse_include_audit_events
    }

    pub fn get_search_argument(&self, original_name: &str) -> Option<&SearchArgument> {
        self.search_arguments
            .iter()
            .find(|argument| argument.original_name == original_name)
    }

    pub fn add_hidden_search_argument(&mut self, argument: SearchArgument) {
        self.hidden_search_arguments.push(argument);
    }

    /// Record the sent-times of the first and last page entry for id-based
    /// link generation.
    pub fn set_result_date_range(&mut self, first_entry: DateTime<Utc>, last_entry: DateTime<Utc>) {
        self.paging_argument
            .set_entry_timestamp_range(first_entry, last_entry);
    }

    // ----- SQL rendering ----------------------------------------------------

    /// The full query tail: ` AND <where> <order> <limit/offset>`.
    ///
    /// The WHERE part is prefixed with `AND` because the enclosing statement
    /// always carries at least one predicate of its own. With over-fetch
    /// enabled the limit asks for one extra row so the caller can answer
    /// has-more without a count query.
    pub fn sql_expression(
        &self,
        indentation: &str,
        one_additional_item_per_page: bool,
    ) -> ErxResult<String> {
        let mut query_tail = String::new();

        let where_expression = self.sql_where_expression(indentation)?;
        if !where_expression.is_empty() {
            if indentation.is_empty() {
                query_tail.push_str(" AND ");
            } else {
                query_tail.push('\n');
                query_tail.push_str(indentation);
                query_tail.push_str("AND ");
            }
            query_tail.push_str(&where_expression);
        }

        let order = self.sql_sort_expression();
        if !order.is_empty() {
            if indentation.is_empty() {
                query_tail.push(' ');
            } else {
                query_tail.push('\n');
                query_tail.push_str(indentation);
            }
            query_tail.push_str(&order);
        }

        if !self.paging_disabled {
            let paging = self.sql_paging_expression(one_additional_item_per_page);
            if indentation.is_empty() {
                query_tail.push(' ');
            } else {
                query_tail.push('\n');
                query_tail.push_str(indentation);
            }
            query_tail.push_str(&paging);
        }

        Ok(query_tail)
    }

    /// ANDed per-parameter disjunctions of per-value comparisons.
    pub fn sql_where_expression(&self, indentation: &str) -> ErxResult<String> {
        let mut expression = String::new();
        for argument_list in [&self.search_arguments, &self.hidden_search_arguments] {
            for argument in argument_list {
                if !expression.is_empty() {
                    if indentation.is_empty() {
                        expression.push_str(" AND ");
                    } else {
                        expression.push('\n');
                        expression.push_str(indentation);
                        expression.push_str("AND ");
                    }
                }
                if argument.values_count() > 1 {
                    expression.push('(');
                }
                expression.push_str(&self.render_comparison(argument)?);
                if argument.values_count() > 1 {
                    expression.push(')');
                }
            }
        }
        Ok(expression)
    }

    pub fn sql_sort_expression(&self) -> String {
        let mut expression = String::new();
        for argument in &self.sort_arguments {
            if !expression.is_empty() {
                expression.push_str(", ");
            }
            expression.push_str(&argument.name_db);
            expression.push_str(match argument.order {
                crate::sort_argument::SortOrder::Increasing => " ASC",
                crate::sort_argument::SortOrder::Decreasing => " DESC",
            });
        }
        if expression.is_empty() {
            expression
        } else {
            format!("ORDER BY {expression}")
        }
    }

    pub fn sql_paging_expression(&self, one_additional_item: bool) -> String {
        let count = if one_additional_item {
            self.paging_argument.count() + 1
        } else {
            self.paging_argument.count()
        };
        let mut expression = format!("LIMIT {count}");
        if self.paging_argument.offset() > 0 {
            expression.push_str(&format!(" OFFSET {}", self.paging_argument.offset()));
        }
        expression
    }

    fn render_comparison(&self, argument: &SearchArgument) -> ErxResult<String> {
        match &argument.values {
            ArgumentValues::Dates(values) => self.render_date_comparison(argument, values),
            ArgumentValues::Strings(values) => Ok(render_or_joined(values, |value| {
                format!("({} = '{}')", argument.name_db, escape_string(value))
            })),
            ArgumentValues::Identities(values) => Ok(render_or_joined(values, |value| {
                format!("({} = X'{}')", argument.name_db, value.to_hex())
            })),
            ArgumentValues::Statuses(values) => Ok(render_or_joined(values, |value| {
                format!("({} = {})", argument.name_db, value.as_i16())
            })),
            ArgumentValues::PrescriptionIds(values) => Ok(render_or_joined(values, |value| {
                format!("({} = {})", argument.name_db, value.database_id())
            })),
        }
    }

    /// Date comparisons treat target values as instants, not implicit
    /// ranges. B is the inclusive lower bound of the search interval, E the
    /// exclusive upper bound, T the target column:
    ///
    /// - `eq`: B ≤ T < E
    /// - `ne`: T < B ∨ E ≤ T
    /// - `gt`/`sa`: T ≥ E
    /// - `ge`: T ≥ B
    /// - `lt`/`eb`: T < B
    /// - `le`: T < E
    fn render_date_comparison(
        &self,
        argument: &SearchArgument,
        values: &[Option<TimePeriod>],
    ) -> ErxResult<String> {
        let name = &argument.name_db;
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            let rendered = match argument.prefix {
                Prefix::Eq => match value {
                    None => format!("({name} IS NULL)"),
                    Some(period) => format!(
                        "(('{}' <= {name}) AND ({name} < '{}'))",
                        format_bound_begin(argument.parameter_type, period)?,
                        format_bound_end(argument.parameter_type, period)?,
                    ),
                },
                Prefix::Ne => match value {
                    None => format!("({name} IS NOT NULL)"),
                    Some(period) => format!(
                        "(('{}' > {name}) OR ({name} >= '{}'))",
                        format_bound_begin(argument.parameter_type, period)?,
                        format_bound_end(argument.parameter_type, period)?,
                    ),
                },
                Prefix::Gt | Prefix::Sa => {
                    let period = required_period(value)?;
                    format!(
                        "({name} >= '{}')",
                        format_bound_end(argument.parameter_type, period)?
                    )
                }
                Prefix::Ge => {
                    let period = required_period(value)?;
                    format!(
                        "({name} >= '{}')",
                        format_bound_begin(argument.parameter_type, period)?
                    )
                }
                Prefix::Lt | Prefix::Eb => {
                    let period = required_period(value)?;
                    format!(
                        "({name} < '{}')",
                        format_bound_begin(argument.parameter_type, period)?
                    )
                }
                Prefix::Le => {
                    let period = required_period(value)?;
                    format!(
                        "({name} < '{}')",
                        format_bound_end(argument.parameter_type, period)?
                    )
                }
            };
            parts.push(rendered);
        }
        Ok(parts.join(" OR "))
    }

    // ----- link generation --------------------------------------------------

    /// Offset-mode bundle links; records the total for the `last` link.
    pub fn create_bundle_links(
        &mut self,
        total_search_matches: usize,
        link_base: &str,
        path_head: &str,
    ) -> ErxResult<HashMap<LinkType, String>> {
        self.paging_argument
            .set_total_search_matches(total_search_matches);
        let has_next_page = self.paging_argument.has_next_page(total_search_matches);
        self.create_bundle_links_with_mode(has_next_page, link_base, path_head, LinkMode::Offset)
    }

    pub fn create_bundle_links_with_mode(
        &self,
        has_next_page: bool,
        link_base: &str,
        path_head: &str,
        link_mode: LinkMode,
    ) -> ErxResult<HashMap<LinkType, String>> {
        let mut links = HashMap::new();

        links.insert(
            LinkType::SelfLink,
            format!(
                "{link_base}{path_head}{}",
                self.link_path_arguments(LinkType::SelfLink, link_mode)?
            ),
        );

        let has_previous = match link_mode {
            LinkMode::Offset => self.paging_argument.has_previous_page(),
            LinkMode::Id => self.paging_argument.entry_timestamp_range().is_some(),
        };
        if has_previous {
            links.insert(
                LinkType::Prev,
                format!(
                    "{link_base}{path_head}{}",
                    self.link_path_arguments(LinkType::Prev, link_mode)?
                ),
            );
        }

        if has_next_page {
            links.insert(
                LinkType::Next,
                format!(
                    "{link_base}{path_head}{}",
                    self.link_path_arguments(LinkType::Next, link_mode)?
                ),
            );
        }

        links.insert(
            LinkType::First,
            format!(
                "{link_base}{path_head}{}",
                self.link_path_arguments(LinkType::First, link_mode)?
            ),
        );

        if link_mode == LinkMode::Offset && self.paging_argument.total_search_matches() > 0 {
            links.insert(
                LinkType::Last,
                format!(
                    "{link_base}{path_head}{}",
                    self.link_path_arguments(LinkType::Last, link_mode)?
                ),
            );
        }

        Ok(links)
    }

    fn link_path_arguments(&self, link_type: LinkType, link_mode: LinkMode) -> ErxResult<String> {
        let mut out = String::new();
        self.append_link_search_arguments(&mut out);
        self.append_link_sort_arguments(&mut out);
        self.append_link_paging_arguments(&mut out, link_type, link_mode)?;
        Ok(out)
    }

    fn append_link_search_arguments(&self, out: &mut String) {
        for argument in &self.search_arguments {
            append_link_separator(out);
            argument.append_link_string(out);
        }
    }

    fn append_link_sort_arguments(&self, out: &mut String) {
        if self.sort_arguments.is_empty() {
            return;
        }
        append_link_separator(out);
        out.push_str(SORT_KEY);
        out.push('=');
        let mut first = true;
        for argument in &self.sort_arguments {
            if !first {
                out.push(ARGUMENT_SEPARATOR);
            }
            first = false;
            out.push_str(&argument.link_string());
        }
    }

    fn append_link_paging_arguments(
        &self,
        out: &mut String,
        link_type: LinkType,
        link_mode: LinkMode,
    ) -> ErxResult<()> {
        match link_mode {
            LinkMode::Offset => {
                self.append_offset_paging_arguments(out, link_type);
                Ok(())
            }
            LinkMode::Id => self.append_id_paging_arguments(out, link_type),
        }
    }

    fn append_offset_paging_arguments(&self, out: &mut String, link_type: LinkType) {
        let count = self.paging_argument.count();
        let offset = self.paging_argument.offset();
        match link_type {
            LinkType::SelfLink => {
                if self.paging_argument.is_set() {
                    append_link_separator(out);
                    out.push_str(&format!("{COUNT_KEY}={count}&{OFFSET_KEY}={offset}"));
                }
            }
            LinkType::Prev => {
                // may overlap the current page: the client's page size is
                // preserved and the offset is capped at zero
                append_link_separator(out);
                out.push_str(&format!(
                    "{COUNT_KEY}={count}&{OFFSET_KEY}={}",
                    offset.saturating_sub(count)
                ));
            }
            LinkType::Next => {
                append_link_separator(out);
                out.push_str(&format!("{COUNT_KEY}={count}&{OFFSET_KEY}={}", offset + count));
            }
            LinkType::First => {
                append_link_separator(out);
                out.push_str(&format!("{COUNT_KEY}={count}&{OFFSET_KEY}=0"));
            }
            LinkType::Last => {
                append_link_separator(out);
                out.push_str(&format!(
                    "{COUNT_KEY}={count}&{OFFSET_KEY}={}",
                    self.paging_argument.offset_last_page()
                ));
            }
        }
    }

    fn append_id_paging_arguments(&self, out: &mut String, link_type: LinkType) -> ErxResult<()> {
        let (first_entry, last_entry) = self
            .paging_argument
            .entry_timestamp_range()
            .ok_or_else(|| ErxError::internal("Cannot generate links without timestamp range"))?;
        let ascending = first_entry < last_entry;
        let count = self.paging_argument.count();
        match link_type {
            LinkType::SelfLink => {
                if self.paging_argument.is_set() {
                    append_link_separator(out);
                    let (first_prefix, last_prefix) = if ascending {
                        (Prefix::Ge, Prefix::Le)
                    } else {
                        (Prefix::Le, Prefix::Ge)
                    };
                    out.push_str(&format!(
                        "{COUNT_KEY}={count}&{ID_KEY}={}{}&{ID_KEY}={}{}",
                        first_prefix.as_str(),
                        Suuid::lower_bound(first_entry)?,
                        last_prefix.as_str(),
                        Suuid::lower_bound(last_entry)?,
                    ));
                }
            }
            LinkType::Prev => {
                append_link_separator(out);
                let prefix = if ascending { Prefix::Lt } else { Prefix::Gt };
                out.push_str(&format!(
                    "{COUNT_KEY}={count}&{ID_KEY}={}{}",
                    prefix.as_str(),
                    Suuid::lower_bound(first_entry)?,
                ));
            }
            LinkType::Next => {
                append_link_separator(out);
                let prefix = if ascending { Prefix::Gt } else { Prefix::Lt };
                out.push_str(&format!(
                    "{COUNT_KEY}={count}&{ID_KEY}={}{}",
                    prefix.as_str(),
                    Suuid::lower_bound(last_entry)?,
                ));
            }
            LinkType::First => {
                append_link_separator(out);
                out.push_str(&format!("{COUNT_KEY}={count}"));
            }
            LinkType::Last => {
                // no last link for pagination with an id
            }
        }
        Ok(())
    }
}

fn append_link_separator(out: &mut String) {
    if out.is_empty() {
        out.push('?');
    } else {
        out.push('&');
    }
}

fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

fn render_or_joined<T>(values: &[T], render: impl Fn(&T) -> String) -> String {
    values.iter().map(render).collect::<Vec<_>>().join(" OR ")
}

fn required_period(value: &Option<TimePeriod>) -> ErxResult<&TimePeriod> {
    value
        .as_ref()
        .ok_or_else(|| ErxError::bad_request("unsupported prefix for NULL search value"))
}

fn format_bound_begin(parameter_type: ParameterType, period: &TimePeriod) -> ErxResult<String> {
    match parameter_type {
        ParameterType::SqlDate => Ok(period.begin_date().format("%Y-%m-%d").to_string()),
        ParameterType::Date => Ok(period.begin().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        ParameterType::DateAsUuid => Ok(Suuid::lower_bound(period.begin())?.to_string()),
        _ => Err(ErxError::internal("Cannot format date")),
    }
}

fn format_bound_end(parameter_type: ParameterType, period: &TimePeriod) -> ErxResult<String> {
    match parameter_type {
        ParameterType::SqlDate => Ok(period.end_date().format("%Y-%m-%d").to_string()),
        ParameterType::Date => Ok(period.end().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        ParameterType::DateAsUuid => Ok(Suuid::lower_bound(period.end())?.to_string()),
        _ => Err(ErxError::internal("Cannot format date")),
    }
}
