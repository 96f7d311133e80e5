//! # Query Parameter Parser
//!
//! Parses request parameters into a validated [`Query`]. Filter trees are
//! checked once here so adapters never see a malformed operator or operand.
//!
//! Recognized keys: `query`, `search`, `searchFields`, `sort`, `limit`,
//! `offset`, `page`, `pageSize`, `fields`, `populate`. Other keys are ignored.

use serde_json::{Map, Value};

use super::filter::{FilterExpr, FilterNode, FilterOperator};
use super::sort::parse_sort;
use super::Query;
use crate::errors::{DbError, DbResult};

/// Parse the full parameter object
pub fn parse_params(params: &Value) -> DbResult<Query> {
    let params = match params {
        Value::Null => return Ok(Query::default()),
        Value::Object(map) => map,
        _ => return Err(DbError::validation("Query parameters must be an object")),
    };

    let mut query = Query {
        filter: match params.get("query") {
            Some(value) => parse_filter(value)?,
            None => Vec::new(),
        },
        search: parse_search(params.get("search")),
        search_fields: params.get("searchFields").map(parse_name_list).unwrap_or_default(),
        sort: params.get("sort").map(parse_sort).unwrap_or_default(),
        limit: parse_count(params, "limit")?,
        offset: parse_count(params, "offset")?,
        page: parse_count(params, "page")?,
        page_size: parse_count(params, "pageSize")?,
        fields: params.get("fields").map(parse_name_list),
        populate: params.get("populate").map(parse_name_list).unwrap_or_default(),
    };

    let ranged = query.limit.is_some() || query.offset.is_some();
    let paged = query.page.is_some() || query.page_size.is_some();
    if ranged && paged {
        return Err(DbError::validation(
            "limit/offset cannot be combined with page/pageSize",
        ));
    }
    if query.page == Some(0) {
        return Err(DbError::validation("page is 1-based and must be at least 1"));
    }
    if query.page_size == Some(0) {
        return Err(DbError::validation("pageSize must be greater than 0"));
    }

    if query.fields.as_ref().is_some_and(|fields| fields.is_empty()) {
        query.fields = None;
    }

    Ok(query)
}

/// Parse a filter tree from native shorthand.
///
/// An object maps field names to conditions; an array is a list of such
/// objects combined with AND.
pub fn parse_filter(value: &Value) -> DbResult<Vec<FilterNode>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => parse_filter_object(map),
        Value::Array(items) => {
            let mut nodes = Vec::new();
            for item in items {
                nodes.extend(parse_filter(item)?);
            }
            Ok(nodes)
        }
        other => Err(DbError::validation(format!(
            "Filter must be an object, got {}",
            other
        ))),
    }
}

fn parse_filter_object(map: &Map<String, Value>) -> DbResult<Vec<FilterNode>> {
    let mut nodes = Vec::new();

    for (key, condition) in map {
        if key.eq_ignore_ascii_case("or") {
            nodes.push(parse_or_group(condition)?);
            continue;
        }
        if key.eq_ignore_ascii_case("and") {
            nodes.extend(parse_filter(condition)?);
            continue;
        }
        nodes.extend(parse_condition(key, condition)?);
    }

    Ok(nodes)
}

fn parse_or_group(value: &Value) -> DbResult<FilterNode> {
    let children = value
        .as_array()
        .ok_or_else(|| DbError::validation("'or' expects a list of queries"))?;
    if children.is_empty() {
        return Err(DbError::validation("'or' expects at least one query"));
    }

    let mut groups = Vec::with_capacity(children.len());
    for child in children {
        let group = parse_filter(child)?;
        if group.is_empty() {
            return Err(DbError::validation("'or' entries must contain a condition"));
        }
        groups.push(group);
    }
    Ok(FilterNode::Or(groups))
}

fn parse_condition(field: &str, condition: &Value) -> DbResult<Vec<FilterNode>> {
    let leaf = |operator: FilterOperator, value: &Value| {
        FilterExpr::new(field, operator, value.clone()).map(FilterNode::Leaf)
    };

    match condition {
        Value::Null => Ok(vec![leaf(FilterOperator::IsNull, &Value::Null)?]),
        Value::String(s) => match null_test(s) {
            Some(operator) => Ok(vec![leaf(operator, &Value::Null)?]),
            None => Ok(vec![leaf(FilterOperator::Eq, condition)?]),
        },
        Value::Array(_) => Ok(vec![leaf(FilterOperator::In, condition)?]),
        Value::Object(ops) => {
            if ops.is_empty() {
                return Err(DbError::validation(format!(
                    "Condition on '{}' has no operator",
                    field
                )));
            }
            ops.iter()
                .map(|(op, operand)| leaf(op.parse()?, operand))
                .collect()
        }
        _ => Ok(vec![leaf(FilterOperator::Eq, condition)?]),
    }
}

/// `"is null"` / `"is not null"` given as a bare string value
fn null_test(value: &str) -> Option<FilterOperator> {
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.eq_ignore_ascii_case("is null") {
        Some(FilterOperator::IsNull)
    } else if normalized.eq_ignore_ascii_case("is not null") {
        Some(FilterOperator::IsNotNull)
    } else {
        None
    }
}

fn parse_search(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Field-name lists arrive as arrays or as space/comma separated strings
fn parse_name_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_count(params: &Map<String, Value>, key: &str) -> DbResult<Option<u64>> {
    let invalid = || DbError::validation(format!("Invalid {}: expected a non-negative integer", key));
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}
