//! Miscellaneous filters: `size`, `default` and `date`.

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::filters::{FilterCall, FilterRegistry, str_arg};
use crate::value::Value;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("size", size);
    registry.register("default", default);
    registry.register("date", date);
}

fn size(call: FilterCall<'_>) -> Result<Value> {
    let len = match &call.value {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Range(range) => range.len(),
        Value::Undefined(_) => 0,
        other => {
            return Err(Error::filter_argument(
                "size",
                format!("cannot take the size of {}", other.kind()),
            ));
        }
    };
    Ok(Value::Int(len as i64))
}

/// Returns the fallback when the input is nil, false, undefined or empty.
/// `allow_false: true` lets an explicit false through.
fn default(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let allow_false = call
        .kwarg("allow_false")
        .is_some_and(Value::is_truthy);
    let use_default = match &call.value {
        Value::Bool(false) => !allow_false,
        Value::Nil | Value::Undefined(_) | Value::Empty => true,
        Value::Str(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    };
    Ok(if use_default {
        call.args[0].clone()
    } else {
        call.value
    })
}

/// Parses a handful of common date spellings into a naive local datetime.
fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if text == "now" || text == "today" {
        return Some(Local::now().naive_local());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_local());
    }
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%B %d, %Y",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    for format in ["%Y-%m-%d", "%d %B %Y", "%B %d, %Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn date(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    if call.value.is_undefined() {
        return Ok(Value::str(""));
    }
    let datetime = match &call.value {
        Value::Str(s) => parse_datetime(s).ok_or_else(|| {
            Error::filter_argument("date", format!("can't parse date '{s}'"))
        })?,
        Value::Int(timestamp) => Utc
            .timestamp_opt(*timestamp, 0)
            .single()
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| Error::filter_argument("date", "timestamp out of range"))?,
        other => {
            return Err(Error::filter_argument(
                "date",
                format!("expected a date, found {}", other.kind()),
            ));
        }
    };

    let format = str_arg(&call.args[0]);
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::filter_argument(
            "date",
            format!("invalid date format '{format}'"),
        ));
    }
    // Formatting can still fail for directives a naive datetime cannot
    // satisfy (e.g. %z), so write through fmt instead of Display::to_string.
    let mut out = String::new();
    write!(out, "{}", datetime.format_with_items(items.iter()))
        .map_err(|_| Error::filter_argument("date", format!("invalid date format '{format}'")))?;
    Ok(Value::str(out))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_common_date_forms() {
        let parsed = parse_datetime("2007-11-01 15:30:00").unwrap();
        assert_eq!(parsed.format("%b %d, %y").to_string(), "Nov 01, 07");
        assert!(parse_datetime("2007-11-01").is_some());
        assert!(parse_datetime("March 14, 2016").is_some());
        assert!(parse_datetime("not a date").is_none());
    }
}
