// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed lookups into an instance's span tags.
//!
//! A missing tag, or a tag carrying a different value type, reads as the type's zero value.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::proto::{self, value, Value};

pub fn get_string<'a>(tags: &'a HashMap<String, Value>, key: &str) -> &'a str {
    match tags.get(key).and_then(|tag| tag.value.as_ref()) {
        Some(value::Value::StringValue(val)) => val.as_str(),
        _ => "",
    }
}

pub fn get_i64(tags: &HashMap<String, Value>, key: &str) -> i64 {
    match tags.get(key).and_then(|tag| tag.value.as_ref()) {
        Some(value::Value::Int64Value(val)) => *val,
        _ => 0,
    }
}

pub fn get_bool(tags: &HashMap<String, Value>, key: &str) -> bool {
    match tags.get(key).and_then(|tag| tag.value.as_ref()) {
        Some(value::Value::BoolValue(val)) => *val,
        _ => false,
    }
}

pub fn get_timestamp(tags: &HashMap<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    match tags.get(key).and_then(|tag| tag.value.as_ref()) {
        Some(value::Value::TimestampValue(val)) => to_date_time(val),
        _ => None,
    }
}

/// Converts a wire timestamp, `None` when unset or out of range.
pub fn to_date_time(timestamp: &proto::TimeStamp) -> Option<DateTime<Utc>> {
    let value = timestamp.value.as_ref()?;
    let nanos = u32::try_from(value.nanos).ok()?;
    DateTime::from_timestamp(value.seconds, nanos)
}
