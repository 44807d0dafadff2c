use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

/// A dynamically typed SQL value.
///
/// [`Value`] is the common currency between dialect adapters: extraction
/// queries return rows of values, and parameterized statements carry values as
/// positional bindings. The variants cover the types the engine actually moves
/// between databases; anything else is surfaced as its textual form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
}

impl Value {
    /// Returns `true` if this value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as a CSV field.
    ///
    /// NULL renders as the empty string, timestamps as RFC 3339, bytes as hex,
    /// and JSON in its compact form. This rendering is what every loader's
    /// stage step expects as input.
    pub fn to_csv_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Bytes(value) => hex::encode(value),
            Value::Date(value) => value.to_string(),
            Value::Time(value) => value.to_string(),
            Value::Timestamp(value) => value.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::TimestampTz(value) => value.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Uuid(value) => value.to_string(),
            Value::Json(value) => value.to_string(),
        }
    }

    /// Interprets the value as a UTC timestamp, if possible.
    ///
    /// Sources report last-modified columns as native timestamps or as their
    /// textual form depending on the driver, so both are accepted.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(value) => Some(value.and_utc()),
            Value::TimestampTz(value) => Some(*value),
            Value::String(value) => value
                .parse::<DateTime<Utc>>()
                .ok()
                .or_else(|| value.parse::<NaiveDateTime>().ok().map(|ts| ts.and_utc()))
                .or_else(|| {
                    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|ts| ts.and_utc())
                }),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::TimestampTz(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn null_renders_as_empty_field() {
        assert_eq!(Value::Null.to_csv_field(), "");
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        assert_eq!(Value::TimestampTz(ts).to_csv_field(), "2023-04-05T06:07:08Z");
    }

    #[test]
    fn bytes_render_as_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_csv_field(), "dead");
    }

    #[test]
    fn string_timestamps_are_parsed() {
        let value = Value::String("2023-04-05T06:07:08Z".to_string());
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        assert_eq!(value.as_timestamp(), Some(ts));
    }

    #[test]
    fn naive_string_timestamps_are_parsed_as_utc() {
        let value = Value::String("2023-04-05 06:07:08".to_string());
        let ts = Utc.with_ymd_and_hms(2023, 4, 5, 6, 7, 8).unwrap();
        assert_eq!(value.as_timestamp(), Some(ts));
    }
}
