use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, Month};

/// Parses the date part of a FHIR `date`, `dateTime` or `instant` value.
///
/// Partial dates resolve to their first day: `2021` is 2021-01-01, `2021-06` is 2021-06-01.
pub fn parse_fhir_date(value: &str) -> Result<Date> {
    let value = value.trim();
    let date_part = value.get(..10.min(value.len())).unwrap_or(value);
    let mut parts = date_part.splitn(3, '-');

    let year = parts
        .next()
        .filter(|y| y.len() == 4)
        .and_then(|y| y.parse::<i32>().ok())
        .ok_or_else(|| CoreError::malformed_date(value))?;
    let month = match parts.next() {
        Some(m) => m
            .parse::<u8>()
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .ok_or_else(|| CoreError::malformed_date(value))?,
        None => Month::January,
    };
    let day = match parts.next() {
        Some(d) => d.parse::<u8>().map_err(|_| CoreError::malformed_date(value))?,
        None => 1,
    };

    Date::from_calendar_date(year, month, day).map_err(|_| CoreError::malformed_date(value))
}

/// Inclusive date bounds; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DateRange {
    #[serde(default, with = "fhir_date::option", skip_serializing_if = "Option::is_none")]
    pub start: Option<Date>,
    #[serde(default, with = "fhir_date::option", skip_serializing_if = "Option::is_none")]
    pub end: Option<Date>,
}

impl DateRange {
    pub fn new(start: Option<Date>, end: Option<Date>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: Date) -> bool {
        if let Some(start) = self.start
            && date < start
        {
            return false;
        }
        if let Some(end) = self.end
            && date > end
        {
            return false;
        }
        true
    }
}

/// Serde helpers for `YYYY-MM-DD` dates.
pub mod fhir_date {
    use super::*;
    use serde::{Deserializer, Serializer};

    const FORMAT: &[time::format_description::FormatItem<'static>] =
        format_description!("[year]-[month]-[day]");

    pub fn format(date: &Date) -> String {
        date.format(FORMAT).unwrap_or_default()
    }

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let formatted = date.format(FORMAT).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Date, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_fhir_date(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            match date {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> std::result::Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| parse_fhir_date(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_parse_full_and_partial_dates() {
        assert_eq!(parse_fhir_date("2023-05-15").unwrap(), date!(2023 - 05 - 15));
        assert_eq!(parse_fhir_date("2023-05").unwrap(), date!(2023 - 05 - 01));
        assert_eq!(parse_fhir_date("2023").unwrap(), date!(2023 - 01 - 01));
    }

    #[test]
    fn test_parse_datetime_and_instant() {
        assert_eq!(
            parse_fhir_date("2023-05-15T14:30:00+02:00").unwrap(),
            date!(2023 - 05 - 15)
        );
        assert_eq!(
            parse_fhir_date("2019-11-02T08:00:00.000Z").unwrap(),
            date!(2019 - 11 - 02)
        );
    }

    #[test]
    fn test_parse_invalid_dates() {
        assert!(parse_fhir_date("").is_err());
        assert!(parse_fhir_date("yesterday").is_err());
        assert!(parse_fhir_date("2023-13-01").is_err());
        assert!(parse_fhir_date("2023-02-30").is_err());
    }

    #[test]
    fn test_date_range_contains_inclusive() {
        let range = DateRange::new(Some(date!(2023 - 01 - 01)), Some(date!(2023 - 12 - 31)));
        assert!(range.contains(date!(2023 - 01 - 01)));
        assert!(range.contains(date!(2023 - 12 - 31)));
        assert!(!range.contains(date!(2022 - 12 - 31)));
        assert!(!range.contains(date!(2024 - 01 - 01)));

        let open = DateRange::new(Some(date!(2023 - 06 - 01)), None);
        assert!(open.contains(date!(2030 - 01 - 01)));
        assert!(DateRange::default().is_unbounded());
    }

    #[test]
    fn test_date_range_serde() {
        let range: DateRange = serde_json::from_str(r#"{"start":"2021-03-04"}"#).unwrap();
        assert_eq!(range.start, Some(date!(2021 - 03 - 04)));
        assert_eq!(range.end, None);

        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":"2021-03-04"}"#);
    }
}
