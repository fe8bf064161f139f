use chatrank_domain::period::YearMonth;
use chatrank_domain::stats::parse_user_ids;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::form_urlencoded;
use validator::Validate;

use crate::error::ApiError;

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(())
}

pub fn year_month(year: &str, month: &str) -> Result<YearMonth, ApiError> {
    let year = year
        .parse::<i32>()
        .map_err(|_| ApiError::Validation("year must be numeric".into()))?;
    let month = month
        .parse::<u8>()
        .map_err(|_| ApiError::Validation("month must be between 1 and 12".into()))?;
    Ok(YearMonth::new(year, month)?)
}

fn numeric_id(name: &str, raw: &str) -> Result<i64, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::Validation(format!("{name} must be numeric")));
    }
    raw.parse::<i64>()
        .map_err(|_| ApiError::Validation(format!("{name} is out of range")))
}

/// Query string of the statistics endpoints. `user_id` may repeat, which the
/// derive-based extractor cannot express.
#[derive(Debug, Default)]
pub struct StatsQuery {
    channel_id: Option<String>,
    user_ids: Vec<String>,
    end_date: Option<String>,
}

impl StatsQuery {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = StatsQuery::default();
        let Some(raw) = raw else {
            return query;
        };
        for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
            match name.as_ref() {
                "channel_id" if !value.trim().is_empty() => {
                    query.channel_id = Some(value.into_owned())
                }
                "user_id" => query.user_ids.push(value.into_owned()),
                "end_date" if !value.trim().is_empty() => query.end_date = Some(value.into_owned()),
                _ => {}
            }
        }
        query
    }

    pub fn channel_id(&self) -> Result<Option<i64>, ApiError> {
        self.channel_id
            .as_deref()
            .map(|raw| numeric_id("channel_id", raw))
            .transpose()
    }

    /// Numeric ids only; anything else is dropped.
    pub fn user_ids(&self) -> Vec<i64> {
        parse_user_ids(&self.user_ids)
    }

    /// Single-user filter. A non-numeric value is rejected.
    pub fn user_id(&self) -> Result<Option<i64>, ApiError> {
        self.user_ids
            .iter()
            .find(|raw| !raw.trim().is_empty())
            .map(|raw| numeric_id("user_id", raw))
            .transpose()
    }

    pub fn end_date(&self) -> Result<Option<OffsetDateTime>, ApiError> {
        self.end_date
            .as_deref()
            .map(|raw| {
                OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|_| {
                    ApiError::Validation("end_date must be an RFC 3339 timestamp".into())
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_user_ids_are_collected() {
        let query = StatsQuery::parse(Some("user_id=42&user_id=abc&user_id=7&channel_id=9"));
        assert_eq!(query.user_ids(), vec![42, 7]);
        assert_eq!(query.channel_id().expect("channel"), Some(9));
    }

    #[test]
    fn single_user_filter_rejects_non_numeric() {
        let query = StatsQuery::parse(Some("user_id=abc"));
        assert!(matches!(query.user_id(), Err(ApiError::Validation(_))));
        assert_eq!(StatsQuery::parse(None).user_id().expect("none"), None);
    }

    #[test]
    fn end_date_must_be_rfc3339() {
        let ok = StatsQuery::parse(Some("end_date=2025-01-31T23%3A59%3A59%2B09%3A00"));
        assert!(ok.end_date().expect("parsed").is_some());
        let bad = StatsQuery::parse(Some("end_date=yesterday"));
        assert!(matches!(bad.end_date(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn month_bounds_are_checked() {
        assert!(year_month("2025", "12").is_ok());
        assert!(year_month("2025", "13").is_err());
        assert!(year_month("1999", "1").is_err());
        assert!(year_month("twenty", "1").is_err());
    }
}
