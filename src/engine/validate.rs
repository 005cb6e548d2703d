use chrono::Datelike;

use crate::limits::*;
use crate::model::DateSpan;

use super::EngineError;

pub(crate) fn validate_span(span: &DateSpan) -> Result<(), EngineError> {
    if span.duration_days < 1 {
        return Err(EngineError::InvalidDuration(span.duration_days));
    }
    if span.duration_days > MAX_DURATION_DAYS {
        return Err(EngineError::LimitExceeded("booking duration too long"));
    }
    if span.start.year() < MIN_BOOKING_YEAR || span.end_exclusive().year() > MAX_BOOKING_YEAR {
        return Err(EngineError::LimitExceeded("date outside supported range"));
    }
    Ok(())
}

pub(crate) fn validate_group_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::LimitExceeded("empty group name"));
    }
    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(EngineError::LimitExceeded("group name too long"));
    }
    Ok(())
}

pub(crate) fn validate_label(label: Option<&str>) -> Result<(), EngineError> {
    if let Some(l) = label
        && l.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("label too long"));
        }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn span_duration_bounds() {
        assert!(validate_span(&DateSpan::new(d(2025, 1, 1), 1)).is_ok());
        assert!(validate_span(&DateSpan::new(d(2025, 1, 1), MAX_DURATION_DAYS)).is_ok());
        assert!(matches!(
            validate_span(&DateSpan::new(d(2025, 1, 1), 0)),
            Err(EngineError::InvalidDuration(0))
        ));
        assert!(matches!(
            validate_span(&DateSpan::new(d(2025, 1, 1), MAX_DURATION_DAYS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn span_year_bounds() {
        assert!(validate_span(&DateSpan::new(d(1999, 12, 31), 1)).is_err());
        assert!(validate_span(&DateSpan::new(d(2100, 12, 20), 30)).is_err());
        assert!(validate_span(&DateSpan::new(d(2100, 11, 1), 30)).is_ok());
    }

    #[test]
    fn group_name_bounds() {
        assert!(validate_group_name("LabA").is_ok());
        assert!(validate_group_name("").is_err());
        assert!(validate_group_name(&"x".repeat(MAX_GROUP_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn label_bounds() {
        assert!(validate_label(None).is_ok());
        assert!(validate_label(Some("internship intake")).is_ok());
        assert!(validate_label(Some(&"x".repeat(MAX_LABEL_LEN + 1))).is_err());
    }
}
