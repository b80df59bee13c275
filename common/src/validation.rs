//! Request-shape validation. Param structs are strict-deserialized
//! (`deny_unknown_fields`) and then run their field values through a
//! declarative rule slice; the first failing field's message is what the
//! caller sees.

use chrono::{DateTime, Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").unwrap();
}

pub enum Rule<'a> {
    MinLen(usize),
    MaxLen(usize),
    Matches(&'a Regex, &'a str),
    OneOf(&'a [&'a str]),
}

/// Evaluate `rules` against a string field, reporting the field name in
/// the failure message.
pub fn validate_str(field: &str, value: &str, rules: &[Rule]) -> Result<(), String> {
    for rule in rules {
        match rule {
            Rule::MinLen(min) => {
                if value.chars().count() < *min {
                    return Err(format!("{} must be at least {} characters long", field, min));
                }
            }
            Rule::MaxLen(max) => {
                if value.chars().count() > *max {
                    return Err(format!("{} must be at most {} characters long", field, max));
                }
            }
            Rule::Matches(regex, message) => {
                if !regex.is_match(value) {
                    return Err(format!("{} {}", field, message));
                }
            }
            Rule::OneOf(allowed) => {
                if !allowed.contains(&value) {
                    return Err(format!("{} must be one of: {}", field, allowed.join(", ")));
                }
            }
        }
    }
    Ok(())
}

pub fn validate_email(field: &str, value: &str) -> Result<(), String> {
    validate_str(
        field,
        value,
        &[
            Rule::MaxLen(254),
            Rule::Matches(&EMAIL_REGEX, "must be a valid email address"),
        ],
    )
}

pub fn validate_phone(field: &str, value: &str) -> Result<(), String> {
    validate_str(
        field,
        value,
        &[Rule::Matches(&PHONE_REGEX, "must be a valid phone number")],
    )
}

/// Dates of birth and dates-on-document may not lie in the future.
pub fn not_in_future(field: &str, value: DateTime<Utc>) -> Result<(), String> {
    if value > Utc::now() {
        return Err(format!("{} must not be in the future", field));
    }
    Ok(())
}

pub fn in_future(field: &str, value: DateTime<Utc>) -> Result<(), String> {
    if value <= Utc::now() {
        return Err(format!("{} must be in the future", field));
    }
    Ok(())
}

/// Bounded year field, upper bound is the current year.
pub fn year_since(field: &str, year: i32, min: i32) -> Result<(), String> {
    let current = Utc::now().year();
    if year < min || year > current {
        return Err(format!("{} must be between {} and {}", field, min, current));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn email_shapes() {
        assert!(validate_email("email", "a.patient@example.org").is_ok());
        assert!(validate_email("email", "not-an-email").is_err());
        assert!(validate_email("email", "missing@tld").is_err());
    }

    #[test]
    fn first_failing_rule_wins() {
        let err = validate_str(
            "name",
            "x",
            &[Rule::MinLen(2), Rule::MaxLen(1)],
        )
        .unwrap_err();
        assert_eq!(err, "name must be at least 2 characters long");
    }

    #[test]
    fn enum_rule() {
        let allowed = ["male", "female", "other"];
        assert!(validate_str("gender", "female", &[Rule::OneOf(&allowed)]).is_ok());
        assert!(validate_str("gender", "unknown", &[Rule::OneOf(&allowed)]).is_err());
    }

    #[test]
    fn future_dates_are_rejected() {
        let tomorrow = Utc::now() + Duration::days(1);
        assert!(not_in_future("date_of_birth", tomorrow).is_err());
        assert!(not_in_future("date_of_birth", Utc::now() - Duration::days(1)).is_ok());
    }

    #[test]
    fn slot_windows_must_lie_ahead() {
        assert!(in_future("start", Utc::now() - Duration::minutes(1)).is_err());
        assert!(in_future("start", Utc::now() + Duration::hours(1)).is_ok());
    }

    #[test]
    fn practicing_year_bounds() {
        assert!(year_since("practicing_since", 1950, 1950).is_ok());
        assert!(year_since("practicing_since", 1949, 1950).is_err());
        assert!(year_since("practicing_since", Utc::now().year() + 1, 1950).is_err());
    }
}
