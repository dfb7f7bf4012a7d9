use std::str::FromStr;

use agritrace_chain::{parse_eth_amount, Address, U256};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::{Result, ServiceError};

pub(crate) fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

/// `0x` followed by 40 hex digits.
pub(crate) fn address(field: &str, value: &str) -> Result<Address> {
    let value = required(field, value)?;
    let valid = value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ServiceError::Validation(format!(
            "{} must be 0x followed by 40 hex characters, got '{}'",
            field, value
        )));
    }
    Address::from_str(value)
        .map_err(|e| ServiceError::Validation(format!("{}: {}", field, e)))
}

pub(crate) fn amount(field: &str, value: &str) -> Result<U256> {
    parse_eth_amount(value).map_err(|e| ServiceError::Validation(format!("{}: {}", field, e)))
}

/// Harvest date as Unix seconds. Accepts `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub(crate) fn harvest_date(field: &str, value: &str) -> Result<u64> {
    let value = required(field, value)?;
    let parsed = Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
        .or_else(|_| OffsetDateTime::parse(value, &Rfc3339))
        .map_err(|_| {
            ServiceError::Validation(format!(
                "{} must be YYYY-MM-DD or RFC 3339, got '{}'",
                field, value
            ))
        })?;
    u64::try_from(parsed.unix_timestamp()).map_err(|_| {
        ServiceError::Validation(format!("{} must not be before 1970-01-01", field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert_eq!(required("batchId", "  B1 ").unwrap(), "B1");
        assert!(matches!(
            required("batchId", "   "),
            Err(ServiceError::Validation(m)) if m == "batchId is required"
        ));
    }

    #[test]
    fn test_address() {
        let addr = format!("0x{}", "aA".repeat(20));
        assert!(address("farmerAddr", &addr).is_ok());
        assert!(address("farmerAddr", "0xAA").is_err());
        assert!(address("farmerAddr", &format!("0x{}", "g".repeat(40))).is_err());
        assert!(address("farmerAddr", "").is_err());
    }

    #[test]
    fn test_harvest_date() {
        assert_eq!(harvest_date("harvest_date", "2024-06-01").unwrap(), 1_717_200_000);
        assert_eq!(
            harvest_date("harvest_date", "2024-06-01T06:00:00+05:30").unwrap(),
            1_717_200_000 + 30 * 60
        );
        assert!(harvest_date("harvest_date", "01/06/2024").is_err());
        assert!(harvest_date("harvest_date", "1969-12-31").is_err());
    }

    #[test]
    fn test_amount() {
        assert!(amount("priceEth", "0.5").is_ok());
        assert!(amount("priceEth", "free").is_err());
    }
}
