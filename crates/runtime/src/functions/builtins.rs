//! Builtin formatters: NUMBER, DATETIME, CURRENCY
//!
//! These apply the structural options (fraction-digit bounds, grouping,
//! style names, currency codes) and record the visible precision that
//! later drives plural selection. Locale-specific CLDR pattern data stays
//! with the formatter collaborator.

use super::types::{FunctionContext, FunctionError, NamedArgs};
use crate::value::{FluentNumber, FluentValue};
use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

fn numeric_arg(value: &FluentValue) -> Result<Decimal, FunctionError> {
    match value {
        FluentValue::Int(i) => Ok(Decimal::from(*i)),
        FluentValue::Decimal(d) => Ok(*d),
        FluentValue::Number(n) => Ok(n.value),
        FluentValue::Float(f) => {
            Decimal::from_f64(*f).ok_or_else(|| FunctionError::new("float out of decimal range"))
        }
        // Booleans are not numbers here; callers convert explicitly.
        other => Err(FunctionError::type_mismatch("a number", other.type_tag())),
    }
}

/// Integer-valued option; FTL number literals arrive as decimals
fn optional_u32(named: &NamedArgs, key: &str) -> Result<Option<u32>, FunctionError> {
    let Some(value) = named.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        FluentValue::Int(i) => u32::try_from(*i).ok(),
        FluentValue::Decimal(d) if d.is_integer() => d.to_u32(),
        FluentValue::Number(n) if n.value.is_integer() => n.value.to_u32(),
        _ => None,
    };
    match parsed {
        Some(v) => Ok(Some(v)),
        None => Err(FunctionError::type_mismatch(
            "a non-negative integer",
            value.type_tag(),
        )),
    }
}

fn truthy(value: &FluentValue) -> bool {
    match value {
        FluentValue::Int(i) => *i != 0,
        FluentValue::Decimal(d) => !d.is_zero(),
        FluentValue::Number(n) => !n.value.is_zero(),
        FluentValue::Str(s) => s == "true",
        FluentValue::Bool(b) => *b,
        _ => false,
    }
}

/// NUMBER: fraction-digit bounds and grouping
pub(crate) fn number(
    positional: &[FluentValue],
    named: &NamedArgs,
    _context: &FunctionContext,
) -> Result<FluentValue, FunctionError> {
    let raw = positional
        .first()
        .ok_or_else(|| FunctionError::new("NUMBER requires a value argument"))?;
    let mut value = numeric_arg(raw)?;

    let current_scale = value.scale();
    let minimum = optional_u32(named, "minimum_fraction_digits")?;
    let maximum = optional_u32(named, "maximum_fraction_digits")?;
    if let (Some(min), Some(max)) = (minimum, maximum) {
        if min > max {
            return Err(FunctionError::new(
                "minimumFractionDigits must not exceed maximumFractionDigits",
            ));
        }
    }

    let mut precision = match raw {
        FluentValue::Number(n) => n.precision.unwrap_or(current_scale),
        _ => current_scale,
    };
    if let Some(max) = maximum {
        if precision > max {
            value = value.round_dp(max);
            precision = max;
        }
    }
    if let Some(min) = minimum {
        if precision < min {
            precision = min;
        }
    }

    let mut number = FluentNumber::with_precision(value, precision);
    number.use_grouping = named.get("use_grouping").is_some_and(truthy);
    if let FluentValue::Number(n) = raw {
        number.currency = n.currency.clone();
    }
    Ok(FluentValue::Number(number))
}

fn date_format(style: &str) -> Option<&'static str> {
    match style {
        "full" => Some("%A, %B %-d, %Y"),
        "long" => Some("%B %-d, %Y"),
        "medium" => Some("%b %-d, %Y"),
        "short" => Some("%-m/%-d/%y"),
        _ => None,
    }
}

fn time_format(style: &str) -> Option<&'static str> {
    match style {
        "full" | "long" => Some("%H:%M:%S %:z"),
        "medium" => Some("%H:%M:%S"),
        "short" => Some("%H:%M"),
        _ => None,
    }
}

fn style_arg<'a>(named: &'a NamedArgs, key: &str, default: &'a str) -> &'a str {
    match named.get(key) {
        Some(FluentValue::Str(s)) => s.as_str(),
        _ => default,
    }
}

/// DATETIME: dateStyle/timeStyle subset over chrono. The locale is
/// injected so a replacement implementation can use it.
pub(crate) fn datetime(
    positional: &[FluentValue],
    named: &NamedArgs,
    _context: &FunctionContext,
) -> Result<FluentValue, FunctionError> {
    let value = positional
        .first()
        .ok_or_else(|| FunctionError::new("DATETIME requires a value argument"))?;

    let date_style = style_arg(named, "date_style", "medium");
    let time_style = style_arg(named, "time_style", "none");

    match value {
        FluentValue::Date(d) => {
            let fmt = date_format(date_style)
                .ok_or_else(|| FunctionError::new(format!("unknown dateStyle `{date_style}`")))?;
            Ok(FluentValue::Str(format_date(*d, fmt)))
        }
        FluentValue::DateTime(dt) => {
            let mut parts = Vec::new();
            if date_style != "none" {
                let fmt = date_format(date_style).ok_or_else(|| {
                    FunctionError::new(format!("unknown dateStyle `{date_style}`"))
                })?;
                parts.push(dt.format(fmt).to_string());
            }
            if time_style != "none" {
                let fmt = time_format(time_style).ok_or_else(|| {
                    FunctionError::new(format!("unknown timeStyle `{time_style}`"))
                })?;
                parts.push(dt.format(fmt).to_string());
            }
            if parts.is_empty() {
                parts.push(dt.to_rfc3339());
            }
            Ok(FluentValue::Str(parts.join(", ")))
        }
        other => Err(FunctionError::type_mismatch(
            "a date or datetime",
            other.type_tag(),
        )),
    }
}

fn format_date(d: NaiveDate, fmt: &str) -> String {
    d.format(fmt).to_string()
}

/// CURRENCY: attaches an ISO-4217 code and fraction digits; digits follow
/// the NUMBER path.
pub(crate) fn currency(
    positional: &[FluentValue],
    named: &NamedArgs,
    _context: &FunctionContext,
) -> Result<FluentValue, FunctionError> {
    let raw = positional
        .first()
        .ok_or_else(|| FunctionError::new("CURRENCY requires a value argument"))?;
    let value = numeric_arg(raw)?;

    let code = match named.get("currency") {
        Some(FluentValue::Str(s)) if !s.is_empty() => s.clone(),
        Some(other) => {
            return Err(FunctionError::type_mismatch(
                "a currency code string",
                other.type_tag(),
            ));
        }
        None => return Err(FunctionError::new("CURRENCY requires a `currency` argument")),
    };

    let precision = optional_u32(named, "minimum_fraction_digits")?.unwrap_or(2);
    let mut number = FluentNumber::with_precision(value, precision);
    number.currency = Some(code);
    number.use_grouping = true;
    Ok(FluentValue::Number(number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_number_precision() {
        let named = NamedArgs::from([(
            "maximum_fraction_digits".to_string(),
            FluentValue::Int(1),
        )]);
        let out = number(
            &[FluentValue::Decimal(Decimal::from_str("3.14159").unwrap())],
            &named,
            &FunctionContext::default(),
        )
        .unwrap();
        match out {
            FluentValue::Number(n) => {
                assert_eq!(n.as_string(), "3.1");
                assert_eq!(n.precision, Some(1));
            }
            other => panic!("Expected Number, got {other:?}"),
        }
    }

    #[test]
    fn test_number_minimum_pads() {
        let named = NamedArgs::from([(
            "minimum_fraction_digits".to_string(),
            FluentValue::Int(2),
        )]);
        let out = number(&[FluentValue::Int(5)], &named, &FunctionContext::default()).unwrap();
        match out {
            FluentValue::Number(n) => assert_eq!(n.as_string(), "5.00"),
            other => panic!("Expected Number, got {other:?}"),
        }
    }

    #[test]
    fn test_number_rejects_bool() {
        let err = number(
            &[FluentValue::Bool(true)],
            &NamedArgs::new(),
            &FunctionContext::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("bool"));
    }

    #[test]
    fn test_datetime_styles() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let named = NamedArgs::from([(
            "date_style".to_string(),
            FluentValue::Str("short".to_string()),
        )]);
        let out = datetime(
            &[FluentValue::Date(date)],
            &named,
            &FunctionContext::default(),
        )
        .unwrap();
        assert_eq!(out, FluentValue::Str("3/9/26".to_string()));
    }

    #[test]
    fn test_currency() {
        let named = NamedArgs::from([(
            "currency".to_string(),
            FluentValue::Str("EUR".to_string()),
        )]);
        let out = currency(
            &[FluentValue::Decimal(Decimal::from_str("1234.5").unwrap())],
            &named,
            &FunctionContext::default(),
        )
        .unwrap();
        match out {
            FluentValue::Number(n) => assert_eq!(n.as_string(), "1,234.50 EUR"),
            other => panic!("Expected Number, got {other:?}"),
        }
    }
}
