//! Runtime value model
//!
//! The argument bag a caller passes to `format` spans strings, numbers,
//! dates, decimals, sequences, and mappings. `FluentValue` is the tagged
//! union over all of them; the tag doubles as the cache-key type tag so
//! values that merely *format* alike still key differently.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Map of named format arguments
pub type FluentArgs = BTreeMap<String, FluentValue>;

/// A runtime value passed into (or produced by) formatting
#[derive(Debug, Clone, PartialEq)]
pub enum FluentValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Scale-preserving decimal; `1.00` and `1.0` are different values here
    Decimal(Decimal),
    Date(NaiveDate),
    /// Timezone-aware instant; the offset participates in identity
    DateTime(DateTime<FixedOffset>),
    /// Formatter-produced number with display options attached
    Number(FluentNumber),
    Seq(Vec<FluentValue>),
    Map(BTreeMap<String, FluentValue>),
    Null,
}

impl FluentValue {
    /// Short type name, used in diagnostics and cache key tags
    pub fn type_tag(&self) -> &'static str {
        match self {
            FluentValue::Str(_) => "str",
            FluentValue::Int(_) => "int",
            FluentValue::Float(_) => "float",
            FluentValue::Bool(_) => "bool",
            FluentValue::Decimal(_) => "decimal",
            FluentValue::Date(_) => "date",
            FluentValue::DateTime(_) => "dt",
            FluentValue::Number(_) => "num",
            FluentValue::Seq(_) => "seq",
            FluentValue::Map(_) => "map",
            FluentValue::Null => "null",
        }
    }

    /// Whether plural selection applies to this value
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FluentValue::Int(_)
                | FluentValue::Float(_)
                | FluentValue::Decimal(_)
                | FluentValue::Number(_)
        )
    }

    /// The string form used for display interpolation.
    ///
    /// Sequences join their elements with `", "`. Mappings and nulls have
    /// no display form; the resolver reports those as type errors.
    pub fn as_display_string(&self) -> String {
        match self {
            FluentValue::Str(s) => s.clone(),
            FluentValue::Int(i) => i.to_string(),
            FluentValue::Float(f) => format_float(*f),
            FluentValue::Bool(b) => b.to_string(),
            FluentValue::Decimal(d) => d.to_string(),
            FluentValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FluentValue::DateTime(dt) => dt.to_rfc3339(),
            FluentValue::Number(n) => n.as_string(),
            FluentValue::Seq(items) => items
                .iter()
                .map(|v| v.as_display_string())
                .collect::<Vec<_>>()
                .join(", "),
            FluentValue::Map(_) => String::new(),
            FluentValue::Null => String::new(),
        }
    }

    /// The string form plural rules operate on, preserving visible
    /// fraction digits (the CLDR `v` operand). `None` for non-numbers.
    pub fn plural_form(&self) -> Option<String> {
        match self {
            FluentValue::Int(i) => Some(i.to_string()),
            FluentValue::Float(f) => Some(format_float(*f)),
            FluentValue::Decimal(d) => Some(d.to_string()),
            FluentValue::Number(n) => Some(n.as_string_ungrouped()),
            _ => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// A number with formatting options, as produced by the `NUMBER` and
/// `CURRENCY` builtins.
///
/// `precision` is the count of visible fraction digits and feeds plural
/// selection: `1.00` with precision 2 selects `other`, not `one`, in
/// locales whose rules use the `v` operand. Booleans are rejected here by
/// construction; convert explicitly at the edge if 0/1 semantics are
/// wanted.
#[derive(Debug, Clone, PartialEq)]
pub struct FluentNumber {
    pub value: Decimal,
    /// Visible fraction digits; `None` keeps the value's own scale
    pub precision: Option<u32>,
    /// Pre-rendered form; takes precedence over the derived one
    pub formatted: Option<String>,
    /// ISO-4217 code attached by `CURRENCY`
    pub currency: Option<String>,
    /// Insert thousands separators when rendering
    pub use_grouping: bool,
}

impl FluentNumber {
    pub fn new(value: Decimal) -> Self {
        FluentNumber {
            value,
            precision: None,
            formatted: None,
            currency: None,
            use_grouping: false,
        }
    }

    pub fn with_precision(value: Decimal, precision: u32) -> Self {
        FluentNumber {
            precision: Some(precision),
            ..FluentNumber::new(value)
        }
    }

    /// Digits with the precision applied, no grouping or currency.
    ///
    /// This is the plural-selection form: precision padding keeps the `v`
    /// operand visible (`1` with precision 2 renders `1.00`).
    pub fn as_string_ungrouped(&self) -> String {
        let mut value = self.value;
        if let Some(p) = self.precision {
            value.rescale(p.min(28));
        }
        value.to_string()
    }

    /// Full display form: precision, optional grouping, optional currency
    pub fn as_string(&self) -> String {
        if let Some(f) = &self.formatted {
            return f.clone();
        }
        let digits = self.as_string_ungrouped();
        let digits = if self.use_grouping {
            group_digits(&digits)
        } else {
            digits
        };
        match &self.currency {
            Some(code) => format!("{digits} {code}"),
            None => digits,
        }
    }
}

/// Insert `,` separators into the integer part of a plain decimal string
fn group_digits(digits: &str) -> String {
    let (sign, rest) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    let offset = int_part.len() % 3;
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

impl From<&str> for FluentValue {
    fn from(v: &str) -> Self {
        FluentValue::Str(v.to_string())
    }
}

impl From<String> for FluentValue {
    fn from(v: String) -> Self {
        FluentValue::Str(v)
    }
}

impl From<i64> for FluentValue {
    fn from(v: i64) -> Self {
        FluentValue::Int(v)
    }
}

impl From<i32> for FluentValue {
    fn from(v: i32) -> Self {
        FluentValue::Int(v as i64)
    }
}

impl From<f64> for FluentValue {
    fn from(v: f64) -> Self {
        FluentValue::Float(v)
    }
}

impl From<bool> for FluentValue {
    fn from(v: bool) -> Self {
        FluentValue::Bool(v)
    }
}

impl From<Decimal> for FluentValue {
    fn from(v: Decimal) -> Self {
        FluentValue::Decimal(v)
    }
}

impl From<NaiveDate> for FluentValue {
    fn from(v: NaiveDate) -> Self {
        FluentValue::Date(v)
    }
}

impl From<DateTime<FixedOffset>> for FluentValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        FluentValue::DateTime(v)
    }
}

impl From<FluentNumber> for FluentValue {
    fn from(v: FluentNumber) -> Self {
        FluentValue::Number(v)
    }
}

impl<T: Into<FluentValue>> From<Vec<T>> for FluentValue {
    fn from(v: Vec<T>) -> Self {
        FluentValue::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// Convenience for building argument maps in call sites and tests
#[macro_export]
macro_rules! args {
    () => { $crate::value::FluentArgs::new() };
    ($($name:ident => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::FluentArgs::new();
        $(map.insert(stringify!($name).to_string(), $crate::value::FluentValue::from($value));)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_display_strings() {
        assert_eq!(FluentValue::from("x").as_display_string(), "x");
        assert_eq!(FluentValue::from(42i64).as_display_string(), "42");
        assert_eq!(FluentValue::from(2.0).as_display_string(), "2");
        assert_eq!(FluentValue::from(2.5).as_display_string(), "2.5");
        assert_eq!(
            FluentValue::from(Decimal::from_str("1.00").unwrap()).as_display_string(),
            "1.00"
        );
    }

    #[test]
    fn test_plural_form_preserves_scale() {
        let d = Decimal::from_str("1.00").unwrap();
        assert_eq!(FluentValue::from(d).plural_form(), Some("1.00".into()));
        assert_eq!(FluentValue::from(1i64).plural_form(), Some("1".into()));
        assert_eq!(FluentValue::from("one").plural_form(), None);
    }

    #[test]
    fn test_number_precision_padding() {
        let n = FluentNumber::with_precision(Decimal::from(1), 2);
        assert_eq!(n.as_string(), "1.00");
        assert_eq!(n.as_string_ungrouped(), "1.00");
    }

    #[test]
    fn test_number_precision_rounding() {
        let n = FluentNumber::with_precision(Decimal::from_str("3.14159").unwrap(), 2);
        assert_eq!(n.as_string(), "3.14");
    }

    #[test]
    fn test_number_grouping() {
        let mut n = FluentNumber::new(Decimal::from_str("1234567.5").unwrap());
        n.use_grouping = true;
        assert_eq!(n.as_string(), "1,234,567.5");
        let mut neg = FluentNumber::new(Decimal::from(-1234));
        neg.use_grouping = true;
        assert_eq!(neg.as_string(), "-1,234");
    }

    #[test]
    fn test_number_currency() {
        let mut n = FluentNumber::with_precision(Decimal::from_str("12.5").unwrap(), 2);
        n.currency = Some("USD".to_string());
        assert_eq!(n.as_string(), "12.50 USD");
    }

    #[test]
    fn test_seq_display() {
        let v = FluentValue::Seq(vec![FluentValue::from("a"), FluentValue::from(1i64)]);
        assert_eq!(v.as_display_string(), "a, 1");
    }

    #[test]
    fn test_type_tags_distinguish_lookalikes() {
        assert_ne!(
            FluentValue::from(1i64).type_tag(),
            FluentValue::from(1.0).type_tag()
        );
        assert_ne!(
            FluentValue::from(true).type_tag(),
            FluentValue::from(1i64).type_tag()
        );
    }

    #[test]
    fn test_args_macro() {
        let a = args!(name => "Alice", count => 3i64);
        assert_eq!(a.get("name"), Some(&FluentValue::Str("Alice".into())));
        assert_eq!(a.get("count"), Some(&FluentValue::Int(3)));
    }
}
