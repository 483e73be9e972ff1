//! `Span`, a signed time span written the way schedules store it
//! (`"2h0m0s"`, `"90m"`, `"1.5h"`, `"-30s"`).

use std::{fmt, str::FromStr};

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::ValidationError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MIN: u128 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MIN;

/// A signed time span with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span(TimeDelta);

impl Span {
  pub const fn from_delta(delta: TimeDelta) -> Self { Self(delta) }

  pub fn from_minutes(minutes: i64) -> Self { Self(TimeDelta::minutes(minutes)) }

  pub fn as_delta(self) -> TimeDelta { self.0 }

  pub fn is_positive(self) -> bool { self.0 > TimeDelta::zero() }

  /// Whole minutes, truncated toward zero.
  pub fn whole_minutes(self) -> i64 { self.0.num_minutes() }

  /// Parse and require a strictly positive span.
  pub fn parse_positive(input: &str) -> Result<Self, ValidationError> {
    let span: Span = input.parse()?;
    if !span.is_positive() {
      return Err(ValidationError::NonPositiveDuration(input.to_owned()));
    }
    Ok(span)
  }
}

fn unit_nanos(unit: &str) -> Option<u128> {
  match unit {
    "ns" => Some(1),
    "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
    "ms" => Some(NANOS_PER_MILLI),
    "s" => Some(NANOS_PER_SEC),
    "m" => Some(NANOS_PER_MIN),
    "h" => Some(NANOS_PER_HOUR),
    _ => None,
  }
}

impl FromStr for Span {
  type Err = ValidationError;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let invalid = |reason: &str| ValidationError::InvalidDuration {
      input:  input.to_owned(),
      reason: reason.to_owned(),
    };

    let (negative, mut rest) = match input.as_bytes().first() {
      Some(b'-') => (true, &input[1..]),
      Some(b'+') => (false, &input[1..]),
      _ => (false, input),
    };

    if rest == "0" {
      return Ok(Self::default());
    }
    if rest.is_empty() {
      return Err(invalid("empty"));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
      let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
      let int_part = &rest[..int_len];
      rest = &rest[int_len..];

      let mut frac_part = "";
      if let Some(after_dot) = rest.strip_prefix('.') {
        let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
        frac_part = &after_dot[..frac_len];
        rest = &after_dot[frac_len..];
      }
      if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid("expected a number"));
      }

      let unit_len = rest
        .char_indices()
        .find(|(_, c)| *c == '.' || c.is_ascii_digit())
        .map_or(rest.len(), |(i, _)| i);
      let unit = &rest[..unit_len];
      rest = &rest[unit_len..];
      if unit.is_empty() {
        return Err(invalid("missing unit"));
      }
      let scale = unit_nanos(unit).ok_or_else(|| invalid("unknown unit"))?;

      let whole: u128 = if int_part.is_empty() {
        0
      } else {
        int_part.parse().map_err(|_| invalid("number out of range"))?
      };
      let mut value = whole.checked_mul(scale).ok_or_else(|| invalid("overflow"))?;

      if !frac_part.is_empty() {
        // Digits past nanosecond precision of the largest unit carry no weight.
        let digits = &frac_part[..frac_part.len().min(18)];
        let numer: u128 = digits.parse().map_err(|_| invalid("bad fraction"))?;
        let denom = 10u128.pow(digits.len() as u32);
        value += numer * scale / denom;
      }
      total = total.checked_add(value).ok_or_else(|| invalid("overflow"))?;
    }

    let nanos = i64::try_from(total).map_err(|_| invalid("overflow"))?;
    let nanos = if negative { -nanos } else { nanos };
    Ok(Self(TimeDelta::nanoseconds(nanos)))
  }
}

/// Render `value / unit` with the fraction trimmed of trailing zeros.
fn write_scaled(f: &mut fmt::Formatter<'_>, value: u128, unit: u128) -> fmt::Result {
  let whole = value / unit;
  let frac = value % unit;
  write!(f, "{whole}")?;
  if frac != 0 {
    let width = (unit.ilog10()) as usize;
    let digits = format!("{frac:0width$}");
    write!(f, ".{}", digits.trim_end_matches('0'))?;
  }
  Ok(())
}

impl fmt::Display for Span {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let nanos = self.0.num_nanoseconds().unwrap_or(i64::MAX);
    if nanos == 0 {
      return f.write_str("0s");
    }
    if nanos < 0 {
      f.write_str("-")?;
    }
    let abs = u128::from(nanos.unsigned_abs());

    if abs < NANOS_PER_MICRO {
      return write!(f, "{abs}ns");
    }
    if abs < NANOS_PER_SEC {
      let (unit, suffix) = if abs < NANOS_PER_MILLI {
        (NANOS_PER_MICRO, "µs")
      } else {
        (NANOS_PER_MILLI, "ms")
      };
      write_scaled(f, abs, unit)?;
      return f.write_str(suffix);
    }

    let hours = abs / NANOS_PER_HOUR;
    let minutes = (abs % NANOS_PER_HOUR) / NANOS_PER_MIN;
    let seconds = abs % NANOS_PER_MIN;
    if hours > 0 {
      write!(f, "{hours}h")?;
    }
    if hours > 0 || minutes > 0 {
      write!(f, "{minutes}m")?;
    }
    write_scaled(f, seconds, NANOS_PER_SEC)?;
    f.write_str("s")
  }
}

impl Serialize for Span {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Span {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn span(s: &str) -> Span { s.parse().unwrap() }

  #[test]
  fn parses_compound_spans() {
    assert_eq!(span("2h0m0s").as_delta(), TimeDelta::hours(2));
    assert_eq!(span("1h30m").as_delta(), TimeDelta::minutes(90));
    assert_eq!(span("90m").as_delta(), TimeDelta::minutes(90));
    assert_eq!(span("1.5h").as_delta(), TimeDelta::minutes(90));
    assert_eq!(span("-30s").as_delta(), TimeDelta::seconds(-30));
    assert_eq!(span("250ms").as_delta(), TimeDelta::milliseconds(250));
    assert_eq!(span("0").as_delta(), TimeDelta::zero());
  }

  #[test]
  fn rejects_malformed_spans() {
    for bad in ["", "h", "2", "2x", "1h30", ".h", "-", "2h 30m"] {
      assert!(bad.parse::<Span>().is_err(), "{bad:?} should not parse");
    }
  }

  #[test]
  fn positive_parse_rejects_zero_and_negative() {
    assert!(matches!(
      Span::parse_positive("0s"),
      Err(ValidationError::NonPositiveDuration(_))
    ));
    assert!(matches!(
      Span::parse_positive("-1h"),
      Err(ValidationError::NonPositiveDuration(_))
    ));
    assert!(Span::parse_positive("1h").is_ok());
  }

  #[test]
  fn displays_like_the_stored_form() {
    assert_eq!(span("2h").to_string(), "2h0m0s");
    assert_eq!(span("90m").to_string(), "1h30m0s");
    assert_eq!(span("30m").to_string(), "30m0s");
    assert_eq!(span("45s").to_string(), "45s");
    assert_eq!(span("1.5s").to_string(), "1.5s");
    assert_eq!(span("-2h").to_string(), "-2h0m0s");
    assert_eq!(span("250ms").to_string(), "250ms");
    assert_eq!(Span::default().to_string(), "0s");
  }

  proptest! {
    #[test]
    fn display_parses_back(secs in -86_400i64 * 7..86_400i64 * 7) {
      let original = Span::from_delta(TimeDelta::seconds(secs));
      let reparsed: Span = original.to_string().parse().unwrap();
      prop_assert_eq!(original, reparsed);
    }
  }
}
