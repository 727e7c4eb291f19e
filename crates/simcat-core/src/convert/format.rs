//! printf-style formatting of floating point values.

use crate::{Result, SimcatError};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Fixed,
    Exp,
    General,
}

/// A parsed `%[.precision](f|e|g)` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleFormat {
    style: Style,
    precision: usize,
    upper: bool,
}

static FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%(?:\d+)?(?:\.(\d+))?([fFeEgG])$").expect("double format regex must compile")
});

impl DoubleFormat {
    /// Parse a format such as `%.15g`, `%.4f` or `%e`.
    pub fn parse(text: &str) -> Result<Self> {
        let caps = FORMAT_RE.captures(text.trim()).ok_or_else(|| {
            SimcatError::validation("doubleFormat", format!("unsupported format: {}", text))
        })?;

        let precision = match caps.get(1) {
            Some(p) => p
                .as_str()
                .parse()
                .map_err(|_| SimcatError::validation("doubleFormat", "invalid precision"))?,
            None => 6,
        };
        let conv = caps.get(2).map(|m| m.as_str()).unwrap_or("g");
        let style = match conv.to_ascii_lowercase().as_str() {
            "f" => Style::Fixed,
            "e" => Style::Exp,
            _ => Style::General,
        };

        Ok(Self {
            style,
            precision,
            upper: conv.chars().all(|c| c.is_ascii_uppercase()),
        })
    }

    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return value.to_string();
        }
        let text = match self.style {
            Style::Fixed => format!("{:.*}", self.precision, value),
            Style::Exp => exp_string(value, self.precision),
            Style::General => general_string(value, self.precision),
        };
        if self.upper {
            text.to_uppercase()
        } else {
            text
        }
    }
}

impl Default for DoubleFormat {
    fn default() -> Self {
        Self {
            style: Style::General,
            precision: 15,
            upper: false,
        }
    }
}

/// C-style `%e`: mantissa, sign and at least two exponent digits.
fn exp_string(value: f64, precision: usize) -> String {
    let (mantissa, exp) = split_exp(value, precision);
    format!(
        "{}e{}{:02}",
        mantissa,
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

fn split_exp(value: f64, precision: usize) -> (String, i32) {
    let text = format!("{:.*e}", precision, value);
    match text.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

/// C-style `%g`: shortest of fixed and exponent form, trailing zeros removed.
fn general_string(value: f64, precision: usize) -> String {
    let p = precision.max(1);
    let (_, exp) = split_exp(value, p - 1);

    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        strip_zeros(format!("{:.*}", decimals, value))
    } else {
        let (mantissa, exp) = split_exp(value, p - 1);
        format!(
            "{}e{}{:02}",
            strip_zeros(mantissa),
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    }
}

fn strip_zeros(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general() {
        let f = DoubleFormat::parse("%.15g").unwrap();
        assert_eq!(f.format(0.1), "0.1");
        assert_eq!(f.format(1234.5), "1234.5");
        assert_eq!(f.format(100.0), "100");
        assert_eq!(f.format(1e20), "1e+20");
        assert_eq!(f.format(0.00001234), "1.234e-05");
    }

    #[test]
    fn test_fixed_and_exp() {
        assert_eq!(DoubleFormat::parse("%.4f").unwrap().format(2.5), "2.5000");
        assert_eq!(DoubleFormat::parse("%e").unwrap().format(1500.0), "1.500000e+03");
        assert_eq!(DoubleFormat::parse("%.2E").unwrap().format(0.015), "1.50E-02");
    }

    #[test]
    fn test_rejects_unknown() {
        assert!(DoubleFormat::parse("%d").is_err());
        assert!(DoubleFormat::parse("abc").is_err());
    }
}
