//! Parameter-name classification and value parsing.
//!
//! A lookup parameter drives one of four things on an instance, decided by
//! its name alone:
//!
//! - `@TAG`: writes the text field `TAG`
//! - names containing a scale keyword: uniform scale
//! - names containing a position/offset keyword: translation
//! - names of an existing typed parameter: that parameter's value
//!
//! Rules are checked in that order; the first match wins.

use crate::config::DriverKeywords;
use bl_core::Point3;
use winnow::ascii::multispace0;
use winnow::combinator::{delimited, opt};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

/// What a lookup parameter drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamDriver {
    Scale,
    Position,
    /// Text field with this tag (the `@` prefix stripped).
    Field(String),
    TypedParameter,
    Unknown,
}

/// Classify a parameter name.
///
/// `is_parameter` answers whether the instance has a typed parameter with
/// that exact name.
pub fn classify(
    name: &str,
    keywords: &DriverKeywords,
    is_parameter: impl Fn(&str) -> bool,
) -> ParamDriver {
    if let Some(tag) = name.strip_prefix('@') {
        return if tag.is_empty() {
            ParamDriver::Unknown
        } else {
            ParamDriver::Field(tag.to_string())
        };
    }

    let lowered = name.to_lowercase();
    let contains_any = |words: &[String]| {
        words
            .iter()
            .any(|w| !w.is_empty() && lowered.contains(&w.to_lowercase()))
    };

    if contains_any(&keywords.scale) {
        ParamDriver::Scale
    } else if contains_any(&keywords.position) {
        ParamDriver::Position
    } else if is_parameter(name) {
        ParamDriver::TypedParameter
    } else {
        ParamDriver::Unknown
    }
}

// ─── Value parsing ────────────────────────────────────────────────────────

/// `[+-]digits[.digits][(e|E)[+-]digits]`, also accepting `.5` and `5.`.
fn decimal(input: &mut &str) -> ModalResult<f64> {
    let start = *input;
    let _ = opt(one_of(['+', '-'])).parse_next(input)?;
    let int_digits = take_while(0.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let mut frac_len = 0;
    if input.starts_with('.') {
        *input = &input[1..];
        let frac: &str = take_while(0.., |c: char| c.is_ascii_digit()).parse_next(input)?;
        frac_len = frac.len();
    }
    if int_digits.is_empty() && frac_len == 0 {
        return Err(winnow::error::ErrMode::Backtrack(ContextError::new()));
    }
    if input.starts_with(['e', 'E']) {
        let checkpoint = *input;
        *input = &input[1..];
        let _ = opt(one_of(['+', '-'])).parse_next(input)?;
        let exp =
            take_while::<_, _, ContextError>(1.., |c: char| c.is_ascii_digit()).parse_next(input);
        if exp.is_err() {
            *input = checkpoint;
        }
    }
    let matched = &start[..start.len() - input.len()];
    matched
        .parse::<f64>()
        .map_err(|_| winnow::error::ErrMode::Backtrack(ContextError::new()))
}

fn padded_decimal(input: &mut &str) -> ModalResult<f64> {
    delimited(multispace0, decimal, multispace0).parse_next(input)
}

/// Parse a whole string as a finite decimal number, ignoring surrounding
/// whitespace.
pub fn parse_number(text: &str) -> Option<f64> {
    padded_decimal.parse(text).ok().filter(|v| v.is_finite())
}

/// Parse `x,y[,z]`. Missing or unparsable components are 0.
pub fn parse_offset(text: &str) -> Point3 {
    let mut parts = text.split(',').map(|p| parse_number(p).unwrap_or(0.0));
    let x = parts.next().unwrap_or(0.0);
    let y = parts.next().unwrap_or(0.0);
    let z = parts.next().unwrap_or(0.0);
    Point3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_params(_: &str) -> bool {
        false
    }

    #[test]
    fn field_prefix_wins_over_keywords() {
        let kw = DriverKeywords::default();
        assert_eq!(
            classify("@SCALE_NOTE", &kw, no_params),
            ParamDriver::Field("SCALE_NOTE".into())
        );
        assert_eq!(classify("@", &kw, no_params), ParamDriver::Unknown);
    }

    #[test]
    fn keywords_are_case_insensitive_substrings() {
        let kw = DriverKeywords::default();
        assert_eq!(classify("DrawingScale", &kw, no_params), ParamDriver::Scale);
        assert_eq!(classify("insert_POSITION", &kw, no_params), ParamDriver::Position);
        assert_eq!(classify("LabelOffset", &kw, no_params), ParamDriver::Position);
    }

    #[test]
    fn localized_keywords() {
        let kw = DriverKeywords::default();
        assert_eq!(classify("图纸比例", &kw, no_params), ParamDriver::Scale);
        assert_eq!(classify("插入位置", &kw, no_params), ParamDriver::Position);
        assert_eq!(classify("文字偏移", &kw, no_params), ParamDriver::Position);
    }

    #[test]
    fn scale_checked_before_position() {
        let kw = DriverKeywords::default();
        assert_eq!(classify("scale_offset", &kw, no_params), ParamDriver::Scale);
    }

    #[test]
    fn typed_parameter_and_unknown() {
        let kw = DriverKeywords::default();
        let is_param = |n: &str| n == "Length";
        assert_eq!(classify("Length", &kw, is_param), ParamDriver::TypedParameter);
        assert_eq!(classify("length", &kw, is_param), ParamDriver::Unknown);
        assert_eq!(classify("Material", &kw, is_param), ParamDriver::Unknown);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("2"), Some(2.0));
        assert_eq!(parse_number(" -1.5 "), Some(-1.5));
        assert_eq!(parse_number("+.5"), Some(0.5));
        assert_eq!(parse_number("3."), Some(3.0));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("2.5E-1"), Some(0.25));
        assert_eq!(parse_number("1e400"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("1.2.3"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("12mm"), None);
    }

    #[test]
    fn offsets_default_missing_components() {
        assert_eq!(parse_offset("1,2,3"), Point3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_offset("5, -2"), Point3::new(5.0, -2.0, 0.0));
        assert_eq!(parse_offset("x,4"), Point3::new(0.0, 4.0, 0.0));
        assert_eq!(parse_offset("7"), Point3::new(7.0, 0.0, 0.0));
        assert_eq!(parse_offset(""), Point3::ORIGIN);
    }
}
