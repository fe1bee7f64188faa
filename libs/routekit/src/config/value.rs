//! Typed view of raw configuration text.

use serde::Serialize;

/// A configuration value typed from its raw text.
///
/// Cascade: boolean literal, then bracketed list, then float literal, else string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    List(Vec<ConfigValue>),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Some(b) = parse_bool(text) {
            return Self::Bool(b);
        }
        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return Self::List(parse_list(inner));
        }
        if is_float_literal(text) {
            if let Ok(f) = text.parse::<f64>() {
                return Self::Float(f);
            }
        }
        Self::String(text.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Decimal number with optional sign, fraction and exponent. `inf`/`nan` are not floats here.
pub(crate) fn is_float_literal(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !digits(int_part) || !digits(frac_part) {
        return false;
    }
    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && digits(exp)
        }
    }
}

/// Strip one pair of matching single or double quotes.
pub(crate) fn unquote(text: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

fn parse_list(inner: &str) -> Vec<ConfigValue> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            if let Some(s) = unquote(item) {
                return ConfigValue::String(s.to_string());
            }
            if is_float_literal(item) {
                if let Ok(f) = item.parse::<f64>() {
                    return ConfigValue::Float(f);
                }
            }
            ConfigValue::String(item.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_cascade() {
        assert_eq!(ConfigValue::parse("true"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::parse("FALSE"), ConfigValue::Bool(false));
        assert_eq!(ConfigValue::parse("2"), ConfigValue::Float(2.0));
        assert_eq!(ConfigValue::parse("-1.5e3"), ConfigValue::Float(-1500.0));
        assert_eq!(
            ConfigValue::parse("Handler::run"),
            ConfigValue::String("Handler::run".into())
        );
    }

    #[test]
    fn lists_hold_floats_and_strings() {
        assert_eq!(
            ConfigValue::parse("[1,2,3]"),
            ConfigValue::List(vec![
                ConfigValue::Float(1.0),
                ConfigValue::Float(2.0),
                ConfigValue::Float(3.0)
            ])
        );
        assert_eq!(
            ConfigValue::parse("[ a, '2', 3.5 ]"),
            ConfigValue::List(vec![
                ConfigValue::String("a".into()),
                ConfigValue::String("2".into()),
                ConfigValue::Float(3.5)
            ])
        );
        assert_eq!(ConfigValue::parse("[]"), ConfigValue::List(vec![]));
    }

    #[test]
    fn multiline_list_text() {
        let raw = "[\n  one,\n  two\n]";
        assert_eq!(
            ConfigValue::parse(raw),
            ConfigValue::List(vec![
                ConfigValue::String("one".into()),
                ConfigValue::String("two".into())
            ])
        );
    }

    #[test]
    fn special_float_words_stay_strings() {
        for word in ["inf", "NaN", "infinity", ".", "1e", "e5", "+"] {
            assert!(!is_float_literal(word), "{word} must not be a float");
        }
        for num in ["1", "1.", ".5", "+2.25", "3E-2"] {
            assert!(is_float_literal(num), "{num} must be a float");
        }
    }
}
