use std::fmt;
use thiserror::Error;

/// Maximum number of generated digits, keeps the value space within `u64`.
const MAX_PATTERN_DIGITS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternPart {
    Literal(String),
    Digits(u32),
}

/// Pattern describing the values an alias or value provider can hand out.
///
/// A pattern is literal text with `{digit:N}` placeholders, e.g. `9500872{digit:2}` produces
/// `950087200` … `950087299`. A pattern without placeholders produces exactly one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePattern {
    source: String,
    parts: Vec<PatternPart>,
}

impl ValuePattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let error = |reason: &str| PatternError { pattern: source.to_string(), reason: reason.to_string() };

        if source.is_empty() {
            return Err(error("pattern is empty"));
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        let mut total_digits = 0;

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut placeholder = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        placeholder.push(c);
                    }
                    if !closed {
                        return Err(error("unterminated placeholder"));
                    }
                    let count = placeholder
                        .strip_prefix("digit:")
                        .and_then(|n| n.parse::<u32>().ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(|| error(&format!("unknown placeholder '{{{}}}'", placeholder)))?;

                    total_digits += count;
                    if !literal.is_empty() {
                        parts.push(PatternPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(PatternPart::Digits(count));
                }
                '}' => return Err(error("unbalanced '}'")),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(PatternPart::Literal(literal));
        }

        if total_digits > MAX_PATTERN_DIGITS {
            return Err(error(&format!("more than {} generated digits", MAX_PATTERN_DIGITS)));
        }

        Ok(ValuePattern { source: source.to_string(), parts })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn digit_count(&self) -> u32 {
        self.parts.iter().map(|part| if let PatternPart::Digits(n) = part { *n } else { 0 }).sum()
    }

    pub fn value_count(&self) -> u64 {
        10u64.pow(self.digit_count())
    }

    /// The `index`-th value in ascending order.
    pub fn value_at(&self, index: u64) -> Option<String> {
        if index >= self.value_count() {
            return None;
        }

        let width = self.digit_count() as usize;
        let digits = if width == 0 { String::new() } else { format!("{:0width$}", index, width = width) };
        let mut digits = digits.chars();

        let mut value = String::new();
        for part in &self.parts {
            match part {
                PatternPart::Literal(text) => value.push_str(text),
                PatternPart::Digits(n) => value.extend(digits.by_ref().take(*n as usize)),
            }
        }
        Some(value)
    }

    pub fn values(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.value_count()).filter_map(move |index| self.value_at(index))
    }

    pub fn matches(&self, value: &str) -> bool {
        let mut rest = value;
        for part in &self.parts {
            match part {
                PatternPart::Literal(text) => match rest.strip_prefix(text.as_str()) {
                    Some(remaining) => rest = remaining,
                    None => return false,
                },
                PatternPart::Digits(n) => {
                    let n = *n as usize;
                    if rest.len() < n || !rest.as_bytes()[..n].iter().all(|b| b.is_ascii_digit()) {
                        return false;
                    }
                    rest = &rest[n..];
                }
            }
        }
        rest.is_empty()
    }
}

impl fmt::Display for ValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
