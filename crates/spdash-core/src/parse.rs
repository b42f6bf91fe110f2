//! Text input parsing for dashboard commands.

use crate::codec::{parse_time_text, UNKNOWN};
use crate::error::ParseError;
use crate::value::{SpValue, SpValueType};

const TRUE_WORDS: [&str; 5] = ["true", "t", "yes", "y", "1"];
const FALSE_WORDS: [&str; 5] = ["false", "f", "no", "n", "0"];

/// Parse a line of user input into a value of `target` type.
///
/// `UNKNOWN` (any case) yields the unknown value of the target type.
/// String input is taken verbatim, untrimmed.
pub fn parse_input(input: &str, target: SpValueType) -> Result<SpValue, ParseError> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(UNKNOWN) {
        return Ok(target.unknown());
    }

    match target {
        SpValueType::Bool => {
            let lower = trimmed.to_ascii_lowercase();
            if TRUE_WORDS.contains(&lower.as_str()) {
                Ok(SpValue::bool(true))
            } else if FALSE_WORDS.contains(&lower.as_str()) {
                Ok(SpValue::bool(false))
            } else {
                Err(ParseError::InvalidBool(input.to_string()))
            }
        }
        SpValueType::Int64 => trimmed
            .parse::<i64>()
            .map(SpValue::int)
            .map_err(|_| ParseError::InvalidInt(input.to_string())),
        SpValueType::Float64 => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(SpValue::float)
            .ok_or_else(|| ParseError::InvalidFloat(input.to_string())),
        SpValueType::Time => parse_time_text(trimmed)
            .map(|t| SpValue::Time(Some(t)))
            .ok_or_else(|| ParseError::InvalidTime(input.to_string())),
        SpValueType::String => Ok(SpValue::string(input)),
        SpValueType::Array | SpValueType::Map | SpValueType::Transform => {
            Err(ParseError::NotTextSettable(target))
        }
    }
}
