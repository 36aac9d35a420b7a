//! Trace position strings.
//!
//! A replay-integrated host names points on a trace timeline as
//! `SEQ:STEPS`, both in hex, with `'` or `` ` `` permitted as digit group
//! separators, plus the sentinel names `min`, `max`, and `invalidate`
//! (case-insensitive). This is the one replay wire format the store
//! reinterprets; it has no other coupling to trace recording.

use std::fmt;

/// A point on a trace timeline: a sequencing event plus a step count within
/// it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Position {
    /// The sequencing-event number.
    pub sequence: u64,
    /// The instruction-step count within the sequencing event.
    pub steps: u64,
}

impl Position {
    /// The earliest position on any timeline.
    pub const MIN: Position = Position {
        sequence: 0,
        steps: 0,
    };

    /// The latest position on any timeline.
    pub const MAX: Position = Position {
        sequence: 0xffff_ffff_ffff_fffe,
        steps: 0xffff_ffff_ffff_fffe,
    };

    /// The position that names no point on a timeline.
    pub const INVALID: Position = Position {
        sequence: u64::MAX,
        steps: u64::MAX,
    };

    /// Parses a position string. Returns `None` for anything that is not a
    /// sentinel or a well-formed hex position.
    ///
    /// A bare number with no `:` is a step count at sequence 0. At most 32
    /// hex digits (16 per component) are accepted.
    pub fn parse(text: &str) -> Option<Position> {
        if text.is_empty() {
            return None;
        }
        if text.eq_ignore_ascii_case("min") {
            return Some(Position::MIN);
        }
        if text.eq_ignore_ascii_case("max") {
            return Some(Position::MAX);
        }
        if text.eq_ignore_ascii_case("invalidate") {
            return Some(Position::INVALID);
        }

        const MAX_DIGITS: usize = 32;

        let mut digits = String::new();
        let mut seq_end = 0usize;
        for c in text.chars() {
            if c.is_ascii_hexdigit() {
                if digits.len() == MAX_DIGITS {
                    return None;
                }
                digits.push(c);
            } else if c == '`' || c == '\'' {
                // Grouping separator; contributes nothing.
            } else if c == ':' && !digits.is_empty() && seq_end == 0 {
                seq_end = digits.len();
            } else {
                return None;
            }
        }
        if digits.is_empty() {
            return None;
        }

        let sequence = if seq_end == 0 {
            0
        } else {
            u64::from_str_radix(&digits[..seq_end], 16).ok()?
        };
        let steps_digits = &digits[seq_end..];
        let steps = if steps_digits.is_empty() {
            0
        } else {
            u64::from_str_radix(steps_digits, 16).ok()?
        };

        Some(Position { sequence, steps })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Position::INVALID {
            return write!(f, "invalidate");
        }
        write!(f, "{:x}:{:x}", self.sequence, self.steps)
    }
}
