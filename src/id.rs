use std::fmt;

use crate::error::{Result, TimerError};

/// Identifier of a timer: a positive number or a non-empty name.
///
/// Names that are the canonical decimal form of a number (`"7"`, not
/// `"07"`) are stored as numbers, so `TimerId::from("7") == TimerId::Num(7)`.
/// Ordering puts numbers first, ascending, then names lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    Num(u64),
    Name(String),
}

impl TimerId {
    /// Rejects the empty name and zero.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Num(0) => Err(TimerError::InvalidIdentifier("0".to_string())),
            Self::Name(name) if name.is_empty() => {
                Err(TimerError::InvalidIdentifier(String::new()))
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn as_num(&self) -> Option<u64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for TimerId {
    fn from(n: u64) -> Self {
        Self::Num(n)
    }
}

impl From<String> for TimerId {
    fn from(name: String) -> Self {
        match name.parse::<u64>() {
            Ok(n) if n.to_string() == name => Self::Num(n),
            _ => Self::Name(name),
        }
    }
}

impl From<&str> for TimerId {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_numbers_collapse() {
        assert_eq!(TimerId::from("42"), TimerId::Num(42));
        assert_eq!(TimerId::from("042"), TimerId::Name("042".to_string()));
        assert_eq!(TimerId::from("+4"), TimerId::Name("+4".to_string()));
    }

    #[test]
    fn test_validate() {
        assert!(TimerId::Num(1).validate().is_ok());
        assert!(TimerId::from("job").validate().is_ok());
        assert_eq!(
            TimerId::Num(0).validate(),
            Err(TimerError::InvalidIdentifier("0".to_string()))
        );
        assert!(matches!(
            TimerId::from("").validate(),
            Err(TimerError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_ordering_numbers_before_names() {
        let mut ids = vec![
            TimerId::from("b"),
            TimerId::Num(10),
            TimerId::from("a"),
            TimerId::Num(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                TimerId::Num(2),
                TimerId::Num(10),
                TimerId::from("a"),
                TimerId::from("b"),
            ]
        );
    }
}
