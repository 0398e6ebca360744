//! Domain primitives: InstrumentId, AccountId, Ticker, Direction.

use serde::{Deserialize, Serialize};

/// Opaque venue instrument identifier (uid string, never parsed).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

impl InstrumentId {
    /// Create an InstrumentId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        InstrumentId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Brokerage account identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create an AccountId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    /// Get the account id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange ticker symbol (e.g. "SBER", "SiZ5").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticker(pub String);

impl Ticker {
    /// Create a Ticker from a string.
    pub fn new(ticker: impl Into<String>) -> Self {
        Ticker(ticker.into())
    }

    /// Get the ticker as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Long position (positive lots).
    Long,
    /// Short position (negative lots).
    Short,
    /// Direction could not be determined from the snapshot.
    Unknown,
}

impl Direction {
    /// Derive the direction from a signed lot count.
    pub fn from_lots(lots: i64) -> Self {
        match lots {
            l if l > 0 => Direction::Long,
            l if l < 0 => Direction::Short,
            _ => Direction::Unknown,
        }
    }

    /// Round-trip with the database TEXT column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Unknown => "unknown",
        }
    }

    /// Parse the database TEXT column back into a Direction.
    ///
    /// Unrecognized values map to `Unknown` rather than erroring: a stored
    /// direction the code no longer knows must not break position loading.
    pub fn parse(s: &str) -> Self {
        match s {
            "long" => Direction::Long,
            "short" => Direction::Short,
            _ => Direction::Unknown,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_lots() {
        assert_eq!(Direction::from_lots(3), Direction::Long);
        assert_eq!(Direction::from_lots(-1), Direction::Short);
        assert_eq!(Direction::from_lots(0), Direction::Unknown);
    }

    #[test]
    fn test_direction_round_trip() {
        for d in [Direction::Long, Direction::Short, Direction::Unknown] {
            assert_eq!(Direction::parse(d.as_str()), d);
        }
        assert_eq!(Direction::parse("sideways"), Direction::Unknown);
    }

    #[test]
    fn test_instrument_id_display() {
        let id = InstrumentId::new("a92e2e25-a698");
        assert_eq!(id.to_string(), "a92e2e25-a698");
    }

    #[test]
    fn test_direction_serialization() {
        let json = serde_json::to_string(&Direction::Long).unwrap();
        assert_eq!(json, "\"long\"");
    }
}
