use anyhow::{Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Represents different timeframe intervals for market data analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    OneDay,
    OneWeek,
}

impl Timeframe {
    /// Returns the duration of this timeframe in minutes
    pub fn to_minutes(&self) -> usize {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
            Timeframe::OneWeek => 10080,
        }
    }

    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        (self.to_minutes() * 60) as i64
    }

    /// Canonical short form used on the wire and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
            Timeframe::OneWeek => "1w",
        }
    }

    /// Returns all recognized timeframes in ascending order
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
            Timeframe::OneWeek,
        ]
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" | "onemin" => Ok(Timeframe::OneMin),
            "5m" | "5min" | "fivemin" => Ok(Timeframe::FiveMin),
            "15m" | "15min" | "fifteenmin" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" | "thirtymin" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" | "onehour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" | "fourhour" => Ok(Timeframe::FourHour),
            "1d" | "1day" | "oneday" => Ok(Timeframe::OneDay),
            "1w" | "1week" | "oneweek" => Ok(Timeframe::OneWeek),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(serde::de::Error::custom)
    }
}
