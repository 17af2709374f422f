//! Bus operating mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the client takes part on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    /// Bus master: polls the device and may write config.
    #[default]
    Direct,
    /// Listen-only: decodes traffic of an existing master, never transmits.
    Eavesdrop,
}

impl BusMode {
    pub fn can_transmit(self) -> bool {
        self == BusMode::Direct
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BusMode::Direct => "direct",
            BusMode::Eavesdrop => "eavesdrop",
        }
    }
}

impl fmt::Display for BusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(BusMode::Direct),
            "eavesdrop" => Ok(BusMode::Eavesdrop),
            other => Err(format!(
                "unknown bus mode '{other}' (expected direct or eavesdrop)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("direct".parse::<BusMode>().unwrap(), BusMode::Direct);
        assert_eq!(" Eavesdrop ".parse::<BusMode>().unwrap(), BusMode::Eavesdrop);
        assert!("master".parse::<BusMode>().is_err());
        assert_eq!(BusMode::default(), BusMode::Direct);
    }

    #[test]
    fn test_transmit_rights() {
        assert!(BusMode::Direct.can_transmit());
        assert!(!BusMode::Eavesdrop.can_transmit());
    }
}
