// 🏛️ Jurisdictions - The two state governments being compared

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Jurisdiction - which state's accounting system a table came from
///
/// Closed on purpose: adding a state means adding a loader and mapping rows,
/// which is a code change anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Jurisdiction {
    Maine,
    NewHampshire,
}

impl Jurisdiction {
    pub const ALL: [Jurisdiction; 2] = [Jurisdiction::Maine, Jurisdiction::NewHampshire];

    /// Name as it appears in the `State` column of the mapping files
    pub fn full_name(&self) -> &'static str {
        match self {
            Jurisdiction::Maine => "Maine",
            Jurisdiction::NewHampshire => "New Hampshire",
        }
    }

    /// Postal code, used for column headers and file names
    pub fn code(&self) -> &'static str {
        match self {
            Jurisdiction::Maine => "ME",
            Jurisdiction::NewHampshire => "NH",
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name())
    }
}

impl FromStr for Jurisdiction {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Jurisdiction::ALL
            .into_iter()
            .find(|j| {
                j.full_name().eq_ignore_ascii_case(wanted) || j.code().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| PipelineError::UnknownJurisdiction(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_name_and_code() {
        assert_eq!("Maine".parse::<Jurisdiction>().unwrap(), Jurisdiction::Maine);
        assert_eq!("new hampshire".parse::<Jurisdiction>().unwrap(), Jurisdiction::NewHampshire);
        assert_eq!(" NH ".parse::<Jurisdiction>().unwrap(), Jurisdiction::NewHampshire);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "Vermont".parse::<Jurisdiction>().unwrap_err();
        assert_eq!(err, PipelineError::UnknownJurisdiction("Vermont".to_string()));
    }
}
