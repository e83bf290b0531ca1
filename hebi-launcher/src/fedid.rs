use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// A federated user identifier.
///
/// The FedID is the primary key for all session state, resource names and
/// ingress paths, so it is validated once at the boundary: lowercase ASCII
/// letters and digits only, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Fedid(SmolStr);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid FedID `{value}`: expected lowercase alphanumeric")]
pub struct InvalidFedid {
    pub value: String,
}

impl Fedid {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Fedid {
    type Err = InvalidFedid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_valid = !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());

        if is_valid {
            Ok(Self(SmolStr::new(s)))
        } else {
            Err(InvalidFedid { value: s.to_owned() })
        }
    }
}

impl TryFrom<String> for Fedid {
    type Error = InvalidFedid;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Fedid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Fedid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
