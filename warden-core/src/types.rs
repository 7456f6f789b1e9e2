use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WardenError;

/// Cluster node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    /// Accepts decimal or `0x`-prefixed hexadecimal
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16).map(NodeId),
            None => s.parse().map(NodeId),
        }
    }
}

/// HA role of a system controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaRole {
    Undefined,
    Active,
    Standby,
    Quiesced,
    Quiescing,
}

impl HaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaRole::Undefined => "Undefined",
            HaRole::Active => "ACTIVE",
            HaRole::Standby => "STANDBY",
            HaRole::Quiesced => "QUIESCED",
            HaRole::Quiescing => "QUIESCING",
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            HaRole::Undefined => 0,
            HaRole::Active => 1,
            HaRole::Standby => 2,
            HaRole::Quiesced => 3,
            HaRole::Quiescing => 4,
        }
    }
}

impl fmt::Display for HaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u32> for HaRole {
    type Error = WardenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HaRole::Undefined),
            1 => Ok(HaRole::Active),
            2 => Ok(HaRole::Standby),
            3 => Ok(HaRole::Quiesced),
            4 => Ok(HaRole::Quiescing),
            other => Err(WardenError::InvalidRole { value: other }),
        }
    }
}

/// How this controller reached (or failed to reach) the active role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    NotActive,
    NotActiveSeenPeer,
    ActiveElected,
    ActiveElectedSeenPeer,
    ActiveFailover,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
