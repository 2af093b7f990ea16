// Region tables for the CoolKit cloud.
//
// Both the REST gateway and the realtime dispatch service are sharded by
// account region. The four codes are fixed; anything else is a
// configuration error caught before any network attempt.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

/// The region an account is registered in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Region {
    /// Mainland China.
    Cn,
    /// Americas.
    Us,
    /// Europe.
    Eu,
    /// Asia.
    As,
}

impl Region {
    /// Parse a region code, mapping failures to [`Error::UnknownRegion`].
    pub fn parse(code: &str) -> Result<Self, Error> {
        code.parse().map_err(|_| Error::UnknownRegion {
            region: code.to_owned(),
        })
    }

    /// Base URL of the region's REST gateway.
    pub fn api_base(self) -> &'static str {
        match self {
            Self::Cn => "https://cn-apia.coolkit.cn",
            Self::Us => "https://us-apia.coolkit.cc",
            Self::Eu => "https://eu-apia.coolkit.cc",
            Self::As => "https://as-apia.coolkit.cc",
        }
    }

    /// URL of the region's realtime dispatch service. One unauthenticated
    /// GET here yields the gateway host/port for WebSocket connections.
    pub fn dispatch_url(self) -> &'static str {
        match self {
            Self::Cn => "https://cn-dispa.coolkit.cn/dispatch/app",
            Self::Us => "https://us-dispa.coolkit.cc/dispatch/app",
            Self::Eu => "https://eu-dispa.coolkit.cc/dispatch/app",
            Self::As => "https://as-dispa.coolkit.cc/dispatch/app",
        }
    }
}
