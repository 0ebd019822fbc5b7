//! Provider-tagged user identities
//!
//! Token verification happens upstream. This module only decodes the verified
//! claims once, at the trust boundary, into a closed set of variants.

use crate::common::types::Player;
use crate::errors::{MatchdayResult, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoogleUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppleUser {
    pub id: String,
    /// Apple may withhold the address after the first sign-in
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Verified identity of a caller
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum OAuthUser {
    Google(GoogleUser),
    Apple(AppleUser),
}

impl OAuthUser {
    pub fn from_json(value: serde_json::Value) -> MatchdayResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| ValidationError::InvalidIdentity(e.to_string()).into())
    }

    /// Player id namespaced by provider so ids from different providers never collide
    pub fn player_id(&self) -> String {
        match self {
            OAuthUser::Google(u) => format!("google:{}", u.id),
            OAuthUser::Apple(u) => format!("apple:{}", u.id),
        }
    }

    pub fn into_player(self) -> Player {
        let id = self.player_id();
        let display_name = match self {
            OAuthUser::Google(u) => u.name,
            OAuthUser::Apple(u) => u
                .name
                .or(u.email.and_then(|e| e.split('@').next().map(str::to_string)))
                .unwrap_or_else(|| "player".to_string()),
        };
        Player { id, display_name }
    }
}
