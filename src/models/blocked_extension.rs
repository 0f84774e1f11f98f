use crate::models::WorkspaceId;
use crate::utils::validation::validate_extension_token;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seeded for every workspace at provisioning; toggle-only, never deleted
pub const FIXED_EXTENSIONS: &[&str] = &["bat", "cmd", "com", "cpl", "exe", "js", "scr"];

/// Active custom rules allowed per workspace
pub const MAX_CUSTOM_EXTENSIONS: usize = 200;

/// Entities that are deactivated instead of being removed
pub trait SoftDeletable {
    fn is_active(&self) -> bool;
    fn deactivate(&mut self);
}

/// A validated, lower-cased extension without the leading dot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExtensionToken(String);

impl ExtensionToken {
    pub fn parse(raw: &str) -> Result<Self> {
        validate_extension_token(raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtensionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ExtensionToken {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ExtensionToken> for String {
    fn from(token: ExtensionToken) -> Self {
        token.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionOrigin {
    Fixed,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedExtensionRule {
    pub workspace_id: WorkspaceId,
    pub extension: ExtensionToken,
    pub origin: ExtensionOrigin,
    pub active: bool,
}

impl BlockedExtensionRule {
    /// Fixed rules start unchecked; the workspace admin opts into them
    pub fn fixed(workspace_id: WorkspaceId, extension: ExtensionToken) -> Self {
        Self {
            workspace_id,
            extension,
            origin: ExtensionOrigin::Fixed,
            active: false,
        }
    }

    pub fn custom(workspace_id: WorkspaceId, extension: ExtensionToken) -> Self {
        Self {
            workspace_id,
            extension,
            origin: ExtensionOrigin::Custom,
            active: true,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.origin == ExtensionOrigin::Fixed
    }
}

impl SoftDeletable for BlockedExtensionRule {
    fn is_active(&self) -> bool {
        self.active
    }

    fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Fixed rules for a freshly provisioned workspace
pub fn fixed_rules(workspace_id: WorkspaceId) -> Vec<BlockedExtensionRule> {
    FIXED_EXTENSIONS
        .iter()
        .filter_map(|ext| ExtensionToken::parse(ext).ok())
        .map(|token| BlockedExtensionRule::fixed(workspace_id, token))
        .collect()
}
