use crate::models::{BlockSet, WorkspaceId};
use crate::utils::validation::normalize_extension;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Source of the blocked extensions of a workspace. Consulted on every
/// validation; implementations must not cache across requests.
#[async_trait]
pub trait BlockSetProvider: Send + Sync {
    /// Active rules only, lower-cased
    async fn blocked_extensions(&self, workspace_id: WorkspaceId) -> Result<BlockSet>;
}

/// Normalizes raw extensions into a block set, dropping blanks
pub fn block_set_from<I, S>(extensions: I) -> BlockSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|ext| normalize_extension(ext.as_ref()))
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// In-memory provider for tests and the CLI
#[derive(Default)]
pub struct StaticBlockSets {
    sets: RwLock<HashMap<WorkspaceId, BlockSet>>,
}

impl StaticBlockSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace<I, S>(workspace_id: WorkspaceId, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sets = HashMap::new();
        sets.insert(workspace_id, block_set_from(extensions));
        Self {
            sets: RwLock::new(sets),
        }
    }

    /// Replace the block set of one workspace
    pub async fn set<I, S>(&self, workspace_id: WorkspaceId, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sets
            .write()
            .await
            .insert(workspace_id, block_set_from(extensions));
    }
}

#[async_trait]
impl BlockSetProvider for StaticBlockSets {
    async fn blocked_extensions(&self, workspace_id: WorkspaceId) -> Result<BlockSet> {
        Ok(self
            .sets
            .read()
            .await
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default())
    }
}
