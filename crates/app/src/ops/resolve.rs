use clap::Args;
use common::storage::{Resolver, StorageError};

use crate::config::{ConfigError, StoreRole};

#[derive(Args, Debug, Clone)]
pub struct Resolve {
    /// Reference (tag) to look up
    pub reference: String,

    /// Look the reference up in the destination store instead of the source
    #[arg(long)]
    pub destination: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to resolve {reference}: {source}")]
    Storage {
        reference: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to encode descriptor: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Resolve {
    type Error = ResolveError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let role = if self.destination {
            StoreRole::Destination
        } else {
            StoreRole::Source
        };
        let store = ctx.config.open_store(role).await?;

        let desc = store
            .resolve(&self.reference)
            .await
            .map_err(|source| ResolveError::Storage {
                reference: self.reference.clone(),
                source,
            })?;

        Ok(serde_json::to_string_pretty(&desc)?)
    }
}
