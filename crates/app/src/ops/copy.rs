use std::sync::Arc;

use clap::Args;
use common::copy::{copy, CopyOptions};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, StoreRole};

#[derive(Args, Debug, Clone)]
pub struct Copy {
    /// Reference to copy from the source store
    pub src_ref: String,

    /// Reference to tag at the destination (defaults to the source reference)
    pub dst_ref: Option<String>,

    /// Maximum number of nodes copied concurrently (defaults to the config value)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Copy(#[from] common::copy::CopyError),
}

#[async_trait::async_trait]
impl crate::op::Op for Copy {
    type Error = CopyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let src = Arc::new(ctx.config.open_store(StoreRole::Source).await?);
        let dst = Arc::new(ctx.config.open_store(StoreRole::Destination).await?);
        let dst_ref = self.dst_ref.as_deref().unwrap_or_default();
        let opts = CopyOptions {
            concurrency: self.concurrency.unwrap_or(ctx.config.concurrency),
        };

        // ctrl-c cancels the copy; whatever already landed stays valid
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling copy");
                on_interrupt.cancel();
            }
        });

        let result = copy(src, &self.src_ref, dst, dst_ref, &opts, &cancel).await;
        interrupt.abort();
        let root = result?;

        let tagged = if dst_ref.is_empty() {
            self.src_ref.as_str()
        } else {
            dst_ref
        };
        Ok(format!("{} -> {} ({})", self.src_ref, tagged, root.digest()))
    }
}
