use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{GenFlowError, Result};

/// 让一个网络调用与取消信号竞争；取消优先
pub async fn run_cancellable<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenFlowError::Cancelled),
        output = fut => Ok(output),
    }
}
