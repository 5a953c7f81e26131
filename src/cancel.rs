//! Cancellation and deadline guard for awaited collaborator calls.

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result};

/// Await `fut` unless `cancel` fires or `deadline` passes first.
///
/// Cancellation surfaces as [`RagError::Cancelled`], an elapsed deadline as
/// [`RagError::DeadlineExceeded`]. A token that is already cancelled
/// short-circuits without polling `fut`.
pub async fn guard<T, F>(cancel: &CancellationToken, deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }
    let work = async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RagError::Cancelled),
            out = fut => out,
        }
    };
    match deadline {
        Some(at) => tokio::time::timeout_at(at, work)
            .await
            .map_err(|_| RagError::DeadlineExceeded)?,
        None => work.await,
    }
}
