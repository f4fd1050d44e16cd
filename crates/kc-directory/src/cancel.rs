//! Cancellation of long-running fan-out operations.
//!
//! Search, bulk prime and assignment take a [`CancellationToken`]. Once it
//! is cancelled no new remote call is issued; calls already in flight run
//! to completion and their results are discarded.

pub use tokio_util::sync::CancellationToken;

use crate::error::{DirectoryError, DirectoryResult};

/// Fails with `Cancelled` if the token has been cancelled.
///
/// ## Errors
///
/// Returns [`DirectoryError::Cancelled`] after cancellation.
pub fn check(token: &CancellationToken) -> DirectoryResult<()> {
    if token.is_cancelled() {
        Err(DirectoryError::Cancelled)
    } else {
        Ok(())
    }
}
