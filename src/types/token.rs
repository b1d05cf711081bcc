/// A cancellation token used to stop a running reconciliation.
///
/// Cancelling stops the version listing and the issuing of new batch delete
/// requests. Deletes already sent to the provider are not rolled back.
pub type ReconcileCancellationToken = tokio_util::sync::CancellationToken;

/// Create a new [`ReconcileCancellationToken`].
///
/// # Example
///
/// ```
/// use s3vb_rs::create_reconcile_cancellation_token;
///
/// let token = create_reconcile_cancellation_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_reconcile_cancellation_token() -> ReconcileCancellationToken {
    tokio_util::sync::CancellationToken::new()
}

/// Sleep for `duration`. Returns false if the token was cancelled first.
pub(crate) async fn sleep_unless_cancelled(
    duration: std::time::Duration,
    cancellation_token: &ReconcileCancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
