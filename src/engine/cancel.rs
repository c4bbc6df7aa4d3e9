/// Cooperative cancellation handle for a pipeline run.
///
/// The executor checks it at every stage boundary; an in-flight stage is
/// allowed to finish but its successor never starts.
#[derive(Clone, Default)]
pub struct CancelSignal {
    token: tokio_util::sync::CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
