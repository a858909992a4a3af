use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use webpforge_common::{Error, Result};

/// Cancellation flag plus absolute deadline for one running task.
#[derive(Debug, Clone)]
pub struct TaskControl {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl TaskControl {
    /// Start the clock: the deadline is `timeout` from now.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// `Err(Cancelled)` once cancellation was requested, `Err(Timeout)` once
    /// the deadline has passed, `Ok` otherwise. Cancellation wins when both hold.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else if Instant::now() >= self.deadline {
            Err(Error::Timeout(self.timeout))
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let control = TaskControl::new(CancellationToken::new(), Duration::from_secs(60));
        assert!(control.check().is_ok());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_matches!(control.check(), Err(Error::Timeout(d)) if d.as_secs() == 60);
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let token = CancellationToken::new();
        let control = TaskControl::new(token.clone(), Duration::from_secs(60));
        token.cancel();
        assert!(control.is_cancelled());
        assert_matches!(control.check(), Err(Error::Cancelled));
    }
}
