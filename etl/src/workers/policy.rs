use crate::error::{ErrorKind, EtlError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The batch can be retried automatically after a backoff delay.
    Timed,
    /// The batch should only be retried after manual intervention.
    Manual,
    /// The batch should not be retried.
    NoRetry,
}

/// Policy describing how an [`EtlError`] should be handled by the pipeline driver.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`EtlError`] to decide in one place how failed
/// batches are handled.
pub fn build_error_handling_policy(error: &EtlError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient failures expected to clear up on their own.
        ErrorKind::BatchTimeout | ErrorKind::IoError => {
            ErrorHandlingPolicy::new(RetryDirective::Timed, None)
        }

        ErrorKind::StorageConflict => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "Another writer kept modifying the target table. Make sure a single pipeline owns each target.",
            ),
        ),
        ErrorKind::SchemaError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "Align the batch schema with the target table, enable `allow_schema_evolution`, or set `on_schema_error` to `skip`.",
            ),
        ),
        ErrorKind::OutOfOrder => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "Records older than the current version were rejected. Enable `allow_backfill` or disable `strict_batch_atomicity`.",
            ),
        ),
        ErrorKind::InvalidData => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Fix the offending values in the batch and deliver it again."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the merge configuration and restart the pipeline."),
        ),

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithManualRetry => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Manually trigger retry after resolving the issue."),
        ),
        #[cfg(feature = "failpoints")]
        ErrorKind::WithTimedRetry => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Will automatically retry after the configured delay."),
        ),

        // By default, require manual intervention with a generic solution.
        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "There is no single prescribed solution for this error. Inspect the batch and the target, then restart the pipeline.",
            ),
        ),
    }
}
