use fail::fail_point;

use crate::error::EtlResult;

pub const MERGE_AFTER_APPLY_BEFORE_COMMIT: &str = "merge.after_apply_before_commit";

/// Fails with an error whose kind is picked by the failpoint parameter.
///
/// Compiles to nothing unless the `failpoints` feature is enabled.
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("manual_retry") => crate::error::ErrorKind::WithManualRetry,
            Some("timed_retry") => crate::error::ErrorKind::WithTimedRetry,
            _ => crate::error::ErrorKind::WithNoRetry,
        };

        Err(crate::etl_error!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        ))
    });

    Ok(())
}
