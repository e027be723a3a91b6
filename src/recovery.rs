//! Soft-delete recovery on create.
//!
//! A soft-deleted key, secret, certificate or storage account keeps its name
//! reserved until it is purged, so creating an item with the same name answers
//! 409. When recovery is enabled the old item is recovered, we wait for it to be
//! readable again, and the create is retried once.

use crate::poll::{Deadline, Observation, StateWait};
use crate::{Result, VaultwrightError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const RECOVERY_DELAY: Duration = Duration::from_secs(30);
const RECOVERY_POLL_INTERVAL: Duration = Duration::from_secs(10);
const RECOVERY_CONSECUTIVE_READS: usize = 10;

/// Runs `create`; on a conflict with recovery enabled, runs `recover` and retries
/// `create` exactly once.
///
/// With recovery disabled the conflict is returned unchanged. The value returned
/// after a recovery is the one from the second `create` call.
///
/// # Example
///
/// ```
/// use vaultwright::recovery::create_with_recovery;
/// use vaultwright::VaultwrightError;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut attempts = 0;
/// let result = create_with_recovery(
///     "Secret \"s1\"",
///     true,
///     || {
///         attempts += 1;
///         let attempt = attempts;
///         async move {
///             if attempt == 1 {
///                 Err(VaultwrightError::Conflict("soft-deleted".into()))
///             } else {
///                 Ok(attempt)
///             }
///         }
///     },
///     || async { Ok(()) },
/// )
/// .await;
/// assert_eq!(result.unwrap(), 2);
/// # }
/// ```
pub async fn create_with_recovery<T, C, CF, R, RF>(
    item: &str,
    enabled: bool,
    mut create: C,
    recover: R,
) -> Result<T>
where
    C: FnMut() -> CF,
    CF: Future<Output = Result<T>>,
    R: FnOnce() -> RF,
    RF: Future<Output = Result<()>>,
{
    let err = match create().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if !enabled || !err.is_conflict() {
        return Err(err);
    }

    info!(%item, "name is held by a soft-deleted item - recovering it");
    recover()
        .await
        .map_err(|e| VaultwrightError::op("recovering soft-deleted", item, e))?;

    create()
        .await
        .map_err(|e| VaultwrightError::op("updating recovered", item, e))
}

/// Issues the recover call, then waits until the item reads back.
///
/// `probe` returns `Ok(())` once the item is readable; a 403 or 404 from it means
/// "not yet" and any other error ends the wait. The item has to read back ten
/// times in a row (checked every 10 s, after an initial 30 s) before it counts
/// as recovered.
pub async fn recover_and_wait<R, RF, P, PF>(
    item: &str,
    recover: R,
    mut probe: P,
    deadline: Deadline,
) -> Result<()>
where
    R: FnOnce() -> RF,
    RF: Future<Output = Result<()>>,
    P: FnMut() -> PF,
    PF: Future<Output = Result<()>>,
{
    recover().await?;
    debug!(%item, "recover requested, waiting for the item to become available");

    StateWait::new(&["pending"], &["available"], deadline)
        .with_delay(RECOVERY_DELAY)
        .with_poll_interval(RECOVERY_POLL_INTERVAL)
        .with_continuous_target_occurrence(RECOVERY_CONSECUTIVE_READS)
        .wait(|| {
            let check = probe();
            async move {
                match check.await {
                    Ok(()) => Ok(Observation::found((), "available")),
                    Err(err) if err.is_not_found() || err.is_forbidden() => {
                        Ok(Observation::found((), "pending"))
                    }
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|e| VaultwrightError::op("waiting for recovered", item, e))?;

    debug!(%item, "recovered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn conflict() -> VaultwrightError {
        VaultwrightError::Conflict("Secret s1 is currently in a deleted but recoverable state".into())
    }

    #[tokio::test]
    async fn test_recovery_disabled_returns_conflict_unchanged() {
        let recovered = AtomicUsize::new(0);

        let err = create_with_recovery(
            "Secret \"s1\"",
            false,
            || async { Err::<(), _>(conflict()) },
            || async {
                recovered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VaultwrightError::Conflict(ref msg) if msg.contains("deleted but recoverable")));
        assert_eq!(recovered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovery_returns_second_create_result() {
        let attempts = AtomicUsize::new(0);

        let value = create_with_recovery(
            "Secret \"s1\"",
            true,
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt == 1 {
                        Err(conflict())
                    } else {
                        Ok(format!("version-{attempt}"))
                    }
                }
            },
            || async { Ok(()) },
        )
        .await
        .unwrap();

        assert_eq!(value, "version-2");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_recovered() {
        let err = create_with_recovery(
            "Key \"k1\"",
            true,
            || async {
                Err::<(), _>(VaultwrightError::Api {
                    status: 400,
                    code: "BadParameter".into(),
                    message: "key size".into(),
                })
            },
            || async { Err(VaultwrightError::Transport("recover must not run".into())) },
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn test_failed_recovery_is_wrapped() {
        let err = create_with_recovery(
            "Secret \"s1\"",
            true,
            || async { Err::<(), _>(conflict()) },
            || async { Err(VaultwrightError::Transport("connection reset".into())) },
        )
        .await
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("recovering soft-deleted Secret \"s1\""), "{msg}");
        assert!(msg.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_second_create_failure_is_surfaced() {
        let err = create_with_recovery(
            "Secret \"s1\"",
            true,
            || async { Err::<(), _>(conflict()) },
            || async { Ok(()) },
        )
        .await
        .unwrap_err();

        assert!(err.to_string().starts_with("updating recovered"));
        assert!(err.is_conflict());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_and_wait_needs_consecutive_reads() {
        let start = Instant::now();
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();

        recover_and_wait(
            "Secret \"s1\"",
            || async { Ok(()) },
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(VaultwrightError::NotFound("s1".into()))
                    } else {
                        Ok(())
                    }
                }
            },
            Deadline::after(Duration::from_secs(1800)),
        )
        .await
        .unwrap();

        assert_eq!(probes.load(Ordering::SeqCst), 12);
        // 30 s delay, then 11 intervals of 10 s.
        assert_eq!(start.elapsed(), Duration::from_secs(140));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_and_wait_stops_on_other_errors() {
        let err = recover_and_wait(
            "Secret \"s1\"",
            || async { Ok(()) },
            || async {
                Err(VaultwrightError::Api {
                    status: 500,
                    code: "InternalError".into(),
                    message: "boom".into(),
                })
            },
            Deadline::after(Duration::from_secs(1800)),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().starts_with("waiting for recovered"));
    }
}
