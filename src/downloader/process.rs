//! Session processing - drives every period task to a terminal state.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::{Credentials, DownloadConfig};
use crate::error::{Error, FetchError, Result};
use crate::observer::ProgressObserver;
use crate::period::Period;
use crate::portal::PortalClient;
use crate::session::{DownloadSession, FailedAttempt};
use crate::store::SessionStore;
use crate::types::{Artifact, Event, SessionId, Status};
use crate::validate::ArtifactValidator;

use super::ParallelDownloader;

/// Everything one worker needs to drive its period task.
///
/// The session behind the mutex is shared by all workers of the run; locks
/// are held only for state transitions, never across portal or store I/O.
struct TaskContext {
    session_id: SessionId,
    task_index: usize,
    session: Arc<Mutex<DownloadSession>>,
    workers: Arc<Semaphore>,
    config: DownloadConfig,
    credentials: Credentials,
    store: Arc<dyn SessionStore>,
    portal: Arc<dyn PortalClient>,
    validator: Arc<dyn ArtifactValidator>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

/// Process one session: spawn a worker per task, wait for all of them, then
/// settle the session's terminal status.
pub(crate) async fn run_session(
    engine: &ParallelDownloader,
    session: DownloadSession,
    cancel: CancellationToken,
) -> Result<()> {
    let session_id = session.id();
    let config = session.config().clone();
    let credentials = session.credentials().clone();
    let total_tasks = session.total_tasks();

    tracing::info!(
        session_id = %session_id,
        tasks = total_tasks,
        workers = config.max_concurrent_workers,
        "Processing download session"
    );

    // The semaphore belongs to this run; concurrent runs of other sessions
    // have their own worker budgets.
    let workers = Arc::new(Semaphore::new(config.max_concurrent_workers));
    let session = Arc::new(Mutex::new(session));

    // Phase 1: one worker per task index, all racing for permits
    let mut handles = Vec::with_capacity(total_tasks);
    for task_index in 0..total_tasks {
        let ctx = TaskContext {
            session_id,
            task_index,
            session: Arc::clone(&session),
            workers: Arc::clone(&workers),
            config: config.clone(),
            credentials: credentials.clone(),
            store: Arc::clone(&engine.store),
            portal: Arc::clone(&engine.portal),
            validator: Arc::clone(&engine.validator),
            observer: Arc::clone(&engine.observer),
            cancel: cancel.clone(),
        };

        handles.push(tokio::spawn(run_period_task(ctx)));
    }

    // Phase 2: wait for every worker; remember the first batch error
    let mut batch_error: Option<Error> = None;
    for outcome in futures::future::join_all(handles).await {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                batch_error.get_or_insert(e);
            }
            Err(e) => {
                batch_error.get_or_insert(Error::InvalidState(format!(
                    "session worker panicked: {e}"
                )));
            }
        }
    }

    // Phase 3: best-effort logout now that no worker talks to the portal
    if let Err(e) = engine.portal.logout().await {
        tracing::warn!(session_id = %session_id, error = %e, "Portal logout failed");
    }

    // Phase 4: cancellation leaves the session un-completed but persisted,
    // so a later run can pick it up where it stopped
    if cancel.is_cancelled() && batch_error.is_none() {
        let snapshot = session.lock().await.clone();
        engine.store.update(snapshot).await?;
        tracing::info!(session_id = %session_id, "Session processing cancelled");
        return Ok(());
    }

    // Phase 5: settle the terminal status
    if batch_error.is_none() {
        let mut guard = session.lock().await;
        if let Err(e) = guard.complete() {
            batch_error = Some(e);
        }
    }

    if batch_error.is_none() {
        let snapshot = session.lock().await.clone();
        if let Err(e) = engine.store.update(snapshot).await {
            batch_error = Some(e);
        }
    }

    match batch_error {
        None => {
            let (completed, failed) = {
                let guard = session.lock().await;
                (guard.completed_tasks(), guard.failed_count())
            };

            engine.observer.notify(Event::SessionCompleted {
                session_id,
                completed,
                failed,
            });
            tracing::info!(
                session_id = %session_id,
                completed,
                failed,
                "Download session completed"
            );
            Ok(())
        }
        Some(e) => {
            let message = e.to_string();
            let snapshot = {
                let mut guard = session.lock().await;
                guard.fail(&message);
                guard.clone()
            };

            if let Err(persist) = engine.store.update(snapshot).await {
                tracing::error!(
                    session_id = %session_id,
                    error = %persist,
                    "Failed to persist failed session"
                );
            }

            engine.observer.notify(Event::Message {
                text: format!("session {session_id} failed: {message}"),
            });
            tracing::error!(session_id = %session_id, error = %message, "Download session failed");
            Err(e)
        }
    }
}

/// Retry loop for one period task.
///
/// Returns `Err` only for batch failures (storage errors); a task that
/// spends its whole attempt budget is left `Failed` and reported via the
/// session's failure log, which is not an error for the run.
async fn run_period_task(ctx: TaskContext) -> Result<()> {
    let period = {
        let session = ctx.session.lock().await;
        match session.tasks().get(ctx.task_index) {
            Some(task) => task.period().clone(),
            None => return Ok(()),
        }
    };

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }

        // Budget check before taking a permit, so exhausted or finished
        // tasks never occupy a worker slot.
        {
            let session = ctx.session.lock().await;
            let task = &session.tasks()[ctx.task_index];
            if task.status() == Status::Completed
                || !task.can_retry(ctx.config.max_retry_attempts)
            {
                return Ok(());
            }
        }

        let permit = tokio::select! {
            permit = ctx.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                // Semaphore closed: the run is shutting down
                Err(_) => return Ok(()),
            },
            _ = ctx.cancel.cancelled() => return Ok(()),
        };

        let attempt_result = tokio::select! {
            result = run_single_attempt(&ctx, &period) => result,
            _ = ctx.cancel.cancelled() => {
                // Abort mid-attempt; the task keeps its last recorded
                // status and the session stays re-processable.
                return Ok(());
            }
        };

        match attempt_result {
            Ok(()) => return Ok(()),
            Err(e) => {
                let message = e.to_string();

                // Record the failure on the task and in the session log.
                let attempt = {
                    let mut session = ctx.session.lock().await;
                    let Some(task) = session.task_mut(ctx.task_index) else {
                        return Ok(());
                    };
                    task.fail(&message);
                    let attempt = task.attempt_count();
                    session.add_failed_attempt(FailedAttempt::new(
                        period.clone(),
                        &message,
                        attempt,
                    ));
                    attempt
                };

                tracing::warn!(
                    session_id = %ctx.session_id,
                    period = %period.key(),
                    attempt,
                    error = %message,
                    "Period fetch attempt failed"
                );
                ctx.observer.notify(Event::TaskFailed {
                    session_id: ctx.session_id,
                    period: period.key(),
                    message,
                    attempt,
                });

                let snapshot = { ctx.session.lock().await.clone() };
                ctx.store.update(snapshot).await?;

                let budget_left = {
                    let session = ctx.session.lock().await;
                    session.tasks()[ctx.task_index].can_retry(ctx.config.max_retry_attempts)
                };
                if !budget_left {
                    return Ok(());
                }

                // Backoff while still holding the permit, so a flapping
                // task cannot storm the portal through freed slots.
                tokio::select! {
                    _ = tokio::time::sleep(ctx.config.retry_backoff) => {}
                    _ = ctx.cancel.cancelled() => return Ok(()),
                }

                let mut session = ctx.session.lock().await;
                if let Some(task) = session.task_mut(ctx.task_index) {
                    task.reset();
                }
            }
        }

        drop(permit);
    }
}

/// One attempt: mark started, fetch through the portal, validate, record
/// completion, persist.
async fn run_single_attempt(ctx: &TaskContext, period: &Period) -> Result<()> {
    // Phase 1: mark the attempt started
    let attempt = {
        let mut session = ctx.session.lock().await;
        let task = ctx.task(&mut session)?;
        task.start();
        task.attempt_count()
    };

    ctx.observer.notify(Event::TaskStarted {
        session_id: ctx.session_id,
        period: period.key(),
        attempt,
    });
    tracing::debug!(
        session_id = %ctx.session_id,
        period = %period.key(),
        attempt,
        "Starting period fetch"
    );

    // Phase 2: authenticated, timed, validated fetch
    let artifacts = fetch_period_once(
        ctx.portal.as_ref(),
        ctx.validator.as_ref(),
        &ctx.credentials,
        &ctx.config,
        period,
    )
    .await?;

    // Phase 3: record completion on the task and the session
    {
        let mut session = ctx.session.lock().await;
        let task = ctx.task(&mut session)?;
        for artifact in &artifacts {
            task.add_artifact(artifact.clone());
        }
        task.complete()?;

        for artifact in &artifacts {
            session.add_artifact(artifact.clone());
        }
    }

    for artifact in &artifacts {
        ctx.observer.notify(Event::ArtifactFetched {
            session_id: ctx.session_id,
            period: period.key(),
            name: artifact.name.clone(),
        });
    }
    ctx.observer.notify(Event::TaskCompleted {
        session_id: ctx.session_id,
        period: period.key(),
    });

    // Phase 4: persist progress
    let snapshot = { ctx.session.lock().await.clone() };
    ctx.store.update(snapshot).await?;

    Ok(())
}

impl TaskContext {
    /// Borrow this worker's task out of the locked session.
    fn task<'a>(
        &self,
        session: &'a mut DownloadSession,
    ) -> Result<&'a mut crate::session::PeriodTask> {
        session.task_mut(self.task_index).ok_or_else(|| {
            Error::NotFound(format!(
                "task {} in session {}",
                self.task_index, self.session_id
            ))
        })
    }
}

/// Make sure the portal session is live, logging in again when it is not.
///
/// A login that comes back `false` is an authentication failure, not a
/// transient portal hiccup, but the retry loop treats both the same way.
pub(crate) async fn ensure_portal_auth(
    portal: &dyn PortalClient,
    credentials: &Credentials,
) -> Result<()> {
    if !portal.validate_session().await? && !portal.login(credentials).await? {
        return Err(FetchError::Auth(format!(
            "portal rejected credentials for {}",
            credentials.username()
        ))
        .into());
    }

    Ok(())
}

/// One authenticated, timed fetch of a period, with artifact validation.
///
/// Shared by the engine's retry loop and the recovery sweep: ensures a live
/// portal session (re-logging-in when needed), fetches under the configured
/// per-download timeout, and validates every file the portal claims to have
/// written.
pub(crate) async fn fetch_period_once(
    portal: &dyn PortalClient,
    validator: &dyn ArtifactValidator,
    credentials: &Credentials,
    config: &DownloadConfig,
    period: &Period,
) -> Result<Vec<Artifact>> {
    ensure_portal_auth(portal, credentials).await?;

    let timeout = config.timeout_per_download;
    let fetched = match tokio::time::timeout(
        timeout,
        portal.fetch_period(period, &config.download_path),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(FetchError::Timeout {
                seconds: timeout.as_secs(),
            }
            .into())
        }
    };

    if !config.validate_artifacts {
        return Ok(fetched);
    }

    // Re-measure each reported file on disk; a missing file fails the
    // attempt, a present-but-hollow one is recorded as invalid.
    let mut validated = Vec::with_capacity(fetched.len());
    for reported in fetched {
        let mut artifact = validator.validate(period, &reported.path).await?;
        if artifact.is_well_formed() {
            artifact.mark_valid();
        } else {
            artifact.mark_invalid("file is empty or has no content hash");
        }
        validated.push(artifact);
    }

    Ok(validated)
}
