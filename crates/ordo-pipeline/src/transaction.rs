//! Composition of commit and rollback callbacks.
//!
//! Extensions often have several independent sub-steps to commit or undo.
//! These helpers fold optional tasks into one callback that runs them in
//! sequence (commit) or in reverse (rollback).

use std::future::Future;

use futures_core::future::BoxFuture;

use ordo_types::Result;

/// A one-shot async task.
pub type PipelineTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Box an async closure as a [`PipelineTask`].
pub fn pipeline_task<F, Fut>(f: F) -> PipelineTask
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()) as BoxFuture<'static, Result<()>>)
}

fn compose<I>(tasks: I, reverse: bool) -> Option<PipelineTask>
where
    I: IntoIterator<Item = Option<PipelineTask>>,
{
    let mut tasks: Vec<PipelineTask> = tasks.into_iter().flatten().collect();
    if tasks.is_empty() {
        return None;
    }
    if reverse {
        tasks.reverse();
    }
    Some(pipeline_task(move || async move {
        for task in tasks {
            task().await?;
        }
        Ok(())
    }))
}

/// Run the given tasks in order, stopping at the first error.
///
/// Returns `None` when every entry is `None`.
pub fn create_pipeline_commit<I>(tasks: I) -> Option<PipelineTask>
where
    I: IntoIterator<Item = Option<PipelineTask>>,
{
    compose(tasks, false)
}

/// Run the given tasks last-to-first, stopping at the first error.
pub fn create_pipeline_rollback<I>(tasks: I) -> Option<PipelineTask>
where
    I: IntoIterator<Item = Option<PipelineTask>>,
{
    compose(tasks, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_types::OrdoError;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn step(log: &Log, name: &'static str) -> Option<PipelineTask> {
        let log = Arc::clone(log);
        Some(pipeline_task(move || async move {
            log.lock().unwrap().push(name);
            Ok(())
        }))
    }

    fn failing(name: &'static str) -> Option<PipelineTask> {
        Some(pipeline_task(move || async move {
            Err(OrdoError::Other(format!("{name} failed")))
        }))
    }

    #[tokio::test]
    async fn commit_runs_in_order_skipping_none() {
        let log: Log = Arc::default();
        let commit =
            create_pipeline_commit([step(&log, "a"), None, step(&log, "b"), step(&log, "c")])
                .expect("commit task");

        commit().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse() {
        let log: Log = Arc::default();
        let rollback = create_pipeline_rollback([step(&log, "a"), step(&log, "b"), None])
            .expect("rollback task");

        rollback().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn nothing_to_compose_yields_none() {
        let none: Option<PipelineTask> = None;
        assert!(create_pipeline_commit(Vec::<Option<PipelineTask>>::new()).is_none());
        assert!(create_pipeline_rollback([none, None]).is_none());
    }

    #[tokio::test]
    async fn first_error_stops_the_sequence() {
        let log: Log = Arc::default();
        let commit = create_pipeline_commit([step(&log, "a"), failing("b"), step(&log, "c")])
            .expect("commit task");

        let err = commit().await.unwrap_err();
        assert_eq!(err.to_string(), "b failed");
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }
}
