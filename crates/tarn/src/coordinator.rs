//! Per-project build coordination.
//!
//! At most one build runs per project id. Callers that arrive while a build
//! is in flight join it and receive the same result. Different projects
//! build concurrently.
//!
//! # Educational Note: Shared completion
//!
//! The in-flight build is a [`Shared`] future. Every waiter polls a clone of
//! it; dropping one clone (an aborted request) does not cancel the build for
//! the others. The build publishes its result into the state tables before
//! its own future resolves, so once any waiter has a result, a new call
//! starts a fresh build instead of joining the finished one.

use crate::bundle::{BuildOutput, BundleEngine};
use crate::error::Error;
use crate::project::{ProjectId, ProjectRecord};
use crate::route::Route;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

/// Outcome delivered to every waiter of a build.
pub type BuildResult = Result<Arc<BuildOutput>, Arc<Error>>;

type SharedBuild = Shared<BoxFuture<'static, BuildResult>>;

/// Build status tracking.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildStatus {
    /// No build has been performed yet
    #[default]
    Pending,
    /// Build is currently in progress
    Building { started_at: Instant },
    /// Build completed successfully
    Success { duration_ms: u64 },
    /// Last build failed; see [`BuildCoordinator::error`]
    Error,
}

impl BuildStatus {
    /// Check if build is currently running.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, BuildStatus::Building { .. })
    }

    /// Check if last build succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success { .. })
    }

    /// Check if last build failed.
    pub fn is_error(&self) -> bool {
        matches!(self, BuildStatus::Error)
    }
}

#[derive(Default)]
struct Slot {
    status: BuildStatus,
    output: Option<Arc<BuildOutput>>,
    error: Option<Arc<Error>>,
    in_flight: Option<SharedBuild>,
}

type Slots = Arc<Mutex<HashMap<ProjectId, Slot>>>;

/// Serializes builds per project and tracks their results.
pub struct BuildCoordinator {
    engine: Arc<BundleEngine>,
    slots: Slots,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("projects", &self.slots.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BuildCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine every build runs on
    /// * `timeout` - Deadline for a single build; `None` waits forever
    pub fn new(engine: Arc<BundleEngine>, timeout: Option<Duration>) -> Self {
        Self {
            engine,
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Build `route` for `project`, or join the build already running.
    ///
    /// # Returns
    ///
    /// The build output, or the error the build failed with. If the error
    /// recorded for the project changed while this call waited, the new
    /// error is returned even if the joined build itself was older.
    pub async fn bundle(&self, project: &ProjectRecord, route: &Route, origin: &Url) -> BuildResult {
        let error_before = self.error(&project.id);

        let build = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(project.id.clone()).or_default();
            match &slot.in_flight {
                Some(build) => {
                    debug!(project = %project.id, "joining in-flight build");
                    build.clone()
                }
                None => {
                    let build = self.start(project.clone(), route.clone(), origin.clone());
                    slot.status = BuildStatus::Building {
                        started_at: Instant::now(),
                    };
                    slot.in_flight = Some(build.clone());
                    build
                }
            }
        };

        let result = build.await;

        let error_after = self.error(&project.id);
        if let Some(after) = error_after {
            let changed = match &error_before {
                Some(before) => !Arc::ptr_eq(before, &after),
                None => true,
            };
            if changed {
                return Err(after);
            }
        }
        result
    }

    fn start(&self, project: ProjectRecord, route: Route, origin: Url) -> SharedBuild {
        let engine = Arc::clone(&self.engine);
        let slots = Arc::clone(&self.slots);
        let timeout = self.timeout;

        async move {
            let started = Instant::now();
            let previous = slots.lock().get(&project.id).and_then(|slot| slot.output.clone());
            let work = AssertUnwindSafe(engine.build(&project, &route, &origin, previous.as_deref()))
                .catch_unwind();

            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(project = %project.id, "build timed out after {}s", limit.as_secs());
                        Ok(Err(Error::generic(format!(
                            "Build timed out after {}s",
                            limit.as_secs()
                        ))))
                    }
                },
                None => work.await,
            };

            let result: BuildResult = match outcome {
                Ok(Ok(output)) => Ok(Arc::new(output)),
                Ok(Err(err)) => Err(Arc::new(err)),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(project = %project.id, "build panicked: {message}");
                    Err(Arc::new(Error::generic(format!("Build panicked: {message}"))))
                }
            };

            let mut slots = slots.lock();
            let slot = slots.entry(project.id.clone()).or_default();
            slot.in_flight = None;
            match &result {
                Ok(output) => {
                    slot.output = Some(Arc::clone(output));
                    slot.error = None;
                    slot.status = BuildStatus::Success {
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(err) => {
                    slot.error = Some(Arc::clone(err));
                    slot.status = BuildStatus::Error;
                }
            }
            drop(slots);

            result
        }
        .boxed()
        .shared()
    }

    /// Current status for a project.
    pub fn status(&self, id: &ProjectId) -> BuildStatus {
        self.slots
            .lock()
            .get(id)
            .map(|slot| slot.status.clone())
            .unwrap_or_default()
    }

    /// Last successful output, kept even after later failures.
    pub fn output(&self, id: &ProjectId) -> Option<Arc<BuildOutput>> {
        self.slots.lock().get(id).and_then(|slot| slot.output.clone())
    }

    /// Error of the last build, cleared by the next success.
    pub fn error(&self, id: &ProjectId) -> Option<Arc<Error>> {
        self.slots.lock().get(id).and_then(|slot| slot.error.clone())
    }

    /// Forget output and error for a project.
    ///
    /// A build in flight keeps running and its waiters still get its result.
    pub fn invalidate(&self, id: &ProjectId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(id) {
            slot.output = None;
            slot.error = None;
            if !slot.status.is_in_progress() {
                slot.status = BuildStatus::Pending;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_helpers() {
        assert!(BuildStatus::Building {
            started_at: Instant::now()
        }
        .is_in_progress());
        assert!(BuildStatus::Success { duration_ms: 1 }.is_success());
        assert!(BuildStatus::Error.is_error());
        assert_eq!(BuildStatus::default(), BuildStatus::Pending);
    }

    #[test]
    fn panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
