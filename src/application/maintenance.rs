//! Background maintenance task handles.

use tokio::task::JoinHandle;

/// Handle to a periodic background task.
///
/// The task is aborted when the handle is dropped, so maintenance never
/// outlives the component that started it.
#[derive(Debug)]
pub struct MaintenanceHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true once the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the task.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        tracing::debug!(task = self.name, "stopping maintenance task");
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drop_aborts_task() {
        let handle = MaintenanceHandle::new(
            "sleeper",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            }),
        );
        assert_eq!(handle.name(), "sleeper");
        assert!(!handle.is_finished());
        handle.stop();
    }
}
