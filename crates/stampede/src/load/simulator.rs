//! One simulated user looping over a scenario until a deadline

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::context::ExecutionContext;
use super::executor::StepExecutor;
use super::scenario::LoadScenario;

/// Runs the scenario's steps in order, repeatedly, with think time after
/// each step.
///
/// The deadline is checked before every loop iteration; an iteration that
/// has started runs to completion. Think time is skipped once the deadline
/// has passed. Cancelling the token aborts immediately, dropping any
/// in-flight request.
pub struct VirtualUserSimulator {
    id: usize,
    scenario: Arc<LoadScenario>,
    executor: Arc<StepExecutor>,
    think_time: Duration,
    cancel: CancellationToken,
}

impl VirtualUserSimulator {
    pub fn new(
        id: usize,
        scenario: Arc<LoadScenario>,
        executor: Arc<StepExecutor>,
        think_time: Duration,
    ) -> Self {
        Self {
            id,
            scenario,
            executor,
            think_time,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Loop until `deadline`; returns the number of completed iterations
    pub async fn run(self, deadline: Instant) -> u64 {
        let mut ctx = ExecutionContext::new();
        let mut iterations = 0u64;

        if self.scenario.is_empty() {
            return 0;
        }

        while Instant::now() < deadline && !self.cancel.is_cancelled() {
            for step in self.scenario.steps() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!(user = self.id, iterations, "Virtual user cancelled");
                        return iterations;
                    }
                    _ = self.executor.execute(step, &mut ctx) => {}
                }

                if !self.think_time.is_zero() && Instant::now() < deadline {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return iterations,
                        _ = tokio::time::sleep(self.think_time) => {}
                    }
                }
            }
            iterations += 1;
        }

        debug!(user = self.id, iterations, "Virtual user finished");
        iterations
    }
}
