//! Deferred compute worker.

use tracing::{debug, error};

use crate::engine::EngineState;
use crate::error::HashResult;
use crate::metrics::{self, Phase};
use crate::RequestId;

/// A submission handed to its worker.
#[derive(Debug)]
pub(crate) struct SubmittedRequest {
    pub(crate) id: RequestId,
    pub(crate) clear_value: String,
}

/// Waits out the delay, then digests and commits one submission.
///
/// The timer starts after the delay and stops after the commit, so only the
/// compute step is measured. On failure nothing is committed; the error is
/// logged here and returned so the task registry marks the worker failed.
pub(crate) async fn process(state: &EngineState, request: SubmittedRequest) -> HashResult<()> {
    tokio::time::sleep(state.hash_delay).await;

    let _timer = state.metrics.start_timer(Phase::Compute);
    let result = state
        .digester
        .digest(&request.clear_value)
        .and_then(|digest| state.store.put(request.id, digest));

    match result {
        Ok(()) => {
            metrics::record_commit();
            debug!(request_id = request.id, "result committed");
            Ok(())
        }
        Err(err) => {
            metrics::record_worker_failure();
            if err.is_invariant_violation() {
                error!(request_id = request.id, error = %err, "invariant violated: result committed twice");
            } else {
                error!(request_id = request.id, error = %err, "worker failed, result will never be committed");
            }
            Err(err)
        }
    }
}
