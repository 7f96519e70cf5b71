use crate::resource_unit::ResourceUnit;
use crate::result_receiver::ResultReceiver;
use common::QservError;
use std::sync::Arc;

/// Carries chunk query requests to workers and streams their results back.
///
/// `provision` must not block on the result. Results arrive later, from any
/// thread, through the receiver's `buffer`/`flush` or `error_flush`. A
/// transport that can abort a request registers it with `set_cancel_fn`.
pub trait Transport: Send + Sync {
    /// Submits one request.
    ///
    /// # Arguments
    ///
    /// * `resource` - Worker resource the request is for.
    /// * `request` - Encoded task message.
    /// * `receiver` - Destination of the result stream.
    fn provision(
        &self,
        resource: &ResourceUnit,
        request: Vec<u8>,
        receiver: Arc<ResultReceiver>,
    ) -> Result<(), QservError>;
}
