use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chatrelay_common::{Error as CommonError, ObservableMetrics, RequestId};
use chatrelay_runtime::FragmentStream;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

const BUFFER_SIZE: usize = 32;  // Maximum fragments to buffer
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);  // Timeout per fragment

/// Plain-text streamed body carrying each fragment as it is saved.
///
/// The status line is already sent when the first fragment goes out, so a
/// failure mid-stream just ends the body.
pub fn fragment_response(
    fragments: FragmentStream,
    metrics: ObservableMetrics,
    request_id: RequestId,
) -> Response {
    // Use bounded channel for backpressure
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(BUFFER_SIZE);

    tokio::spawn(async move {
        produce_fragments(fragments, metrics, tx, request_id).await;
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn produce_fragments(
    mut fragments: FragmentStream,
    metrics: ObservableMetrics,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    request_id: RequestId,
) {
    // Ensure cleanup happens when function exits
    let _cleanup = CleanupGuard::new(metrics.clone(), request_id.clone());

    loop {
        // Stop pulling once the client is gone so nothing more is saved
        if tx.is_closed() {
            debug!(%request_id, "Client disconnected, stopping stream");
            return;
        }

        let next = match tokio::time::timeout(CHUNK_TIMEOUT, fragments.next()).await {
            Ok(next) => next,
            Err(_) => {
                let err = CommonError::Transport(format!("no fragment within {:?}", CHUNK_TIMEOUT));
                warn!(%request_id, "Closing stream: {}", err);
                metrics.record_error(Some(&request_id), &err).await;
                return;
            }
        };

        match next {
            Some(Ok(fragment)) => {
                metrics.record_fragment().await;
                if tx.send(Ok(Bytes::from(fragment))).await.is_err() {
                    // Client disconnected; turns saved so far stay saved
                    debug!(%request_id, "Client disconnected, stopping stream");
                    return;
                }
            }
            Some(Err(e)) => {
                error!(%request_id, "Stream failed after response started: {}", e);
                metrics.record_error(Some(&request_id), &e).await;
                return;
            }
            None => return,
        }
    }
}

/// RAII guard for cleanup
struct CleanupGuard {
    metrics: ObservableMetrics,
    request_id: RequestId,
}

impl CleanupGuard {
    fn new(metrics: ObservableMetrics, request_id: RequestId) -> Self {
        Self { metrics, request_id }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let metrics = self.metrics.clone();
        let req_id = self.request_id.clone();

        tokio::spawn(async move {
            metrics.complete_request(&req_id).await;
        });
    }
}
