use std::future::Future;
use std::pin::pin;

use futures::stream::{self, BoxStream};
use futures::{AsyncBufRead, AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::client::KubeClient;
use playerwatch_types::LogTarget;

/// Lines buffered between the reader task and the consumer
const LINE_BUFFER: usize = 1024;

/// A follow-mode log stream. `None` means the server closed the stream,
/// `Some(Err(_))` means the transport failed. Not restartable.
pub type LineStream = BoxStream<'static, Result<String, LogStreamError>>;

#[derive(Debug, Error)]
pub enum LogStreamError {
    #[error("failed to open log stream: {0}")]
    Open(#[from] kube::Error),

    #[error("log stream transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("log stream reader exited before the stream was opened")]
    Aborted,
}

/// How much history to replay when a stream is opened
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
}

impl StreamOptions {
    fn log_params(&self, container: &str) -> LogParams {
        LogParams {
            follow: true,
            container: Some(container.to_string()),
            // Use since_seconds if provided, otherwise use tail_lines
            tail_lines: if self.since_seconds.is_some() {
                None
            } else {
                self.tail_lines
            },
            since_seconds: self.since_seconds,
            ..Default::default()
        }
    }
}

/// Opens follow-mode log streams
pub trait LogSource {
    fn open(
        &self,
        target: &LogTarget,
        options: &StreamOptions,
    ) -> impl Future<Output = Result<LineStream, LogStreamError>> + Send;
}

impl LogSource for KubeClient {
    async fn open(
        &self,
        target: &LogTarget,
        options: &StreamOptions,
    ) -> Result<LineStream, LogStreamError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = options.log_params(&target.container);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);

        tokio::spawn(forward_lines(
            api,
            target.pod.clone(),
            params,
            ready_tx,
            line_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => Ok(line_stream(line_rx)),
            Ok(Err(e)) => Err(LogStreamError::Open(e)),
            Err(_) => Err(LogStreamError::Aborted),
        }
    }
}

fn line_stream(mut line_rx: mpsc::Receiver<Result<String, LogStreamError>>) -> LineStream {
    stream::poll_fn(move |cx| line_rx.poll_recv(cx)).boxed()
}

/// Open the pod log and hand the reader to `forward_reader`
async fn forward_lines(
    api: Api<Pod>,
    pod_name: String,
    params: LogParams,
    ready_tx: oneshot::Sender<Result<(), kube::Error>>,
    line_tx: mpsc::Sender<Result<String, LogStreamError>>,
) {
    let reader = match api.log_stream(&pod_name, &params).await {
        Ok(reader) => reader,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    forward_reader(reader, line_tx).await;
}

/// Forward lines until the reader ends, fails, or the consumer goes away.
/// A transport error is sent once, then the channel is closed.
async fn forward_reader<R>(reader: R, line_tx: mpsc::Sender<Result<String, LogStreamError>>)
where
    R: AsyncBufRead,
{
    let mut lines = pin!(reader.lines());

    loop {
        tokio::select! {
            // Consumer dropped the stream
            _ = line_tx.closed() => break,

            result = lines.try_next() => {
                match result {
                    Ok(Some(line)) => {
                        if line_tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Stream ended (pod terminated?)
                        break;
                    }
                    Err(e) => {
                        let _ = line_tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        }
    }
}
