//! Response bodies returned by the proxy server

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};
use tracing::warn;

use super::request_log::RequestLog;
use crate::error::GatewayError;

/// Body type of every response the proxy server writes
pub type ProxyBody = UnsyncBoxBody<Bytes, GatewayError>;

pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> ProxyBody {
    full(Bytes::new())
}

pin_project! {
    /// Streams an upstream body to the client.
    ///
    /// Counts the bytes passed through, stops at the attempt deadline and
    /// records the outcome in the request log it owns.
    pub struct MeteredBody {
        #[pin]
        inner: Incoming,
        #[pin]
        deadline: Sleep,
        log: RequestLog,
        bytes: u64,
        done: bool,
    }

    impl PinnedDrop for MeteredBody {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if !*this.done {
                this.log.add(format!("body_err:client gone after {} bytes", this.bytes));
            }
        }
    }
}

impl MeteredBody {
    pub fn new(inner: Incoming, deadline: Instant, log: RequestLog) -> Self {
        Self {
            inner,
            deadline: tokio::time::sleep_until(deadline),
            log,
            bytes: 0,
            done: false,
        }
    }

    pub fn boxed(self) -> ProxyBody {
        BodyExt::boxed_unsync(self)
    }
}

impl Body for MeteredBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        if this.deadline.poll(cx).is_ready() {
            *this.done = true;
            warn!(id = %this.log.id(), bytes = *this.bytes, "response body deadline exceeded");
            this.log
                .add(format!("body_err:timeout after {} bytes", this.bytes));
            return Poll::Ready(Some(Err(GatewayError::Timeout)));
        }

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    *this.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                *this.done = true;
                warn!(id = %this.log.id(), "response body copy failed: {}", e);
                this.log.add(format!("body_err:{}", e));
                Poll::Ready(Some(Err(GatewayError::BodyStream(e.to_string()))))
            }
            None => {
                *this.done = true;
                this.log.add(format!("res_len:{}", this.bytes));
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}
