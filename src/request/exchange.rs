use http::{HeaderMap, Version};
use http_body::Body as _;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::body::{Progress, RequestBody, UploadFailed};
use crate::response::Response;
use crate::target::Target;
use crate::transport::{Agent, Stream};
use crate::Error;

use super::Method;

enum Sender {
    H1(http1::SendRequest<RequestBody>),
    H2(http2::SendRequest<RequestBody>),
}

/// One request / response exchange over a fresh connection from the agent.
#[derive(Debug)]
pub(super) struct Exchange {
    pub(super) target: Target,
    pub(super) method: Method,
    pub(super) headers: HeaderMap,
    pub(super) agent: Agent,
}

impl Exchange {
    pub(super) async fn send(self, body: RequestBody) -> Result<Response, Error> {
        let uri = self.target.uri()?;
        let progress = body.progress();
        let empty = body.is_end_stream();

        tracing::trace!("connect");
        let stream = self.agent.connect(uri.clone()).await.map_err(Error::Connection)?;

        let mut sender = handshake(stream).await?;

        let version = match &sender {
            Sender::H1(_) => Version::HTTP_11,
            Sender::H2(_) => Version::HTTP_2,
        };

        // HTTP/1 sends the origin form, HTTP/2 carries the full URI in pseudo-headers.
        let request_uri = match version {
            Version::HTTP_2 => uri,
            _ => self
                .target
                .origin_form()
                .parse()
                .map_err(|error: http::uri::InvalidUri| Error::Request(error.into()))?,
        };

        let mut request = http::Request::builder()
            .method(http::Method::from(self.method))
            .uri(request_uri)
            .version(version)
            .body(body)
            .map_err(Error::Request)?;

        let mut headers = self.headers;
        if version == Version::HTTP_2 {
            // Connection-specific headers are forbidden in HTTP/2.
            headers.remove(http::header::HOST);
            headers.remove(http::header::CONNECTION);
        }
        *request.headers_mut() = headers;

        let response = match &mut sender {
            Sender::H1(sender) => {
                sender.ready().await.map_err(|error| classify(error, &progress))?;
                sender.send_request(request).await
            }
            Sender::H2(sender) => {
                sender.ready().await.map_err(|error| classify(error, &progress))?;
                sender.send_request(request).await
            }
        }
        .map_err(|error| classify(error, &progress))?;

        // The connection never polls a body which is empty from the start.
        if empty {
            progress.complete();
        }

        tracing::debug!(status = %response.status(), "response headers");
        Ok(Response::new(response))
    }
}

async fn handshake(stream: Stream) -> Result<Sender, Error> {
    if stream.is_h2() {
        tracing::trace!("handshake h2");
        let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(Error::connection)?;
        tokio::spawn(async {
            if let Err(err) = conn.await {
                if err.is_user() {
                    tracing::error!(%err, "h2 connection driver error");
                } else {
                    tracing::debug!(%err, "h2 connection driver error");
                }
            }
        });
        Ok(Sender::H2(sender))
    } else {
        tracing::trace!("handshake h1");
        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(Error::connection)?;
        tokio::spawn(async {
            if let Err(err) = conn.await {
                tracing::debug!(%err, "h1 connection driver error");
            }
        });
        Ok(Sender::H1(sender))
    }
}

/// Failures of the request body source are upload errors, everything else belongs to the
/// connection.
fn classify(error: hyper::Error, progress: &Progress) -> Error {
    let upload = std::error::Error::source(&error).is_some_and(|cause| cause.is::<UploadFailed>());
    if !upload {
        return Error::connection(error);
    }

    match progress.take_failure() {
        Some(cause) => {
            tracing::debug!(error = %cause, "request body source failed");
            Error::Upload(cause)
        }
        None => Error::Upload(error.into()),
    }
}
