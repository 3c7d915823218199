use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::HeaderMap;
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::body::BodySource;
use crate::target::{Query, QueryValue, Target};
use crate::timeout::DEFAULT_TIMEOUT;
use crate::transport::{self, AgentOption};
use crate::{BoxError, Error};

/// Request methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `OPTIONS`
    Options,
    /// `HEAD`
    Head,
    /// `CONNECT`
    Connect,
}

impl Method {
    /// The method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
            Method::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Delete => http::Method::DELETE,
            Method::Options => http::Method::OPTIONS,
            Method::Head => http::Method::HEAD,
            Method::Connect => http::Method::CONNECT,
        }
    }
}

/// Builder for the options of a single request.
///
/// Errors (an invalid header, a value which fails to serialize as JSON) are held until the
/// request is created, the same way [`http::request::Builder`] does it.
///
/// # Example
/// ```
/// # use courier::{Method, RequestOptions};
/// let options = RequestOptions::new()
///     .method(Method::Post)
///     .path("users")
///     .query("tag", ["a", "b"])
///     .header("x-trace", "1")
///     .json(&serde_json::json!({"name": "ferris"}));
/// ```
#[derive(Debug)]
pub struct RequestOptions {
    path: String,
    query: Query,
    method: Method,
    headers: HeaderMap,
    agent: AgentOption,
    timeout: Duration,
    body: BodySource,
    json: bool,
    deferred: bool,
    error: Option<Error>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            query: Query::new(),
            method: Method::default(),
            headers: HeaderMap::new(),
            agent: AgentOption::default(),
            timeout: DEFAULT_TIMEOUT,
            body: BodySource::empty(),
            json: false,
            deferred: false,
            error: None,
        }
    }
}

impl RequestOptions {
    /// Options for a plain `GET` with no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path joined onto the URL's own path.
    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    /// Add a query parameter. Lists become repeated keys.
    pub fn query<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<QueryValue>,
    {
        self.query.insert(key, value);
        self
    }

    /// Add every parameter from `query`.
    pub fn queries<I, K, V>(mut self, query: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryValue>,
    {
        for (key, value) in query {
            self.query.insert(key, value);
        }
        self
    }

    /// The request method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a header. Repeating a name sends it more than once.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        if self.error.is_some() {
            return self;
        }

        let name = HeaderName::try_from(key).map_err(Into::into);
        let value = HeaderValue::try_from(value).map_err(Into::into);
        match name.and_then(|name| value.map(|value| (name, value))) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(error) => self.error = Some(Error::InvalidHeader(error)),
        }
        self
    }

    /// Append every header from `headers`.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut name = None;
        for (key, value) in headers {
            if key.is_some() {
                name = key;
            }
            if let Some(name) = &name {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    /// The connection agent. `false` disables keep-alive.
    pub fn agent<A: Into<AgentOption>>(mut self, agent: A) -> Self {
        self.agent = agent.into();
        self
    }

    /// How long to wait for response headers (default 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A fixed request body.
    pub fn body<B: Into<BodySource>>(mut self, body: B) -> Self {
        self.body = body.into();
        self.json = false;
        self
    }

    /// A request body streamed from `stream`.
    pub fn body_stream<S, D, E>(self, stream: S) -> Self
    where
        S: Stream<Item = Result<D, E>> + Send + 'static,
        D: Into<Bytes>,
        E: Into<BoxError>,
    {
        self.body(BodySource::stream(stream))
    }

    /// A request body read from `reader`.
    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        self.body(BodySource::reader(reader))
    }

    /// Serialize `value` as a JSON body, with `content-type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = BodySource::from(body);
                self.json = true;
            }
            Err(error) => {
                self.error.get_or_insert(Error::Encode(error));
            }
        }
        self
    }

    /// Keep the request open for writing after creation, until it is finished or awaited.
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }
}

/// Everything needed to send one request, resolved and validated.
///
/// Default headers are filled in here, and never override the caller's:
/// - `host`, from the target,
/// - `content-type: application/json` for JSON bodies,
/// - `content-length` for fixed bodies which are finalized on creation,
/// - `connection: close` when the agent is disabled.
#[derive(Debug)]
pub struct Descriptor {
    pub(super) target: Target,
    pub(super) method: Method,
    pub(super) headers: HeaderMap,
    pub(super) body: BodySource,
    pub(super) timeout: Duration,
    pub(super) agent: AgentOption,
    pub(super) deferred: bool,
}

impl Descriptor {
    /// Resolve `url` with `options`.
    pub fn new(url: &str, options: RequestOptions) -> Result<Self, Error> {
        if let Some(error) = options.error {
            return Err(error);
        }

        let target = Target::resolve(url, &options.path, &options.query)?;
        if !options.agent.is_custom() && !transport::supports_scheme(target.scheme()) {
            return Err(Error::UnsupportedScheme(target.scheme().to_owned()));
        }

        let mut headers = options.headers;
        if !headers.contains_key(HOST) {
            let host = HeaderValue::try_from(target.authority())
                .map_err(|error| Error::InvalidHeader(error.into()))?;
            headers.insert(HOST, host);
        }

        if options.json && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if !options.deferred && !headers.contains_key(CONTENT_LENGTH) {
            if let Some(len) = options.body.exact_len().filter(|len| *len > 0) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
        }

        if !options.agent.keep_alive() && !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        Ok(Self {
            target,
            method: options.method,
            headers,
            body: options.body,
            timeout: options.timeout,
            agent: options.agent,
            deferred: options.deferred,
        })
    }

    /// The resolved target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request headers, including defaults.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body source.
    pub fn body(&self) -> &BodySource {
        &self.body
    }

    /// Time allowed for response headers to arrive.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The connection agent.
    pub fn agent(&self) -> &AgentOption {
        &self.agent
    }

    /// True if the request stays writable after creation.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_headers() {
        let descriptor = Descriptor::new(
            "http://localhost:8080/api",
            RequestOptions::new()
                .method(Method::Post)
                .json(&serde_json::json!({"a": 1})),
        )
        .unwrap();

        let headers = descriptor.headers();
        assert_eq!(headers[HOST], "localhost:8080");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[CONTENT_LENGTH], "7");
        assert!(!headers.contains_key(CONNECTION));
        assert_eq!(descriptor.method(), Method::Post);
        assert_eq!(descriptor.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn caller_headers_win() {
        let descriptor = Descriptor::new(
            "http://example.com/",
            RequestOptions::new()
                .header("Content-Type", "application/vnd.api+json")
                .header("host", "override.test")
                .json(&[1, 2, 3])
                .agent(false),
        )
        .unwrap();

        let headers = descriptor.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(headers[HOST], "override.test");
        assert_eq!(headers[CONNECTION], "close");
    }

    #[test]
    fn repeated_headers_are_kept() {
        let descriptor = Descriptor::new(
            "http://example.com/",
            RequestOptions::new()
                .header("accept", "text/plain")
                .header("Accept", "application/json"),
        )
        .unwrap();

        let values: Vec<_> = descriptor.headers().get_all("accept").iter().collect();
        assert_eq!(values, vec!["text/plain", "application/json"]);
    }

    #[test]
    fn deferred_body_has_no_length() {
        let descriptor = Descriptor::new(
            "http://example.com/",
            RequestOptions::new().body("prefix").deferred(true),
        )
        .unwrap();
        assert!(!descriptor.headers().contains_key(CONTENT_LENGTH));
        assert!(descriptor.is_deferred());
    }

    #[test]
    fn invalid_header_is_reported_on_create() {
        let result = Descriptor::new(
            "http://example.com/",
            RequestOptions::new().header("bad header", "x"),
        );
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn unsupported_scheme() {
        let result = Descriptor::new("ftp://example.com/", RequestOptions::new());
        assert!(matches!(result, Err(Error::UnsupportedScheme(scheme)) if scheme == "ftp"));
    }

    #[test]
    fn method_conversion() {
        assert_eq!(http::Method::from(Method::Options), http::Method::OPTIONS);
        assert_eq!(Method::Connect.to_string(), "CONNECT");
        assert_eq!(Method::default(), Method::Get);
    }
}
