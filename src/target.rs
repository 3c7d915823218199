//! Request targets.
//!
//! A [`Target`] is resolved from an absolute base URL, an optional path which is
//! joined onto the URL's own path, and a [`Query`] whose entries are appended after
//! any query already present on the URL.

use std::fmt;

use url::{Position, Url};

use crate::Error;

/// The value of a single query parameter.
///
/// Lists expand to one `key=value` pair per element, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// A single value.
    Scalar(String),

    /// Repeated values for the same key.
    List(Vec<String>),
}

impl QueryValue {
    fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            QueryValue::Scalar(value) => std::slice::from_ref(value),
            QueryValue::List(values) => values,
        };
        values.iter().map(String::as_str)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Scalar(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Scalar(value)
    }
}

impl From<&String> for QueryValue {
    fn from(value: &String) -> Self {
        QueryValue::Scalar(value.clone())
    }
}

macro_rules! scalar_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for QueryValue {
                fn from(value: $ty) -> Self {
                    QueryValue::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_from_display!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);

impl<T: fmt::Display> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        QueryValue::List(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: fmt::Display> From<&[T]> for QueryValue {
    fn from(values: &[T]) -> Self {
        QueryValue::List(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: fmt::Display, const N: usize> From<[T; N]> for QueryValue {
    fn from(values: [T; N]) -> Self {
        QueryValue::List(values.iter().map(ToString::to_string).collect())
    }
}

/// Query parameters, kept in insertion order.
///
/// Inserting a key which is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    entries: Vec<(String, QueryValue)>,
}

impl Query {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for `key`.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<QueryValue>,
    {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Get the value for `key`.
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expanded `(key, value)` pairs, lists flattened in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(key, value)| value.iter().map(move |value| (key.as_str(), value)))
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, value) in iter {
            query.insert(key, value);
        }
        query
    }
}

/// A fully resolved request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
}

impl Target {
    /// Resolve `base`, joined with `path` and extended by `query`.
    ///
    /// Credentials and fragments are dropped from the URL.
    pub fn resolve(base: &str, path: &str, query: &Query) -> Result<Self, Error> {
        let mut url = Url::parse(base)?;
        if url.host_str().is_none() {
            return Err(Error::InvalidUrl(url::ParseError::EmptyHost));
        }

        let joined = join_path(url.path(), path);
        url.set_path(&joined);

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.pairs() {
                pairs.append_pair(key, value);
            }
        }

        url.set_fragment(None);
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Self { url })
    }

    /// The URL scheme, e.g. `http`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host, with brackets for IPv6 literals.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The explicit port, or the scheme's default.
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// The resolved path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The encoded query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// Decoded query pairs, in order.
    pub fn query_pairs(&self) -> url::form_urlencoded::Parse<'_> {
        self.url.query_pairs()
    }

    /// The value for a `Host` header: the host, plus the port when it is not the default.
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_owned(),
        }
    }

    /// Path and query, as sent in an HTTP/1 request line.
    pub fn origin_form(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    /// The underlying URL.
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// The target as an absolute [`http::Uri`].
    pub fn uri(&self) -> Result<http::Uri, Error> {
        self.url
            .as_str()
            .parse()
            .map_err(|error: http::uri::InvalidUri| Error::Request(error.into()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Join two paths with `/` and normalize the result, the way posix path joining works.
fn join_path(base: &str, extra: &str) -> String {
    let joined = match (base.is_empty(), extra.is_empty()) {
        (_, true) => base.to_owned(),
        (true, false) => extra.to_owned(),
        (false, false) => format!("{base}/{extra}"),
    };
    normalize_path(&joined)
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            segment => segments.push(segment),
        }
    }

    let mut normalized = segments.join("/");
    if trailing && !normalized.is_empty() {
        normalized.push('/');
    }

    match (absolute, normalized.is_empty()) {
        (true, _) => format!("/{normalized}"),
        (false, true) => ".".to_owned(),
        (false, false) => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths() {
        assert_eq!(join_path("/", ""), "/");
        assert_eq!(join_path("/api", "users"), "/api/users");
        assert_eq!(join_path("/api/", "/users/"), "/api/users/");
        assert_eq!(join_path("/api/v1", "../v2/./items"), "/api/v2/items");
        assert_eq!(join_path("/", "../../etc"), "/etc");
        assert_eq!(join_path("/a//b", ""), "/a/b");
        assert_eq!(normalize_path(""), ".");
        assert_eq!(normalize_path("../a"), "../a");
    }

    #[test]
    fn query_expands_lists_in_order() {
        let query: Query = [
            ("a", QueryValue::from("1")),
            ("b", QueryValue::from(vec!["x", "y"])),
        ]
        .into_iter()
        .collect();

        let target = Target::resolve("http://example.com/", "", &query).unwrap();
        assert_eq!(target.query(), Some("a=1&b=x&b=y"));
        assert_eq!(target.origin_form(), "/?a=1&b=x&b=y");
    }

    #[test]
    fn query_appends_to_existing() {
        let mut query = Query::new();
        query.insert("page", 2);
        query.insert("tag", ["red", "blue"]);
        query.insert("page", 3);

        let target =
            Target::resolve("https://example.com/items?sort=asc#top", "", &query).unwrap();
        assert_eq!(target.query(), Some("sort=asc&page=3&tag=red&tag=blue"));
        assert_eq!(
            target.to_string(),
            "https://example.com/items?sort=asc&page=3&tag=red&tag=blue"
        );
        assert_eq!(query.get("page"), Some(&QueryValue::Scalar("3".into())));
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn query_encodes_values() {
        let mut query = Query::new();
        query.insert("q", "a b&c");

        let target = Target::resolve("http://example.com", "search", &query).unwrap();
        assert_eq!(target.origin_form(), "/search?q=a+b%26c");
        let pairs: Vec<_> = target.query_pairs().collect();
        assert_eq!(pairs, vec![("q".into(), "a b&c".into())]);
    }

    #[test]
    fn authority_and_port() {
        let target = Target::resolve("http://user:pw@localhost:8080/x", "", &Query::new()).unwrap();
        assert_eq!(target.authority(), "localhost:8080");
        assert_eq!(target.port(), Some(8080));
        assert_eq!(target.to_string(), "http://localhost:8080/x");

        let target = Target::resolve("https://example.com/", "", &Query::new()).unwrap();
        assert_eq!(target.authority(), "example.com");
        assert_eq!(target.port(), Some(443));
        assert_eq!(target.scheme(), "https");
    }

    #[test]
    fn requires_host() {
        assert!(matches!(
            Target::resolve("not a url", "", &Query::new()),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            Target::resolve("file:///tmp/x", "", &Query::new()),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn uri_conversion() {
        let target = Target::resolve("http://example.com/path", "", &Query::new()).unwrap();
        let uri = target.uri().unwrap();
        assert_eq!(uri.host(), Some("example.com"));
        assert_eq!(uri.path(), "/path");
    }
}
