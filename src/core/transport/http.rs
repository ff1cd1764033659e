//! HTTP one-shot connector
//!
//! Opening an HTTP link touches no network. Each `send` performs one request
//! with the link's template and the given body; the response body is returned
//! in the [`SendReport`] and queued for the next `receive`.

use super::{
    Connector, ConnectorError, ConnectorErrorKind, Endpoint, Inbound, Link, OpenOptions,
    ProtocolKind, SendReport,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// PATCH
    Patch,
    /// OPTIONS
    Options,
}

impl HttpMethod {
    /// Methods that carry a request body
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
            Self::Patch => reqwest::Method::PATCH,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_reqwest())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "PATCH" => Ok(Self::Patch),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

/// Request template applied to every send on an HTTP link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpOptions {
    /// Request method
    pub method: HttpMethod,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    /// Token for the Authorization header
    pub token: Option<String>,
    /// Prefix the token with `Bearer ` when it lacks one
    pub auto_bearer: bool,
    /// Explicit content type
    pub content_type: Option<String>,
    /// Force `application/json`
    pub send_as_json: bool,
    /// Basic auth credentials, used when no token is set
    pub basic_auth: Option<(String, String)>,
}

impl HttpOptions {
    /// Set method
    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set token and bearer handling
    #[must_use]
    pub fn token(mut self, token: impl Into<String>, auto_bearer: bool) -> Self {
        self.token = Some(token.into());
        self.auto_bearer = auto_bearer;
        self
    }

    /// Set basic auth credentials
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Set explicit content type
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Force JSON content type
    #[must_use]
    pub fn send_as_json(mut self, enable: bool) -> Self {
        self.send_as_json = enable;
        self
    }

    /// Value of the Authorization header, if a token is set
    pub fn authorization(&self) -> Option<String> {
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        if self.auto_bearer && !token.to_lowercase().starts_with("bearer ") {
            Some(format!("Bearer {token}"))
        } else {
            Some(token.to_string())
        }
    }

    /// Content type sent with `body`
    pub fn resolve_content_type(&self, body: &[u8]) -> Option<String> {
        if let Some(ct) = self.content_type.as_deref().filter(|c| !c.trim().is_empty()) {
            return Some(ct.trim().to_string());
        }
        if !self.method.has_body() {
            return None;
        }
        if self.send_as_json || looks_like_json(body) {
            return Some("application/json".to_string());
        }
        None
    }
}

fn looks_like_json(body: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<serde_json::Value>(body),
        Ok(serde_json::Value::Object(_) | serde_json::Value::Array(_))
    )
}

/// HTTP connector backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConnector {
    /// Create a connector with a default client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a connector around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError> {
        let Endpoint::Http { url } = endpoint else {
            return Err(ConnectorError::invalid_endpoint(format!(
                "HTTP cannot open '{endpoint}'"
            )));
        };

        Ok(Box::new(HttpLink {
            client: self.client.clone(),
            url: url.clone(),
            template: options.http.clone(),
            timeout: options.connect_timeout,
            replies: VecDeque::new(),
        }))
    }
}

/// Request template bound to a URL
pub struct HttpLink {
    client: reqwest::Client,
    url: String,
    template: HttpOptions,
    timeout: Duration,
    replies: VecDeque<Bytes>,
}

impl HttpLink {
    fn build(&self, body: &[u8]) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(self.template.method.as_reqwest(), &self.url)
            .timeout(self.timeout);

        for (name, value) in &self.template.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = self.template.authorization() {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        } else if let Some((user, password)) = &self.template.basic_auth {
            req = req.basic_auth(user, Some(password));
        }
        if let Some(ct) = self.template.resolve_content_type(body) {
            req = req.header(reqwest::header::CONTENT_TYPE, ct);
        }
        if !body.is_empty() {
            req = req.body(body.to_vec());
        }
        req
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> ConnectorError {
    let kind = if e.is_timeout() {
        ConnectorErrorKind::Timeout
    } else if e.is_connect() {
        ConnectorErrorKind::Connection
    } else if e.is_builder() {
        ConnectorErrorKind::InvalidEndpoint
    } else {
        ConnectorErrorKind::Io
    };
    ConnectorError::new(kind, format!("request to {url} failed")).with_cause(e)
}

#[async_trait]
impl Link for HttpLink {
    async fn send(&mut self, data: &[u8]) -> Result<SendReport, ConnectorError> {
        let method = self.template.method;
        let response = self
            .build(data)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.url, e))?;

        let status = response.status().as_u16();
        let reply = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&self.url, e))?;
        tracing::debug!(%method, url = %self.url, status, bytes = reply.len(), "HTTP exchange");

        self.replies.push_back(reply.clone());
        Ok(SendReport {
            written: data.len(),
            reply: Some(reply),
            status: Some(status),
        })
    }

    async fn receive(&mut self) -> Result<Inbound, ConnectorError> {
        match self.replies.pop_front() {
            Some(data) => Ok(Inbound {
                data,
                peer: Some(self.url.clone()),
            }),
            // Nothing arrives on an HTTP link without a request
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.replies.clear();
    }

    fn remote(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_bearer_prefix_not_doubled() {
        let opts = HttpOptions::default().token("abc", true);
        assert_eq!(opts.authorization().as_deref(), Some("Bearer abc"));

        let opts = HttpOptions::default().token("Bearer abc", true);
        assert_eq!(opts.authorization().as_deref(), Some("Bearer abc"));

        let opts = HttpOptions::default().token("abc", false);
        assert_eq!(opts.authorization().as_deref(), Some("abc"));

        let opts = HttpOptions::default().token("  ", true);
        assert_eq!(opts.authorization(), None);
    }

    #[test]
    fn test_content_type_resolution() {
        let post = HttpOptions::default().method(HttpMethod::Post);
        assert_eq!(
            post.resolve_content_type(br#"{"a":1}"#).as_deref(),
            Some("application/json")
        );
        assert_eq!(post.resolve_content_type(b"plain text"), None);
        assert_eq!(
            post.clone().send_as_json(true).resolve_content_type(b"x").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            post.content_type("text/csv").resolve_content_type(b"[]").as_deref(),
            Some("text/csv")
        );

        let get = HttpOptions::default();
        assert_eq!(get.resolve_content_type(br#"{"a":1}"#), None);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
    }

    #[tokio::test]
    async fn test_http_exchange_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let body = "{\"ok\":true}";
            let response = format!(
                "HTTP/1.1 201 Created\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            request
        });

        let endpoint =
            Endpoint::parse(ProtocolKind::Http, &format!("http://{addr}/api/items")).unwrap();
        let options = OpenOptions::default().http(
            HttpOptions::default()
                .method(HttpMethod::Post)
                .token("secret", true),
        );
        let mut link = HttpConnector::new().open(&endpoint, &options).await.unwrap();

        let report = link.send(br#"{"name":"lamp"}"#).await.unwrap();
        assert_eq!(report.status, Some(201));
        assert_eq!(report.reply.as_deref(), Some(&b"{\"ok\":true}"[..]));

        let queued = link.receive().await.unwrap();
        assert_eq!(&queued.data[..], b"{\"ok\":true}");

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /api/items"));
        assert!(request.contains("authorization: bearer secret"));
        assert!(request.contains("content-type: application/json"));
    }
}
