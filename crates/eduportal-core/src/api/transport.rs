//! Wire-level request/response types and the HTTP transport.
//!
//! Requests are plain owned data so the gateway can resend an identical
//! request after refreshing the credential.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::CookieStore;
use reqwest::header::{self, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::cookies::CookieJar;
use super::ApiError;
use crate::auth::DurableStorage;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Multipart form. No JSON content type is set; the transport writes
    /// its own boundary.
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                mime: None,
                bytes,
            },
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        if let FormValue::File { mime: ref mut m, .. } = self.value {
            *m = Some(mime.into());
        }
        self
    }
}

/// What a caller asks of `ApiGateway::call`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub method: Method,
    pub body: RequestBody,
    pub query: Vec<(String, String)>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl CallOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: RequestBody::Empty,
            query: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).json(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::new(Method::PATCH).json(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: RequestBody,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    /// Send the cookie jar (the backend reads its refresh cookie from it)
    pub include_cookies: bool,
}

impl ApiRequest {
    pub fn new(endpoint: &str, options: CallOptions) -> Self {
        Self {
            method: options.method,
            endpoint: endpoint.to_string(),
            body: options.body,
            query: options.query,
            bearer: None,
            include_cookies: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON; an empty body (204) is `null`.
    pub fn json(&self) -> Result<Value, ApiError> {
        self.parse()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

/// Sends a request and returns the raw response. Non-2xx statuses are
/// responses, not errors; only a missing response is an `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;

    /// Keep cookies across restarts (`true`) or for this process only.
    fn persist_cookies(&self, _persist: bool) {}

    /// Forget every cookie, including the saved copy.
    fn clear_cookies(&self) {}
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    /// Sends and receives cookies through `jar`
    with_cookies: Client,
    /// Sends no cookies; `Set-Cookie` responses are copied into `jar` by hand
    without_cookies: Client,
    jar: Arc<CookieJar>,
}

impl HttpTransport {
    /// The cookie jar is loaded from, and saved to, `storage`.
    pub fn new(config: &Config, storage: Arc<dyn DurableStorage>) -> Result<Self, ApiError> {
        let jar = Arc::new(CookieJar::load(storage));
        let with_cookies = Client::builder()
            .timeout(config.request_timeout())
            .cookie_provider(jar.provider())
            .build()?;
        let without_cookies = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url().to_string(),
            with_cookies,
            without_cookies,
            jar,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn build_form(parts: &[FormPart]) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for part in parts {
            form = match &part.value {
                FormValue::Text(text) => form.text(part.name.clone(), text.clone()),
                FormValue::File {
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime)?;
                    }
                    form.part(part.name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url(&request.endpoint);
        let client = if request.include_cookies {
            &self.with_cookies
        } else {
            &self.without_cookies
        };

        let mut builder = client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(ref body) => builder.json(body),
            RequestBody::Multipart(ref parts) => builder.multipart(Self::build_form(parts)?),
        };

        let response = builder.send().await?;

        let set_cookie: Vec<&HeaderValue> =
            response.headers().get_all(header::SET_COOKIE).iter().collect();
        if !set_cookie.is_empty() {
            if !request.include_cookies {
                self.jar
                    .provider()
                    .set_cookies(&mut set_cookie.into_iter(), response.url());
            }
            self.jar.save();
        }

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(method = %request.method, url = %url, status, "API response");
        Ok(ApiResponse { status, body })
    }

    fn persist_cookies(&self, persist: bool) {
        self.jar.set_persistent(persist);
    }

    fn clear_cookies(&self) {
        self.jar.clear();
    }
}
