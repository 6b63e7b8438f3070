use std::future::Future;

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use reqwest::{header::LOCATION, redirect};
use serde_json::Value;
use url::Url;

use crate::error::RscError;

/// Parameters of an RSC request.
#[derive(Clone, Debug, PartialEq)]
pub enum RscParams {
    /// Already in query-string form; sent as `GET <url>?<query>`.
    Query(String),
    /// Sent as a reply-encoded `POST` body.
    Value(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RscRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Bytes>,
}

impl RscRequest {
    pub fn get(url: String) -> Self {
        Self {
            method: Method::Get,
            url,
            body: None,
        }
    }

    pub fn post(url: String, body: Bytes) -> Self {
        Self {
            method: Method::Post,
            url,
            body: Some(body),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RscResponse {
    pub status: u16,
    pub status_text: String,
    pub location: Option<String>,
    pub body: Bytes,
}

impl RscResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            location: None,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs RSC requests for a store. Implemented for closures returning a
/// future, so tests and store views can wrap or replace the transport.
pub trait FetchFn: Send + Sync {
    fn fetch(&self, request: RscRequest) -> BoxFuture<'static, Result<RscResponse, RscError>>;
}

impl<F, Fut> FetchFn for F
where
    F: Fn(RscRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RscResponse, RscError>> + Send + 'static,
{
    fn fetch(&self, request: RscRequest) -> BoxFuture<'static, Result<RscResponse, RscError>> {
        (self)(request).boxed()
    }
}

/// [`FetchFn`] backed by a [`reqwest::Client`]. Request urls are resolved
/// against `origin`.
///
/// Redirects are not followed so a redirect response surfaces its `location`
/// on the resulting [`RscError::Status`].
#[derive(Clone, Debug)]
pub struct ReqwestFetch {
    client: reqwest::Client,
    origin: Url,
}

impl ReqwestFetch {
    pub fn new(origin: Url) -> Result<Self, RscError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(RscError::transport)?;
        Ok(Self { client, origin })
    }
}

impl FetchFn for ReqwestFetch {
    fn fetch(&self, request: RscRequest) -> BoxFuture<'static, Result<RscResponse, RscError>> {
        let client = self.client.clone();
        let url = self.origin.join(&request.url);
        async move {
            let url = url.map_err(RscError::transport)?;
            let builder = match (request.method, request.body) {
                (Method::Post, Some(body)) => client.post(url).body(body),
                (Method::Post, None) => client.post(url),
                (Method::Get, _) => client.get(url),
            };
            let response = builder.send().await.map_err(RscError::transport)?;
            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(RscError::transport)?;
            Ok(RscResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                location,
                body,
            })
        }
        .boxed()
    }
}

/// Turns a non-2xx response into [`RscError::Status`].
pub fn check_status(response: RscResponse) -> Result<RscResponse, RscError> {
    if response.is_ok() {
        return Ok(response);
    }
    let text = String::from_utf8_lossy(&response.body);
    let message = if text.is_empty() {
        response.status_text.clone()
    } else {
        text.into_owned()
    };
    Err(RscError::Status {
        status: response.status,
        location: response.location,
        message,
    })
}
