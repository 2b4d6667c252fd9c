//! Transport primitives for broker calls.
//!
//! [`BrokerHttpClient`] is the crate's only dependency on an HTTP stack. Implementations send a
//! [`BrokerRequest`] and hand back every HTTP response, successful or not, as a
//! [`BrokerResponse`]; only failures that produced no response at all surface as
//! [`BrokerHttpClient::TransportError`]. Status classification happens in [`crate::api`] so
//! custom transports get the same retry and rejection semantics as the bundled reqwest client.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;

/// Boxed future returned by [`BrokerHttpClient::execute`].
pub type HttpFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of talking to the broker.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the broker
/// client and the lease manager behind an `Arc`.
pub trait BrokerHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends `request` and resolves with the response, whatever its status.
	fn execute(
		&self,
		request: BrokerRequest,
	) -> HttpFuture<'_, BrokerResponse, Self::TransportError>;
}

/// HTTP verbs used by the broker API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	/// Secret reads.
	Get,
	/// Login and token self-management.
	Post,
	/// Lease renewal and revocation.
	Put,
}
impl HttpMethod {
	/// Upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Fully resolved broker request.
#[derive(Clone)]
pub struct BrokerRequest {
	/// HTTP method.
	pub method: HttpMethod,
	/// Absolute URL.
	pub url: Url,
	/// Header pairs; may carry `X-Vault-Token`.
	pub headers: Vec<(String, String)>,
	/// JSON body, if any.
	pub body: Option<Vec<u8>>,
}
impl BrokerRequest {
	/// Starts a request without headers or body.
	pub fn new(method: HttpMethod, url: Url) -> Self {
		Self { method, url, headers: Vec::new(), body: None }
	}

	/// Appends a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Sets a JSON body.
	pub fn json_body(mut self, body: Vec<u8>) -> Self {
		self.headers.push(("Content-Type".into(), "application/json".into()));
		self.body = Some(body);

		self
	}

	/// First value of header `name` (case-insensitive).
	pub fn header_value(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}
impl Debug for BrokerRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerRequest")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("headers", &self.headers.iter().map(|(name, _)| name).collect::<Vec<_>>())
			.field("body_len", &self.body.as_ref().map(Vec::len))
			.finish()
	}
}

/// Status and retry hint of a broker response.
///
/// Additional metadata fields may be added in future releases, so downstream code
/// should construct values using field names instead of struct update syntax.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Raw broker response.
#[derive(Clone)]
pub struct BrokerResponse {
	/// Status and retry hint.
	pub metadata: ResponseMetadata,
	/// Response body; may hold secrets, never logged.
	pub body: Vec<u8>,
}
impl BrokerResponse {
	/// Builds a response with no retry hint.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { metadata: ResponseMetadata { status, retry_after: None }, body: body.into() }
	}

	/// HTTP status code.
	pub fn status(&self) -> u16 {
		self.metadata.status
	}
}
impl Debug for BrokerResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerResponse")
			.field("metadata", &self.metadata)
			.field("body_len", &self.body.len())
			.finish()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl BrokerHttpClient for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn execute(
		&self,
		request: BrokerRequest,
	) -> HttpFuture<'_, BrokerResponse, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				HttpMethod::Get => reqwest::Method::GET,
				HttpMethod::Post => reqwest::Method::POST,
				HttpMethod::Put => reqwest::Method::PUT,
			};
			let mut builder = client.request(method, request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body = response.bytes().await?.to_vec();

			Ok(BrokerResponse { metadata: ResponseMetadata { status, retry_after }, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
