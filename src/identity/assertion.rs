//! Signed identity assertions and their login wire encoding.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{_prelude::*, auth::RoleName, identity::HeaderSet};

const REDACTED_HEADERS: [&str; 2] = ["authorization", "x-amz-security-token"];

/// Signed proof of identity, built once per login attempt and consumed by the exchange.
///
/// Fields are private and the type is not `Clone`; once signed nothing can alter it.
pub struct IdentityAssertion {
	method: String,
	url: Url,
	headers: HeaderSet,
	body: Vec<u8>,
	signature: String,
	signed_at: OffsetDateTime,
}
impl IdentityAssertion {
	/// How long after signing the broker will still accept the assertion.
	pub const VALIDITY: Duration = Duration::minutes(5);

	/// Assembles a signed assertion. `headers` must already carry `Authorization`.
	pub fn new(
		method: impl Into<String>,
		url: Url,
		headers: HeaderSet,
		body: Vec<u8>,
		signature: impl Into<String>,
		signed_at: OffsetDateTime,
	) -> Self {
		Self { method: method.into(), url, headers, body, signature: signature.into(), signed_at }
	}

	/// Upper-case HTTP method of the signed request.
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Target URL of the signed request.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Header set of the signed request, `Authorization` included.
	pub fn headers(&self) -> &HeaderSet {
		&self.headers
	}

	/// First value of header `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.and_then(|(_, values)| values.first())
			.map(String::as_str)
	}

	/// Request body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Hex signature.
	pub fn signature(&self) -> &str {
		&self.signature
	}

	/// Signing instant.
	pub fn signed_at(&self) -> OffsetDateTime {
		self.signed_at
	}

	/// Returns `true` while `instant` lies within [`Self::VALIDITY`] of the signing instant,
	/// in either direction to tolerate clock skew.
	pub fn is_fresh_at(&self, instant: OffsetDateTime) -> bool {
		(instant - self.signed_at).abs() < Self::VALIDITY
	}

	/// Encodes the assertion into the broker's login body for `role`.
	pub fn encode(&self, role: &RoleName) -> Result<LoginPayload> {
		let headers = serde_json::to_vec(&self.headers).map_err(|e| Error::SigningFailed {
			reason: format!("cannot encode signed headers: {e}"),
		})?;

		Ok(LoginPayload {
			iam_http_request_method: self.method.clone(),
			iam_request_url: STANDARD.encode(self.url.as_str()),
			iam_request_headers: STANDARD.encode(headers),
			iam_request_body: STANDARD.encode(&self.body),
			role: role.to_string(),
		})
	}
}
impl Debug for IdentityAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let headers = self
			.headers
			.keys()
			.map(|name| {
				if REDACTED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
					format!("{name}: <redacted>")
				} else {
					name.clone()
				}
			})
			.collect::<Vec<_>>();

		f.debug_struct("IdentityAssertion")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("headers", &headers)
			.field("signed_at", &self.signed_at)
			.finish()
	}
}

/// JSON body posted to `auth/<mount>/login`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
	/// Plain HTTP method of the signed request.
	pub iam_http_request_method: String,
	/// Base64 URL of the signed request.
	pub iam_request_url: String,
	/// Base64 JSON object of header name to value list.
	pub iam_request_headers: String,
	/// Base64 request body.
	pub iam_request_body: String,
	/// Broker role to log in as.
	pub role: String,
}
impl LoginPayload {
	/// Reverses the base64/JSON encoding, yielding the signed request as the broker sees it.
	pub fn decode(&self) -> Result<DecodedAssertion, AssertionDecodeError> {
		let url = String::from_utf8(decode_field("iam_request_url", &self.iam_request_url)?)
			.map_err(|_| AssertionDecodeError::NotUtf8 { field: "iam_request_url" })?;
		let url = Url::parse(&url).map_err(|source| AssertionDecodeError::Url { source })?;
		let headers = serde_json::from_slice(&decode_field(
			"iam_request_headers",
			&self.iam_request_headers,
		)?)
		.map_err(|source| AssertionDecodeError::Headers { source })?;
		let body = decode_field("iam_request_body", &self.iam_request_body)?;

		Ok(DecodedAssertion { method: self.iam_http_request_method.clone(), url, headers, body })
	}
}
impl Debug for LoginPayload {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LoginPayload")
			.field("iam_http_request_method", &self.iam_http_request_method)
			.field("role", &self.role)
			.finish_non_exhaustive()
	}
}

/// Signed request recovered from a [`LoginPayload`].
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedAssertion {
	/// HTTP method.
	pub method: String,
	/// Request URL.
	pub url: Url,
	/// Header set, `Authorization` included.
	pub headers: HeaderSet,
	/// Request body.
	pub body: Vec<u8>,
}
impl Debug for DecodedAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DecodedAssertion")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("headers", &self.headers.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

/// Failures raised by [`LoginPayload::decode`].
#[derive(Debug, ThisError)]
pub enum AssertionDecodeError {
	/// A field is not valid standard base64.
	#[error("Field `{field}` is not valid base64.")]
	Base64 {
		/// Offending field.
		field: &'static str,
		/// Decoder failure.
		#[source]
		source: base64::DecodeError,
	},
	/// A text field decoded to invalid UTF-8.
	#[error("Field `{field}` is not valid UTF-8.")]
	NotUtf8 {
		/// Offending field.
		field: &'static str,
	},
	/// The decoded URL does not parse.
	#[error("Decoded request URL is invalid.")]
	Url {
		/// Parser failure.
		#[source]
		source: url::ParseError,
	},
	/// The decoded headers are not a JSON object of string lists.
	#[error("Decoded request headers are not a JSON object of string lists.")]
	Headers {
		/// JSON failure.
		#[source]
		source: serde_json::Error,
	},
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, AssertionDecodeError> {
	STANDARD.decode(value).map_err(|source| AssertionDecodeError::Base64 { field, source })
}
