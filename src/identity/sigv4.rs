//! AWS Signature Version 4 (`AWS4-HMAC-SHA256`) signing and verification.

// crates.io
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::{format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{
	_prelude::*,
	identity::{AwsCredentials, HeaderSet, IdentityAssertion},
};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm label.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

const AMZ_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[year][month][day]T[hour][minute][second]Z");
const DATE_STAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");

/// Request view fed into the signer.
#[derive(Clone, Copy, Debug)]
pub struct SignableRequest<'a> {
	/// Upper-case HTTP method.
	pub method: &'a str,
	/// Full request URL; `host` is derived from it.
	pub url: &'a Url,
	/// Headers to sign. `Authorization` is ignored if present.
	pub headers: &'a HeaderSet,
	/// Request body.
	pub body: &'a [u8],
}

/// Region/service/instant triple that scopes a signature.
#[derive(Clone, Copy, Debug)]
pub struct SigningScope<'a> {
	/// AWS region, e.g. `us-east-1`.
	pub region: &'a str,
	/// AWS service, e.g. `sts`.
	pub service: &'a str,
	/// Signing instant; must match the request's `X-Amz-Date`.
	pub signed_at: OffsetDateTime,
}
impl SigningScope<'_> {
	/// `<date>/<region>/<service>/aws4_request`.
	pub fn credential_scope(&self) -> Result<String> {
		Ok(format!("{}/{}/{}/aws4_request", date_stamp(self.signed_at)?, self.region, self.service))
	}
}

/// Output of [`sign`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
	/// Lower-case hex signature.
	pub signature: String,
	/// `;`-joined lower-case header names that were signed.
	pub signed_headers: String,
	/// Credential scope string.
	pub credential_scope: String,
}
impl Signature {
	/// Renders the `Authorization` header value.
	pub fn authorization_header(&self, access_key_id: &str) -> String {
		format!(
			"{ALGORITHM} Credential={access_key_id}/{}, SignedHeaders={}, Signature={}",
			self.credential_scope, self.signed_headers, self.signature
		)
	}
}

/// Formats `instant` as an `X-Amz-Date` value (`20150830T123600Z`).
pub fn amz_date(instant: OffsetDateTime) -> Result<String> {
	instant
		.to_offset(time::UtcOffset::UTC)
		.format(AMZ_DATE_FORMAT)
		.map_err(|e| Error::SigningFailed { reason: format!("cannot format signing date: {e}") })
}

fn date_stamp(instant: OffsetDateTime) -> Result<String> {
	instant
		.to_offset(time::UtcOffset::UTC)
		.format(DATE_STAMP_FORMAT)
		.map_err(|e| Error::SigningFailed { reason: format!("cannot format signing date: {e}") })
}

/// Signs `request` and returns the signature together with the signed header list.
pub fn sign(
	request: &SignableRequest<'_>,
	credentials: &AwsCredentials,
	scope: &SigningScope<'_>,
) -> Result<Signature> {
	let canonical = canonical_headers(request)?;
	let signed_headers = canonical.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(";");
	let canonical_request = canonical_request(request, &canonical, &signed_headers);
	let credential_scope = scope.credential_scope()?;
	let string_to_sign = string_to_sign(scope.signed_at, &credential_scope, &canonical_request)?;
	let key = signing_key(credentials.secret_access_key.expose(), scope)?;
	let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

	Ok(Signature { signature, signed_headers, credential_scope })
}

/// Recomputes the signature of `assertion` and checks it in constant time.
///
/// Region and service are read back from the `Authorization` header's credential scope, and the
/// signed header list is honored exactly as the signer declared it.
pub fn verify(assertion: &IdentityAssertion, credentials: &AwsCredentials) -> bool {
	let Some(parsed) = assertion
		.header("Authorization")
		.and_then(ParsedAuthorization::parse)
		.filter(|parsed| parsed.access_key_id == credentials.access_key_id)
	else {
		return false;
	};
	let request = SignableRequest {
		method: assertion.method(),
		url: assertion.url(),
		headers: assertion.headers(),
		body: assertion.body(),
	};
	let scope = SigningScope {
		region: parsed.region,
		service: parsed.service,
		signed_at: assertion.signed_at(),
	};
	let Ok(canonical) = canonical_headers(&request) else {
		return false;
	};
	let canonical = canonical
		.into_iter()
		.filter(|(name, _)| parsed.signed_headers.split(';').any(|signed| signed == name))
		.collect::<Vec<_>>();
	let canonical_request = canonical_request(&request, &canonical, parsed.signed_headers);
	let Ok(credential_scope) = scope.credential_scope() else {
		return false;
	};
	let Ok(string_to_sign) = string_to_sign(scope.signed_at, &credential_scope, &canonical_request)
	else {
		return false;
	};
	let Ok(expected) = hex::decode(parsed.signature) else {
		return false;
	};
	let Ok(key) = signing_key(credentials.secret_access_key.expose(), &scope) else {
		return false;
	};
	let Ok(mut mac) = HmacSha256::new_from_slice(&key) else {
		return false;
	};

	mac.update(string_to_sign.as_bytes());

	mac.verify_slice(&expected).is_ok() && assertion.signature() == parsed.signature
}

/// Derives the per-day signing key.
pub fn signing_key(secret_access_key: &str, scope: &SigningScope<'_>) -> Result<Vec<u8>> {
	let date = date_stamp(scope.signed_at)?;
	let k_date = hmac(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes())?;
	let k_region = hmac(&k_date, scope.region.as_bytes())?;
	let k_service = hmac(&k_region, scope.service.as_bytes())?;

	hmac(&k_service, b"aws4_request")
}

fn string_to_sign(
	signed_at: OffsetDateTime,
	credential_scope: &str,
	canonical_request: &str,
) -> Result<String> {
	Ok(format!(
		"{ALGORITHM}\n{}\n{credential_scope}\n{}",
		amz_date(signed_at)?,
		hex_sha256(canonical_request.as_bytes())
	))
}

fn canonical_request(
	request: &SignableRequest<'_>,
	canonical_headers: &[(String, String)],
	signed_headers: &str,
) -> String {
	let mut headers_block = String::new();

	for (name, value) in canonical_headers {
		headers_block.push_str(name);
		headers_block.push(':');
		headers_block.push_str(value);
		headers_block.push('\n');
	}

	let path = match request.url.path() {
		"" => "/",
		path => path,
	};

	format!(
		"{}\n{path}\n{}\n{headers_block}\n{signed_headers}\n{}",
		request.method,
		canonical_query(request.url),
		hex_sha256(request.body)
	)
}

/// Lower-cased, sorted `(name, value)` pairs including `host`.
fn canonical_headers(request: &SignableRequest<'_>) -> Result<Vec<(String, String)>> {
	let host = request.url.host_str().ok_or_else(|| Error::SigningFailed {
		reason: format!("request URL `{}` has no host", request.url),
	})?;
	let host = match request.url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	};
	let mut merged = BTreeMap::from_iter([("host".to_owned(), host)]);

	for (name, values) in request.headers {
		let name = name.to_ascii_lowercase();

		if name == "authorization" || name == "host" {
			continue;
		}

		let value = values.iter().map(|value| collapse_whitespace(value)).collect::<Vec<_>>().join(",");

		merged.insert(name, value);
	}

	Ok(merged.into_iter().collect())
}

fn canonical_query(url: &Url) -> String {
	let mut pairs = url
		.query_pairs()
		.map(|(key, value)| (uri_encode(&key), uri_encode(&value)))
		.collect::<Vec<_>>();

	pairs.sort();

	pairs.into_iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join("&")
}

fn uri_encode(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for byte in raw.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' =>
				out.push(byte as char),
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}

	out
}

fn collapse_whitespace(value: &str) -> String {
	value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hex_sha256(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
	let mut mac = HmacSha256::new_from_slice(key)
		.map_err(|e| Error::SigningFailed { reason: format!("invalid HMAC key: {e}") })?;

	mac.update(data);

	Ok(mac.finalize().into_bytes().to_vec())
}

struct ParsedAuthorization<'a> {
	access_key_id: &'a str,
	region: &'a str,
	service: &'a str,
	signed_headers: &'a str,
	signature: &'a str,
}
impl<'a> ParsedAuthorization<'a> {
	fn parse(header: &'a str) -> Option<Self> {
		let rest = header.strip_prefix(ALGORITHM)?.trim_start();
		let mut credential = None;
		let mut signed_headers = None;
		let mut signature = None;

		for part in rest.split(',').map(str::trim) {
			if let Some(value) = part.strip_prefix("Credential=") {
				credential = Some(value);
			} else if let Some(value) = part.strip_prefix("SignedHeaders=") {
				signed_headers = Some(value);
			} else if let Some(value) = part.strip_prefix("Signature=") {
				signature = Some(value);
			}
		}

		let mut scope = credential?.split('/');
		let access_key_id = scope.next()?;
		let _date = scope.next()?;
		let region = scope.next()?;
		let service = scope.next()?;

		Some(Self { access_key_id, region, service, signed_headers: signed_headers?, signature: signature? })
	}
}
