//! Broker wire envelopes, response classification, and transport error mapping.
//!
//! Every broker response passes through [`classify`] before any body is decoded:
//!
//! | Status | Result |
//! | --- | --- |
//! | 2xx | decoded by the caller |
//! | 412, 429, 5xx | [`TransportError::Upstream`] (retried) |
//! | anything else | [`Error::BrokerRejected`] (not retried) |

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, MAX_LIFETIME, SecretLease, SecretPath, SecretPayload},
	error::{RequestTarget, TransportError},
	http::BrokerResponse,
	obs::FlowKind,
};

const REASON_MAX_LEN: usize = 256;

/// Maps transport failures into broker [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an error raised before any response arrived.
	fn map_transport_error(&self, operation: FlowKind, error: E) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, operation: FlowKind, err: ReqwestError) -> Error {
		if err.is_builder() {
			return crate::error::ConfigError::from(err).into();
		}

		#[cfg(feature = "tracing")]
		tracing::debug!(
			flow = operation.as_str(),
			connect = err.is_connect(),
			timeout = err.is_timeout(),
			"Broker transport failed."
		);
		#[cfg(not(feature = "tracing"))]
		let _ = operation;

		TransportError::from(err).into()
	}
}

/// Body of `sys/leases/renew`.
#[derive(Clone, Debug, Serialize)]
pub struct RenewLeaseRequest<'a> {
	/// Lease to extend.
	pub lease_id: &'a str,
	/// Requested extension in seconds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub increment: Option<i64>,
}

/// Body of `sys/leases/revoke`.
#[derive(Clone, Debug, Serialize)]
pub struct RevokeLeaseRequest<'a> {
	/// Lease to revoke.
	pub lease_id: &'a str,
}

/// Response of `auth/<mount>/login` and `auth/token/renew-self`.
#[derive(Deserialize)]
pub struct AuthResponse {
	/// Token block; absent when the broker answered without issuing a token.
	pub auth: Option<AuthBlock>,
}

/// `auth` block of an [`AuthResponse`].
#[derive(Deserialize)]
pub struct AuthBlock {
	/// Issued token.
	pub client_token: Option<String>,
	/// Token accessor.
	#[serde(default)]
	pub accessor: Option<String>,
	/// Token TTL in seconds; `0` means none.
	#[serde(default)]
	pub lease_duration: u64,
	/// Whether `renew-self` is allowed.
	#[serde(default)]
	pub renewable: bool,
	/// Attached policies.
	#[serde(default)]
	pub policies: Vec<String>,
}

/// Response of a secret read.
#[derive(Deserialize)]
pub struct SecretResponse {
	/// Lease identifier.
	#[serde(default)]
	pub lease_id: String,
	/// Lease lifetime in seconds.
	#[serde(default)]
	pub lease_duration: i64,
	/// Whether the lease can be renewed.
	#[serde(default)]
	pub renewable: bool,
	/// Secret material.
	pub data: Option<BTreeMap<String, serde_json::Value>>,
}

/// Response of `sys/leases/renew`.
#[derive(Debug, Deserialize)]
pub struct RenewLeaseResponse {
	/// Renewed lease identifier.
	#[serde(default)]
	pub lease_id: String,
	/// New lifetime in seconds, counted from the renewal.
	#[serde(default)]
	pub lease_duration: i64,
	/// Whether further renewals are allowed.
	#[serde(default)]
	pub renewable: bool,
}

#[derive(Default, Deserialize)]
struct ErrorBody {
	#[serde(default)]
	errors: Vec<String>,
}

/// Sorts a broker response into success, retryable upstream failure, or rejection.
pub fn classify(
	operation: FlowKind,
	target: &RequestTarget,
	response: &BrokerResponse,
) -> Result<()> {
	let status = response.status();

	match status {
		200..=299 => Ok(()),
		412 | 429 | 500..=599 =>
			Err(TransportError::Upstream { status, retry_after: response.metadata.retry_after }
				.into()),
		_ => Err(Error::BrokerRejected {
			operation,
			target: target.clone(),
			status,
			reason: summarize_errors(&response.body),
		}),
	}
}

/// Decodes a JSON body, recording the failing path on error.
pub fn decode<T>(operation: FlowKind, body: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		Error::MalformedResponse {
			operation,
			reason: format!("body does not decode at `{}`", source.path()),
			source: Some(source),
		}
	})
}

/// Serializes a JSON request body.
pub fn encode<T>(operation: FlowKind, body: &T) -> Result<Vec<u8>>
where
	T: ?Sized + Serialize,
{
	serde_json::to_vec(body).map_err(|source| Error::Encode { operation, source })
}

/// Builds an [`AccessToken`] from a login or renew-self response.
pub fn access_token(
	operation: FlowKind,
	response: AuthResponse,
	issued_at: OffsetDateTime,
	sequence: u64,
) -> Result<AccessToken> {
	let auth = response.auth.ok_or_else(|| Error::malformed(operation, "response has no `auth`"))?;
	let token = auth
		.client_token
		.filter(|token| !token.is_empty())
		.ok_or_else(|| Error::malformed(operation, "response has no `auth.client_token`"))?;
	let mut builder = AccessToken::builder(token)
		.issued_at(issued_at)
		.lease_duration_secs(auth.lease_duration)
		.renewable(auth.renewable)
		.policies(auth.policies)
		.sequence(sequence);

	if let Some(accessor) = auth.accessor.filter(|accessor| !accessor.is_empty()) {
		builder = builder.accessor(accessor);
	}

	builder.build().map_err(|e| Error::malformed(operation, e.to_string()))
}

/// Builds a [`SecretLease`] from a secret read.
pub fn secret_lease(
	path: &SecretPath,
	response: SecretResponse,
	obtained_at: OffsetDateTime,
	generation: u64,
) -> Result<SecretLease> {
	const KIND: FlowKind = FlowKind::Fetch;

	let data = response.data.ok_or_else(|| Error::malformed(KIND, "response has no `data`"))?;

	if response.lease_id.is_empty() {
		return Err(Error::malformed(KIND, "response has no `lease_id`"));
	}
	let duration = lease_lifetime(KIND, response.lease_duration, obtained_at)?;

	Ok(SecretLease {
		path: path.clone(),
		payload: SecretPayload::new(data),
		lease_id: response.lease_id,
		duration,
		renewable: response.renewable,
		obtained_at,
		generation,
	})
}

/// Applies a renewal to `previous`, keeping its payload and generation.
pub fn renewed_lease(
	previous: &SecretLease,
	response: RenewLeaseResponse,
	obtained_at: OffsetDateTime,
) -> Result<SecretLease> {
	const KIND: FlowKind = FlowKind::Renew;

	let duration = lease_lifetime(KIND, response.lease_duration, obtained_at)?;

	if !response.lease_id.is_empty() && response.lease_id != previous.lease_id {
		return Err(Error::malformed(KIND, "renewal answered for a different lease"));
	}

	Ok(SecretLease {
		duration,
		renewable: response.renewable,
		obtained_at,
		..previous.clone()
	})
}

/// Validates a broker-granted `lease_duration` in seconds.
fn lease_lifetime(
	operation: FlowKind,
	secs: i64,
	obtained_at: OffsetDateTime,
) -> Result<Duration> {
	if secs <= 0 {
		return Err(Error::malformed(
			operation,
			format!("`lease_duration` must be positive, got {secs}"),
		));
	}

	let duration = Duration::seconds(secs);

	if duration > MAX_LIFETIME || obtained_at.checked_add(duration).is_none() {
		return Err(Error::malformed(
			operation,
			format!(
				"`lease_duration` of {secs}s exceeds the {}s limit",
				MAX_LIFETIME.whole_seconds()
			),
		));
	}

	Ok(duration)
}

fn summarize_errors(body: &[u8]) -> String {
	let errors = serde_json::from_slice::<ErrorBody>(body).unwrap_or_default().errors;
	let mut reason = errors
		.iter()
		.map(|error| error.trim())
		.filter(|error| !error.is_empty())
		.collect::<Vec<_>>()
		.join("; ");

	if reason.is_empty() {
		return "no error detail".into();
	}
	if reason.len() > REASON_MAX_LEN {
		let mut cut = REASON_MAX_LEN;

		while !reason.is_char_boundary(cut) {
			cut -= 1;
		}

		reason.truncate(cut);
		reason.push_str("...");
	}

	reason
}
