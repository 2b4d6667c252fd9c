//! Crate-level error types shared by the identity builder, broker client, and lease manager.

// self
use crate::{_prelude::*, auth::IdentifierError, obs::FlowKind};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// Only [`Error::Transport`] is retried automatically. Messages never embed tokens or
/// credential material.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure or temporary upstream condition; retry with backoff.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// No cloud credentials could be discovered in the environment.
	#[error("No ambient cloud credentials are available: {reason}.")]
	NoAmbientCredentials {
		/// Which lookup failed.
		reason: String,
	},
	/// The identity assertion could not be signed or is no longer within its signing window.
	#[error("Identity assertion could not be signed: {reason}.")]
	SigningFailed {
		/// Human-readable failure summary.
		reason: String,
	},
	/// The broker refused the request (bad role, expired assertion, denied policy, unknown path).
	#[error("Broker rejected the {operation} request for {target} with HTTP {status}: {reason}.")]
	BrokerRejected {
		/// Flow that issued the request.
		operation: FlowKind,
		/// Path and role the request targeted.
		target: RequestTarget,
		/// HTTP status returned by the broker.
		status: u16,
		/// Summary of the broker's `errors` array.
		reason: String,
	},
	/// The broker answered successfully but the body is missing required fields or is not JSON.
	#[error("Broker returned a malformed {operation} response: {reason}.")]
	MalformedResponse {
		/// Flow that received the response.
		operation: FlowKind,
		/// What was wrong with the body.
		reason: String,
		/// Structured JSON decoding failure, if decoding failed.
		#[source]
		source: Option<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// A request body could not be serialized.
	#[error("The {operation} request body could not be encoded.")]
	Encode {
		/// Flow that built the request.
		operation: FlowKind,
		/// Serializer failure.
		#[source]
		source: serde_json::Error,
	},
	/// A lease expired and no replacement could be obtained.
	#[error("Lease for `{path}` expired and could not be replaced.")]
	LeaseExpired {
		/// Secret path whose lease expired.
		path: String,
		/// Failure raised while obtaining the replacement, if one was attempted.
		#[source]
		source: Option<Box<Error>>,
	},
	/// Renewal was requested for a lease or token the broker marked as non-renewable.
	#[error("The {what} is not renewable.")]
	NotRenewable {
		/// Description of the non-renewable resource.
		what: String,
	},
	/// An operation needed an access token but none is held.
	#[error("No access token is held; log in first.")]
	Unauthenticated,
	/// The downstream connection provisioner failed.
	#[error("Connection provisioner failed.")]
	Provision {
		/// Provisioner-specific failure.
		#[source]
		source: BoxError,
	},
}
impl Error {
	/// Returns `true` when retrying the same request may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(_))
	}

	/// Returns `true` when the broker reported that the presented token is not accepted.
	pub fn is_auth_failure(&self) -> bool {
		matches!(self, Self::BrokerRejected { status: 401 | 403, .. })
	}

	/// Wraps a provisioner failure.
	pub fn provision(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Provision { source: Box::new(src) }
	}

	pub(crate) fn malformed(operation: FlowKind, reason: impl Into<String>) -> Self {
		Self::MalformedResponse { operation, reason: reason.into(), source: None }
	}
}

/// Broker path and role attached to rejections so failures can be diagnosed from logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTarget {
	/// Broker API path relative to `/v1/`.
	pub path: String,
	/// Role presented during login, when relevant.
	pub role: Option<String>,
}
impl RequestTarget {
	/// Targets a path without a role.
	pub fn path(path: impl Into<String>) -> Self {
		Self { path: path.into(), role: None }
	}

	/// Attaches the login role.
	pub fn with_role(mut self, role: impl Into<String>) -> Self {
		self.role = Some(role.into());

		self
	}
}
impl Display for RequestTarget {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match &self.role {
			Some(role) => write!(f, "`{}` (role `{role}`)", self.path),
			None => write!(f, "`{}`", self.path),
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Broker address cannot be parsed.
	#[error("Broker address is invalid.")]
	InvalidAddress {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Broker address cannot carry path segments (e.g. `mailto:`).
	#[error("Broker address `{address}` cannot be used as a base URL.")]
	AddressNotABase {
		/// Offending address.
		address: String,
	},
	/// An identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Safety window fraction outside `[0, 1)`.
	#[error("Lease safety window must be within [0, 1), got {value}.")]
	InvalidSafetyWindow {
		/// Rejected fraction.
		value: f64,
	},
	/// A required setting was not supplied.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Setting name (environment variable or builder field).
		name: &'static str,
	},
	/// A setting could not be parsed.
	#[error("Setting `{name}` has an invalid value `{value}`.")]
	InvalidSetting {
		/// Setting name.
		name: &'static str,
		/// Raw value that failed to parse.
		value: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures and temporary upstream conditions. All variants are retryable.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the broker.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the broker.")]
	Io(#[from] std::io::Error),
	/// The broker did not answer within the request timeout.
	#[error("Broker call timed out after {after}.")]
	Timeout {
		/// Timeout that elapsed.
		after: Duration,
	},
	/// The broker is throttling or temporarily unavailable (HTTP 429 or 5xx).
	#[error("Broker is temporarily unavailable (HTTP {status}).")]
	Upstream {
		/// HTTP status code.
		status: u16,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Retry-After hint carried by upstream throttling responses.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Upstream { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_transport_errors_are_retryable() {
		let upstream = Error::from(TransportError::Upstream { status: 503, retry_after: None });
		let rejected = Error::BrokerRejected {
			operation: FlowKind::Login,
			target: RequestTarget::path("auth/aws/login").with_role("demo"),
			status: 403,
			reason: "permission denied".into(),
		};

		assert!(upstream.is_retryable());
		assert!(!rejected.is_retryable());
		assert!(rejected.is_auth_failure());
		assert!(!Error::malformed(FlowKind::Fetch, "missing data").is_retryable());
	}

	#[test]
	fn rejection_message_names_path_and_role() {
		let err = Error::BrokerRejected {
			operation: FlowKind::Login,
			target: RequestTarget::path("auth/aws/login").with_role("my-role-iam"),
			status: 400,
			reason: "entry for role my-role-iam not found".into(),
		};
		let message = err.to_string();

		assert!(message.contains("`auth/aws/login` (role `my-role-iam`)"));
		assert!(message.contains("HTTP 400"));
	}

	#[test]
	fn lease_expired_exposes_replacement_failure() {
		let cause = Error::from(TransportError::Timeout { after: Duration::seconds(10) });
		let err = Error::LeaseExpired {
			path: "database/creds/app".into(),
			source: Some(Box::new(cause)),
		};
		let source = std::error::Error::source(&err)
			.expect("Lease expiry should expose the replacement failure as its source.");

		assert!(source.to_string().contains("timed out"));
	}
}
