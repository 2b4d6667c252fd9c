//! AWS IAM identity provider: signs an STS `GetCallerIdentity` request with ambient credentials.

// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	error::ConfigError,
	identity::{
		CredentialSource, HeaderSet, IdentityAssertion, IdentityProvider,
		sigv4::{self, SignableRequest, SigningScope},
	},
};

/// Header that binds the assertion to one broker deployment.
pub const SERVER_ID_HEADER: &str = "X-Vault-AWS-IAM-Server-ID";
/// Body of the signed STS call.
pub const STS_REQUEST_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

const STS_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const STS_GLOBAL_ENDPOINT: &str = "https://sts.amazonaws.com/";
const STS_SERVICE: &str = "sts";

/// Builds [`IdentityAssertion`]s from AWS credentials.
#[derive(Clone)]
pub struct AwsIamIdentity {
	source: Arc<dyn CredentialSource>,
	region: String,
	endpoint: Url,
	clock: Arc<dyn Clock>,
}
impl AwsIamIdentity {
	/// Region used for the signing scope when none is configured.
	pub const DEFAULT_REGION: &'static str = "us-east-1";

	/// Signs against the global STS endpoint in `us-east-1`.
	pub fn new(source: Arc<dyn CredentialSource>) -> Result<Self> {
		let endpoint = Url::parse(STS_GLOBAL_ENDPOINT)
			.map_err(|source| ConfigError::InvalidAddress { source })?;

		Ok(Self {
			source,
			region: Self::DEFAULT_REGION.into(),
			endpoint,
			clock: Arc::new(SystemClock),
		})
	}

	/// Signs for `region` against the regional STS endpoint.
	pub fn with_region(mut self, region: impl Into<String>) -> Result<Self> {
		let region = region.into();

		if region.is_empty() || region.contains(|c: char| !c.is_ascii_alphanumeric() && c != '-') {
			return Err(ConfigError::InvalidSetting { name: "AWS_REGION", value: region }.into());
		}

		self.endpoint = Url::parse(&format!("https://sts.{region}.amazonaws.com/"))
			.map_err(|source| ConfigError::InvalidAddress { source })?;
		self.region = region;

		Ok(self)
	}

	/// Overrides the STS endpoint while keeping the signing region.
	pub fn with_endpoint(mut self, endpoint: Url) -> Self {
		self.endpoint = endpoint;

		self
	}

	/// Overrides the time source used for `X-Amz-Date`.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Signing region.
	pub fn region(&self) -> &str {
		&self.region
	}

	/// STS endpoint the assertion targets.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}
}
impl IdentityProvider for AwsIamIdentity {
	fn build(&self, server_id: Option<&str>) -> Result<IdentityAssertion> {
		let credentials = self.source.credentials()?;
		let now = self.clock.now();
		let signed_at = OffsetDateTime::from_unix_timestamp(now.unix_timestamp())
			.map_err(|e| Error::SigningFailed {
				reason: format!("signing instant out of range: {e}"),
			})?;
		let mut headers = HeaderSet::from_iter([
			("Content-Type".to_owned(), vec![STS_CONTENT_TYPE.to_owned()]),
			("X-Amz-Date".to_owned(), vec![sigv4::amz_date(signed_at)?]),
		]);

		if let Some(token) = &credentials.session_token {
			headers.insert("X-Amz-Security-Token".into(), vec![token.expose().to_owned()]);
		}
		if let Some(server_id) = server_id.filter(|id| !id.is_empty()) {
			headers.insert(SERVER_ID_HEADER.into(), vec![server_id.to_owned()]);
		}

		let body = STS_REQUEST_BODY.as_bytes().to_vec();
		let signature = sigv4::sign(
			&SignableRequest { method: "POST", url: &self.endpoint, headers: &headers, body: &body },
			&credentials,
			&SigningScope { region: &self.region, service: STS_SERVICE, signed_at },
		)?;

		headers.insert(
			"Authorization".into(),
			vec![signature.authorization_header(&credentials.access_key_id)],
		);

		#[cfg(feature = "tracing")]
		tracing::debug!(
			region = %self.region,
			endpoint = %self.endpoint,
			signed_headers = %signature.signed_headers,
			"Signed identity assertion."
		);

		Ok(IdentityAssertion::new(
			"POST",
			self.endpoint.clone(),
			headers,
			body,
			signature.signature,
			signed_at,
		))
	}
}
impl Debug for AwsIamIdentity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AwsIamIdentity")
			.field("region", &self.region)
			.field("endpoint", &self.endpoint.as_str())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::Sensitive,
		clock::ManualClock,
		identity::{AwsCredentials, EnvCredentialSource, StaticCredentialSource},
	};

	fn credentials(session: bool) -> AwsCredentials {
		AwsCredentials {
			access_key_id: "AKIDEXAMPLE".into(),
			secret_access_key: Sensitive::new("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
			session_token: session.then(|| Sensitive::new("session-token")),
		}
	}

	fn identity(session: bool) -> AwsIamIdentity {
		AwsIamIdentity::new(Arc::new(StaticCredentialSource(credentials(session))))
			.expect("Identity should build.")
			.with_clock(Arc::new(ManualClock::new(macros::datetime!(2025-03-01 12:00:00.750 UTC))))
	}

	#[test]
	fn built_assertion_verifies_and_binds_server_id() {
		let assertion =
			identity(true).build(Some("vault.example.com")).expect("Assertion should build.");
		let authorization =
			assertion.header("Authorization").expect("Authorization header should be present.");

		assert_eq!(assertion.method(), "POST");
		assert_eq!(assertion.url().as_str(), STS_GLOBAL_ENDPOINT);
		assert_eq!(assertion.body(), STS_REQUEST_BODY.as_bytes());
		assert_eq!(assertion.header(SERVER_ID_HEADER), Some("vault.example.com"));
		assert_eq!(assertion.header("X-Amz-Date"), Some("20250301T120000Z"));
		assert_eq!(assertion.signed_at(), macros::datetime!(2025-03-01 12:00 UTC));
		assert!(authorization.contains("Credential=AKIDEXAMPLE/20250301/us-east-1/sts/aws4_request"));
		assert!(authorization.contains(
			"SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-vault-aws-iam-server-id"
		));
		assert!(sigv4::verify(&assertion, &credentials(true)));
	}

	#[test]
	fn empty_server_id_is_not_signed() {
		let assertion = identity(false).build(Some("")).expect("Assertion should build.");

		assert_eq!(assertion.header(SERVER_ID_HEADER), None);
		assert_eq!(assertion.header("X-Amz-Security-Token"), None);
		assert!(sigv4::verify(&assertion, &credentials(false)));
	}

	#[test]
	fn verifier_rejects_wrong_secret() {
		let assertion = identity(false).build(None).expect("Assertion should build.");
		let mut other = credentials(false);

		other.secret_access_key = Sensitive::new("not-the-secret");

		assert!(!sigv4::verify(&assertion, &other));
	}

	#[test]
	fn regional_endpoint_changes_scope() {
		let regional = identity(false).with_region("eu-west-1").expect("Region should be valid.");
		let assertion = regional.build(None).expect("Assertion should build.");

		assert_eq!(assertion.url().as_str(), "https://sts.eu-west-1.amazonaws.com/");
		assert!(
			assertion
				.header("Authorization")
				.is_some_and(|value| value.contains("/eu-west-1/sts/aws4_request"))
		);
		assert!(sigv4::verify(&assertion, &credentials(false)));
		assert!(identity(false).with_region("eu west").is_err());
	}

	#[test]
	fn missing_credentials_fail_before_signing() {
		let source = EnvCredentialSource::with_lookup(Arc::new(|_: &str| None::<String>));
		let identity = AwsIamIdentity::new(Arc::new(source)).expect("Identity should build.");

		assert!(matches!(identity.build(None), Err(Error::NoAmbientCredentials { .. })));
	}
}
