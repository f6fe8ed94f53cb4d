//! Credential representation and the default environment-variable provider.

use std::env;
use std::fmt;

use zeroize::Zeroize;

use crate::error::Error;

/// AWS-style credentials for one signing pass. Produced by the user-supplied
/// provider on every signed request — never stored by the fetcher itself.
#[derive(Clone)]
pub struct Credentials {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.secret_access_key.zeroize();
        if let Some(token) = &mut self.session_token {
            token.zeroize();
        }
    }
}

impl Credentials {
    /// Reads `AWS_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
    /// the optional `AWS_SESSION_TOKEN` — the default credential provider.
    pub fn from_env() -> Result<Self, Error> {
        let region = env::var("AWS_REGION")
            .map_err(|_| Error::Signing("AWS_REGION is not set".to_string()))?;
        let access_key_id = env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Signing("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::Signing("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            region,
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// A credential provider is called on every signed request (HEAD and each
/// ranged GET), so short-lived/rotating credentials behind it are picked up
/// without re-opening the session.
pub type CredentialsProvider = Box<dyn Fn(chrono::DateTime<chrono::Utc>) -> Result<Credentials, Error> + Send + Sync>;

/// Wraps `Credentials::from_env` as a `CredentialsProvider`.
pub fn env_provider() -> CredentialsProvider {
    Box::new(|_now| Credentials::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials {
            region: "us-east-1".to_string(),
            access_key_id: "AKID".to_string(),
            secret_access_key: "super-secret".to_string(),
            session_token: Some("tok".to_string()),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("tok"));
        assert!(debug.contains("AKID"));
    }
}
