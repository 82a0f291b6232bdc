//! Credential exchange with the identity provider.
//!
//! Each catalog entry obtains its own bearer token; tokens are never cached
//! across entries because their lifetime is not trusted to outlast a
//! multi-gigabyte transfer.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::http::{diagnostic_body, http_agent};

/// Cognito `InitiateAuth` target header value.
const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
/// Content type expected by the Cognito JSON protocol.
const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
/// Authentication flow used for email/password login.
const AUTH_FLOW: &str = "USER_PASSWORD_AUTH";

/// A string that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Return the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// User secrets exchanged for a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    email: String,
    secret: Secret,
}

impl Credential {
    /// Create a credential from an account email and password.
    #[must_use]
    pub fn new(email: impl Into<String>, secret: Secret) -> Self {
        Self {
            email: email.into(),
            secret,
        }
    }

    /// Account email.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Account password.
    #[must_use]
    pub fn secret(&self) -> &Secret {
        &self.secret
    }
}

/// Short-lived identity token, valid for one catalog entry.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(***)")
    }
}

/// Errors raised while obtaining a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The login request could not be sent or its response not received.
    #[error("login request to {endpoint} failed: {reason}")]
    Transport {
        /// Identity provider endpoint.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// The identity provider answered with a non-success status.
    #[error("login rejected for {email} (HTTP {status}): {body}")]
    Rejected {
        /// Account email that was rejected.
        email: String,
        /// HTTP status code.
        status: u16,
        /// Diagnostic response body.
        body: String,
    },

    /// The response did not contain an identity token.
    #[error("malformed login response: {reason}")]
    MalformedResponse {
        /// Description of the parse failure.
        reason: String,
    },
}

/// Exchanges credentials for a bearer token.
///
/// One network round trip per call, no internal retry.
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator {
    /// Log in with `credential` and return a fresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the provider rejects the credentials or
    /// the network call fails.
    fn obtain_token(&self, credential: &Credential) -> Result<BearerToken, AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: AuthParameters<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
struct AuthParameters<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: AuthenticationResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: String,
}

/// Build the JSON body of a Cognito `InitiateAuth` request.
///
/// # Errors
///
/// Returns a serialisation error; in practice the body always serialises.
pub fn login_request_body(
    client_id: &str,
    credential: &Credential,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&InitiateAuthRequest {
        auth_flow: AUTH_FLOW,
        client_id,
        auth_parameters: AuthParameters {
            username: credential.email(),
            password: credential.secret().expose(),
        },
    })
}

/// Extract the identity token from a successful login response.
///
/// # Errors
///
/// Returns [`AuthError::MalformedResponse`] when the body is not the
/// expected JSON shape.
pub fn parse_login_response(body: &str) -> Result<BearerToken, AuthError> {
    let response: InitiateAuthResponse =
        serde_json::from_str(body).map_err(|err| AuthError::MalformedResponse {
            reason: err.to_string(),
        })?;
    Ok(BearerToken(response.authentication_result.id_token))
}

/// Authenticator for the AWS Cognito user pool fronting the dataset API.
#[derive(Debug, Clone)]
pub struct CognitoAuthenticator {
    endpoint: String,
    client_id: String,
}

impl CognitoAuthenticator {
    /// Create an authenticator for `endpoint` and app `client_id`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
        }
    }

    fn transport_error(&self, reason: impl fmt::Display) -> AuthError {
        AuthError::Transport {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Authenticator for CognitoAuthenticator {
    fn obtain_token(&self, credential: &Credential) -> Result<BearerToken, AuthError> {
        let body = login_request_body(&self.client_id, credential)
            .map_err(|err| self.transport_error(err))?;
        debug!("requesting identity token for {}", credential.email());

        let response = http_agent()
            .post(&self.endpoint)
            .header("Content-Type", AMZ_JSON_CONTENT_TYPE)
            .header("X-Amz-Target", INITIATE_AUTH_TARGET)
            .send(body.as_str())
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                email: credential.email().to_owned(),
                status: status.as_u16(),
                body: diagnostic_body(response),
            });
        }

        let text = response
            .into_body()
            .read_to_string()
            .map_err(|err| self.transport_error(err))?;
        parse_login_response(&text)
    }
}
