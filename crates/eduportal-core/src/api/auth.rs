//! Account flows: login, signup, logout, email verification, password
//! reset, and the signed-in user's profile.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::endpoints;
use super::gateway::{ApiGateway, LogoutReason, SessionEvent};
use super::transport::{ApiRequest, CallOptions};
use super::ApiError;
use crate::auth::{Credential, CredentialOrigin, Session, UserProfile};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Mirror the session to durable storage
    #[serde(skip)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Partial profile update; unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    #[serde(default)]
    user: Option<UserProfile>,
}

impl ApiGateway {
    /// Log in and install the resulting session. When the backend omits the
    /// user in its response the profile endpoint is read with the new token.
    pub async fn login(&self, request: LoginRequest) -> Result<Session, ApiError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let response: LoginResponse = self
            .call_json(endpoints::LOGIN, CallOptions::post(body))
            .await?;

        let credential = Credential::parse(response.access, CredentialOrigin::Issued).map_err(|e| {
            ApiError::InvalidResponse(format!("Login returned an unusable token: {}", e))
        })?;

        let profile = match response.user {
            Some(profile) => profile,
            None => {
                debug!("Login response has no user, reading profile");
                self.credentials().set(credential.clone());
                match self.call_json::<UserProfile>(endpoints::PROFILE, CallOptions::get()).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        self.credentials().clear();
                        return Err(e);
                    }
                }
            }
        };

        info!(user_id = profile.id, remember = request.remember_me, "Logged in");
        Ok(self.begin_session(credential, profile, request.remember_me, SessionEvent::LoggedIn))
    }

    pub async fn signup(&self, request: SignupRequest) -> Result<Value, ApiError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        self.call(endpoints::REGISTER, CallOptions::post(body)).await
    }

    /// End the session. The backend is told best-effort (so it can revoke
    /// the refresh cookie); local state is cleared regardless.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(credential) = self.credentials().get() {
            let mut request = ApiRequest::new(endpoints::LOGOUT, CallOptions::new(reqwest::Method::POST));
            request.bearer = Some(credential.token().to_string());
            request.include_cookies = true;
            match self.transport().send(request).await {
                Ok(response) if response.is_success() => debug!("Backend logout acknowledged"),
                Ok(response) => debug!(status = response.status, "Backend logout not acknowledged"),
                Err(e) => warn!(error = %e, "Backend logout failed"),
            }
        }
        self.end_session(LogoutReason::UserRequested);
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<Value, ApiError> {
        self.call(endpoints::VERIFY_EMAIL, CallOptions::post(json!({ "token": token })))
            .await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<Value, ApiError> {
        self.call(endpoints::PASSWORD_RESET, CallOptions::post(json!({ "email": email })))
            .await
    }

    pub async fn reset_password(
        &self,
        password: &str,
        encoded_id: &str,
        token: &str,
    ) -> Result<Value, ApiError> {
        let endpoint = endpoints::password_reset_confirm(encoded_id, token);
        self.call(&endpoint, CallOptions::post(json!({ "password": password })))
            .await
    }

    /// Read the signed-in user's profile and refresh the cached copy.
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.call_json(endpoints::PROFILE, CallOptions::get()).await?;
        self.cache_profile(profile.clone());
        Ok(profile)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, ApiError> {
        let body = serde_json::to_value(&update)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let profile: UserProfile = self
            .call_json(endpoints::PROFILE, CallOptions::patch(body))
            .await?;
        self.cache_profile(profile.clone());
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_omits_remember_flag() {
        let request = LoginRequest {
            email: "admin@example.edu".to_string(),
            password: "hunter22".to_string(),
            remember_me: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"email": "admin@example.edu", "password": "hunter22"})
        );
    }

    #[test]
    fn test_profile_update_sends_only_set_fields() {
        let update = ProfileUpdate {
            first_name: Some("Grace".to_string()),
            ..ProfileUpdate::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"first_name": "Grace"}));
    }

    #[test]
    fn test_login_response_user_is_optional() {
        let response: LoginResponse = serde_json::from_str(r#"{"access": "a.b.c"}"#).unwrap();
        assert!(response.user.is_none());
    }
}
