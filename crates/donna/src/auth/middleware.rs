//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};

use super::{AuthConfig, AuthError, Claims};

const LOCAL_USER_EMAIL: &str = "local@localhost";
const LOCAL_USER_NAME: &str = "Local User";

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn new(mut config: AuthConfig) -> Self {
        match config.resolve_jwt_secret() {
            Ok(resolved) => config.jwt_secret = resolved,
            Err(err) => {
                warn!("Unusable JWT secret: {err}");
                config.jwt_secret = None;
            }
        }

        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            decoding_key,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Validate a JWT and check its email against the allow list.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        let claims = decode::<Claims>(token, decoding_key, &validation)
            .map_err(|e| {
                debug!("JWT validation failed: {:?}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })?
            .claims;

        if !self.config.is_email_allowed(claims.email()) {
            warn!(email = %claims.email(), "Rejected token for email outside the allow list");
            return Err(AuthError::EmailNotAllowed(claims.email().to_string()));
        }
        Ok(claims)
    }

    /// Mint a token for `email`, valid for `token_ttl_hours`.
    pub fn generate_token(&self, email: &str, name: Option<&str>) -> Result<String, AuthError> {
        let secret = self
            .config
            .jwt_secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        if !self.config.is_email_allowed(email) {
            return Err(AuthError::EmailNotAllowed(email.to_string()));
        }

        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.token_ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: email.to_string(),
            email: Some(email.to_string()),
            name: name.map(str::to_string),
            exp: now.saturating_add(ttl),
            iat: Some(now),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Authenticate a request from its headers and an already-decoded query token.
    ///
    /// Sources in priority order: Authorization header, session cookie, query
    /// token. With auth disabled this always yields the local user.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<CurrentUser, AuthError> {
        if !self.config.enabled {
            return Ok(CurrentUser::local());
        }

        let auth_header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
        let cookie_token = headers
            .get(COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|cookie_header| {
                token_from_cookie_header(cookie_header, &self.config.cookie_name)
            });

        let claims = if let Some(header) = auth_header {
            self.validate_token(bearer_token_from_header(header)?)?
        } else if let Some(token) = cookie_token {
            self.validate_token(token)?
        } else if let Some(token) = query_token.filter(|t| !t.is_empty()) {
            self.validate_token(token)?
        } else {
            return Err(AuthError::MissingAuthHeader);
        };

        Ok(CurrentUser { claims })
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    /// The implicit user when auth is disabled.
    pub fn local() -> Self {
        Self {
            claims: Claims {
                sub: LOCAL_USER_EMAIL.to_string(),
                email: Some(LOCAL_USER_EMAIL.to_string()),
                name: Some(LOCAL_USER_NAME.to_string()),
                exp: i64::MAX,
                iat: None,
            },
        }
    }

    pub fn email(&self) -> &str {
        self.claims.email()
    }

    pub fn name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Validates the request's token and injects `CurrentUser` into request
/// extensions.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let query_token = req.uri().query().and_then(token_from_query);
    let user = auth.authenticate(req.headers(), query_token.as_deref())?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-for-unit-tests-minimum-32-chars-long";

    fn enabled_state() -> AuthState {
        AuthState::new(AuthConfig {
            enabled: true,
            jwt_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        })
    }

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc.def.ghi").unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token123").unwrap(),
            "token123"
        );
        assert_eq!(
            bearer_token_from_header("   Bearer\tmixed-case ").unwrap(),
            "mixed-case"
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = [
            "",
            "Bearer",
            "Bearer ",
            "Token something",
            "Bearer token extra",
            "bear token",
        ];

        for case in cases {
            assert!(
                bearer_token_from_header(case).is_err(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_cookie_and_query_extraction() {
        assert_eq!(
            token_from_cookie_header("theme=dark; donna_session=abc ; x=y", "donna_session"),
            Some("abc")
        );
        assert_eq!(token_from_cookie_header("theme=dark", "donna_session"), None);
        assert_eq!(
            token_from_query("timezone=Europe%2FBerlin&token=a%2Eb"),
            Some("a.b".to_string())
        );
        assert_eq!(token_from_query("timezone=UTC"), None);
    }

    #[test]
    fn test_generate_and_validate_token() {
        let state = enabled_state();
        let token = state.generate_token("ada@example.com", Some("Ada")).unwrap();

        let claims = state.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "ada@example.com");
        assert_eq!(claims.display_name(), "Ada");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let state = enabled_state();
        let claims = Claims {
            sub: "ada@example.com".to_string(),
            email: None,
            name: None,
            exp: Utc::now().timestamp() - 3600,
            iat: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            state.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_token_from_other_secret_is_invalid() {
        let other = AuthState::new(AuthConfig {
            enabled: true,
            jwt_secret: Some("another-secret-that-is-also-long-enough-123".to_string()),
            ..AuthConfig::default()
        });
        let token = other.generate_token("ada@example.com", None).unwrap();

        assert!(matches!(
            enabled_state().validate_token(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_authenticate_disabled_is_local_user() {
        let state = AuthState::new(AuthConfig::default());
        let user = state.authenticate(&HeaderMap::new(), None).unwrap();
        assert_eq!(user.email(), "local@localhost");
        assert_eq!(user.name(), "Local User");
    }

    #[test]
    fn test_authenticate_sources() {
        let state = enabled_state();
        let token = state.generate_token("ada@example.com", None).unwrap();

        assert!(matches!(
            state.authenticate(&HeaderMap::new(), None),
            Err(AuthError::MissingAuthHeader)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(
            state.authenticate(&headers, None).unwrap().email(),
            "ada@example.com"
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("donna_session={token}")).unwrap(),
        );
        assert!(state.authenticate(&headers, None).is_ok());

        assert!(state.authenticate(&HeaderMap::new(), Some(&token)).is_ok());
    }

    #[test]
    fn test_allow_list_applies_to_tokens() {
        let state = AuthState::new(AuthConfig {
            enabled: true,
            jwt_secret: Some(SECRET.to_string()),
            allowed_email: Some("boss@example.com".to_string()),
            ..AuthConfig::default()
        });
        assert!(matches!(
            state.generate_token("ada@example.com", None),
            Err(AuthError::EmailNotAllowed(_))
        ));
        assert!(state.generate_token("boss@example.com", None).is_ok());
    }
}
