use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const AUTH_COOKIE: &str = "token";
const AUTH_TOKEN_DAYS: i64 = 7;
const VERIFICATION_TOKEN_HOURS: i64 = 1;

/// What a token is good for. Verification links must never double as
/// bearer credentials, so the purpose is baked into the claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Auth,
    VerifyEmail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub kind: TokenKind,
    pub exp: usize,
    pub iat: usize,
}

fn issue(secret: &str, user_id: &str, kind: TokenKind, lifetime: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        kind,
        exp: (now + lifetime).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Seven-day bearer token, delivered as an http-only cookie and echoed in
/// the login body for non-browser clients.
pub fn issue_auth_token(secret: &str, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
    issue(secret, user_id, TokenKind::Auth, Duration::days(AUTH_TOKEN_DAYS))
}

/// One-hour token embedded in emailed verification links.
pub fn issue_verification_token(
    secret: &str,
    user_id: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    issue(
        secret,
        user_id,
        TokenKind::VerifyEmail,
        Duration::hours(VERIFICATION_TOKEN_HOURS),
    )
}

/// Decodes and validates a token, returning the embedded user id. Expiry
/// and signature failures surface as errors; a token of the wrong kind is
/// rejected outright.
pub fn verify_token(secret: &str, token: &str, expected: TokenKind) -> Result<String, String> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token has expired".to_string(),
        _ => "Invalid token".to_string(),
    })?;
    if data.claims.kind != expected {
        return Err("Invalid token".to_string());
    }
    Ok(data.claims.sub)
}

pub fn auth_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE, token.to_string())
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::days(AUTH_TOKEN_DAYS))
        .finish()
}

pub fn clear_auth_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE, "")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::ZERO)
        .finish()
}

/// Password policy for new passwords: 8-128 characters with at least one
/// digit.
pub fn validate_new_password(password: &str) -> Result<(), String> {
    let chars = password.chars().count();
    if chars < 8 || chars > 128 {
        return Err("Password must contain from 8 to 128 characters".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex")
    });
    if re.is_match(email) {
        Ok(())
    } else {
        Err("Invalid email format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-that-is-long-enough!!";

    #[test]
    fn auth_token_round_trips() {
        let token = issue_auth_token(SECRET, "user-1").unwrap();
        let sub = verify_token(SECRET, &token, TokenKind::Auth).unwrap();
        assert_eq!(sub, "user-1");
    }

    #[test]
    fn verification_token_cannot_authenticate() {
        let token = issue_verification_token(SECRET, "user-1").unwrap();
        assert!(verify_token(SECRET, &token, TokenKind::Auth).is_err());
        assert!(verify_token(SECRET, &token, TokenKind::VerifyEmail).is_ok());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = issue_auth_token(SECRET, "user-1").unwrap();
        assert!(verify_token("another-secret-also-long-enough!!!", &token, TokenKind::Auth).is_err());
        let mut broken = token.clone();
        broken.push('x');
        assert!(verify_token(SECRET, &broken, TokenKind::Auth).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue(SECRET, "user-1", TokenKind::Auth, Duration::seconds(-120)).unwrap();
        let err = verify_token(SECRET, &token, TokenKind::Auth).unwrap_err();
        assert_eq!(err, "Token has expired");
    }

    #[test]
    fn password_policy() {
        assert!(validate_new_password("short1").is_err());
        assert!(validate_new_password("nodigitshere").is_err());
        assert!(validate_new_password("long enough 1").is_ok());
    }

    #[test]
    fn email_format() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }
}
