use crate::settings::Settings;
use axum::http::HeaderMap;

pub const SESSION_COOKIE_NAME: &str = "commitblog_session";

pub const SESSION_TTL_SECS: i64 = 30 * 24 * 3600;

#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub session_id: String,
}

impl SessionCookie {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                return Some(Self {
                    session_id: value.to_string(),
                });
            }
        }
        None
    }

    pub fn to_cookie_header(&self, settings: &Settings) -> String {
        let secure = settings.base_url().starts_with("https://");

        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE_NAME,
            self.session_id,
            if secure { "Secure; " } else { "" },
            SESSION_TTL_SECS
        )
    }

    pub fn delete_cookie_header() -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            SESSION_COOKIE_NAME
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_from_headers_finds_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; commitblog_session=abc123; more=2"),
        );

        let cookie = SessionCookie::from_headers(&headers).expect("cookie not found");
        assert_eq!(cookie.session_id, "abc123");
    }

    #[test]
    fn test_from_headers_missing() {
        let headers = HeaderMap::new();
        assert!(SessionCookie::from_headers(&headers).is_none());
    }

    #[test]
    fn test_cookie_header_secure_only_on_https() {
        let mut settings = Settings::default();
        let cookie = SessionCookie::new("abc".into());

        assert!(!cookie.to_cookie_header(&settings).contains("Secure"));

        settings.server.public_base_url = Some("https://commit--blog.com".into());
        assert!(cookie.to_cookie_header(&settings).contains("Secure; "));
    }
}
