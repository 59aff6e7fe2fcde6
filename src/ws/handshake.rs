//! HTTP upgrade handshake.
//!
//! Parses the raw upgrade request, pulls the auth token out of it, and
//! builds the 101 response with the RFC 6455 accept key. Socket I/O and
//! auth verification live in the listener; this module is pure parsing.

use base64::{Engine, prelude::BASE64_STANDARD};
use sha1::{Digest, Sha1};

use super::WsError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Bare refusal written before destroying the socket on auth failure.
pub const UNAUTHORIZED_RESPONSE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\r\n";

/// Find the end of the HTTP header block (the byte index just past
/// `\r\n\r\n`), if the buffer holds it yet.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// The parts of an upgrade request the handshake cares about.
#[derive(Debug)]
pub struct UpgradeRequest {
    /// Request path with the query string stripped.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// `Sec-WebSocket-Key` header value.
    pub key: String,
    /// `Cookie` header value, if any.
    pub cookie: Option<String>,
}

/// Parse a complete HTTP header block into an [`UpgradeRequest`].
///
/// Anything that is not a well-formed `GET` + `Upgrade: websocket` request
/// is rejected; the listener destroys those sockets without response bytes.
pub fn parse_upgrade(head: &[u8]) -> Result<UpgradeRequest, WsError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let status = req
        .parse(head)
        .map_err(|e| WsError::Handshake(format!("malformed request: {e}")))?;

    if status.is_partial() {
        return Err(WsError::Handshake("partial HTTP request".into()));
    }
    if req.method != Some("GET") || req.version != Some(1) {
        return Err(WsError::Handshake("not a GET HTTP/1.1 request".into()));
    }

    let target = req
        .path
        .ok_or_else(|| WsError::Handshake("missing request path".into()))?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    let mut key = None;
    let mut cookie = None;
    let mut upgrade_ok = false;
    let mut conn_upgrade = false;

    for header in req.headers.iter() {
        match header.name.to_ascii_lowercase().as_str() {
            "sec-websocket-key" => {
                key = std::str::from_utf8(header.value).ok().map(str::to_string)
            }
            "cookie" => {
                cookie = std::str::from_utf8(header.value).ok().map(str::to_string)
            }
            "upgrade" => {
                upgrade_ok = header.value.eq_ignore_ascii_case(b"websocket");
            }
            "connection" => {
                conn_upgrade = bytes_contain_ci(header.value, b"upgrade");
            }
            _ => {}
        }
    }

    if !(upgrade_ok && conn_upgrade) {
        return Err(WsError::Handshake(
            "missing websocket upgrade headers".into(),
        ));
    }
    let key = key.ok_or_else(|| WsError::Handshake("missing Sec-WebSocket-Key".into()))?;

    Ok(UpgradeRequest {
        path,
        query,
        key,
        cookie,
    })
}

impl UpgradeRequest {
    /// Resolve the auth token in precedence order: `token` query parameter,
    /// then `token` cookie, then `auth_token` cookie.
    pub fn auth_token(&self) -> Option<String> {
        if let Some(token) = self.query.as_deref().and_then(token_from_query) {
            return Some(token);
        }
        let cookie = self.cookie.as_deref()?;
        token_from_cookie_header(cookie, "token")
            .or_else(|| token_from_cookie_header(cookie, "auth_token"))
            .map(str::to_string)
    }
}

/// Compute `base64(SHA1(key + GUID))` for the `Sec-WebSocket-Accept` header.
pub fn compute_accept_key(sec_websocket_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(sec_websocket_key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Build the `101 Switching Protocols` response.
pub fn build_accept_response(sec_websocket_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(sec_websocket_key)
    )
    .into_bytes()
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == "token" {
            // URL decode the token value
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
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

fn bytes_contain_ci(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_head(target: &str, extra: &str) -> Vec<u8> {
        format!(
            "GET {target} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             {extra}\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn rfc6455_accept_key_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_response_carries_the_key() {
        let response = build_accept_response("dGhlIHNhbXBsZSBub25jZQ==");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn find_header_end_variants() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n"), Some(18));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
        assert_eq!(find_header_end(b""), None);
    }

    #[test]
    fn parses_path_and_query() {
        let head = upgrade_head("/ws/notifications?token=abc", "");
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.path, "/ws/notifications");
        assert_eq!(req.query.as_deref(), Some("token=abc"));
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn rejects_non_upgrade_request() {
        let head = b"GET /ws/notifications HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert!(parse_upgrade(head).is_err());
    }

    #[test]
    fn rejects_missing_key() {
        let head = b"GET /ws/notifications HTTP/1.1\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\r\n";
        assert!(parse_upgrade(head).is_err());
    }

    #[test]
    fn token_precedence_query_first() {
        let head = upgrade_head(
            "/ws/notifications?token=from-query",
            "Cookie: token=from-cookie; auth_token=fallback\r\n",
        );
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.auth_token().as_deref(), Some("from-query"));
    }

    #[test]
    fn token_precedence_cookie_then_auth_token() {
        let head = upgrade_head(
            "/ws/notifications",
            "Cookie: token=from-cookie; auth_token=fallback\r\n",
        );
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.auth_token().as_deref(), Some("from-cookie"));

        let head = upgrade_head("/ws/notifications", "Cookie: auth_token=fallback\r\n");
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.auth_token().as_deref(), Some("fallback"));
    }

    #[test]
    fn no_token_anywhere() {
        let head = upgrade_head("/ws/notifications", "Cookie: theme=dark\r\n");
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.auth_token(), None);
    }

    #[test]
    fn url_encoded_query_token_is_decoded() {
        let head = upgrade_head("/ws/notifications?token=a%2Bb", "");
        let req = parse_upgrade(&head).unwrap();
        assert_eq!(req.auth_token().as_deref(), Some("a+b"));
    }
}
