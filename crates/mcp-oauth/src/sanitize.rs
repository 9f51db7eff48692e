use crate::error::{OAuthError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

// Unreserved characters stay literal; everything else (including `%`,
// so the parser's own escapes are re-encoded) is percent-encoded.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'=')
    .remove(b'&');
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Validate and re-serialize a URL before it is handed to the system
/// browser opener, which on every platform goes through a shell-adjacent
/// launcher. Only `http`/`https` schemes are accepted, the host must
/// consist of `[A-Za-z0-9.-]`, and path, query and fragment are
/// percent-encoded from the parser's serialization.
pub fn sanitize_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw)?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(OAuthError::UnsafeUrl(format!(
                "scheme '{}' is not allowed",
                other
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| OAuthError::UnsafeUrl("URL has no host".to_string()))?;
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(OAuthError::UnsafeUrl(format!(
            "host '{}' contains disallowed characters",
            host
        )));
    }

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(&utf8_percent_encode(parsed.path(), PATH).to_string());
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(&utf8_percent_encode(query, QUERY).to_string());
    }
    if let Some(fragment) = parsed.fragment() {
        out.push('#');
        out.push_str(&utf8_percent_encode(fragment, FRAGMENT).to_string());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_schemes() {
        assert!(sanitize_url("javascript:alert(1)").is_err());
        assert!(sanitize_url("file:///etc/passwd").is_err());
        assert!(sanitize_url("ftp://example.com/x").is_err());
    }

    #[test]
    fn test_rejects_hosts_with_shell_metacharacters() {
        assert!(sanitize_url("https://host_name/path").is_err());
        // The url crate already refuses most hostile hosts at parse time.
        assert!(sanitize_url("https://exa mple.com/").is_err());
        assert!(sanitize_url("https://$(whoami).example.com/").is_err());
    }

    #[test]
    fn test_accepts_and_preserves_clean_urls() {
        let clean = "https://auth.example.com:8443/authorize?a=1&b=2#frag";
        assert_eq!(sanitize_url(clean).unwrap(), clean);
    }

    #[test]
    fn test_reencodes_parser_escapes() {
        // URL parsing turns the space into %20; the re-encoding pass
        // then escapes the percent sign itself.
        assert_eq!(
            sanitize_url("https://example.com/path with spaces").unwrap(),
            "https://example.com/path%2520with%2520spaces"
        );
    }

    #[test]
    fn test_idempotent_on_accepted_clean_inputs() {
        for url in [
            "https://example.com/sse",
            "http://localhost:3334/oauth/callback",
            "https://auth.example.com/authorize?scope=openid&x=y",
        ] {
            let once = sanitize_url(url).unwrap();
            let twice = sanitize_url(&once).unwrap();
            assert_eq!(once, twice);
        }
    }
}
