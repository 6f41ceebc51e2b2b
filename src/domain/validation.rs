//! Input validation rules shared by the request DTOs.

use serde::Serialize;
use std::net::IpAddr;
use url::Url;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Collects field errors so a request reports every problem at once.
#[derive(Debug, Default)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Records `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() > 254 || email.contains(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

pub fn length_between(value: &str, min: usize, max: usize) -> bool {
    let len = value.trim().chars().count();
    len >= min && len <= max
}

/// Page slugs: lowercase words joined by single hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 100
        && slug
            .split('-')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

/// Tenant slugs end up inside database identifiers, so the rule is strict.
pub fn is_valid_tenant_slug(slug: &str) -> bool {
    let bytes = slug.as_bytes();
    (3..=40).contains(&bytes.len())
        && bytes[0].is_ascii_lowercase()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_')
}

/// OAuth redirect URIs must be https, except for loopback development hosts.
pub fn is_valid_redirect_uri(uri: &str) -> bool {
    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    if url.fragment().is_some() {
        return false;
    }
    match url.scheme() {
        "https" => url.host_str().is_some(),
        "http" => matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")),
        _ => false,
    }
}

pub fn is_valid_ip(ip: &str) -> bool {
    ip.trim().parse::<IpAddr>().is_ok()
}

/// Reduces an uploaded filename to a safe basename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .chars()
        .take(200)
        .collect();

    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_rules() {
        assert!(is_valid_email("jane@example.com"));
        assert!(is_valid_email(" jane@example.co.uk "));
        assert!(!is_valid_email("jane.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("jane@localhost"));
        assert!(!is_valid_email("jane@@example.com"));
        assert!(!is_valid_email("jane doe@example.com"));
    }

    #[test]
    fn slug_rules() {
        assert!(is_valid_slug("terms"));
        assert!(is_valid_slug("privacy-policy-2024"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Terms"));
        assert!(!is_valid_slug("double--hyphen"));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("trailing-"));
        assert!(!is_valid_slug("under_score"));
        assert!(!is_valid_slug(&"a".repeat(101)));
    }

    #[test]
    fn tenant_slug_rules() {
        assert!(is_valid_tenant_slug("acme"));
        assert!(is_valid_tenant_slug("acme_2024"));
        assert!(!is_valid_tenant_slug("ac"));
        assert!(!is_valid_tenant_slug("1acme"));
        assert!(!is_valid_tenant_slug("acme-corp"));
        assert!(!is_valid_tenant_slug("acme\"; DROP"));
        assert!(!is_valid_tenant_slug(&"a".repeat(41)));
    }

    #[test]
    fn redirect_uri_rules() {
        assert!(is_valid_redirect_uri("https://app.example.com/callback"));
        assert!(is_valid_redirect_uri("http://localhost:8080/cb"));
        assert!(is_valid_redirect_uri("http://127.0.0.1/cb"));
        assert!(!is_valid_redirect_uri("http://app.example.com/callback"));
        assert!(!is_valid_redirect_uri("https://app.example.com/cb#frag"));
        assert!(!is_valid_redirect_uri("javascript:alert(1)"));
        assert!(!is_valid_redirect_uri("/relative"));
    }

    #[test]
    fn filename_sanitizing() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(sanitize_filename("bad\u{0}name.txt"), "badname.txt");
        assert_eq!(sanitize_filename(".htaccess"), "htaccess");
        assert_eq!(sanitize_filename("dir/"), "attachment");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn collector_reports_all_fields() {
        let mut errors = ValidationErrors::default();
        errors.check(true, "name", "required");
        errors.check(false, "email", "invalid");
        errors.check(false, "password", "too short");
        let fields = errors.into_result().unwrap_err().into_inner();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].field, "password");
    }
}
