use crate::utils::error::{HarvestError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: impl ToString, reason: impl Into<String>) -> HarvestError {
    HarvestError::InvalidConfigValue {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Accepts only absolute http(s) URLs.
pub fn validate_http_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(invalid(field_name, url_str, "URL cannot be empty"));
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(
                field_name,
                url_str,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(e) => Err(invalid(field_name, url_str, format!("Invalid URL format: {}", e))),
    }
}

/// Redis URLs use their own schemes, so they are checked separately.
pub fn validate_redis_url(field_name: &str, url_str: &str) -> Result<()> {
    match Url::parse(url_str) {
        Ok(url) if matches!(url.scheme(), "redis" | "rediss" | "redis+unix") => Ok(()),
        Ok(url) => Err(invalid(
            field_name,
            url_str,
            format!("Unsupported URL scheme: {}", url.scheme()),
        )),
        Err(e) => Err(invalid(field_name, url_str, format!("Invalid URL format: {}", e))),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    Ok(())
}

pub fn validate_positive_number<T>(field_name: &str, value: T, min_value: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min_value {
        return Err(invalid(
            field_name,
            value,
            format!("Value must be at least {}", min_value),
        ));
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| HarvestError::MissingConfig {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            value,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("scraper.base_url", "https://mcp.example.com").is_ok());
        assert!(validate_http_url("scraper.base_url", "http://localhost:8080").is_ok());
        assert!(validate_http_url("scraper.base_url", "").is_err());
        assert!(validate_http_url("scraper.base_url", "not a url").is_err());
        assert!(validate_http_url("scraper.base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_redis_url() {
        assert!(validate_redis_url("store.redis_url", "redis://127.0.0.1:6379").is_ok());
        assert!(validate_redis_url("store.redis_url", "https://127.0.0.1").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("retry.max_attempts", 5u32, 1).is_ok());
        assert!(validate_positive_number("retry.max_attempts", 0u32, 1).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("circuit.failure_threshold", 5u32, 1, 100).is_ok());
        assert!(validate_range("circuit.failure_threshold", 0u32, 1, 100).is_err());
    }

    #[test]
    fn test_validate_required_field() {
        let present = Some("key".to_string());
        let absent: Option<String> = None;
        assert!(validate_required_field("scraper.api_key", &present).is_ok());
        assert!(matches!(
            validate_required_field("scraper.api_key", &absent),
            Err(HarvestError::MissingConfig { .. })
        ));
    }
}
