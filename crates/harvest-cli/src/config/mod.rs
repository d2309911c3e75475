//! Configuration loading and resolution.

use std::path::Path;

use anyhow::{bail, Context as _, Result};
use harvest::{Harvest, Schema, Source};

/// Resolve the user agent: explicit flag, then `HARVEST_USER_AGENT`.
pub fn resolve_user_agent(explicit: Option<&str>) -> Option<String> {
    if let Some(ua) = explicit {
        return Some(ua.to_string());
    }
    std::env::var("HARVEST_USER_AGENT")
        .ok()
        .filter(|ua| !ua.trim().is_empty())
}

/// Resolve the request timeout: explicit flag, then `HARVEST_TIMEOUT_MS`.
pub fn resolve_timeout_ms(explicit: Option<u64>) -> Result<Option<u64>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    match std::env::var("HARVEST_TIMEOUT_MS") {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("HARVEST_TIMEOUT_MS is not a number of milliseconds: {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// Parse a politeness delay: `500` or a random range `200-800` (ms).
pub fn parse_delay(raw: &str) -> Result<(u64, u64)> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .with_context(|| format!("invalid delay {raw:?}"))
    };
    match raw.split_once('-') {
        Some((min, max)) => {
            let (min, max) = (parse(min)?, parse(max)?);
            if min > max {
                bail!("invalid delay {raw:?}: minimum exceeds maximum");
            }
            Ok((min, max))
        }
        None => {
            let ms = parse(raw)?;
            Ok((ms, ms))
        }
    }
}

/// Load a JSON schema file, optionally wrapped in a scope selector.
pub fn load_schema(path: &Path, scope: Option<&str>, engine: &Harvest) -> Result<Schema> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing schema {}", path.display()))?;
    let schema = engine.schema_from_json(&json)?;
    Ok(match scope {
        Some(scope) => Schema::scoped(scope, schema),
        None => schema,
    })
}

/// `http(s)://` arguments are fetched; anything else is read as an HTML file.
pub fn load_source(arg: &str, base_url: Option<&str>) -> Result<Source> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(Source::Url(arg.to_string()));
    }
    let html = std::fs::read_to_string(arg).with_context(|| format!("reading {arg}"))?;
    Ok(Source::html(html, base_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("500").unwrap(), (500, 500));
        assert_eq!(parse_delay("200-800").unwrap(), (200, 800));
        assert!(parse_delay("800-200").is_err());
        assert!(parse_delay("soon").is_err());
    }

    #[test]
    fn test_explicit_flags_win() {
        assert_eq!(resolve_user_agent(Some("bot/1")).as_deref(), Some("bot/1"));
        assert_eq!(resolve_timeout_ms(Some(250)).unwrap(), Some(250));
    }

    #[test]
    fn test_load_schema_with_scope() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"title": "h2", "link": "a@href"}}]"#).unwrap();

        let engine = Harvest::new();
        let schema = load_schema(file.path(), Some("article"), &engine).unwrap();
        match schema {
            Schema::Scoped { scope, schema } => {
                assert_eq!(scope, "article");
                assert!(matches!(*schema, Schema::Sequence(_)));
            }
            other => panic!("unexpected schema: {other:?}"),
        }
    }

    #[test]
    fn test_load_schema_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_schema(file.path(), None, &Harvest::new()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing schema"));
    }

    #[test]
    fn test_load_source() {
        assert!(matches!(
            load_source("https://example.com/", None).unwrap(),
            Source::Url(_)
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<h1>Hi</h1>").unwrap();
        let path = file.path().to_str().unwrap();
        match load_source(path, Some("https://example.com/")).unwrap() {
            Source::Html { html, base_url } => {
                assert_eq!(html, "<h1>Hi</h1>");
                assert_eq!(base_url.as_deref(), Some("https://example.com/"));
            }
            other => panic!("unexpected source: {other:?}"),
        }
        assert!(load_source("/no/such/file.html", None).is_err());
    }
}
