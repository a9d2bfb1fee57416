//! Fetching the raw bytes behind a document source.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use deckview_core::LoadError;
use tracing::{debug, instrument};
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote(Url),
    Local(PathBuf),
}

/// Absolute `http(s)` and `file` URLs are honoured as such; anything that
/// does not parse as an absolute URL is a filesystem path.
pub fn classify_source(source: &str) -> Result<SourceLocation, LoadError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(LoadError::UnsupportedSource(source.to_string()));
    }
    match Url::parse(trimmed) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(SourceLocation::Remote(url)),
            "file" => url
                .to_file_path()
                .map(SourceLocation::Local)
                .map_err(|_| LoadError::UnsupportedSource(source.to_string())),
            // Drive letters such as `C:\decks\a.pdf` parse as a one-letter scheme.
            scheme if scheme.len() == 1 => Ok(SourceLocation::Local(PathBuf::from(trimmed))),
            _ => Err(LoadError::UnsupportedSource(source.to_string())),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Ok(SourceLocation::Local(PathBuf::from(trimmed)))
        }
        Err(err) => Err(LoadError::UnsupportedSource(format!("{source}: {err}"))),
    }
}

/// Reads the whole document behind `source` without touching the async
/// executor threads.
#[instrument]
pub async fn fetch_source(source: &str) -> Result<Vec<u8>, LoadError> {
    let location = classify_source(source)?;
    let url = source.to_string();
    tokio::task::spawn_blocking(move || match location {
        SourceLocation::Remote(remote) => fetch_remote(&url, &remote),
        SourceLocation::Local(path) => std::fs::read(&path).map_err(|err| LoadError::Network {
            url,
            detail: format!("{}: {err}", path.display()),
        }),
    })
    .await
    .map_err(|err| LoadError::Network {
        url: source.to_string(),
        detail: format!("fetch task failed: {err}"),
    })?
}

fn fetch_remote(source: &str, url: &Url) -> Result<Vec<u8>, LoadError> {
    let network = |detail: String| LoadError::Network {
        url: source.to_string(),
        detail,
    };
    let response = ureq::get(url.as_str())
        .timeout(HTTP_TIMEOUT)
        .call()
        .map_err(|err| match err {
            ureq::Error::Status(code, _) => network(format!("HTTP {code}")),
            ureq::Error::Transport(transport) => network(transport.to_string()),
        })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|err| network(err.to_string()))?;
    debug!(%url, bytes = bytes.len(), "fetched remote document");
    Ok(bytes)
}

/// Last path segment of `source`, used as a file name when saving a copy.
pub fn suggested_file_name(source: &str) -> String {
    let name = match classify_source(source) {
        Ok(SourceLocation::Remote(url)) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Ok(SourceLocation::Local(path)) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        Err(_) => None,
    };
    match name {
        Some(name) if !name.is_empty() => name,
        _ => "presentation.pdf".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classifies_sources() {
        assert!(matches!(
            classify_source("https://example.com/decks/a.pdf"),
            Ok(SourceLocation::Remote(_))
        ));
        assert_eq!(
            classify_source("/PRS_20251004_DataWorkflows_v1.pdf").unwrap(),
            SourceLocation::Local(PathBuf::from("/PRS_20251004_DataWorkflows_v1.pdf"))
        );
        assert_eq!(
            classify_source("decks/a.pdf").unwrap(),
            SourceLocation::Local(PathBuf::from("decks/a.pdf"))
        );
        assert!(matches!(
            classify_source("ftp://example.com/a.pdf"),
            Err(LoadError::UnsupportedSource(_))
        ));
        assert!(matches!(
            classify_source("   "),
            Err(LoadError::UnsupportedSource(_))
        ));
    }

    #[tokio::test]
    async fn reads_local_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let bytes = fetch_source(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");

        let as_url = Url::from_file_path(&path).unwrap();
        let bytes = fetch_source(as_url.as_str()).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn missing_file_is_a_network_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.pdf");
        match fetch_source(path.to_str().unwrap()).await {
            Err(LoadError::Network { url, .. }) => assert_eq!(url, path.to_str().unwrap()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected_before_io() {
        assert!(matches!(
            fetch_source("ftp://example.com/deck.pdf").await,
            Err(LoadError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn suggests_file_names() {
        assert_eq!(
            suggested_file_name("https://example.com/decks/PRS_v1.pdf?x=1"),
            "PRS_v1.pdf"
        );
        assert_eq!(suggested_file_name("/srv/decks/a.pdf"), "a.pdf");
        assert_eq!(
            suggested_file_name("https://example.com/"),
            "presentation.pdf"
        );
    }
}
