//! Dataset manifest resolution via the versioned Stash API.
//!
//! Resolution is a two-step lookup: the dataset's versions endpoint yields an
//! ordered list of version records, the last of which is "latest"; following
//! that version's embedded files link yields the file records that become
//! [`FileDescriptor`]s.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Component;
use std::path::Path;
use tracing::{info, warn};

use crate::error::ResolutionError;
use crate::types::{FileDescriptor, SyncConfig};

/// Files excluded from synchronization by exact name match.
const EXCLUDED_FILES: &[&str] = &["README.md"];

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<VersionsEmbedded>,
}

#[derive(Deserialize)]
struct VersionsEmbedded {
    #[serde(rename = "stash:versions")]
    versions: Vec<VersionRecord>,
}

#[derive(Deserialize)]
struct VersionRecord {
    #[serde(rename = "_links")]
    links: Option<VersionLinks>,
}

#[derive(Deserialize)]
struct VersionLinks {
    #[serde(rename = "stash:files")]
    files: Option<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
}

#[derive(Deserialize)]
struct FilesResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<FilesEmbedded>,
}

#[derive(Deserialize)]
struct FilesEmbedded {
    #[serde(rename = "stash:files")]
    files: Vec<FileRecord>,
}

#[derive(Deserialize)]
struct FileRecord {
    path: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "_links")]
    links: Option<FileLinks>,
}

#[derive(Deserialize)]
struct FileLinks {
    #[serde(rename = "stash:download")]
    download: Option<Link>,
}

/// Resolves the dataset DOI into an ordered list of file descriptors.
///
/// Any HTTP failure or missing nested field is fatal: there is no partial
/// resolution.
pub async fn resolve_manifest(
    client: &Client,
    config: &SyncConfig,
) -> Result<Vec<FileDescriptor>, ResolutionError> {
    let encoded_doi = config.dataset_doi.replace('/', "%2F");
    let versions_url = format!(
        "{}/api/v2/datasets/doi:{}/versions",
        config.api_base, encoded_doi
    );
    info!("Resolving dataset manifest from {}", versions_url);

    let versions: VersionsResponse = get_json(client, &versions_url).await?;
    let latest = versions
        .embedded
        .ok_or(ResolutionError::MissingField("_embedded"))?
        .versions
        .pop()
        .ok_or(ResolutionError::MissingField("stash:versions"))?;
    let files_href = latest
        .links
        .and_then(|l| l.files)
        .ok_or(ResolutionError::MissingField("stash:files link"))?
        .href;

    let files_url = format!("{}{}", config.api_base, files_href);
    let files: FilesResponse = get_json(client, &files_url).await?;
    let records = files
        .embedded
        .ok_or(ResolutionError::MissingField("_embedded"))?
        .files;

    let mut descriptors = Vec::with_capacity(records.len());
    for record in records {
        if EXCLUDED_FILES.contains(&record.path.as_str()) {
            continue;
        }
        if !is_safe_relative_path(&record.path) {
            warn!("Skipping manifest entry with unsafe path: {}", record.path);
            continue;
        }
        let download_href = record
            .links
            .and_then(|l| l.download)
            .ok_or(ResolutionError::MissingField("stash:download link"))?
            .href;

        descriptors.push(FileDescriptor {
            relative_path: record.path,
            download_url: format!("{}{}", config.api_base, download_href),
            mime_type: record.mime_type.unwrap_or_default(),
            declared_size: record.size,
        });
    }

    info!("Resolved {} files from latest version", descriptors.len());
    Ok(descriptors)
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, ResolutionError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ResolutionError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Rejects paths that would escape the destination directory.
fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn config(api_base: &str) -> SyncConfig {
        SyncConfig {
            api_base: api_base.to_string(),
            dataset_doi: "10.5061/dryad.test123".to_string(),
            ..SyncConfig::default()
        }
    }

    fn versions_body(files_href: &str) -> String {
        format!(
            r#"{{
                "_embedded": {{
                    "stash:versions": [
                        {{"_links": {{"stash:files": {{"href": "/api/v2/versions/1/files"}}}}}},
                        {{"_links": {{"stash:files": {{"href": "{files_href}"}}}}}}
                    ]
                }}
            }}"#
        )
    }

    const FILES_BODY: &str = r#"{
        "_embedded": {
            "stash:files": [
                {
                    "path": "README.md",
                    "mimeType": "text/markdown",
                    "size": 1234,
                    "_links": {"stash:download": {"href": "/api/v2/files/1/download"}}
                },
                {
                    "path": "sessions.zip",
                    "mimeType": "application/zip",
                    "size": 98765,
                    "_links": {"stash:download": {"href": "/api/v2/files/2/download"}}
                },
                {
                    "path": "notes.txt",
                    "mimeType": "text/plain",
                    "_links": {"stash:download": {"href": "/api/v2/files/3/download"}}
                }
            ]
        }
    }"#;

    #[tokio::test]
    async fn resolves_latest_version_and_excludes_readme() {
        let mut server = Server::new_async().await;
        let base = server.url();

        let versions_mock = server
            .mock(
                "GET",
                "/api/v2/datasets/doi:10.5061%2Fdryad.test123/versions",
            )
            .with_status(200)
            .with_body(versions_body("/api/v2/versions/2/files"))
            .create_async()
            .await;
        let files_mock = server
            .mock("GET", "/api/v2/versions/2/files")
            .with_status(200)
            .with_body(FILES_BODY)
            .create_async()
            .await;

        let client = Client::new();
        let descriptors = resolve_manifest(&client, &config(&base))
            .await
            .expect("manifest resolves");

        // README.md is excluded, order preserved.
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].relative_path, "sessions.zip");
        assert_eq!(descriptors[0].mime_type, "application/zip");
        assert_eq!(descriptors[0].declared_size, Some(98765));
        assert_eq!(
            descriptors[0].download_url,
            format!("{base}/api/v2/files/2/download")
        );
        assert_eq!(descriptors[1].relative_path, "notes.txt");
        assert_eq!(descriptors[1].declared_size, None);

        versions_mock.assert_async().await;
        files_mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_version_list_is_a_resolution_error() {
        let mut server = Server::new_async().await;
        server
            .mock(
                "GET",
                "/api/v2/datasets/doi:10.5061%2Fdryad.test123/versions",
            )
            .with_status(200)
            .with_body(r#"{"_embedded": {"stash:versions": []}}"#)
            .create_async()
            .await;

        let client = Client::new();
        let err = resolve_manifest(&client, &config(&server.url()))
            .await
            .expect_err("empty versions must fail");
        assert!(matches!(err, ResolutionError::MissingField("stash:versions")));
    }

    #[tokio::test]
    async fn api_error_status_is_fatal() {
        let mut server = Server::new_async().await;
        server
            .mock(
                "GET",
                "/api/v2/datasets/doi:10.5061%2Fdryad.test123/versions",
            )
            .with_status(500)
            .create_async()
            .await;

        let client = Client::new();
        let err = resolve_manifest(&client, &config(&server.url()))
            .await
            .expect_err("server error must fail");
        assert!(matches!(err, ResolutionError::Status { status: 500, .. }));
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        assert!(is_safe_relative_path("a/b/c.txt"));
        assert!(!is_safe_relative_path("../escape.txt"));
        assert!(!is_safe_relative_path("/etc/passwd"));
    }
}
