//! Anonymous registry access.
//!
//! Wraps `oci-distribution` as an [`ImageSource`] and an
//! [`ImageDestination`]. Blobs are buffered in memory per transfer.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use http::HeaderValue;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, RegistryOperation};
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;

use super::manifest::{guess_mime, ACCEPTED_MANIFEST_TYPES};
use super::reference::ImageReference;
use crate::transfer::{BlobInfo, BlobReader, ImageDestination, ImageSource};

/// Loopback registries are spoken to over plain HTTP.
fn is_loopback(registry: &str) -> bool {
    let host = registry.rsplit_once(':').map_or(registry, |(host, _)| host);
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

fn new_client(reference: &ImageReference) -> Client {
    let protocol = if is_loopback(&reference.registry) {
        ClientProtocol::HttpsExcept(vec![reference.registry.clone()])
    } else {
        ClientProtocol::Https
    };
    Client::new(ClientConfig {
        protocol,
        ..Default::default()
    })
}

fn registry_error(reference: &ImageReference, message: String) -> TagbagError {
    TagbagError::RegistryError {
        registry: reference.registry.clone(),
        message,
    }
}

fn manifest_content_type(manifest: &[u8]) -> std::result::Result<HeaderValue, String> {
    let mime = guess_mime(manifest);
    HeaderValue::from_str(&mime).map_err(|e| format!("Invalid manifest type {}: {}", mime, e))
}

fn descriptor(info: &BlobInfo) -> OciDescriptor {
    OciDescriptor {
        digest: info.digest.to_string(),
        size: info.size.and_then(|s| i64::try_from(s).ok()).unwrap_or_default(),
        media_type: info.media_type.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Authenticate once per client for `operation`.
async fn ensure_auth(
    client: &Client,
    authed: &OnceCell<()>,
    reference: &ImageReference,
    operation: RegistryOperation,
) -> Result<()> {
    authed
        .get_or_try_init(|| async {
            client
                .auth(&reference.to_oci_reference(), &RegistryAuth::Anonymous, operation)
                .await
                .map(|_| ())
                .map_err(|e| registry_error(reference, format!("Authentication failed: {}", e)))
        })
        .await
        .map(|_| ())
}

/// Image in a remote registry, read side.
pub struct RegistrySource {
    client: Client,
    reference: ImageReference,
    authed: OnceCell<()>,
}

impl RegistrySource {
    pub fn new(reference: ImageReference) -> Self {
        Self {
            client: new_client(&reference),
            reference,
            authed: OnceCell::new(),
        }
    }
}

#[async_trait]
impl ImageSource for RegistrySource {
    fn reference(&self) -> String {
        format!("docker://{}", self.reference)
    }

    async fn get_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        let reference = match instance {
            Some(digest) => self.reference.with_digest(digest),
            None => self.reference.clone(),
        };

        tracing::debug!(reference = %reference, "Fetching manifest");
        let (raw, digest) = self
            .client
            .pull_manifest_raw(
                &reference.to_oci_reference(),
                &RegistryAuth::Anonymous,
                ACCEPTED_MANIFEST_TYPES,
            )
            .await
            .map_err(|e| registry_error(&reference, format!("Failed to pull manifest: {}", e)))?;

        if let Some(expected) = instance {
            if digest != expected.to_string() {
                return Err(TagbagError::DigestMismatch {
                    expected: expected.to_string(),
                    actual: digest,
                });
            }
        }

        let mime = guess_mime(&raw);
        Ok((raw, mime))
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobReader, Option<u64>)> {
        ensure_auth(&self.client, &self.authed, &self.reference, RegistryOperation::Pull).await?;

        let mut data = Vec::new();
        self.client
            .pull_blob(&self.reference.to_oci_reference(), &descriptor(info), &mut data)
            .await
            .map_err(|e| {
                registry_error(
                    &self.reference,
                    format!("Failed to pull blob {}: {}", info.digest, e),
                )
            })?;

        let size = data.len() as u64;
        Ok((Box::new(std::io::Cursor::new(data)), Some(size)))
    }
}

/// Image in a remote registry, write side.
pub struct RegistryDestination {
    client: Client,
    reference: ImageReference,
    authed: OnceCell<()>,
}

impl RegistryDestination {
    pub fn new(reference: ImageReference) -> Self {
        Self {
            client: new_client(&reference),
            reference,
            authed: OnceCell::new(),
        }
    }

    async fn authenticate(&self) -> Result<()> {
        ensure_auth(&self.client, &self.authed, &self.reference, RegistryOperation::Push).await
    }
}

#[async_trait]
impl ImageDestination for RegistryDestination {
    fn reference(&self) -> String {
        format!("docker://{}", self.reference)
    }

    /// A blob is reusable when the registry accepts mounting it into the
    /// target repository from the repository itself.
    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>> {
        self.authenticate().await?;
        let target = self.reference.to_oci_reference();
        match self
            .client
            .mount_blob(&target, &target, &info.digest.to_string())
            .await
        {
            Ok(()) => Ok(Some(info.clone())),
            Err(e) => {
                tracing::trace!(digest = %info.digest, error = %e, "Blob not present in registry");
                Ok(None)
            }
        }
    }

    async fn put_blob(
        &self,
        mut stream: BlobReader,
        info: &BlobInfo,
        _is_config: bool,
    ) -> Result<BlobInfo> {
        self.authenticate().await?;

        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let actual = Digest::from_bytes(&data);
        if actual != info.digest {
            return Err(TagbagError::DigestMismatch {
                expected: info.digest.to_string(),
                actual: actual.to_string(),
            });
        }

        self.client
            .push_blob(&self.reference.to_oci_reference(), &data, &info.digest.to_string())
            .await
            .map_err(|e| {
                registry_error(
                    &self.reference,
                    format!("Failed to push blob {}: {}", info.digest, e),
                )
            })?;

        tracing::debug!(reference = %self.reference, digest = %info.digest, size = data.len(), "Pushed blob");
        Ok(BlobInfo {
            digest: info.digest.clone(),
            size: Some(data.len() as u64),
            media_type: info.media_type.clone(),
        })
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        self.authenticate().await?;

        let reference = match instance {
            Some(digest) => self.reference.with_digest(digest),
            None => self.reference.clone(),
        };
        let content_type = manifest_content_type(manifest)
            .map_err(|e| registry_error(&reference, e))?;

        // Pushed verbatim; instance digests must keep matching the bytes.
        let url = self
            .client
            .push_manifest_raw(&reference.to_oci_reference(), manifest.to_vec(), content_type)
            .await
            .map_err(|e| registry_error(&reference, format!("Failed to push manifest: {}", e)))?;

        tracing::debug!(reference = %reference, url = %url, "Pushed manifest");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        tracing::info!(reference = %self.reference, "Image pushed");
        Ok(())
    }
}
