//! Digest comparator
//!
//! An image is stale when the digest the registry serves for its reference
//! differs from every digest the local copy is known by.

use thiserror::Error;

use dm_core::ContainerRecord;

use crate::daemon::{DaemonClient, DaemonError};

#[derive(Error, Debug)]
pub enum DigestError {
    /// The reference is a bare image ID and has no registry counterpart
    #[error("{0} is an image ID, not a pullable reference")]
    NotAReference(String),

    /// Local image lookup failed
    #[error("inspecting local image {image} failed: {source}")]
    Local {
        image: String,
        #[source]
        source: DaemonError,
    },

    /// Registry lookup failed
    #[error("registry lookup for {image} failed: {source}")]
    Registry {
        image: String,
        #[source]
        source: DaemonError,
    },
}

/// Outcome of a digest comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestCheck {
    pub update_available: bool,
    /// ID of the local image
    pub local_id: String,
    /// Digest the registry serves
    pub remote_digest: String,
}

/// Strip the repository and algorithm prefix: `nginx@sha256:ab12` → `ab12`
pub fn normalize_digest(digest: &str) -> &str {
    let digest = digest.rsplit_once('@').map_or(digest, |(_, d)| d);
    digest.split_once(':').map_or(digest, |(_, hex)| hex)
}

/// Swap an image ID in `container.image` for the reference it was created from.
///
/// The daemon lists a container by image ID once its tag points at another
/// image; the reference survives in the container config.
pub async fn resolve_reference(client: &dyn DaemonClient, container: &mut ContainerRecord) -> Result<(), DaemonError> {
    if !container.image.starts_with("sha256:") {
        return Ok(());
    }

    let details = client.inspect_container(&container.id).await?;
    if container.image_id.is_empty() {
        container.image_id = std::mem::take(&mut container.image);
    }
    tracing::debug!(container = %container.name, image = %details.image, "Resolved image ID to its reference");
    container.image = details.image;
    Ok(())
}

/// Compare the local copy of `image` with the registry
pub async fn check_image(client: &dyn DaemonClient, image: &str) -> Result<DigestCheck, DigestError> {
    if image.starts_with("sha256:") {
        return Err(DigestError::NotAReference(image.to_string()));
    }

    let local = client
        .inspect_image(image)
        .await
        .map_err(|source| DigestError::Local {
            image: image.to_string(),
            source,
        })?;

    let remote_digest = client
        .registry_digest(image)
        .await
        .map_err(|source| DigestError::Registry {
            image: image.to_string(),
            source,
        })?;

    let remote = normalize_digest(&remote_digest);
    let update_available = if local.repo_digests.is_empty() {
        normalize_digest(&local.id) != remote
    } else {
        !local
            .repo_digests
            .iter()
            .any(|digest| normalize_digest(digest) == remote)
    };

    Ok(DigestCheck {
        update_available,
        local_id: local.id,
        remote_digest,
    })
}
