use std::ops::ControlFlow;

use bollard::auth::DockerCredentials;
use bollard::models::{CreateImageInfo, ProgressDetail};
use bollard::query_parameters::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::Docker;
use futures_util::StreamExt;

use crate::config::model::Credentials;
use crate::docker::{EngineError, LocalImage, PullProgress};

/// Parse an image reference into (name, tag).
/// "postgres:16" -> ("postgres", "16")
/// "redis" -> ("redis", "latest")
/// "localhost:5000/pe_master" -> ("localhost:5000/pe_master", "latest")
pub fn parse_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            (name, tag)
        }
        _ => (image, "latest"),
    }
}

/// `current/total` byte counts of a pull chunk, when the engine sent them.
pub fn progress_text(detail: Option<&ProgressDetail>) -> Option<String> {
    let detail = detail?;
    match (detail.current, detail.total) {
        (Some(current), Some(total)) if total > 0 => Some(format!("{}/{}", current, total)),
        (Some(current), _) => Some(current.to_string()),
        _ => None,
    }
}

/// List local images with all of their tag aliases. Dangling images are skipped.
pub async fn list_images(docker: &Docker) -> Result<Vec<LocalImage>, EngineError> {
    let images = docker
        .list_images(Some(ListImagesOptions::default()))
        .await?;
    Ok(images
        .into_iter()
        .map(|summary| LocalImage {
            id: summary.id,
            repo_tags: summary
                .repo_tags
                .into_iter()
                .filter(|t| t != "<none>:<none>")
                .collect(),
        })
        .filter(|image| !image.repo_tags.is_empty())
        .collect())
}

/// Pull an image, handing every streamed chunk to `on_progress`.
pub async fn pull_image(
    docker: &Docker,
    image: &str,
    credentials: Option<&Credentials>,
    on_progress: &mut (dyn for<'p> FnMut(&'p PullProgress) -> ControlFlow<()> + Send),
) -> Result<(), EngineError> {
    let (name, tag) = parse_image_ref(image);
    tracing::debug!(image = %image, "pulling image");

    let options = CreateImageOptions {
        from_image: Some(name.to_string()),
        tag: Some(tag.to_string()),
        ..Default::default()
    };

    let credentials = credentials.map(|c| DockerCredentials {
        username: Some(c.username.clone()),
        password: Some(c.password.clone()),
        ..Default::default()
    });

    let mut stream = docker.create_image(Some(options), None, credentials);
    while let Some(result) = stream.next().await {
        let info: CreateImageInfo = result?;
        if let Some(err) = &info.error_detail {
            return Err(EngineError::Api {
                status: 500,
                message: format!(
                    "image pull failed for {}: {}",
                    image,
                    err.message.as_deref().unwrap_or("unknown error")
                ),
            });
        }
        let progress = PullProgress {
            progress: progress_text(info.progress_detail.as_ref()),
            status: info.status,
        };
        if on_progress(&progress).is_break() {
            return Err(EngineError::Cancelled);
        }
    }

    tracing::debug!(image = %image, "image pulled successfully");
    Ok(())
}

/// Remove a local image. An image still used by a container is reported as
/// [`EngineError::Conflict`].
pub async fn remove_image(docker: &Docker, image: &str) -> Result<(), EngineError> {
    docker
        .remove_image(image, Some(RemoveImageOptions::default()), None)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_progress_from_byte_counts() {
        let detail = ProgressDetail {
            current: Some(1024),
            total: Some(4096),
        };
        assert_eq!(progress_text(Some(&detail)).as_deref(), Some("1024/4096"));

        let no_total = ProgressDetail {
            current: Some(10),
            total: None,
        };
        assert_eq!(progress_text(Some(&no_total)).as_deref(), Some("10"));
        assert_eq!(progress_text(Some(&ProgressDetail::default())), None);
        assert_eq!(progress_text(None), None);
    }

    #[test]
    fn parse_image_with_tag() {
        assert_eq!(
            parse_image_ref("geoffwilliams/pe_master_public_lowmem:2016.2.1-2"),
            ("geoffwilliams/pe_master_public_lowmem", "2016.2.1-2")
        );
    }

    #[test]
    fn parse_image_without_tag() {
        assert_eq!(parse_image_ref("centos"), ("centos", "latest"));
    }

    #[test]
    fn parse_image_with_registry_port() {
        assert_eq!(
            parse_image_ref("localhost:5000/pe_agent"),
            ("localhost:5000/pe_agent", "latest")
        );
        assert_eq!(
            parse_image_ref("localhost:5000/pe_agent:3.8.0"),
            ("localhost:5000/pe_agent", "3.8.0")
        );
    }
}
