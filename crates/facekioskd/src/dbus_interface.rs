use crate::session::{SessionController, SessionError};
use facekiosk_client::{BackendClient, UploadError};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.facekiosk.Kiosk1";
pub const OBJECT_PATH: &str = "/org/facekiosk/Kiosk1";

/// D-Bus interface for the kiosk capture daemon.
///
/// Bus name: org.facekiosk.Kiosk1
/// Object path: /org/facekiosk/Kiosk1
pub struct KioskService {
    sessions: Arc<SessionController>,
    backend: BackendClient,
    logo: Option<Vec<u8>>,
}

impl KioskService {
    pub fn new(
        sessions: Arc<SessionController>,
        backend: BackendClient,
        logo: Option<Vec<u8>>,
    ) -> Self {
        Self {
            sessions,
            backend,
            logo,
        }
    }
}

/// Resolve gallery file names to the URLs the backend serves them under.
/// Names the backend should never send are logged and skipped.
fn gallery_urls(backend: &BackendClient, photos: &[String]) -> Vec<String> {
    photos
        .iter()
        .filter_map(|photo| match backend.matched_image_url(photo) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                tracing::warn!(photo = %photo, error = %e, "skipping matched image");
                None
            }
        })
        .collect()
}

fn backend_error(e: UploadError) -> zbus::fdo::Error {
    match e {
        UploadError::InvalidPhoto(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

fn session_error(e: SessionError) -> zbus::fdo::Error {
    match e {
        SessionError::EmptyLabel => zbus::fdo::Error::InvalidArgs(e.to_string()),
        SessionError::NothingToRetry | SessionError::Config(_) => {
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}

#[interface(name = "org.facekiosk.Kiosk1")]
impl KioskService {
    /// Start a capture session for `label`. Returns the session id.
    async fn start_session(&self, label: &str) -> zbus::fdo::Result<String> {
        tracing::info!(label, "start_session requested");
        let id = self.sessions.start(label).await.map_err(session_error)?;
        Ok(id.to_string())
    }

    /// Stop the detection loop, discarding partial captures.
    async fn stop_session(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop_session requested");
        Ok(self.sessions.stop().await)
    }

    /// Start collecting again from scratch with the last label.
    async fn retry(&self) -> zbus::fdo::Result<String> {
        tracing::info!("retry requested");
        let id = self.sessions.retry().await.map_err(session_error)?;
        Ok(id.to_string())
    }

    /// Stop and clear the session; the kiosk returns to idle.
    async fn abort(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("abort requested");
        Ok(self.sessions.abort().await)
    }

    /// Return daemon and session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let session = self.sessions.status().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": self.backend.base_url(),
            "session": session,
        })
        .to_string())
    }

    /// Gallery photos matched to the last upload, as a JSON array of URLs.
    async fn matched_images(&self) -> zbus::fdo::Result<String> {
        let photos = self.backend.matched_images().await.map_err(|e| {
            tracing::warn!(error = %e, "matched_images failed");
            backend_error(e)
        })?;
        serde_json::to_string(&gallery_urls(&self.backend, &photos))
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Download one matched gallery photo by file name.
    ///
    /// With a logo configured the photo comes back watermarked as PNG;
    /// otherwise the backend's bytes are passed through.
    async fn matched_image(&self, photo: &str) -> zbus::fdo::Result<Vec<u8>> {
        tracing::info!(photo, watermark = self.logo.is_some(), "matched_image requested");
        let result = match &self.logo {
            Some(logo) => self.backend.fetch_watermarked(photo, logo).await,
            None => match self.backend.matched_image_url(photo) {
                Ok(url) => self.backend.fetch_image(url).await,
                Err(e) => Err(e),
            },
        };
        result.map_err(|e| {
            tracing::warn!(photo, error = %e, "matched_image failed");
            backend_error(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gallery_urls_resolve_and_skip_bad_names() {
        let backend = BackendClient::new("https://faceid.example.com/worker").unwrap();
        let photos = vec!["a.jpg".to_string(), "../x.jpg".to_string(), "b.jpg".to_string()];
        assert_eq!(
            gallery_urls(&backend, &photos),
            vec![
                "https://faceid.example.com/worker/matched_image/a.jpg",
                "https://faceid.example.com/worker/matched_image/b.jpg",
            ]
        );
    }

    #[test]
    fn test_bad_photo_name_is_invalid_args() {
        let err = backend_error(UploadError::InvalidPhoto("..".into()));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        assert!(matches!(backend_error(UploadError::Status(500)), zbus::fdo::Error::Failed(_)));
    }
}
