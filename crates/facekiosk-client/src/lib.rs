//! facekiosk-client: HTTP client for the face-matching backend.
//!
//! The backend is opaque: it accepts multipart still uploads, trains on
//! request, lists the gallery photos matched to the last upload and serves
//! them under `matched_image/`.

pub mod watermark;

pub use watermark::{watermark, LOGO_SIZE};

use facekiosk_core::CapturedImage;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

const REDIRECT_PREFIX: &str = "matches?matches=";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("no stills to upload")]
    EmptySet,
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    #[error("invalid gallery photo name: {0:?}")]
    InvalidPhoto(String),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Backend route a finished capture set is posted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadEndpoint {
    /// `upload_compare`: the whole set in one request, matched against the gallery.
    #[default]
    Compare,
    /// `upload`: one request per still, registering the identity.
    Single,
}

impl UploadEndpoint {
    fn path(self) -> &'static str {
        match self {
            UploadEndpoint::Compare => "upload_compare",
            UploadEndpoint::Single => "upload",
        }
    }
}

#[derive(Error, Debug)]
#[error("unknown upload endpoint: {0}")]
pub struct UnknownEndpoint(pub String);

impl FromStr for UploadEndpoint {
    type Err = UnknownEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "compare" | "upload_compare" => Ok(UploadEndpoint::Compare),
            "single" | "upload" => Ok(UploadEndpoint::Single),
            other => Err(UnknownEndpoint(other.to_string())),
        }
    }
}

/// Identifier of the gallery match set produced by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchSetId(pub String);

impl fmt::Display for MatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatchedImagesResponse {
    #[serde(default)]
    matched_images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TrainingRequest {
    trigger: bool,
}

pub type UploadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<MatchSetId, UploadError>> + Send + 'a>>;

/// Receives a finished capture set. Ownership of the stills moves in.
pub trait UploadCoordinator: Send + Sync {
    fn submit<'a>(&'a self, images: Vec<CapturedImage>, session_label: &'a str) -> UploadFuture<'a>;
}

/// Client for the backend REST endpoints.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base: Url,
    trigger_training: bool,
    upload_endpoint: UploadEndpoint,
}

impl BackendClient {
    /// `base_url` must be http(s); a trailing slash is added when missing.
    pub fn new(base_url: &str) -> Result<Self, UploadError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: normalize_base(base_url)?,
            trigger_training: false,
            upload_endpoint: UploadEndpoint::default(),
        })
    }

    /// Route finished sets to `endpoint` instead of `upload_compare`.
    pub fn with_endpoint(mut self, endpoint: UploadEndpoint) -> Self {
        self.upload_endpoint = endpoint;
        self
    }

    /// Trigger model training after each successful set upload.
    pub fn with_training(mut self, enabled: bool) -> Self {
        self.trigger_training = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<Url, UploadError> {
        self.base
            .join(path)
            .map_err(|e| UploadError::InvalidUrl(format!("{path}: {e}")))
    }

    /// Upload a full capture set to `upload_compare`.
    ///
    /// Each still becomes an `image` part; `name` carries the session label.
    pub async fn upload_set(
        &self,
        images: Vec<CapturedImage>,
        session_label: &str,
    ) -> Result<MatchSetId, UploadError> {
        if images.is_empty() {
            return Err(UploadError::EmptySet);
        }
        let count = images.len();
        let mut form = Form::new().text("name", session_label.to_string());
        for image in images {
            form = form.part("image", image_part(image)?);
        }

        let url = self.endpoint(UploadEndpoint::Compare.path())?;
        tracing::info!(%url, count, label = session_label, "uploading capture set");
        let response = self.http.post(url).multipart(form).send().await?;
        let body = read_upload_response(response).await?;
        Ok(match_set_id(body.redirect_url.as_deref(), session_label))
    }

    /// Upload a single identity still to `upload`.
    pub async fn upload_single(
        &self,
        image: CapturedImage,
        name: &str,
    ) -> Result<MatchSetId, UploadError> {
        let form = Form::new()
            .text("name", name.to_string())
            .part("image", image_part(image)?);

        let url = self.endpoint(UploadEndpoint::Single.path())?;
        tracing::info!(%url, name, "uploading single still");
        let response = self.http.post(url).multipart(form).send().await?;
        let body = read_upload_response(response).await?;
        Ok(match_set_id(body.redirect_url.as_deref(), name))
    }

    /// Ask the backend to retrain on the uploaded stills.
    pub async fn trigger_training(&self) -> Result<(), UploadError> {
        let url = self.endpoint("trigger_training")?;
        tracing::info!(%url, "triggering training");
        let response = self
            .http
            .post(url)
            .json(&TrainingRequest { trigger: true })
            .send()
            .await?;
        check_status(&response)?;
        Ok(())
    }

    /// Upload every still of a set to `upload`, one request each.
    ///
    /// The match-set id of the last response wins.
    pub async fn upload_each(
        &self,
        images: Vec<CapturedImage>,
        session_label: &str,
    ) -> Result<MatchSetId, UploadError> {
        let mut last = None;
        for image in images {
            last = Some(self.upload_single(image, session_label).await?);
        }
        last.ok_or(UploadError::EmptySet)
    }

    /// Gallery photo file names matched to the most recent upload.
    pub async fn matched_images(&self) -> Result<Vec<String>, UploadError> {
        let url = self.endpoint("get_matched_images")?;
        let response = self.http.get(url).send().await?;
        check_status(&response)?;
        let body: MatchedImagesResponse = response.json().await?;
        tracing::debug!(count = body.matched_images.len(), "matched images fetched");
        Ok(body.matched_images)
    }

    /// Where the backend serves gallery photo `photo`.
    pub fn matched_image_url(&self, photo: &str) -> Result<Url, UploadError> {
        let photo = photo.trim();
        let nested = photo.contains(['/', '\\']) || matches!(photo, "." | "..");
        if photo.is_empty() || nested {
            return Err(UploadError::InvalidPhoto(photo.to_string()));
        }
        self.endpoint(&format!("matched_image/{photo}"))
    }

    /// Download the raw bytes at `url`.
    pub async fn fetch_image(&self, url: Url) -> Result<Vec<u8>, UploadError> {
        tracing::debug!(%url, "fetching image");
        let response = self.http.get(url).send().await?;
        check_status(&response)?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Download gallery photo `photo` with `logo` stamped in the centre, as PNG.
    pub async fn fetch_watermarked(&self, photo: &str, logo: &[u8]) -> Result<Vec<u8>, UploadError> {
        let url = self.matched_image_url(photo)?;
        let bytes = self.fetch_image(url).await?;
        Ok(watermark(&bytes, logo)?)
    }
}

impl UploadCoordinator for BackendClient {
    fn submit<'a>(&'a self, images: Vec<CapturedImage>, session_label: &'a str) -> UploadFuture<'a> {
        Box::pin(async move {
            if images.is_empty() {
                return Err(UploadError::EmptySet);
            }
            let id = match self.upload_endpoint {
                UploadEndpoint::Compare => self.upload_set(images, session_label).await?,
                UploadEndpoint::Single => self.upload_each(images, session_label).await?,
            };
            if self.trigger_training {
                self.trigger_training().await?;
            }
            Ok(id)
        })
    }
}

fn image_part(image: CapturedImage) -> Result<Part, UploadError> {
    Ok(Part::bytes(image.bytes)
        .file_name(image.file_name)
        .mime_str("image/jpeg")?)
}

fn check_status(response: &reqwest::Response) -> Result<(), UploadError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        tracing::warn!(status = status.as_u16(), url = %response.url(), "backend request failed");
        Err(UploadError::Status(status.as_u16()))
    }
}

async fn read_upload_response(response: reqwest::Response) -> Result<UploadResponse, UploadError> {
    check_status(&response)?;
    let text = response.text().await?;
    // Some backend builds answer with an empty or non-JSON body.
    Ok(serde_json::from_str(&text).unwrap_or_default())
}

fn normalize_base(base_url: &str) -> Result<Url, UploadError> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|e| UploadError::InvalidUrl(format!("{trimmed}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UploadError::InvalidUrl(format!("unsupported scheme {other}"))),
    }
}

/// Match-set id from the backend's `redirect_url`, falling back to the
/// session label when the backend does not provide one.
fn match_set_id(redirect_url: Option<&str>, session_label: &str) -> MatchSetId {
    let id = redirect_url
        .map(|url| match url.find(REDIRECT_PREFIX) {
            Some(pos) => &url[pos + REDIRECT_PREFIX.len()..],
            None => url,
        })
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(session_label);
    MatchSetId(id.to_string())
}
