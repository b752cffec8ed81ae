//! Item image uploads
//!
//! Item forms arrive either urlencoded (no images) or as multipart with the
//! images under the `images` field. Files are written to the uploads
//! directory with a generated name and served back under `/uploads`.

use std::path::{Path, PathBuf};

use axum::{
    Form,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{config::Config, error::AppError, server::AppState, validation::ItemForm};

pub const IMAGES_FIELD: &str = "images";
pub const PUBLIC_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

/// An item form together with any images sent with it.
#[derive(Debug, Default)]
pub struct ItemSubmission {
    pub form: ItemForm,
    pub images: Vec<UploadedImage>,
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

impl FromRequest<AppState> for ItemSubmission {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        if is_multipart(&req) {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::Upload(e.body_text()))?;
            read_multipart(&mut multipart, &state.config).await
        } else {
            let Form(form) = Form::<ItemForm>::from_request(req, state)
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            Ok(Self { form, images: Vec::new() })
        }
    }
}

fn set_form_field(form: &mut ItemForm, name: &str, value: String) {
    let slot = match name {
        "name" => &mut form.name,
        "description" => &mut form.description,
        "category" => &mut form.category,
        "condition" => &mut form.condition,
        "trade_type" | "tradeType" => &mut form.trade_type,
        "estimated_value" | "estimatedValue" => &mut form.estimated_value,
        "provenance" => &mut form.provenance,
        "technical_details" | "technicalDetails" => &mut form.technical_details,
        _ => return,
    };
    *slot = Some(value);
}

async fn read_multipart(multipart: &mut Multipart, config: &Config) -> Result<ItemSubmission, AppError> {
    let mut submission = ItemSubmission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Upload(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name != IMAGES_FIELD {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::Upload(e.body_text()))?;
            set_form_field(&mut submission.form, &name, text);
            continue;
        }

        let file_name = field.file_name().map(str::to_string).filter(|n| !n.is_empty());
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Upload(e.body_text()))?;

        // Browsers send an empty part when no file was picked
        if file_name.is_none() && bytes.is_empty() {
            continue;
        }

        let image = UploadedImage {
            file_name,
            content_type,
            bytes,
        };
        check_image(&image, submission.images.len(), config)?;
        submission.images.push(image);
    }

    Ok(submission)
}

/// `already_accepted` counts the images kept before this one.
pub fn check_image(image: &UploadedImage, already_accepted: usize, config: &Config) -> Result<(), AppError> {
    if already_accepted >= config.max_upload_files {
        return Err(AppError::Upload(format!(
            "At most {} images can be uploaded per item.",
            config.max_upload_files
        )));
    }
    if !image.content_type.starts_with("image/") {
        return Err(AppError::Upload("Only image files are allowed.".to_string()));
    }
    if image.bytes.len() > config.max_upload_bytes() {
        return Err(AppError::Upload(format!(
            "Images must be at most {} MB.",
            config.max_upload_mb
        )));
    }
    Ok(())
}

fn extension_for(image: &UploadedImage) -> String {
    let from_name = image
        .file_name
        .as_deref()
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));

    match from_name {
        Some(ext) => ext.to_ascii_lowercase(),
        None => image
            .content_type
            .strip_prefix("image/")
            .map(|sub| sub.split(['+', ';']).next().unwrap_or("img"))
            .filter(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("img")
            .to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes every image and returns their public paths. Nothing is left on
    /// disk if any write fails.
    pub async fn save(&self, images: &[UploadedImage]) -> Result<Vec<String>, AppError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Internal(format!("Cannot create uploads directory: {e}")))?;

        let mut saved = Vec::with_capacity(images.len());
        for image in images {
            let name = format!("{}.{}", Uuid::new_v4(), extension_for(image));
            if let Err(e) = tokio::fs::write(self.dir.join(&name), &image.bytes).await {
                self.remove(&saved).await;
                return Err(AppError::Internal(format!("Failed to store image: {e}")));
            }
            saved.push(format!("{PUBLIC_PREFIX}{name}"));
        }

        info!(count = saved.len(), "Stored uploaded images");
        Ok(saved)
    }

    /// Best-effort removal; failures are only logged.
    pub async fn remove(&self, public_paths: &[String]) {
        for public_path in public_paths {
            let Some(name) = public_path
                .strip_prefix(PUBLIC_PREFIX)
                .and_then(|rest| Path::new(rest).file_name())
            else {
                continue;
            };
            if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
                warn!(path = public_path.as_str(), error = %e, "Failed to remove image");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: Option<&str>, content_type: &str, len: usize) -> UploadedImage {
        UploadedImage {
            file_name: name.map(str::to_string),
            content_type: content_type.to_string(),
            bytes: Bytes::from(vec![0u8; len]),
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("analog-uploads-{}", Uuid::new_v4()))
    }

    #[test]
    fn only_small_images_are_accepted() {
        let config = Config {
            max_upload_mb: 1,
            ..Config::default()
        };
        assert!(check_image(&image(Some("a.png"), "image/png", 10), 0, &config).is_ok());
        assert!(check_image(&image(Some("a.pdf"), "application/pdf", 10), 0, &config).is_err());
        assert!(check_image(&image(Some("a.png"), "image/png", 2 * 1024 * 1024), 0, &config).is_err());
        assert!(check_image(&image(Some("a.png"), "image/png", 10), 5, &config).is_err());
    }

    #[test]
    fn extension_is_preserved_or_derived() {
        assert_eq!(extension_for(&image(Some("Photo.JPG"), "image/jpeg", 1)), "jpg");
        assert_eq!(extension_for(&image(None, "image/svg+xml", 1)), "svg");
        assert_eq!(extension_for(&image(Some("noext"), "image/png", 1)), "png");
    }

    #[test]
    fn multipart_fields_fill_the_form() {
        let mut form = ItemForm::default();
        set_form_field(&mut form, "tradeType", "Rent".to_string());
        set_form_field(&mut form, "name", "Lamp".to_string());
        set_form_field(&mut form, "unknown", "x".to_string());
        assert_eq!(form.trade_type.as_deref(), Some("Rent"));
        assert_eq!(form.name.as_deref(), Some("Lamp"));
    }

    #[tokio::test]
    async fn save_then_remove() {
        let dir = temp_dir();
        let store = ImageStore::new(&dir);

        let paths = store
            .save(&[image(Some("a.png"), "image/png", 4), image(Some("b.jpg"), "image/jpeg", 4)])
            .await
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].starts_with("/uploads/") && paths[0].ends_with(".png"));

        let on_disk = dir.join(paths[0].trim_start_matches(PUBLIC_PREFIX));
        assert!(on_disk.exists());

        store.remove(&paths).await;
        assert!(!on_disk.exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
