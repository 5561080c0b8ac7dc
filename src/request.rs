//! Request boundary: JSON or multipart fields become one [`OperationRequest`].
//!
//! Both body encodings are first collected into [`RequestFields`] so every
//! route goes through a single validation step.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ImageError;
use crate::model::ProviderKind;
use crate::orchestrator::{Operation, OperationRequest, Variants, COMIC_PANELS};
use crate::payload::{ImageInput, Normalizer, Upload};

/// Category used when a try-on request names none.
pub const DEFAULT_TRY_ON_CATEGORY: &str = "sunglasses";

/// Which image operation a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `POST /api/edit`
    Edit,
    /// `POST /api/blend`
    Blend,
    /// `POST /api/tryon`
    TryOn,
    /// `POST /api/comic`
    Comic,
}

/// Raw text fields and uploaded files from one request body.
#[derive(Debug, Default)]
pub struct RequestFields {
    texts: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl RequestFields {
    /// Collect the top-level members of a JSON object.
    ///
    /// Strings are taken as-is; numbers and booleans use their JSON text;
    /// arrays and objects are kept as JSON strings, matching how multipart
    /// clients send them.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the body is not a JSON object.
    pub fn from_json(body: Value) -> Result<Self, ImageError> {
        let Value::Object(map) = body else {
            return Err(ImageError::Validation("request body must be a JSON object".into()));
        };
        let mut fields = Self::default();
        for (name, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                other => other.to_string(),
            };
            fields.texts.insert(name, text);
        }
        Ok(fields)
    }

    /// Record a text field.
    pub fn insert_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.texts.insert(name.into(), value.into());
    }

    /// Record an uploaded file.
    pub fn insert_file(&mut self, name: impl Into<String>, upload: Upload) {
        self.files.insert(name.into(), upload);
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    fn text_or_default(&self, name: &str) -> String {
        self.text(name).unwrap_or_default().to_string()
    }

    /// An image given either as an upload under `file_field` or a URL under
    /// `url_field`. Uploads are normalized here; URLs are fetched later.
    fn image(
        &mut self,
        file_field: &str,
        url_field: &str,
        normalizer: &Normalizer,
    ) -> Result<ImageInput, ImageError> {
        if let Some(upload) = self.files.remove(file_field) {
            return Ok(ImageInput::Payload(normalizer.read_upload(upload)?));
        }
        match self.text(url_field) {
            Some(url) => Ok(ImageInput::Url(url.trim().to_string())),
            None => Err(ImageError::Validation(format!("{file_field} or {url_field} is required"))),
        }
    }

    fn variants(&self) -> Variants {
        // Non-numeric input falls back to a single variant.
        let requested = self
            .text("variants")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map_or(1, |v| v.trunc() as i64);
        Variants::new(requested)
    }

    fn panels(&self) -> Result<[String; COMIC_PANELS], ImageError> {
        let invalid = || ImageError::Validation(format!("panels must have {COMIC_PANELS} items"));
        let raw = self.text("panels").unwrap_or("[]");
        let panels: Vec<String> = serde_json::from_str(raw).map_err(|_| invalid())?;
        panels.try_into().map_err(|_| invalid())
    }
}

/// Validate fields for `kind` and build the request.
///
/// # Errors
///
/// Fails on an unknown provider, missing images, a wrong panel count, or an
/// upload that is oversize or not PNG/JPEG.
pub fn parse_operation(
    kind: OperationKind,
    mut fields: RequestFields,
    normalizer: &Normalizer,
) -> Result<OperationRequest, ImageError> {
    let provider =
        ProviderKind::parse_optional(fields.text("provider")).map_err(ImageError::Validation)?;

    let operation = match kind {
        OperationKind::Edit => Operation::Edit {
            image: fields.image("imageFile", "imageUrl", normalizer)?,
            instruction: fields.text_or_default("instruction"),
            variants: fields.variants(),
        },
        OperationKind::Blend => Operation::Blend {
            base: fields.image("baseFile", "baseUrl", normalizer)?,
            reference: fields.image("refFile", "refUrl", normalizer)?,
            instruction: fields.text_or_default("instruction"),
            variants: fields.variants(),
        },
        OperationKind::TryOn => Operation::TryOn {
            base: fields.image("baseFile", "baseUrl", normalizer)?,
            item: fields.image("itemFile", "itemUrl", normalizer)?,
            category: fields.text("category").unwrap_or(DEFAULT_TRY_ON_CATEGORY).trim().to_string(),
            notes: fields.text_or_default("notes"),
        },
        OperationKind::Comic => {
            let panels = fields.panels()?;
            Operation::Comic {
                persona: fields.image("personaFile", "personaUrl", normalizer)?,
                style: fields.text_or_default("style"),
                panels,
            }
        }
    };

    Ok(OperationRequest { provider, operation })
}
