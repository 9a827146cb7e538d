use std::path::Path;

use reqwest::blocking::multipart::{Form, Part as FormPart};
use tracing::info;

use crate::api::Api;
use crate::client::{json, ExpectStatus};
use crate::error::{BotError, Result};
use crate::types::MediaResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentType {
    Png,
    Jpeg,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Png => "image/png",
            ContentType::Jpeg => "image/jpeg",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "png" => Some(ContentType::Png),
            "jpg" | "jpeg" => Some(ContentType::Jpeg),
            _ => None,
        }
    }
}

/// An image waiting to be attached to a toot.
#[derive(Debug, Clone)]
pub(crate) struct MediaUpload {
    pub content_type: ContentType,
    pub file: Vec<u8>,
    /// Empty when the server should make its own preview.
    pub thumbnail: Vec<u8>,
    pub description: String,
    /// Focal point in [-1, 1] x [-1, 1]. Only sent when both components are
    /// non-zero, so the exact center cannot be requested.
    pub focus: (f64, f64),
}

#[derive(Debug, PartialEq)]
pub(crate) enum Part<'a> {
    File {
        name: &'static str,
        filename: &'static str,
        bytes: &'a [u8],
    },
    Text {
        name: &'static str,
        value: String,
    },
}

impl MediaUpload {
    /// Multipart fields, in the order they are sent.
    pub fn parts(&self) -> Vec<Part<'_>> {
        let mut parts = vec![Part::File {
            name: "file",
            filename: "original",
            bytes: &self.file,
        }];
        if !self.thumbnail.is_empty() {
            parts.push(Part::File {
                name: "thumbnail",
                filename: "thumbnail",
                bytes: &self.thumbnail,
            });
        }
        if !self.description.is_empty() {
            parts.push(Part::Text {
                name: "description",
                value: self.description.clone(),
            });
        }
        let (x, y) = self.focus;
        if x != 0.0 && y != 0.0 {
            parts.push(Part::Text {
                name: "focus",
                value: format!("{x:.2},{y:.2}"),
            });
        }
        parts
    }

    fn form(&self) -> Result<Form> {
        let mut form = Form::new();
        for part in self.parts() {
            form = match part {
                Part::File {
                    name,
                    filename,
                    bytes,
                } => form.part(
                    name,
                    FormPart::bytes(bytes.to_vec())
                        .file_name(filename)
                        .mime_str(self.content_type.as_str())?,
                ),
                Part::Text { name, value } => form.text(name, value),
            };
        }
        Ok(form)
    }

    /// Uploads the image and returns the media id to attach to a toot.
    pub fn submit(&self, api: &Api) -> Result<String> {
        let response = api
            .send(
                api.http()
                    .client()
                    .post(api.url("/api/v2/media")?)
                    .multipart(self.form()?),
            )?
            .expect_success(|status, body| BotError::UploadFailed { status, body })?;
        let media: MediaResponse = json(response, "media upload")?;
        info!(app = api.app_name(), id = %media.id, bytes = self.file.len(), "uploaded media");
        Ok(media.id)
    }
}
