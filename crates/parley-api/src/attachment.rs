use std::path::Path;

use reqwest::multipart::Part;

use crate::error::Result;

/// A file read into memory for a multipart upload. Kept as bytes so the form
/// can be rebuilt when a request is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }

    pub(crate) fn part(&self) -> Part {
        Part::bytes(self.bytes.clone()).file_name(self.file_name.clone())
    }
}
