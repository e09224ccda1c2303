use rocket::{
    data::Limits,
    form::{self, DataField, FromFormField},
};

/// A file uploaded as part of a multipart form.
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("bytes", &self.bytes.len())
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[rocket::async_trait]
impl<'r> FromFormField<'r> for Upload {
    async fn from_data(field: DataField<'r, '_>) -> form::Result<'r, Self> {
        let limit = field.request.limits().get("file").unwrap_or(Limits::FILE);
        let bytes = field.data.open(limit).into_bytes().await?;
        if !bytes.is_complete() {
            Err((None, Some(limit)))?;
        }

        let filename = field
            .file_name
            .and_then(|name| name.as_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self {
            bytes: bytes.into_inner(),
            filename,
            content_type: field.content_type.to_string(),
        })
    }
}
