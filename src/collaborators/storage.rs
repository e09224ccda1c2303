use mongodb::{
    bson::{doc, Bson},
    options::{GridFsBucketOptions, GridFsUploadOptions},
    Database, GridFsBucket,
};
use rocket::futures::{
    io::{AsyncReadExt, Cursor},
    stream::{self, BoxStream, StreamExt},
};

use crate::error::{Error, Result};
use crate::model::db::document::{DocumentKind, DocumentRef};

/// Size of the chunks that fetched documents are streamed in.
const CHUNK_SIZE: usize = 64 * 1024;

/// Descriptive data stored alongside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub kind: DocumentKind,
    pub filename: String,
    pub content_type: String,
}

/// Binary document storage. Campaign records only ever hold the returned handles.
#[rocket::async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Store a document, returning a reference to it.
    async fn store(&self, bytes: Vec<u8>, metadata: DocumentMetadata) -> Result<DocumentRef>;

    /// Release a previously stored document.
    async fn release(&self, document: &DocumentRef) -> Result<()>;

    /// Stream a stored document's contents.
    async fn fetch(&self, document: &DocumentRef) -> Result<BoxStream<'static, Result<Vec<u8>>>>;
}

/// Store every document, releasing those already stored if any fails.
pub async fn store_all(
    storage: &dyn DocumentStorage,
    documents: Vec<(Vec<u8>, DocumentMetadata)>,
) -> Result<Vec<DocumentRef>> {
    let mut stored = Vec::with_capacity(documents.len());
    for (bytes, metadata) in documents {
        match storage.store(bytes, metadata).await {
            Ok(document) => stored.push(document),
            Err(e) => {
                release_all(storage, &stored).await;
                return Err(e);
            }
        }
    }
    Ok(stored)
}

/// Release each document, logging rather than propagating failures.
/// Used once the owning record no longer references the documents.
pub async fn release_all<'a>(
    storage: &dyn DocumentStorage,
    documents: impl IntoIterator<Item = &'a DocumentRef>,
) {
    for document in documents {
        if let Err(e) = storage.release(document).await {
            warn!(
                "Failed to release {} document {}: {e}",
                document.kind.as_str(),
                document.handle
            );
        }
    }
}

/// Document storage in MongoDB GridFS buckets.
pub struct GridFsStorage {
    db: Database,
}

impl GridFsStorage {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    /// Banners and candidate documents live in separate buckets.
    fn bucket(&self, kind: DocumentKind) -> GridFsBucket {
        let name = match kind {
            DocumentKind::Banner => "campaignbanners",
            _ => "campaigncandidatefiles",
        };
        self.db
            .gridfs_bucket(GridFsBucketOptions::builder().bucket_name(name.to_string()).build())
    }
}

fn unavailable(err: impl std::fmt::Display) -> Error {
    error!("Document storage unavailable: {err}");
    Error::Dependency(format!("Document storage: {err}"))
}

#[rocket::async_trait]
impl DocumentStorage for GridFsStorage {
    async fn store(&self, bytes: Vec<u8>, metadata: DocumentMetadata) -> Result<DocumentRef> {
        let options = GridFsUploadOptions::builder()
            .metadata(doc! {
                "kind": metadata.kind.as_str(),
                "content_type": &metadata.content_type,
            })
            .build();
        let id = self
            .bucket(metadata.kind)
            .upload_from_futures_0_3_reader(&metadata.filename, Cursor::new(bytes), options)
            .await
            .map_err(unavailable)?;
        debug!("Stored {} document {id}", metadata.kind.as_str());
        Ok(DocumentRef {
            handle: id.into(),
            kind: metadata.kind,
            filename: metadata.filename,
            content_type: metadata.content_type,
        })
    }

    async fn release(&self, document: &DocumentRef) -> Result<()> {
        self.bucket(document.kind)
            .delete(Bson::from(document.handle))
            .await
            .map_err(unavailable)?;
        debug!("Released {} document {}", document.kind.as_str(), document.handle);
        Ok(())
    }

    async fn fetch(&self, document: &DocumentRef) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let download = self
            .bucket(document.kind)
            .open_download_stream(Bson::from(document.handle))
            .await
            .map_err(|e| {
                warn!("Failed to open document {}: {e}", document.handle);
                Error::not_found("Document", document.handle)
            })?;

        let chunks = stream::unfold(Some(Box::pin(download)), |state| async move {
            let mut download = state?;
            let mut buffer = vec![0; CHUNK_SIZE];
            match download.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok(buffer), Some(download)))
                }
                Err(e) => Some((Err(e.into()), None)),
            }
        })
        .boxed();
        Ok(chunks)
    }
}
