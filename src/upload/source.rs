//! Where upload bytes come from

use futures_util::future::BoxFuture;
use log::debug;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncSeekExt};

use crate::error::{Result, TransferError};

pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Content behind a URI, as produced by a [`ContentResolver`].
pub struct ResolvedContent {
    pub reader: BoxedReader,
    pub content_length: Option<u64>,
}

/// Opens opaque content URIs (document pickers, content providers, ...).
pub trait ContentResolver: Send + Sync {
    fn open<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, io::Result<ResolvedContent>>;
}

/// Resolves `file://` URIs and plain paths on the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsResolver;

impl ContentResolver for FsResolver {
    fn open<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, io::Result<ResolvedContent>> {
        Box::pin(async move {
            let raw = uri.strip_prefix("file://").unwrap_or(uri);
            let path = urlencoding::decode(raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                .into_owned();
            let file = tokio::fs::File::open(&path).await?;
            let content_length = file.metadata().await?.len();
            Ok(ResolvedContent {
                reader: Box::new(file),
                content_length: Some(content_length),
            })
        })
    }
}

pub enum FileSource {
    Path(PathBuf),
    /// Consumed by the first upload attempt.
    Reader(Mutex<Option<BoxedReader>>),
    Uri(String),
}

impl FileSource {
    pub fn reader(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        FileSource::Reader(Mutex::new(Some(Box::new(reader))))
    }

    /// Local file behind this source, if it is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FileSource::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FileSource::Reader(_) => f.write_str("Reader"),
            FileSource::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
        }
    }
}

/// An opened source positioned at `offset`.
pub(crate) struct OpenedSource {
    pub reader: BoxedReader,
    pub offset: u64,
    pub content_length: Option<u64>,
}

/// Opens `source`. Only local files can skip ahead to `breakpoint`; every
/// other source streams from the first byte.
pub(crate) async fn open_source(
    source: &FileSource,
    parameter: &str,
    breakpoint: u64,
    known_length: Option<u64>,
    resolver: &dyn ContentResolver,
) -> Result<OpenedSource> {
    match source {
        FileSource::Path(path) => {
            let mut file = tokio::fs::File::open(path).await?;
            let length = file.metadata().await?.len();
            let offset = breakpoint.min(length);
            if offset > 0 {
                file.seek(SeekFrom::Start(offset)).await?;
                debug!("upload_source_resume: {} offset={}", parameter, offset);
            }
            Ok(OpenedSource {
                reader: Box::new(file),
                offset,
                content_length: Some(length),
            })
        }
        FileSource::Reader(slot) => {
            let reader = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| TransferError::MissingSource(parameter.to_string()))?;
            Ok(OpenedSource {
                reader,
                offset: 0,
                content_length: known_length,
            })
        }
        FileSource::Uri(uri) => {
            let resolved = resolver.open(uri).await?;
            Ok(OpenedSource {
                reader: resolved.reader,
                offset: 0,
                content_length: known_length.or(resolved.content_length),
            })
        }
    }
}

/// MIME type for a file name, by extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "js" => "application/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",
        "apk" => "application/vnd.android.package-archive",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
