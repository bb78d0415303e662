//! Multipart uploads: text fields plus any number of file parts, each with
//! its own progress and outcome.

mod manager;
mod source;
mod types;
mod worker;

pub use manager::{UploadManager, UploadManagerBuilder};
pub use source::{guess_mime_type, BoxedReader, ContentResolver, FileSource, FsResolver, ResolvedContent};
pub use types::{FileParameter, FormHook, UploadListener, UploadParameter, UploadRequestHook, UploadTask, UploadTaskBuilder};
