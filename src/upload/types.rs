//! Upload task, form parameters and listener

use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::error::TransferError;
use crate::notify::{NotificationOptions, NotificationSlot};
use crate::progress::Progress;
use crate::task::{NetworkTask, ResponseInfo, TaskControl, TaskFailure, TaskId, TaskState};

use super::source::{guess_mime_type, FileSource};

/// Customises the outgoing request (headers, auth, query).
pub type UploadRequestHook = Arc<dyn Fn(RequestBuilder, &UploadTask) -> RequestBuilder + Send + Sync>;

/// Adds or rewrites form fields after the task's own parameters.
pub type FormHook = Arc<dyn Fn(Form, &UploadTask) -> Form + Send + Sync>;

/// Upload callbacks. Task-level listeners run before the manager's.
pub trait UploadListener: Send + Sync {
    fn on_progress(&self, _task: &UploadTask, _file: &FileParameter, _progress: Progress) {}

    fn on_file_success(&self, _task: &UploadTask, _file: &FileParameter) {}

    fn on_file_failure(&self, _task: &UploadTask, _file: &FileParameter, _error: Option<&TransferError>) {}

    fn on_success(&self, _task: &UploadTask, _response: &ResponseInfo) {}

    fn on_failure(&self, _task: &UploadTask, _failure: &TaskFailure) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One file part of the multipart form, with its own state and progress.
pub struct FileParameter {
    name: String,
    file_name: String,
    show_name: Option<String>,
    mime_type: String,
    content_length: Mutex<Option<u64>>,
    breakpoint: u64,
    source: FileSource,
    notification_options: Option<NotificationOptions>,
    extra_data: Option<serde_json::Value>,
    state: Mutex<TaskState>,
    current_progress: Mutex<Option<Progress>>,
    pub(crate) notification: NotificationSlot,
}

impl FileParameter {
    fn with_source(name: String, file_name: String, source: FileSource) -> Self {
        Self {
            mime_type: guess_mime_type(&file_name).to_string(),
            name,
            file_name,
            show_name: None,
            content_length: Mutex::new(None),
            breakpoint: 0,
            source,
            notification_options: None,
            extra_data: None,
            state: Mutex::new(TaskState::None),
            current_progress: Mutex::new(None),
            notification: NotificationSlot::default(),
        }
    }

    /// Local file; the part's file name is the path's last component.
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::with_source(name.into(), file_name, FileSource::Path(path))
    }

    /// One-shot reader of known length.
    pub fn from_reader(
        name: impl Into<String>,
        file_name: impl Into<String>,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        content_length: u64,
    ) -> Self {
        Self::with_source(name.into(), file_name.into(), FileSource::reader(reader))
            .with_content_length(content_length)
    }

    /// Opaque URI opened through the manager's content resolver.
    pub fn from_uri(name: impl Into<String>, file_name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::with_source(name.into(), file_name.into(), FileSource::Uri(uri.into()))
    }

    /// Resume offset; honoured for local files only.
    pub fn with_breakpoint(mut self, offset: u64) -> Self {
        self.breakpoint = offset;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_show_name(mut self, name: impl Into<String>) -> Self {
        self.show_name = Some(name.into());
        self
    }

    pub fn with_content_length(self, length: u64) -> Self {
        *lock(&self.content_length) = Some(length);
        self
    }

    pub fn with_notification(mut self, options: NotificationOptions) -> Self {
        self.notification_options = Some(options);
        self
    }

    pub fn with_extra_data(mut self, data: serde_json::Value) -> Self {
        self.extra_data = Some(data);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn display_name(&self) -> &str {
        self.show_name.as_deref().unwrap_or(&self.file_name)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn breakpoint(&self) -> u64 {
        self.breakpoint
    }

    pub fn content_length(&self) -> Option<u64> {
        *lock(&self.content_length)
    }

    pub(crate) fn set_content_length(&self, length: Option<u64>) {
        *lock(&self.content_length) = length;
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn notification_options(&self) -> Option<&NotificationOptions> {
        self.notification_options.as_ref()
    }

    pub fn extra_data(&self) -> Option<&serde_json::Value> {
        self.extra_data.as_ref()
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *lock(&self.state) = state;
    }

    pub fn current_progress(&self) -> Option<Progress> {
        *lock(&self.current_progress)
    }

    pub(crate) fn set_current_progress(&self, progress: Progress) {
        *lock(&self.current_progress) = Some(progress);
    }
}

impl std::fmt::Debug for FileParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileParameter")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug)]
pub enum UploadParameter {
    Text { name: String, value: String },
    File(FileParameter),
}

pub struct UploadTask {
    control: TaskControl,
    url: String,
    parameters: Vec<UploadParameter>,
    show_name: Option<String>,
    progress_interval: Option<Duration>,
    notification_options: Option<NotificationOptions>,
    listener: Option<Arc<dyn UploadListener>>,
    request_hook: Option<UploadRequestHook>,
    form_hook: Option<FormHook>,
    client: Option<Client>,
    extra_data: Option<serde_json::Value>,
}

impl UploadTask {
    pub fn builder(url: impl Into<String>) -> UploadTaskBuilder {
        UploadTaskBuilder::new(url.into())
    }

    pub fn parameters(&self) -> &[UploadParameter] {
        &self.parameters
    }

    pub fn files(&self) -> impl Iterator<Item = &FileParameter> {
        self.parameters.iter().filter_map(|param| match param {
            UploadParameter::File(file) => Some(file),
            UploadParameter::Text { .. } => None,
        })
    }

    /// File parameter at position `index` of the form.
    pub(crate) fn file_at(&self, index: usize) -> Option<&FileParameter> {
        match self.parameters.get(index)? {
            UploadParameter::File(file) => Some(file),
            UploadParameter::Text { .. } => None,
        }
    }

    pub fn show_name(&self) -> Option<&str> {
        self.show_name.as_deref()
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        self.progress_interval
    }

    pub fn notification_options(&self) -> Option<&NotificationOptions> {
        self.notification_options.as_ref()
    }

    pub fn listener(&self) -> Option<&Arc<dyn UploadListener>> {
        self.listener.as_ref()
    }

    pub(crate) fn request_hook(&self) -> Option<&UploadRequestHook> {
        self.request_hook.as_ref()
    }

    pub(crate) fn form_hook(&self) -> Option<&FormHook> {
        self.form_hook.as_ref()
    }

    pub(crate) fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn extra_data(&self) -> Option<&serde_json::Value> {
        self.extra_data.as_ref()
    }
}

impl NetworkTask for UploadTask {
    fn control(&self) -> &TaskControl {
        &self.control
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn destinations(&self) -> Vec<PathBuf> {
        self.files()
            .filter_map(|file| file.source().path().map(|p| p.to_path_buf()))
            .collect()
    }

    fn on_resubmit(&self) {
        for file in self.files() {
            file.set_state(TaskState::None);
            file.notification.enable();
        }
    }
}

impl std::fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTask")
            .field("id", self.id())
            .field("state", &self.state())
            .field("url", &self.url)
            .field("parameters", &self.parameters)
            .finish()
    }
}

pub struct UploadTaskBuilder {
    id: Option<TaskId>,
    url: String,
    parameters: Vec<UploadParameter>,
    show_name: Option<String>,
    progress_interval: Option<Duration>,
    notification_options: Option<NotificationOptions>,
    listener: Option<Arc<dyn UploadListener>>,
    request_hook: Option<UploadRequestHook>,
    form_hook: Option<FormHook>,
    client: Option<Client>,
    extra_data: Option<serde_json::Value>,
}

impl UploadTaskBuilder {
    fn new(url: String) -> Self {
        Self {
            id: None,
            url,
            parameters: Vec::new(),
            show_name: None,
            progress_interval: None,
            notification_options: None,
            listener: None,
            request_hook: None,
            form_hook: None,
            client: None,
            extra_data: None,
        }
    }

    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(UploadParameter::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(mut self, file: FileParameter) -> Self {
        self.parameters.push(UploadParameter::File(file));
        self
    }

    pub fn show_name(mut self, name: impl Into<String>) -> Self {
        self.show_name = Some(name.into());
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn notification(mut self, options: NotificationOptions) -> Self {
        self.notification_options = Some(options);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn request_hook(mut self, hook: UploadRequestHook) -> Self {
        self.request_hook = Some(hook);
        self
    }

    pub fn form_hook(mut self, hook: FormHook) -> Self {
        self.form_hook = Some(hook);
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn extra_data(mut self, data: serde_json::Value) -> Self {
        self.extra_data = Some(data);
        self
    }

    pub fn build(self) -> Arc<UploadTask> {
        Arc::new(UploadTask {
            control: TaskControl::new(self.id.unwrap_or_default()),
            url: self.url,
            parameters: self.parameters,
            show_name: self.show_name,
            progress_interval: self.progress_interval,
            notification_options: self.notification_options,
            listener: self.listener,
            request_hook: self.request_hook,
            form_hook: self.form_hook,
            client: self.client,
            extra_data: self.extra_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_parameter_from_path_guesses_name_and_type() {
        let file = FileParameter::from_path("avatar", "/tmp/pics/me.png");
        assert_eq!(file.name(), "avatar");
        assert_eq!(file.file_name(), "me.png");
        assert_eq!(file.mime_type(), "image/png");
        assert_eq!(file.state(), TaskState::None);
        assert_eq!(file.source().path(), Some(std::path::Path::new("/tmp/pics/me.png")));
    }

    #[test]
    fn destinations_are_local_file_sources() {
        let task = UploadTask::builder("http://h/upload")
            .text("user", "42")
            .file(FileParameter::from_path("a", "/tmp/a.txt"))
            .file(FileParameter::from_uri("b", "b.txt", "content://docs/7"))
            .file(FileParameter::from_reader("c", "c.bin", std::io::Cursor::new(vec![1u8]), 1))
            .build();
        assert_eq!(task.destinations(), vec![PathBuf::from("/tmp/a.txt")]);
        assert_eq!(task.files().count(), 3);
        assert!(task.file_at(0).is_none());
        assert_eq!(task.file_at(1).map(|f| f.name()), Some("a"));
    }

    #[test]
    fn reader_parameter_records_length() {
        let file = FileParameter::from_reader("c", "c.bin", std::io::Cursor::new(vec![0u8; 9]), 9);
        assert_eq!(file.content_length(), Some(9));
        assert_eq!(file.display_name(), "c.bin");
    }
}
