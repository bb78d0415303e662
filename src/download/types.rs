//! Download task, its builder and listener

use reqwest::{Client, RequestBuilder};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::notify::{NotificationOptions, NotificationSlot};
use crate::progress::Progress;
use crate::task::{NetworkTask, ResponseInfo, TaskControl, TaskFailure, TaskId};

/// Customises the outgoing request (headers, auth, query).
pub type RequestHook = Arc<dyn Fn(RequestBuilder, &DownloadTask) -> RequestBuilder + Send + Sync>;

/// Download callbacks. Task-level listeners run before the manager's.
pub trait DownloadListener: Send + Sync {
    fn on_progress(&self, _task: &DownloadTask, _progress: Progress) {}

    fn on_success(&self, _task: &DownloadTask, _response: Option<&ResponseInfo>) {}

    fn on_failure(&self, _task: &DownloadTask, _failure: &TaskFailure) {}
}

pub struct DownloadTask {
    control: TaskControl,
    url: String,
    save_dir: PathBuf,
    save_file_name: Option<String>,
    save_file_suffix: Option<String>,
    full_file_name: Mutex<Option<String>>,
    show_name: Option<String>,
    show_name_when_empty: String,
    breakpoint_resume: bool,
    progress_interval: Option<Duration>,
    notification_options: Option<NotificationOptions>,
    listener: Option<Arc<dyn DownloadListener>>,
    request_hook: Option<RequestHook>,
    client: Option<Client>,
    extra_data: Option<serde_json::Value>,
    current_progress: Mutex<Option<Progress>>,
    pub(crate) notification: NotificationSlot,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `"pdf"` and `".pdf"` both become `".pdf"`; blank or `"."` is no suffix.
fn normalize_suffix(suffix: &str) -> Option<String> {
    let suffix = suffix.trim();
    if suffix.is_empty() || suffix == "." {
        None
    } else if suffix.starts_with('.') {
        Some(suffix.to_string())
    } else {
        Some(format!(".{}", suffix))
    }
}

/// Splits `name.ext` into `("name", Some(".ext"))` when the extension looks
/// like one (short, alphanumeric, not a leading dot).
pub(crate) fn split_suffix(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(index)
            if index > 0
                && index < name.len() - 1
                && name.len() - index <= 11
                && name[index + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (&name[..index], Some(&name[index..]))
        }
        _ => (name, None),
    }
}

/// Last non-empty path segment of `url`, percent-decoded.
fn url_file_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    let name = decoded.rsplit(['/', '\\']).next()?.trim().to_string();
    (!name.is_empty()).then_some(name)
}

impl DownloadTask {
    pub fn builder(url: impl Into<String>, save_dir: impl Into<PathBuf>) -> DownloadTaskBuilder {
        DownloadTaskBuilder::new(url.into(), save_dir.into())
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn save_file_name(&self) -> Option<&str> {
        self.save_file_name.as_deref()
    }

    pub fn save_file_suffix(&self) -> Option<&str> {
        self.save_file_suffix.as_deref()
    }

    /// Name plus suffix; `None` until known (from the caller or the response).
    pub fn full_file_name(&self) -> Option<String> {
        lock(&self.full_file_name).clone()
    }

    pub fn save_path(&self) -> Option<PathBuf> {
        self.full_file_name().map(|name| self.save_dir.join(name))
    }

    /// Display name: explicit show name, then file name, then the fallback.
    pub fn show_name(&self) -> String {
        self.show_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.full_file_name())
            .unwrap_or_else(|| self.show_name_when_empty.clone())
    }

    pub fn is_breakpoint_resume(&self) -> bool {
        self.breakpoint_resume
    }

    /// Bytes already on disk at the destination.
    pub async fn breakpoint(&self) -> u64 {
        match self.save_path() {
            Some(path) => tokio::fs::metadata(&path)
                .await
                .map(|meta| if meta.is_file() { meta.len() } else { 0 })
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn current_progress(&self) -> Option<Progress> {
        *lock(&self.current_progress)
    }

    pub(crate) fn set_current_progress(&self, progress: Progress) {
        *lock(&self.current_progress) = Some(progress);
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        self.progress_interval
    }

    pub fn notification_options(&self) -> Option<&NotificationOptions> {
        self.notification_options.as_ref()
    }

    pub fn listener(&self) -> Option<&Arc<dyn DownloadListener>> {
        self.listener.as_ref()
    }

    pub(crate) fn request_hook(&self) -> Option<&RequestHook> {
        self.request_hook.as_ref()
    }

    pub(crate) fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn extra_data(&self) -> Option<&serde_json::Value> {
        self.extra_data.as_ref()
    }

    pub(crate) fn set_full_file_name(&self, name: Option<String>) {
        *lock(&self.full_file_name) = name;
    }

    /// How the file name gets settled once the response is in.
    ///
    /// A caller-given name is kept and only gains the response's suffix when
    /// it has none of its own. Otherwise the response name (or the URL's last
    /// segment, or a millisecond timestamp) is a fresh candidate.
    pub(crate) fn file_name_choice(&self, response_name: Option<&str>) -> FileNameChoice {
        let candidate = response_name
            .map(|name| name.to_string())
            .or_else(|| url_file_name(&self.url));

        if let Some(known) = self.full_file_name() {
            if self.save_file_suffix.is_none() && split_suffix(&known).1.is_none() {
                if let Some(suffix) = candidate.as_deref().and_then(|name| split_suffix(name).1) {
                    return FileNameChoice::Fixed(format!("{}{}", known, suffix));
                }
            }
            return FileNameChoice::Fixed(known);
        }

        let Some(candidate) = candidate else {
            return FileNameChoice::Fresh {
                stem: chrono::Utc::now().timestamp_millis().to_string(),
                suffix: self.save_file_suffix.clone().unwrap_or_default(),
            };
        };

        let (stem, own_suffix) = split_suffix(&candidate);
        let suffix = match (&self.save_file_suffix, own_suffix) {
            (Some(custom), Some(own)) if custom.eq_ignore_ascii_case(own) => own.to_string(),
            (Some(custom), _) => custom.clone(),
            (None, own) => own.unwrap_or_default().to_string(),
        };
        FileNameChoice::Fresh {
            stem: stem.to_string(),
            suffix,
        }
    }
}

/// Destination name for a download whose name was not fully known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileNameChoice {
    /// Caller-given; used as is.
    Fixed(String),
    /// Derived; a taken name moves on to `stem(1).ext`, `stem(2).ext`, ...
    Fresh { stem: String, suffix: String },
}

impl FileNameChoice {
    /// The `n`th name to try.
    pub(crate) fn nth(&self, n: usize) -> String {
        match self {
            FileNameChoice::Fixed(name) => name.clone(),
            FileNameChoice::Fresh { stem, suffix } if n == 0 => format!("{}{}", stem, suffix),
            FileNameChoice::Fresh { stem, suffix } => format!("{}({}){}", stem, n, suffix),
        }
    }
}

impl NetworkTask for DownloadTask {
    fn control(&self) -> &TaskControl {
        &self.control
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn destinations(&self) -> Vec<PathBuf> {
        self.save_path().into_iter().collect()
    }

    fn on_resubmit(&self) {
        self.notification.enable();
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", self.id())
            .field("state", &self.state())
            .field("url", &self.url)
            .field("save_dir", &self.save_dir)
            .field("file_name", &self.full_file_name())
            .finish()
    }
}

pub struct DownloadTaskBuilder {
    id: Option<TaskId>,
    url: String,
    save_dir: PathBuf,
    save_file_name: Option<String>,
    save_file_suffix: Option<String>,
    show_name: Option<String>,
    show_name_when_empty: String,
    breakpoint_resume: bool,
    progress_interval: Option<Duration>,
    notification_options: Option<NotificationOptions>,
    listener: Option<Arc<dyn DownloadListener>>,
    request_hook: Option<RequestHook>,
    client: Option<Client>,
    extra_data: Option<serde_json::Value>,
}

impl DownloadTaskBuilder {
    fn new(url: String, save_dir: PathBuf) -> Self {
        Self {
            id: None,
            url,
            save_dir,
            save_file_name: None,
            save_file_suffix: None,
            show_name: None,
            show_name_when_empty: "Unknown file".to_string(),
            breakpoint_resume: true,
            progress_interval: None,
            notification_options: None,
            listener: None,
            request_hook: None,
            client: None,
            extra_data: None,
        }
    }

    /// Fixed id instead of a generated one; resubmitting with the same id
    /// replaces a stopped task in place.
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.save_file_name = Some(name.into()).filter(|n| !n.trim().is_empty());
        self
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.save_file_suffix = normalize_suffix(suffix);
        self
    }

    pub fn show_name(mut self, name: impl Into<String>) -> Self {
        self.show_name = Some(name.into());
        self
    }

    pub fn show_name_when_empty(mut self, name: impl Into<String>) -> Self {
        self.show_name_when_empty = name.into();
        self
    }

    pub fn breakpoint_resume(mut self, enabled: bool) -> Self {
        self.breakpoint_resume = enabled;
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

    pub fn listener(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn request_hook(mut self, hook: RequestHook) -> Self {
        self.request_hook = Some(hook);
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

    pub fn build(self) -> Arc<DownloadTask> {
        let full_file_name = self.save_file_name.as_ref().map(|name| {
            format!("{}{}", name, self.save_file_suffix.as_deref().unwrap_or_default())
        });
        Arc::new(DownloadTask {
            control: TaskControl::new(self.id.unwrap_or_default()),
            url: self.url,
            save_dir: self.save_dir,
            save_file_name: self.save_file_name,
            save_file_suffix: self.save_file_suffix,
            full_file_name: Mutex::new(full_file_name),
            show_name: self.show_name,
            show_name_when_empty: self.show_name_when_empty,
            breakpoint_resume: self.breakpoint_resume,
            progress_interval: self.progress_interval,
            notification_options: self.notification_options,
            listener: self.listener,
            request_hook: self.request_hook,
            client: self.client,
            extra_data: self.extra_data,
            current_progress: Mutex::new(None),
            notification: NotificationSlot::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_normalized_with_leading_dot() {
        assert_eq!(normalize_suffix("pdf").as_deref(), Some(".pdf"));
        assert_eq!(normalize_suffix(".zip").as_deref(), Some(".zip"));
        assert_eq!(normalize_suffix("."), None);
        assert_eq!(normalize_suffix("  "), None);
    }

    #[test]
    fn full_name_joins_name_and_suffix() {
        let task = DownloadTask::builder("http://h/x", "/tmp")
            .file_name("report")
            .suffix("pdf")
            .build();
        assert_eq!(task.full_file_name().as_deref(), Some("report.pdf"));
        assert_eq!(task.save_path(), Some(PathBuf::from("/tmp/report.pdf")));
        assert_eq!(task.destinations(), vec![PathBuf::from("/tmp/report.pdf")]);
    }

    #[test]
    fn unknown_name_has_no_destination_yet() {
        let task = DownloadTask::builder("http://h/x", "/tmp").build();
        assert!(task.full_file_name().is_none());
        assert!(task.destinations().is_empty());
        assert_eq!(task.show_name(), "Unknown file");
    }

    #[test]
    fn show_name_priority() {
        let task = DownloadTask::builder("http://h/x", "/tmp")
            .file_name("a.bin")
            .show_name("Nice name")
            .build();
        assert_eq!(task.show_name(), "Nice name");
        let task = DownloadTask::builder("http://h/x", "/tmp").file_name("a.bin").build();
        assert_eq!(task.show_name(), "a.bin");
    }

    #[test]
    fn split_suffix_recognises_extensions() {
        assert_eq!(split_suffix("a.tar.gz"), ("a.tar", Some(".gz")));
        assert_eq!(split_suffix(".bashrc"), (".bashrc", None));
        assert_eq!(split_suffix("noext"), ("noext", None));
        assert_eq!(split_suffix("weird.ext with space"), ("weird.ext with space", None));
    }

    #[test]
    fn known_name_gains_response_suffix_only_when_missing() {
        let task = DownloadTask::builder("http://h/x", "/tmp").file_name("report").build();
        assert_eq!(
            task.file_name_choice(Some("server.pdf")),
            FileNameChoice::Fixed("report.pdf".to_string())
        );

        let task = DownloadTask::builder("http://h/x", "/tmp")
            .file_name("report")
            .suffix("txt")
            .build();
        assert_eq!(task.file_name_choice(Some("server.pdf")).nth(3), "report.txt");
    }

    #[test]
    fn fresh_names_count_up_on_clashes() {
        let task = DownloadTask::builder("http://h/x", "/tmp").build();
        let choice = task.file_name_choice(Some("data.csv"));
        assert_eq!(choice.nth(0), "data.csv");
        assert_eq!(choice.nth(2), "data(2).csv");
        assert!(task.full_file_name().is_none());
    }

    #[test]
    fn custom_suffix_overrides_response_suffix() {
        let task = DownloadTask::builder("http://h/x", "/tmp").suffix("bin").build();
        assert_eq!(task.file_name_choice(Some("payload.dat")).nth(0), "payload.bin");
    }

    #[test]
    fn url_segment_is_used_without_disposition() {
        let task = DownloadTask::builder("http://h/files/my%20photo.jpg?x=1", "/tmp").build();
        assert_eq!(task.file_name_choice(None).nth(0), "my photo.jpg");
    }

    #[test]
    fn timestamp_name_when_nothing_is_known() {
        let task = DownloadTask::builder("http://h/", "/tmp").suffix("zip").build();
        let name = task.file_name_choice(None).nth(0);
        assert!(name.ends_with(".zip"));
        assert!(name.trim_end_matches(".zip").chars().all(|c| c.is_ascii_digit()));
    }
}
