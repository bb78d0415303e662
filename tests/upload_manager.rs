use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transfer_lanes::error::TransferError;
use transfer_lanes::progress::Progress;
use transfer_lanes::{
    FileParameter, ManagerConfig, NetworkTask, ResponseInfo, TaskFailure, TaskState, UploadListener,
    UploadManager, UploadTask,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<(String, Progress)>>,
    file_successes: Mutex<Vec<String>>,
    file_failures: Mutex<Vec<(String, bool)>>,
    successes: AtomicUsize,
    failures: Mutex<Vec<(bool, Option<u16>)>>,
    response_body: Mutex<Option<String>>,
}

impl UploadListener for Recorder {
    fn on_progress(&self, _task: &UploadTask, file: &FileParameter, progress: Progress) {
        self.progress
            .lock()
            .unwrap()
            .push((file.name().to_string(), progress));
    }

    fn on_file_success(&self, _task: &UploadTask, file: &FileParameter) {
        self.file_successes.lock().unwrap().push(file.name().to_string());
    }

    fn on_file_failure(&self, _task: &UploadTask, file: &FileParameter, error: Option<&TransferError>) {
        self.file_failures
            .lock()
            .unwrap()
            .push((file.name().to_string(), error.is_some()));
    }

    fn on_success(&self, _task: &UploadTask, response: &ResponseInfo) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        *self.response_body.lock().unwrap() = response.body_text();
    }

    fn on_failure(&self, _task: &UploadTask, failure: &TaskFailure) {
        self.failures
            .lock()
            .unwrap()
            .push((failure.is_forced(), failure.response.as_ref().map(|r| r.status())));
    }
}

fn manager(lanes: i32) -> UploadManager {
    UploadManager::new(ManagerConfig {
        lanes,
        ..ManagerConfig::for_uploads()
    })
    .unwrap()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn multipart_body_carries_text_fields_and_file_bytes() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("notes.txt");
    let content: Vec<u8> = (0..5000).map(|i| b'a' + (i % 26) as u8).collect();
    std::fs::write(&file_path, &content).unwrap();

    let recorder = Arc::new(Recorder::default());
    let task = UploadTask::builder(format!("{}/upload", server.uri()))
        .text("user", "42")
        .file(FileParameter::from_path("attachment", &file_path))
        .progress_interval(Duration::ZERO)
        .listener(recorder.clone())
        .build();

    let manager = manager(3);
    assert!(manager.submit(task.clone()));
    manager.wait_idle(&task).await;

    assert_eq!(task.state(), TaskState::Success);
    assert_eq!(recorder.successes.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.response_body.lock().unwrap().as_deref(), Some("{\"ok\":true}"));
    assert_eq!(*recorder.file_successes.lock().unwrap(), vec!["attachment".to_string()]);
    assert_eq!(task.files().next().unwrap().state(), TaskState::Success);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    assert!(contains(body, b"name=\"user\""));
    assert!(contains(body, b"42"));
    assert!(contains(body, b"filename=\"notes.txt\""));
    assert!(contains(body, b"text/plain"));
    assert!(contains(body, &content));

    let progress = recorder.progress.lock().unwrap();
    assert!(progress.windows(2).all(|w| w[0].1.current <= w[1].1.current));
    assert_eq!(progress.last().map(|p| p.1), Some(Progress::new(5000, 5000)));
}

#[tokio::test]
async fn local_file_resumes_from_breakpoint() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("data.bin");
    std::fs::write(&file_path, b"0123456789").unwrap();

    let recorder = Arc::new(Recorder::default());
    let task = UploadTask::builder(format!("{}/upload", server.uri()))
        .file(FileParameter::from_path("data", &file_path).with_breakpoint(4))
        .progress_interval(Duration::ZERO)
        .listener(recorder.clone())
        .build();

    let manager = manager(3);
    manager.submit(task.clone());
    manager.wait_idle(&task).await;

    assert_eq!(task.state(), TaskState::Success);
    let body = &server.received_requests().await.unwrap()[0].body;
    assert!(contains(body, b"456789"));
    assert!(!contains(body, b"0123456789"));

    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.first().map(|p| p.1), Some(Progress::new(10, 4)));
    assert_eq!(progress.last().map(|p| p.1), Some(Progress::new(10, 10)));
}

#[tokio::test]
async fn rejected_upload_reports_failure_with_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let task = UploadTask::builder(format!("{}/upload", server.uri()))
        .text("k", "v")
        .listener(recorder.clone())
        .build();

    let manager = manager(3);
    manager.submit(task.clone());
    manager.wait_idle(&task).await;

    assert_eq!(task.state(), TaskState::Failure);
    assert_eq!(*recorder.failures.lock().unwrap(), vec![(false, Some(500))]);
    assert_eq!(recorder.successes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_local_file_fails_the_task_and_the_file() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let task = UploadTask::builder(format!("{}/upload", server.uri()))
        .file(FileParameter::from_path("gone", dir.path().join("nope.bin")))
        .listener(recorder.clone())
        .build();

    let manager = manager(3);
    manager.submit(task.clone());
    manager.wait_idle(&task).await;

    assert_eq!(task.state(), TaskState::Failure);
    assert_eq!(task.files().next().unwrap().state(), TaskState::Failure);
    assert_eq!(
        *recorder.file_failures.lock().unwrap(),
        vec![("gone".to_string(), true)]
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn reader_and_uri_sources_are_streamed() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let uri_path = dir.path().join("picked.txt");
    std::fs::write(&uri_path, b"from-the-resolver").unwrap();
    let streamed = vec![b'z'; 3000];

    let recorder = Arc::new(Recorder::default());
    let task = UploadTask::builder(format!("{}/upload", server.uri()))
        .file(FileParameter::from_reader(
            "blob",
            "blob.bin",
            std::io::Cursor::new(streamed.clone()),
            3000,
        ))
        .file(FileParameter::from_uri(
            "picked",
            "picked.txt",
            format!("file://{}", uri_path.display()),
        ))
        .listener(recorder.clone())
        .build();

    let manager = manager(3);
    manager.submit(task.clone());
    manager.wait_idle(&task).await;

    assert_eq!(task.state(), TaskState::Success);
    let body = &server.received_requests().await.unwrap()[0].body;
    assert!(contains(body, &streamed));
    assert!(contains(body, b"from-the-resolver"));
    assert_eq!(recorder.file_successes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn cancelling_a_waiting_upload_settles_its_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, b"a").unwrap();
    std::fs::write(&b, b"b").unwrap();

    let recorder = Arc::new(Recorder::default());
    let first = UploadTask::builder(format!("{}/upload", server.uri()))
        .file(FileParameter::from_path("a", &a))
        .build();
    let second = UploadTask::builder(format!("{}/upload", server.uri()))
        .file(FileParameter::from_path("b", &b))
        .listener(recorder.clone())
        .build();

    let manager = manager(1);
    manager.submit(first.clone());
    manager.submit(second.clone());
    assert_eq!(second.state(), TaskState::Wait);

    assert!(manager.cancel(&second));
    assert_eq!(second.files().next().unwrap().state(), TaskState::Cancel);
    assert_eq!(*recorder.file_failures.lock().unwrap(), vec![("b".to_string(), false)]);
    assert_eq!(*recorder.failures.lock().unwrap(), vec![(true, None)]);

    manager.wait_idle(&first).await;
    assert_eq!(first.state(), TaskState::Success);
}

#[tokio::test]
async fn two_uploads_of_one_local_file_cannot_run_together() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared.txt");
    std::fs::write(&shared, b"shared").unwrap();

    let url = format!("{}/upload", server.uri());
    let first = UploadTask::builder(&url)
        .file(FileParameter::from_path("f", &shared))
        .build();
    let second = UploadTask::builder(&url)
        .file(FileParameter::from_path("f", &shared))
        .build();

    let manager = manager(3);
    assert!(manager.submit(first.clone()));
    assert!(!manager.submit(second.clone()));
    assert!(!manager.contains(second.id()));
    manager.wait_idle(&first).await;
}
