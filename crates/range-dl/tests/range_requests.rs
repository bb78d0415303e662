use range_dl::{response_reader, with_range, ResponseMeta};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn ranged_request_reports_partial_content() {
    let server = MockServer::start().await;
    let body = payload(10_000);
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("range", "bytes=4000-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(body[4000..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let request = with_range(client.get(format!("{}/file.bin", server.uri())), 4000);
    let response = request.send().await.unwrap();
    let meta = ResponseMeta::from_response(&response);

    assert_eq!(meta.status, 206);
    assert!(meta.accepts_ranges);
    assert_eq!(meta.content_length, Some(6000));

    let mut reader = response_reader(response, 2048);
    let mut received = Vec::new();
    while let Some(chunk) = reader.next_chunk().await.unwrap() {
        assert!(chunk.len() <= 2048);
        received.extend_from_slice(chunk);
    }
    assert_eq!(received, body[4000..]);
}

#[tokio::test]
async fn zero_offset_sends_no_range_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(10)))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let response = with_range(client.get(format!("{}/plain", server.uri())), 0)
        .send()
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("range").is_none());
    let meta = ResponseMeta::from_response(&response);
    assert!(!meta.accepts_ranges);
    assert_eq!(meta.status, 200);
}

#[tokio::test]
async fn local_file_reads_in_fixed_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.bin");
    std::fs::write(&path, payload(4097)).unwrap();

    let file = tokio::fs::File::open(&path).await.unwrap();
    let mut reader = range_dl::ChunkReader::new(file, range_dl::DEFAULT_CHUNK_SIZE);
    let mut received = Vec::new();
    while let Some(chunk) = reader.next_chunk().await.unwrap() {
        assert!(chunk.len() <= 2048);
        received.extend_from_slice(chunk);
    }
    assert_eq!(received, payload(4097));
    assert_eq!(reader.bytes_read(), 4097);
}
