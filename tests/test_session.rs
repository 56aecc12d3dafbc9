use llm_api_benchmark::{
    load_config_from_file, run_benchmark, save_markdown_report, BenchmarkConfig, FailurePolicy,
    LatencyPolicy, LevelFailure, ProgressSink, SessionObserver, StatisticsRecord,
};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct CountingSink(AtomicI64);

impl ProgressSink for CountingSink {
    fn add_tokens(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorder {
    started: Option<(String, u64, f64)>,
    levels_started: Vec<usize>,
    completed: Vec<StatisticsRecord>,
    failed: Vec<LevelFailure>,
    sink: Arc<CountingSink>,
}

impl SessionObserver for Recorder {
    fn on_session_start(&mut self, model: &str, input_tokens: u64, _max_tokens: u32, latency_ms: f64) {
        self.started = Some((model.to_string(), input_tokens, latency_ms));
    }

    fn on_level_start(&mut self, concurrency: usize, _max_tokens: u32) -> Option<Arc<dyn ProgressSink>> {
        self.levels_started.push(concurrency);
        Some(self.sink.clone())
    }

    fn on_level_complete(&mut self, record: &StatisticsRecord) {
        self.completed.push(record.clone());
    }

    fn on_level_failed(&mut self, failure: &LevelFailure) {
        self.failed.push(failure.clone());
    }
}

async fn mock_models(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"object":"list","data":[{"id":"mock-model","object":"model"}]}"#)
        .create_async()
        .await
}

async fn mock_prompt_tokens(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": false})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Once"}}],"usage":{"prompt_tokens":30,"completion_tokens":4,"total_tokens":34}}"#)
        .create_async()
        .await
}

fn stream_body() -> String {
    let mut body = String::new();
    for text in ["Once upon a time", " in a quiet village", " lived a clockmaker."] {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": text}}]})
        ));
    }
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [], "usage": {"prompt_tokens": 30, "completion_tokens": 20, "total_tokens": 50}})
    ));
    body.push_str("data: [DONE]\n\n");
    body
}

fn config_for(server: &ServerGuard, levels: Vec<usize>) -> BenchmarkConfig {
    let mut config = BenchmarkConfig::new(format!("{}/v1", server.url()));
    config.api_key = "sk-test".to_string();
    config.max_tokens = 32;
    config.concurrency = levels;
    config.latency_rounds = 2;
    config.timeout_secs = 10;
    config
}

#[tokio::test]
async fn test_full_session_discovers_model_and_reports_each_level() {
    let mut server = mockito::Server::new_async().await;
    let _models = mock_models(&mut server).await;
    let prompt_tokens = mock_prompt_tokens(&mut server).await;
    let stream = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true, "model": "mock-model"})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(stream_body())
        .expect(3)
        .create_async()
        .await;

    let config = config_for(&server, vec![1, 2]);
    let mut recorder = Recorder::default();
    let report = run_benchmark(&config, &mut recorder).await.unwrap();

    assert_eq!(report.model_name, "mock-model");
    assert_eq!(report.input_tokens, 30);
    assert_eq!(report.max_tokens, 32);
    assert!(report.latency >= 0.0);
    assert!(report.failures.is_empty());

    let levels: Vec<usize> = report.results.iter().map(|r| r.concurrency).collect();
    assert_eq!(levels, vec![1, 2]);
    assert_eq!(report.results[1].sample_count, 2);
    for record in &report.results {
        assert!(record.generation_throughput > 0.0);
        assert!(record.min_ttft <= record.max_ttft);
    }

    let (model, input_tokens, _) = recorder.started.clone().unwrap();
    assert_eq!(model, "mock-model");
    assert_eq!(input_tokens, 30);
    assert_eq!(recorder.levels_started, vec![1, 2]);
    assert_eq!(recorder.completed, report.results);
    // three streams, each corrected to 20 authoritative tokens
    assert_eq!(recorder.sink.0.load(Ordering::SeqCst), 60);

    prompt_tokens.assert_async().await;
    stream.assert_async().await;
}

#[tokio::test]
async fn test_failed_level_aborts_by_default() {
    let mut server = mockito::Server::new_async().await;
    let _models = mock_models(&mut server).await;
    let _prompt_tokens = mock_prompt_tokens(&mut server).await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(500)
        .with_body(r#"{"error":{"message":"engine crashed"}}"#)
        .create_async()
        .await;

    let mut config = config_for(&server, vec![2, 4]);
    config.model = Some("pinned-model".to_string());
    let mut recorder = Recorder::default();

    let err = run_benchmark(&config, &mut recorder).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("engine crashed"), "{}", message);

    assert_eq!(recorder.levels_started, vec![2]);
    assert_eq!(recorder.failed.len(), 1);
    assert_eq!(recorder.failed[0].concurrency, 2);
    assert_eq!(recorder.failed[0].causes.len(), 2);
}

#[tokio::test]
async fn test_failed_levels_are_recorded_when_continuing() {
    let mut server = mockito::Server::new_async().await;
    let _models = mock_models(&mut server).await;
    let _prompt_tokens = mock_prompt_tokens(&mut server).await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(429)
        .with_body("rate limited")
        .create_async()
        .await;

    let mut config = config_for(&server, vec![1, 3]);
    config.failure_policy = FailurePolicy::Continue;
    let mut recorder = Recorder::default();

    let report = run_benchmark(&config, &mut recorder).await.unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].index, 0);
    assert_eq!(report.failures[1].index, 1);
    assert_eq!(report.failures[1].concurrency, 3);
    assert_eq!(report.failures[1].causes.len(), 3);
    assert!(report.failures[1]
        .causes
        .iter()
        .all(|c| c.contains("HTTP 429") && c.contains("rate limited")));
    assert_eq!(recorder.levels_started, vec![1, 3]);
}

#[tokio::test]
async fn test_scenario_file_and_markdown_report() {
    let mut server = mockito::Server::new_async().await;
    let _models = mock_models(&mut server).await;
    let _prompt_tokens = mock_prompt_tokens(&mut server).await;
    server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(stream_body())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let scenario_path = dir.path().join("scenario.yaml");
    let mut file = std::fs::File::create(&scenario_path).unwrap();
    write!(
        file,
        "base_url: {}/v1\nmodel: mock-model\nnum_words: 25\nmax_tokens: 16\nconcurrency: [2]\nlatency_rounds: 1\n",
        server.url()
    )
    .unwrap();

    let config = load_config_from_file(scenario_path.to_str().unwrap()).unwrap();
    let report = run_benchmark(&config, &mut ()).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].sample_count, 2);

    let output_path = dir.path().join("reports").join("mock-model.md");
    save_markdown_report(&report, output_path.to_str().unwrap()).unwrap();
    let markdown = std::fs::read_to_string(&output_path).unwrap();
    assert!(markdown.contains("- **Model**: mock-model"));
    assert!(markdown.contains("- **Input Tokens**: 30"));
    assert!(markdown.contains("| Concurrency |"));
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn respond(socket: &mut TcpStream, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Serves chat completions but closes every `GET /models` connection without answering
async fn spawn_server_without_models() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                if request.starts_with("GET ") {
                    drop(socket);
                } else if request.contains("\"stream\":true") {
                    respond(&mut socket, "text/event-stream", &stream_body()).await;
                } else {
                    respond(
                        &mut socket,
                        "application/json",
                        r#"{"choices":[{"message":{"role":"assistant","content":"Once"}}],"usage":{"prompt_tokens":30,"completion_tokens":4}}"#,
                    )
                    .await;
                }
            });
        }
    });

    format!("http://{}/v1", addr)
}

fn config_without_models(base_url: String, policy: LatencyPolicy) -> BenchmarkConfig {
    let mut config = BenchmarkConfig::new(base_url);
    config.model = Some("pinned-model".to_string());
    config.max_tokens = 32;
    config.concurrency = vec![1, 2];
    config.latency_rounds = 3;
    config.timeout_secs = 5;
    config.latency_policy = policy;
    config
}

#[tokio::test]
async fn test_latency_failure_aborts_before_any_level() {
    let base_url = spawn_server_without_models().await;
    let config = config_without_models(base_url, LatencyPolicy::Abort);
    let mut recorder = Recorder::default();

    let err = run_benchmark(&config, &mut recorder).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("latency unavailable"), "{}", message);
    assert!(message.contains("all 3 calibration probes failed"), "{}", message);

    assert!(recorder.started.is_none());
    assert!(recorder.levels_started.is_empty());
    assert!(recorder.completed.is_empty());
}

#[tokio::test]
async fn test_latency_failure_with_zero_baseline_keeps_running() {
    let base_url = spawn_server_without_models().await;
    let config = config_without_models(base_url, LatencyPolicy::AssumeZero);
    let mut recorder = Recorder::default();

    let report = run_benchmark(&config, &mut recorder).await.unwrap();
    assert_eq!(report.latency, 0.0);
    assert_eq!(report.model_name, "pinned-model");
    assert_eq!(report.input_tokens, 30);

    let levels: Vec<usize> = report.results.iter().map(|r| r.concurrency).collect();
    assert_eq!(levels, vec![1, 2]);
    assert_eq!(recorder.started.as_ref().map(|(_, _, latency)| *latency), Some(0.0));
    assert_eq!(recorder.levels_started, vec![1, 2]);
}
