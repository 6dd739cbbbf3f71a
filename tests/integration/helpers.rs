//! Shared test helpers for integration tests.
//!
//! [`StubEngine`] is an in-process stand-in for the compute engine's HTTP and
//! WebSocket API; [`Harness`] wires it to a local artifact store and a
//! temporary engine input directory.

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::watch;

use avatar_compute::{EngineBridge, WorkflowTemplate};
use avatar_core::config::AppConfig;
use avatar_core::error::AppError;
use avatar_core::result::AppResult;
use avatar_core::traits::storage::ArtifactStore;
use avatar_job::JobOrchestrator;
use avatar_storage::providers::LocalArtifactStore;

/// Bytes the stub engine writes as its "rendered" video.
pub const OUTPUT_BYTES: &[u8] = b"\x00\x00\x00\x20ftypisomRENDERED-IDLE-LOOP";

/// A job submission as seen by the stub engine.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Submitted graph.
    pub graph: Value,
    /// Client id sent with the submission.
    pub client_id: String,
    /// Bytes of the staged image at submission time.
    pub image_bytes: Vec<u8>,
    /// Bytes of the staged video at submission time.
    pub video_bytes: Vec<u8>,
}

/// What the event stream does after a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamScript {
    /// Replay a typical run ending in the completion event.
    #[default]
    Complete,
    /// Send a progress event every 100ms and never finish.
    ProgressForever,
    /// Send one progress event, then close the socket.
    CloseEarly,
}

/// Stub engine behavior knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Whether the history reports a media output.
    pub produce_output: bool,
    /// Event stream behavior.
    pub stream: StreamScript,
    /// Extra files served under `/media/{name}`.
    pub media: HashMap<String, Vec<u8>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            produce_output: true,
            stream: StreamScript::Complete,
            media: HashMap::new(),
        }
    }
}

/// Shared state of the stub engine.
#[derive(Debug)]
pub struct EngineState {
    input_dir: PathBuf,
    output_dir: PathBuf,
    options: EngineOptions,
    submitted: watch::Sender<Option<String>>,
    /// Every submission received.
    pub submissions: Mutex<Vec<Submission>>,
    /// Client ids of every stream connection.
    pub stream_clients: Mutex<Vec<String>>,
    /// Number of streams the client closed.
    pub streams_closed: Mutex<usize>,
}

/// In-process compute engine stub.
#[derive(Debug)]
pub struct StubEngine {
    /// Listen address.
    pub addr: SocketAddr,
    /// Shared state.
    pub state: Arc<EngineState>,
}

impl StubEngine {
    /// Start the stub on an ephemeral port.
    pub async fn start(input_dir: &Path, output_dir: &Path, options: EngineOptions) -> Self {
        std::fs::create_dir_all(output_dir).unwrap();
        let (submitted, _) = watch::channel(None);
        let state = Arc::new(EngineState {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            options,
            submitted,
            submissions: Mutex::new(Vec::new()),
            stream_clients: Mutex::new(Vec::new()),
            streams_closed: Mutex::new(0),
        });

        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", get(history))
            .route("/ws", get(stream))
            .route("/media/{name}", get(media))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self { addr, state }
    }

    /// Base URL of the stub.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Snapshot of received submissions.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().unwrap().clone()
    }

    /// Wait up to one second for `count` streams to have been closed by the client.
    pub async fn wait_streams_closed(&self, count: usize) -> usize {
        let mut closed = 0;
        for _ in 0..50 {
            closed = *self.state.streams_closed.lock().unwrap();
            if closed >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        closed
    }

    /// Wait up to five seconds for the first submission.
    pub async fn wait_submitted(&self) {
        for _ in 0..250 {
            if !self.state.submissions.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("engine never received a submission");
    }
}

async fn submit(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> Response {
    let graph = body["prompt"].clone();
    let client_id = body["client_id"].as_str().unwrap_or_default().to_string();
    let image = graph["57"]["inputs"]["image"].as_str().unwrap_or_default();
    let video = graph["63"]["inputs"]["video"].as_str().unwrap_or_default();

    let submission = Submission {
        image_bytes: std::fs::read(state.input_dir.join(image)).unwrap_or_default(),
        video_bytes: std::fs::read(state.input_dir.join(video)).unwrap_or_default(),
        graph,
        client_id,
    };

    let prompt_id = {
        let mut submissions = state.submissions.lock().unwrap();
        submissions.push(submission);
        format!("prompt-{}", submissions.len())
    };

    if state.options.produce_output {
        let path = state.output_dir.join(format!("{prompt_id}.mp4"));
        std::fs::write(path, OUTPUT_BYTES).unwrap();
    }

    state.submitted.send_replace(Some(prompt_id.clone()));
    Json(json!({"prompt_id": prompt_id, "number": 0, "node_errors": {}})).into_response()
}

async fn history(
    State(state): State<Arc<EngineState>>,
    UrlPath(prompt_id): UrlPath<String>,
) -> Json<Value> {
    let outputs = if state.options.produce_output {
        let path = state.output_dir.join(format!("{prompt_id}.mp4"));
        json!({
            "28": {"images": []},
            "30": {"gifs": [{
                "filename": format!("{prompt_id}.mp4"),
                "subfolder": "",
                "type": "output",
                "format": "video/h264-mp4",
                "fullpath": path.to_string_lossy(),
            }]}
        })
    } else {
        json!({})
    };
    let mut body = serde_json::Map::new();
    body.insert(
        prompt_id,
        json!({"outputs": outputs, "status": {"completed": true}}),
    );
    Json(Value::Object(body))
}

async fn media(
    State(state): State<Arc<EngineState>>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    match state.options.media.get(&name) {
        Some(bytes) => Bytes::from(bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<EngineState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let client_id = query.get("clientId").cloned().unwrap_or_default();
    state.stream_clients.lock().unwrap().push(client_id);
    // Subscribe before the handshake completes so no submission is missed.
    let submitted = state.submitted.subscribe();
    ws.on_upgrade(move |socket| drive_stream(socket, state, submitted))
}

/// Wait for the next submission, then play the configured script.
async fn drive_stream(
    mut socket: WebSocket,
    state: Arc<EngineState>,
    mut submitted: watch::Receiver<Option<String>>,
) {
    if submitted.changed().await.is_err() {
        return;
    }
    let prompt_id = submitted.borrow().clone().unwrap_or_default();
    let progress = json!({
        "type": "progress",
        "data": {"value": 1, "max": 4, "prompt_id": prompt_id}
    });

    match state.options.stream {
        StreamScript::Complete => {}
        StreamScript::ProgressForever => {
            loop {
                tokio::select! {
                    message = socket.recv() => match message {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if socket.send(Message::Text(progress.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            *state.streams_closed.lock().unwrap() += 1;
            return;
        }
        StreamScript::CloseEarly => {
            let _ = socket.send(Message::Text(progress.to_string().into())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    let events = [
        json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}}}),
        json!({"type": "execution_start", "data": {"prompt_id": prompt_id}}),
        json!({"type": "executing", "data": {"node": "27", "prompt_id": prompt_id}}),
        json!({"type": "progress", "data": {"value": 2, "max": 4, "prompt_id": prompt_id}}),
        json!({"type": "executing", "data": {"node": null, "prompt_id": "someone-else"}}),
        json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}}),
    ];

    let _ = socket.send(Message::Binary(vec![1, 2, 3, 4].into())).await;
    for event in events {
        if socket.send(Message::Text(event.to_string().into())).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
    *state.streams_closed.lock().unwrap() += 1;
}

/// Artifact store whose writes always fail.
#[derive(Debug)]
pub struct UnavailableStore;

#[async_trait]
impl ArtifactStore for UnavailableStore {
    fn provider_type(&self) -> &str {
        "unavailable"
    }

    fn bucket(&self) -> &str {
        "avatars"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(false)
    }

    async fn get_bytes(&self, key: &str) -> AppResult<Bytes> {
        Err(AppError::not_found(key.to_string()))
    }

    async fn get_to_file(&self, key: &str, _dest: &Path) -> AppResult<u64> {
        Err(AppError::not_found(key.to_string()))
    }

    async fn put_file(&self, _key: &str, _src: &Path, _content_type: &str) -> AppResult<()> {
        Err(AppError::storage("endpoint unreachable"))
    }

    async fn ensure_bucket(&self) -> AppResult<()> {
        Err(AppError::storage("endpoint unreachable"))
    }

    async fn presigned_url(&self, _key: &str, _expires_in: Duration) -> AppResult<String> {
        Err(AppError::storage("endpoint unreachable"))
    }
}

/// Test environment: stub engine, local store, and temp directories.
pub struct Harness {
    /// Temp root; removed on drop.
    pub tmp: TempDir,
    /// Configuration pointing at the stub and temp directories.
    pub config: AppConfig,
    /// Stub engine.
    pub engine: StubEngine,
    /// Local artifact store.
    pub store: Arc<dyn ArtifactStore>,
}

impl Harness {
    /// Start a harness with default engine options.
    pub async fn start() -> Self {
        Self::with_options(EngineOptions::default()).await
    }

    /// Start a harness with the given engine options.
    pub async fn with_options(options: EngineOptions) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let input_dir = tmp.path().join("engine_input");
        let output_dir = tmp.path().join("engine_output");
        let engine = StubEngine::start(&input_dir, &output_dir, options).await;

        let mut config = AppConfig::default();
        config.compute.host = "127.0.0.1".to_string();
        config.compute.port = engine.addr.port();
        config.compute.input_dir = input_dir;
        config.compute.probe_attempts = 3;
        config.compute.probe_interval_seconds = 1;
        config.compute.connect_attempts = 3;
        config.compute.connect_interval_seconds = 1;
        config.compute.read_timeout_seconds = 10;
        config.compute.job_deadline_seconds = 30;
        config.worker.work_dir = tmp.path().join("work");
        config.generation.templates_dir = tmp.path().join("templates");
        config.generation.default_driving_video_path = String::new();
        config.generation.workflow_path =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("workflow/workflow_replace.json");
        config.storage.bucket = "avatars".to_string();
        config.storage.local_root = tmp.path().join("store");
        std::fs::create_dir_all(&config.generation.templates_dir).unwrap();

        let store: Arc<dyn ArtifactStore> = Arc::new(
            LocalArtifactStore::new(&config.storage.local_root, &config.storage.bucket)
                .await
                .unwrap(),
        );

        Self {
            tmp,
            config,
            engine,
            store,
        }
    }

    /// Orchestrator wired to the stub engine and the local store.
    pub async fn orchestrator(&self) -> JobOrchestrator {
        self.orchestrator_with_store(self.store.clone()).await
    }

    /// Orchestrator wired to the stub engine and the given store.
    pub async fn orchestrator_with_store(&self, store: Arc<dyn ArtifactStore>) -> JobOrchestrator {
        let template = WorkflowTemplate::load(&self.config.generation.workflow_path)
            .await
            .unwrap();
        let bridge = EngineBridge::new(&self.config.compute).unwrap();
        JobOrchestrator::new(&self.config, store, Arc::new(bridge), template).unwrap()
    }

    /// Write a driving-video template.
    pub fn add_template(&self, id: &str, bytes: &[u8]) {
        std::fs::write(
            self.config.generation.templates_dir.join(format!("{id}.mp4")),
            bytes,
        )
        .unwrap();
    }

    /// Write an object straight into the local store.
    pub fn put_object(&self, key: &str, bytes: &[u8]) {
        let path = self.config.storage.local_root.join("avatars").join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    /// Assert that no job left files in the engine input or work directories.
    pub fn assert_no_job_files(&self) {
        for dir in [&self.config.compute.input_dir, &self.config.worker.work_dir] {
            if dir.exists() {
                let leftovers: Vec<_> = std::fs::read_dir(dir)
                    .unwrap()
                    .map(|e| e.unwrap().file_name())
                    .collect();
                assert!(leftovers.is_empty(), "leftover job files in {dir:?}: {leftovers:?}");
            }
        }
    }
}

/// A small PNG portrait.
pub fn portrait_png() -> Vec<u8> {
    png(16, 16)
}

/// A gradient PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Stand-in driving video bytes.
pub fn driving_video() -> Vec<u8> {
    let mut bytes = b"\x00\x00\x00\x18ftypmp42".to_vec();
    bytes.extend((0..2048u32).map(|i| (i % 251) as u8));
    bytes
}

/// Base64 with the standard alphabet.
pub fn b64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
