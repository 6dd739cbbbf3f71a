//! Integration tests for the job orchestrator end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avatar_core::traits::storage::ArtifactStore;
use avatar_job::publisher::ResultPublisher;
use avatar_job::{JobRequest, JobResult};
use tokio_util::sync::CancellationToken;

use crate::helpers::{self, EngineOptions, Harness, OUTPUT_BYTES, StreamScript, UnavailableStore};

fn inline_request() -> JobRequest {
    JobRequest {
        image_base64: Some(helpers::b64(&helpers::portrait_png())),
        driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
        ..Default::default()
    }
}

fn is_idle_key(key: &str, user: &str, avatar: &str) -> bool {
    let Some(rest) = key.strip_prefix(&format!("{user}/{avatar}/idle_")) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix(".mp4") else {
        return false;
    };
    stamp.len() == 15
        && stamp.as_bytes()[8] == b'_'
        && stamp
            .chars()
            .enumerate()
            .all(|(i, c)| i == 8 || c.is_ascii_digit())
}

#[tokio::test]
async fn test_end_to_end_publishes_video() {
    let image = helpers::portrait_png();
    let video = helpers::driving_video();
    let harness = Harness::with_options(EngineOptions {
        media: HashMap::from([("driving.mp4".to_string(), video.clone())]),
        ..EngineOptions::default()
    })
    .await;
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&image)),
            driving_video_url: Some(format!("{}/media/driving.mp4", harness.engine.url())),
            user_id: Some("u1".into()),
            avatar_id: Some("a1".into()),
            ..Default::default()
        })
        .await;

    let JobResult::Persisted(persisted) = &result else {
        panic!("expected persisted result, got {result:?}");
    };
    assert!(is_idle_key(&persisted.key, "u1", "a1"), "bad key {}", persisted.key);
    assert!(persisted.video_url.starts_with("file://"));
    assert_eq!(persisted.metadata.fps, 24);
    assert_eq!(persisted.metadata.width, 1280);
    assert_eq!(persisted.metadata.height, 720);
    assert_eq!(persisted.metadata.template_id, None);

    let stored = harness.store.get_bytes(&persisted.key).await.unwrap();
    assert_eq!(stored.as_ref(), OUTPUT_BYTES);

    // What the engine saw
    let submissions = harness.engine.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.image_bytes, image);
    assert_eq!(submission.video_bytes, video);
    let graph = &submission.graph;
    assert_eq!(graph["27"]["inputs"]["seed"], persisted.metadata.seed);
    assert_eq!(graph["63"]["inputs"]["force_rate"], 24);
    assert_eq!(graph["30"]["inputs"]["frame_rate"], 24);
    assert_eq!(graph["150"]["inputs"]["value"], 1280);
    assert_eq!(graph["151"]["inputs"]["value"], 720);
    assert_eq!(graph["27"]["inputs"]["steps"], 4);
    let image_name = graph["57"]["inputs"]["image"].as_str().unwrap();
    let video_name = graph["63"]["inputs"]["video"].as_str().unwrap();
    assert!(image_name.starts_with("task_") && image_name.ends_with("_input_image.jpg"));
    assert!(video_name.starts_with("task_") && video_name.ends_with("_driving_video.mp4"));

    // Stream and submission share the client id.
    let clients = harness.engine.state.stream_clients.lock().unwrap().clone();
    assert_eq!(clients, vec![submission.client_id.clone()]);

    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_json_result_shape() {
    let harness = Harness::start().await;
    let orchestrator = harness.orchestrator().await.with_seed_source(|| 99);

    let result = orchestrator
        .process_value(
            serde_json::json!({"input": {
                "image_base64": helpers::b64(&helpers::portrait_png()),
                "driving_video_base64": helpers::b64(&helpers::driving_video()),
            }}),
            CancellationToken::new(),
        )
        .await;
    let value = result.to_value();
    let object = value.as_object().unwrap();

    let mut keys: Vec<_> = object.keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        ["fps", "height", "minio_key", "seed", "template_id", "video_url", "width"]
    );
    assert_eq!(value["seed"], 99);
    assert!(value["template_id"].is_null());
    assert!(value["minio_key"].as_str().unwrap().starts_with("unknown/"));
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_template_supplies_driving_video() {
    let harness = Harness::start().await;
    harness.add_template("breathe", b"template-breathe");
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            template_id: Some("breathe".into()),
            ..Default::default()
        })
        .await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(
        result.metadata().unwrap().template_id.as_deref(),
        Some("breathe")
    );
    assert_eq!(harness.engine.submissions()[0].video_bytes, b"template-breathe");
    // The template itself is never cleaned up.
    assert!(harness.config.generation.templates_dir.join("breathe.mp4").exists());
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_unknown_template_lists_available() {
    let harness = Harness::start().await;
    harness.add_template("nod", b"n");
    harness.add_template("breathe", b"b");
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            template_id: Some("wave".into()),
            ..Default::default()
        })
        .await;

    assert_eq!(
        result.error(),
        Some("Template 'wave' not found. Available: [\"breathe\", \"nod\"]")
    );
    assert!(harness.engine.submissions().is_empty());
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_store_key_with_bucket_prefix() {
    let harness = Harness::start().await;
    harness.put_object("drivers/idle.mp4", b"stored-driving-video");
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            driving_video_path: Some("avatars/drivers/idle.mp4".into()),
            ..Default::default()
        })
        .await;

    assert!(result.is_success(), "{result:?}");
    assert_eq!(
        harness.engine.submissions()[0].video_bytes,
        b"stored-driving-video"
    );
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_missing_image_performs_no_staging() {
    let harness = Harness::start().await;
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
            ..Default::default()
        })
        .await;

    assert_eq!(result.error(), Some("image_url or image_base64 is required"));
    assert!(!harness.config.compute.input_dir.exists());
    assert!(!harness.config.worker.work_dir.exists());
    assert!(harness.engine.submissions().is_empty());
}

#[tokio::test]
async fn test_upload_failure_falls_back_to_inline() {
    let harness = Harness::start().await;
    let orchestrator = harness
        .orchestrator_with_store(Arc::new(UnavailableStore))
        .await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
            ..Default::default()
        })
        .await;

    let JobResult::Inline(inline) = &result else {
        panic!("expected inline result, got {result:?}");
    };
    assert_eq!(inline.video_base64, helpers::b64(OUTPUT_BYTES));
    assert!(inline.storage_error.contains("endpoint unreachable"));
    let value = result.to_value();
    assert!(value.get("minio_error").is_some());
    assert!(value.get("minio_key").is_none());
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_upload_failure_over_ceiling_is_error() {
    let harness = Harness::start().await;
    let store: Arc<dyn ArtifactStore> = Arc::new(UnavailableStore);
    let publisher = ResultPublisher::new(&harness.config, store.clone()).with_inline_max_bytes(8);
    let orchestrator = harness
        .orchestrator_with_store(store)
        .await
        .with_publisher(publisher);

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
            ..Default::default()
        })
        .await;

    let JobResult::Failed(failed) = &result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(failed.error.contains("too large for base64 fallback"));
    assert!(failed.seed.is_some());
    assert!(
        failed
            .storage_error
            .as_deref()
            .is_some_and(|e| e.contains("endpoint unreachable"))
    );
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_engine_without_output_fails() {
    let harness = Harness::with_options(EngineOptions {
        produce_output: false,
        ..EngineOptions::default()
    })
    .await;
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
            ..Default::default()
        })
        .await;

    assert_eq!(result.error(), Some("No video output from compute engine"));
    // The event stream is closed even on failure.
    assert_eq!(harness.engine.wait_streams_closed(1).await, 1);
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_overall_deadline_bounds_the_wait() {
    let mut harness = Harness::with_options(EngineOptions {
        stream: StreamScript::ProgressForever,
        ..EngineOptions::default()
    })
    .await;
    harness.config.compute.job_deadline_seconds = 1;
    let orchestrator = harness.orchestrator().await.with_seed_source(|| 5);

    let started = Instant::now();
    let result = orchestrator.process(inline_request()).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let JobResult::Failed(failed) = &result else {
        panic!("expected failure, got {result:?}");
    };
    assert_eq!(failed.error, "Job prompt-1 did not finish within 1s");
    assert_eq!(failed.seed, Some(5));
    assert_eq!(harness.engine.wait_streams_closed(1).await, 1);
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_stream_closed_before_completion_fails() {
    let harness = Harness::with_options(EngineOptions {
        stream: StreamScript::CloseEarly,
        ..EngineOptions::default()
    })
    .await;
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator.process(inline_request()).await;

    assert_eq!(
        result.error(),
        Some("Event stream closed before job prompt-1 finished")
    );
    assert!(result.to_value()["seed"].is_u64());
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_cancel_during_wait_stops_job() {
    let harness = Harness::with_options(EngineOptions {
        stream: StreamScript::ProgressForever,
        ..EngineOptions::default()
    })
    .await;
    let orchestrator = harness.orchestrator().await;
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(
        orchestrator.process_with_cancel(inline_request(), cancel.clone()),
        async {
            harness.engine.wait_submitted().await;
            cancel.cancel();
        }
    );

    let error = result.error().unwrap();
    assert!(error.contains("cancelled"), "{error}");
    assert_eq!(harness.engine.wait_streams_closed(1).await, 1);
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_store_video_scenario_result_shape() {
    let harness = Harness::start().await;
    let video = helpers::driving_video();
    harness.put_object("clip.mp4", &video);
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process_value(
            serde_json::json!({"input": {
                "image_base64": helpers::b64(&helpers::png(10, 10)),
                "driving_video_path": "clip.mp4",
                "user_id": "u1",
                "avatar_id": "a1"
            }}),
            CancellationToken::new(),
        )
        .await;
    let value = result.to_value();

    let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        ["fps", "height", "minio_key", "seed", "template_id", "video_url", "width"]
    );
    let key = value["minio_key"].as_str().unwrap();
    assert!(is_idle_key(key, "u1", "a1"), "bad key {key}");
    assert!(value["video_url"].is_string());
    assert!(value["seed"].as_u64().is_some_and(|s| s <= u64::from(u32::MAX)));
    assert!(value["template_id"].is_null());
    assert_eq!(value["fps"], 24);
    assert_eq!(value["width"], 1280);
    assert_eq!(value["height"], 720);

    assert_eq!(harness.engine.submissions()[0].video_bytes, video);
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_unreachable_engine_fails_and_cleans_up() {
    let mut harness = Harness::start().await;
    harness.config.compute.port = 1;
    harness.config.compute.probe_attempts = 2;
    let orchestrator = harness.orchestrator().await;

    let result = orchestrator
        .process(JobRequest {
            image_base64: Some(helpers::b64(&helpers::portrait_png())),
            driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
            ..Default::default()
        })
        .await;

    let error = result.error().unwrap();
    assert!(error.contains("not reachable"), "{error}");
    harness.assert_no_job_files();
}

#[tokio::test]
async fn test_consecutive_jobs_get_distinct_staging_names() {
    let harness = Harness::start().await;
    let orchestrator = harness.orchestrator().await;
    let request = JobRequest {
        image_base64: Some(helpers::b64(&helpers::portrait_png())),
        driving_video_base64: Some(helpers::b64(&helpers::driving_video())),
        ..Default::default()
    };

    assert!(orchestrator.process(request.clone()).await.is_success());
    assert!(orchestrator.process(request).await.is_success());

    let submissions = harness.engine.submissions();
    assert_eq!(submissions.len(), 2);
    assert_ne!(
        submissions[0].graph["57"]["inputs"]["image"],
        submissions[1].graph["57"]["inputs"]["image"]
    );
    harness.assert_no_job_files();
}
