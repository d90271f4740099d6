#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use formrelay::config::{Config, QueueConfig, SinkConfig, WorkerConfig};
use formrelay::intake::Intake;
use formrelay::models::Submission;
use formrelay::queue::MemoryQueue;
use formrelay::sink::{Sink, SinkError};
use formrelay::status::{MemoryStatusStore, STATUS_TTL, StatusStore};
use formrelay::worker::{self, RetryPolicy, Worker};

/// How a [`RecordingSink`] answers append calls.
#[derive(Debug, Clone, Copy)]
pub enum SinkBehavior {
    Accept,
    Reject,
    /// Reject the first `n` calls, accept afterwards.
    RejectFirst(u32),
    /// Never answer.
    Hang,
}

/// Sink that records every call and answers according to its behavior.
pub struct RecordingSink {
    behavior: SinkBehavior,
    calls: AtomicU32,
    delivered: Mutex<Vec<Submission>>,
}

impl RecordingSink {
    pub fn new(behavior: SinkBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Submission> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn append(&self, submission: &Submission) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let accept = match self.behavior {
            SinkBehavior::Accept => true,
            SinkBehavior::Reject => false,
            SinkBehavior::RejectFirst(n) => call > n,
            SinkBehavior::Hang => std::future::pending::<bool>().await,
        };

        if accept {
            self.delivered.lock().unwrap().push(submission.clone());
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: 503,
                body: "sheet temporarily unavailable".to_string(),
            })
        }
    }
}

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        delay: Duration::from_millis(10),
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        max_body_size: 64 * 1024,
        trusted_proxies: vec![],
        allowed_networks: vec![],
        log_level: "warn".to_string(),
        audit_log: None,
        queue: QueueConfig {
            topic: "form_submissions".to_string(),
            lease: Duration::from_secs(600),
        },
        worker: WorkerConfig {
            count: 1,
            retry: test_policy(),
            attempt_timeout: Duration::from_secs(5),
        },
        status_ttl: STATUS_TTL,
        status_purge_interval: Duration::from_secs(300),
        sink: SinkConfig::File {
            path: PathBuf::from("unused.log"),
        },
    }
}

/// A running test server backed by in-memory queue and status store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub queue: Arc<MemoryQueue>,
    pub statuses: Arc<MemoryStatusStore>,
    pub sink: Arc<RecordingSink>,
    pub policy: RetryPolicy,
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Submit a JSON body, return (body, status).
    pub async fn submit_json(&self, data: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/submit"))
            .json(data)
            .send()
            .await
            .expect("submit json failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Submit a raw body with the given content type, return (body, status).
    pub async fn submit_raw(&self, content_type: &str, body: &'static str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url("/submit"))
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .expect("submit raw failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn get_status(&self, id: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(&format!("/status/{id}")))
            .send()
            .await
            .expect("status request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Poll the status endpoint until a record appears.
    pub async fn wait_for_status(&self, id: &str) -> Value {
        for _ in 0..200 {
            let (body, status) = self.get_status(id).await;
            if status == StatusCode::OK {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("no status recorded for submission {id}");
    }

    pub fn start_workers(&mut self, count: usize) {
        let worker = Arc::new(
            Worker::new(
                self.queue.clone(),
                self.sink.clone(),
                self.statuses.clone(),
            )
            .with_policy(self.policy)
            .with_attempt_timeout(Duration::from_secs(5)),
        );
        self.workers
            .extend(worker::spawn(worker, self.stop.subscribe(), count));
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

/// Spawn a test app whose worker is not started yet.
pub async fn spawn_idle_app(config: Config, sink: SinkBehavior) -> TestApp {
    let queue = Arc::new(MemoryQueue::new(config.queue.topic.clone()));
    let statuses = Arc::new(MemoryStatusStore::new());
    let policy = config.worker.retry;

    let app = formrelay::build_app(
        config,
        Intake::new(queue.clone()),
        statuses.clone() as Arc<dyn StatusStore>,
    );

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    // Spawn server in background
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let (stop, _) = watch::channel(false);

    TestApp {
        addr,
        client: Client::new(),
        queue,
        statuses,
        sink: RecordingSink::new(sink),
        policy,
        stop,
        workers: Vec::new(),
    }
}

/// Spawn a test app with one running worker.
pub async fn spawn_app(sink: SinkBehavior) -> TestApp {
    let mut app = spawn_idle_app(test_config(), sink).await;
    app.start_workers(1);
    app
}
