//! A minimal Pub/Sub REST endpoint for exercising the HTTP transport.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct MockBus {
    pub addr: SocketAddr,
    statuses: Arc<Mutex<VecDeque<u16>>>,
    publish_requests: Arc<AtomicUsize>,
}

impl MockBus {
    /// Start the bus on a random port. Requests answer 200 unless a status
    /// was queued with [`MockBus::push_status`].
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock bus");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let statuses = Arc::new(Mutex::new(VecDeque::new()));
        let publish_requests = Arc::new(AtomicUsize::new(0));
        let bus = MockBus {
            addr,
            statuses: statuses.clone(),
            publish_requests: publish_requests.clone(),
        };

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let io = TokioIo::new(stream);
                let statuses = statuses.clone();
                let publish_requests = publish_requests.clone();

                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let statuses = statuses.clone();
                        let publish_requests = publish_requests.clone();
                        async move {
                            Ok::<_, hyper::http::Error>(
                                respond(req, &statuses, &publish_requests).await,
                            )
                        }
                    });

                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        bus
    }

    /// Host and port, as `PUBSUB_EMULATOR_HOST` would carry them.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Answer the next request with `status` instead of 200.
    pub fn push_status(&self, status: u16) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn publish_requests(&self) -> usize {
        self.publish_requests.load(Ordering::SeqCst)
    }
}

async fn respond(
    req: Request<Incoming>,
    statuses: &Mutex<VecDeque<u16>>,
    publish_requests: &AtomicUsize,
) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let is_publish = path.ends_with(":publish");
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    if is_publish {
        publish_requests.fetch_add(1, Ordering::SeqCst);
    }

    let status = statuses.lock().unwrap().pop_front().unwrap_or(200);
    if status != 200 {
        return Response::builder()
            .status(status)
            .body(Full::new(Bytes::from_static(
                br#"{"error": {"message": "try again later"}}"#,
            )))
            .unwrap();
    }

    let reply = if is_publish {
        let count = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["messages"].as_array().map(|m| m.len()))
            .unwrap_or(0);
        let ids: Vec<String> = (1..=count).map(|i| i.to_string()).collect();
        serde_json::json!({ "messageIds": ids })
    } else {
        serde_json::json!({
            "name": path.trim_start_matches("/v1/"),
            "schemaSettings": {"schema": "projects/p/schemas/s", "encoding": "JSON"}
        })
    };

    Response::builder()
        .status(200)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(reply.to_string())))
        .unwrap()
}
