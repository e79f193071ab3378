use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use matchit::{Params, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::Marketplace;

pub mod health;
pub mod installations;
pub mod listings;
pub mod submissions;

/// Result type of every handler.
pub type ApiResponse = Result<Response<Full<Bytes>>>;

/// Route identifier
#[derive(Debug, Clone, Copy)]
enum Route {
    Health,
    Listing,
    SuspendListing,
    Versions,
    LatestVersion,
    YankVersion,
    Submissions,
    Submission,
    SubmissionStatus,
    Scan,
    Assign,
    CompleteStage,
    Approve,
    Reject,
    RequestChanges,
    Resubmit,
    TenantInstallations,
    TenantStats,
    TenantUpdates,
    TenantUpdateAll,
    Installation,
    Activate,
    Deactivate,
    Update,
    Rollback,
    Uninstall,
    Purchase,
    Channel,
    ExpireTrials,
}

/// Build the router
fn build_router() -> std::result::Result<Router<Route>, matchit::InsertError> {
    let mut router = Router::new();
    router.insert("/health", Route::Health)?;

    router.insert("/api/v1/listings/{slug}", Route::Listing)?;
    router.insert("/api/v1/listings/{slug}/suspend", Route::SuspendListing)?;
    router.insert("/api/v1/listings/{slug}/versions", Route::Versions)?;
    router.insert("/api/v1/listings/{slug}/latest", Route::LatestVersion)?;
    router.insert("/api/v1/listings/{slug}/versions/{version}/yank", Route::YankVersion)?;

    router.insert("/api/v1/submissions", Route::Submissions)?;
    router.insert("/api/v1/submissions/{id}", Route::Submission)?;
    router.insert("/api/v1/submissions/{id}/status", Route::SubmissionStatus)?;
    router.insert("/api/v1/submissions/{id}/scan", Route::Scan)?;
    router.insert("/api/v1/submissions/{id}/assign", Route::Assign)?;
    router.insert("/api/v1/submissions/{id}/stages/{stage}", Route::CompleteStage)?;
    router.insert("/api/v1/submissions/{id}/approve", Route::Approve)?;
    router.insert("/api/v1/submissions/{id}/reject", Route::Reject)?;
    router.insert("/api/v1/submissions/{id}/changes", Route::RequestChanges)?;
    router.insert("/api/v1/submissions/{id}/resubmit", Route::Resubmit)?;

    router.insert("/api/v1/tenants/{tenant}/installations", Route::TenantInstallations)?;
    router.insert("/api/v1/tenants/{tenant}/stats", Route::TenantStats)?;
    router.insert("/api/v1/tenants/{tenant}/updates", Route::TenantUpdates)?;
    router.insert("/api/v1/tenants/{tenant}/update-all", Route::TenantUpdateAll)?;

    router.insert("/api/v1/installations/{id}", Route::Installation)?;
    router.insert("/api/v1/installations/{id}/activate", Route::Activate)?;
    router.insert("/api/v1/installations/{id}/deactivate", Route::Deactivate)?;
    router.insert("/api/v1/installations/{id}/update", Route::Update)?;
    router.insert("/api/v1/installations/{id}/rollback", Route::Rollback)?;
    router.insert("/api/v1/installations/{id}/uninstall", Route::Uninstall)?;
    router.insert("/api/v1/installations/{id}/purchase", Route::Purchase)?;
    router.insert("/api/v1/installations/{id}/channel", Route::Channel)?;

    router.insert("/api/v1/scheduler/trials", Route::ExpireTrials)?;
    Ok(router)
}

/// Handle incoming requests
async fn handle_request(
    req: Request<Incoming>,
    market: Arc<Marketplace>,
    router: Arc<Router<Route>>,
) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());

    debug!("{} {}", method, path);

    // Match route
    let matched = match router.at(&path) {
        Ok(m) => m,
        Err(_) => return Ok(plain_error(StatusCode::NOT_FOUND, "Not found")),
    };
    let route = *matched.value;
    let params = matched.params;

    let result = dispatch(&market, method, route, &params, &query, req).await;

    // Convert result to response
    match result {
        Ok(response) => Ok(response),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("{} failed: {}", path, e);
            }
            Ok(e.into_response())
        }
    }
}

async fn dispatch(
    market: &Marketplace,
    method: Method,
    route: Route,
    params: &Params<'_, '_>,
    query: &HashMap<String, String>,
    req: Request<Incoming>,
) -> ApiResponse {
    match (method, route) {
        (Method::GET, Route::Health) => health::health().await,

        (Method::GET, Route::Listing) => listings::get(market, param(params, "slug")?).await,
        (Method::PUT, Route::Listing) => {
            listings::put(market, param(params, "slug")?, read_json(req).await?).await
        }
        (Method::POST, Route::SuspendListing) => {
            listings::suspend(market, param(params, "slug")?, read_json(req).await?).await
        }
        (Method::GET, Route::Versions) => listings::history(market, param(params, "slug")?).await,
        (Method::POST, Route::Versions) => {
            listings::publish(market, param(params, "slug")?, read_json(req).await?).await
        }
        (Method::GET, Route::LatestVersion) => {
            listings::latest(market, param(params, "slug")?, query.get("channel")).await
        }
        (Method::POST, Route::YankVersion) => {
            listings::yank(
                market,
                param(params, "slug")?,
                param(params, "version")?,
                read_json(req).await?,
            )
            .await
        }

        (Method::POST, Route::Submissions) => submissions::submit(market, read_json(req).await?).await,
        (Method::GET, Route::Submission) => submissions::get(market, id(params)?).await,
        (Method::GET, Route::SubmissionStatus) => submissions::status(market, id(params)?).await,
        (Method::POST, Route::Scan) => {
            submissions::scan(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::Assign) => {
            submissions::assign(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::CompleteStage) => {
            submissions::complete_stage(
                market,
                id(params)?,
                param(params, "stage")?,
                read_json(req).await?,
            )
            .await
        }
        (Method::POST, Route::Approve) => {
            submissions::approve(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::Reject) => {
            submissions::reject(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::RequestChanges) => {
            submissions::request_changes(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::Resubmit) => {
            submissions::resubmit(market, id(params)?, read_json(req).await?).await
        }

        (Method::GET, Route::TenantInstallations) => {
            installations::list(market, param(params, "tenant")?).await
        }
        (Method::POST, Route::TenantInstallations) => {
            installations::install(market, param(params, "tenant")?, read_json(req).await?).await
        }
        (Method::GET, Route::TenantStats) => installations::stats(market, param(params, "tenant")?).await,
        (Method::GET, Route::TenantUpdates) => {
            installations::needing_update(market, param(params, "tenant")?).await
        }
        (Method::POST, Route::TenantUpdateAll) => {
            installations::update_all(market, param(params, "tenant")?).await
        }

        (Method::GET, Route::Installation) => installations::get(market, id(params)?).await,
        (Method::POST, Route::Activate) => installations::activate(market, id(params)?).await,
        (Method::POST, Route::Deactivate) => installations::deactivate(market, id(params)?).await,
        (Method::POST, Route::Update) => installations::update(market, id(params)?).await,
        (Method::POST, Route::Rollback) => {
            installations::rollback(market, id(params)?, read_json(req).await?).await
        }
        (Method::POST, Route::Uninstall) => installations::uninstall(market, id(params)?).await,
        (Method::POST, Route::Purchase) => installations::purchase(market, id(params)?).await,
        (Method::PUT, Route::Channel) => {
            installations::channel(market, id(params)?, read_json(req).await?).await
        }

        (Method::POST, Route::ExpireTrials) => installations::expire_trials(market).await,

        _ => Ok(plain_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")),
    }
}

/// Run the HTTP server
pub async fn run(config: Config, market: Arc<Marketplace>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let router = Arc::new(build_router()?);

    info!("Server listening on http://{}", addr);

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let market = Arc::clone(&market);
        let router = Arc::clone(&router);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let market = Arc::clone(&market);
                let router = Arc::clone(&router);
                handle_request(req, market, router)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection from {}: {}", remote_addr, e);
            }
        });
    }
}

/// Serialize `value` as a JSON response.
pub(crate) fn json<T: Serialize>(status: StatusCode, value: &T) -> ApiResponse {
    let body = serde_json::to_string(value)?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn plain_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message });
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Read and deserialize a JSON request body.
async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::validation("body", format!("could not be read: {e}")))?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| Error::validation("body", e.to_string()))
}

fn param<'p>(params: &'p Params<'_, '_>, name: &str) -> Result<&'p str> {
    params
        .get(name)
        .ok_or_else(|| Error::Internal(format!("route has no {name} parameter")))
}

fn id(params: &Params<'_, '_>) -> Result<Uuid> {
    let raw = param(params, "id")?;
    raw.parse()
        .map_err(|_| Error::validation("id", format!("'{raw}' is not a valid id")))
}

/// Parse query string into key-value pairs
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(q) = query {
        for part in q.split('&') {
            if let Some((key, value)) = part.split_once('=') {
                map.insert(urlencoding_decode(key), urlencoding_decode(value));
            }
        }
    }
    map
}

fn urlencoding_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut rest = s.as_bytes();

    while let Some((&b, tail)) = rest.split_first() {
        rest = tail;
        match b {
            b'%' if rest.len() >= 2 => {
                let decoded = std::str::from_utf8(&rest[..2])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        bytes.push(byte);
                        rest = &rest[2..];
                    }
                    None => bytes.push(b),
                }
            }
            b'+' => bytes.push(b' '),
            _ => bytes.push(b),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}
