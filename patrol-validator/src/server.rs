use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use patrol_chain_data::ChainDataStore;
use patrol_protocol::{Dispatcher, PROTOCOL_VERSION};

/// `POST /patrol/v1/message` and `GET /patrol/v1/health`.
pub fn routes(
    dispatcher: Arc<Dispatcher>,
    store: Arc<ChainDataStore>,
    max_message_bytes: usize,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let message = warp::post()
        .and(warp::path!("patrol" / "v1" / "message"))
        .and(warp::body::content_length_limit(max_message_bytes as u64))
        .and(warp::body::bytes())
        .and(with(dispatcher.clone()))
        .and_then(handle_message);

    let peer_id = dispatcher.peer_id().to_string();
    let health = warp::get()
        .and(warp::path!("patrol" / "v1" / "health"))
        .and(with(store))
        .and(warp::any().map(move || peer_id.clone()))
        .and_then(handle_health);

    message.or(health)
}

fn with<T: Clone + Send + Sync>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

async fn handle_message(body: Bytes, dispatcher: Arc<Dispatcher>) -> Result<warp::reply::Response, Infallible> {
    match dispatcher.dispatch(&body).await {
        Ok(reply) => Ok(warp::reply::with_header(reply, "content-type", "application/json").into_response()),
        Err(err) => Ok(warp::reply::with_status(err.to_string(), StatusCode::BAD_REQUEST).into_response()),
    }
}

async fn handle_health(store: Arc<ChainDataStore>, peer_id: String) -> Result<warp::reply::Response, Infallible> {
    match store.highest_ingested_block().await {
        Ok(latest_block) => Ok(warp::reply::json(&json!({
            "status": "ok",
            "id": peer_id,
            "protocol_version": PROTOCOL_VERSION,
            "latest_block": latest_block,
        }))
        .into_response()),
        Err(err) => {
            log::warn!("health check cannot read the store: {}", err);
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({
                    "status": "degraded",
                    "id": peer_id,
                    "protocol_version": PROTOCOL_VERSION,
                    "error": err.to_string(),
                })),
                StatusCode::SERVICE_UNAVAILABLE,
            )
            .into_response())
        }
    }
}
