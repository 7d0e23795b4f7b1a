use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use patrol_chain_data::models::Subject;
use patrol_chain_data::{ArchiveClient, ArchiveConfig, ArchiveError, RpcArchiveClient};
use serde_json::{json, Value};
use warp::Filter;

/// Serves blocks 1..=10, leaving out block 7. Height 500 answers with a server error.
async fn spawn_archive() -> SocketAddr {
    let route = warp::post().and(warp::body::json()).map(|req: Value| {
        let id = req["id"].clone();
        let params = req["params"].clone();
        let reply = match req["method"].as_str() {
            Some("patrol_getFinalizedHeight") => json!({"jsonrpc": "2.0", "id": id, "result": 10}),
            Some("patrol_getBlocks") => {
                let from = params[0].as_u64().unwrap_or(0);
                let to = params[1].as_u64().unwrap_or(0);
                if from >= 500 {
                    return warp::reply::with_status(
                        warp::reply::json(&json!({})),
                        warp::http::StatusCode::SERVICE_UNAVAILABLE,
                    );
                }
                let blocks: Vec<Value> = (from..=to.min(10))
                    .filter(|h| *h != 7)
                    .map(|h| {
                        json!({
                            "height": h,
                            "records": [{
                                "block_height": h,
                                "extrinsic_index": 0,
                                "timestamp": 1_000 * h,
                                "kind": "transfer",
                                "source": "alice",
                                "destination": "bob",
                                "amount": h,
                            }]
                        })
                    })
                    .collect();
                json!({"jsonrpc": "2.0", "id": id, "result": blocks})
            }
            Some("patrol_getAccountState") => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "subject": params[0],
                    "block_height": 10,
                    "free_balance": 42,
                    "stakes": [{"delegate": "hot", "net_uid": 81, "amount": 7}]
                }
            }),
            _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "method not found"}}),
        };
        warp::reply::with_status(warp::reply::json(&reply), warp::http::StatusCode::OK)
    });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn client(addr: SocketAddr, chunk: u64) -> Result<RpcArchiveClient> {
    let mut config = ArchiveConfig::new(format!("http://{}", addr));
    config.request_timeout = Duration::from_secs(5);
    config.max_blocks_per_request = chunk;
    Ok(RpcArchiveClient::new(config)?)
}

#[tokio::test]
async fn test_fetch_complete_range_in_chunks() -> Result<()> {
    let addr = spawn_archive().await;
    let archive = client(addr, 2)?;
    let records = archive.fetch_range(1, 5).await?;
    let heights: Vec<u64> = records.iter().map(|r| r.block_height).collect();
    assert_eq!(heights, vec![1, 2, 3, 4, 5]);
    assert_eq!(archive.latest_finalized_block().await?, 10);
    Ok(())
}

#[tokio::test]
async fn test_missing_block_is_partial_range() -> Result<()> {
    let addr = spawn_archive().await;
    let archive = client(addr, 100)?;
    match archive.fetch_range(5, 9).await {
        Err(ArchiveError::PartialRange { records, missing, .. }) => {
            assert_eq!(missing, vec![7]);
            assert_eq!(records.len(), 4);
        }
        other => panic!("expected partial range, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_upstream_unavailable() -> Result<()> {
    let addr = spawn_archive().await;
    let archive = client(addr, 100)?;
    let err = archive.fetch_range(500, 501).await.unwrap_err();
    assert!(matches!(err, ArchiveError::UpstreamUnavailable(_)));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_node_is_upstream_unavailable() -> Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    let archive = client(addr, 100)?;
    assert!(matches!(
        archive.latest_finalized_block().await,
        Err(ArchiveError::UpstreamUnavailable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_account_state() -> Result<()> {
    let addr = spawn_archive().await;
    let archive = client(addr, 100)?;
    let snapshot = archive.fetch_account_state(&Subject::new("alice")).await?;
    assert_eq!(snapshot.free_balance, 42);
    assert_eq!(snapshot.total_stake(), 7);
    Ok(())
}
