use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use patrol_validation::{DenylistProvider, ErrorKind, HttpDenylist};
use warp::Filter;

async fn spawn_denylist_server() -> SocketAddr {
    let list = warp::get()
        .and(warp::path("denylist"))
        .map(|| warp::reply::json(&vec!["5Bad", "5Worse", "5Bad"]));
    let broken = warp::get()
        .and(warp::path("broken"))
        .map(|| warp::reply::with_status("oops", warp::http::StatusCode::INTERNAL_SERVER_ERROR));
    let garbage = warp::get().and(warp::path("garbage")).map(|| "not json");
    let (addr, server) = warp::serve(list.or(broken).or(garbage)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

#[tokio::test]
async fn test_http_denylist_loads_json_array() -> Result<()> {
    let addr = spawn_denylist_server().await;
    let denylist = HttpDenylist::new(format!("http://{}/denylist", addr), Duration::from_secs(5))?;
    let loaded = denylist.load().await?;
    assert_eq!(loaded.into_iter().collect::<Vec<_>>(), vec!["5Bad", "5Worse"]);
    Ok(())
}

#[tokio::test]
async fn test_http_denylist_failures_are_dependency_errors() -> Result<()> {
    let addr = spawn_denylist_server().await;
    for path in ["broken", "garbage"] {
        let denylist = HttpDenylist::new(format!("http://{}/{}", addr, path), Duration::from_secs(5))?;
        let err = denylist.load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CheckDependencyUnavailable, "{}", path);
    }
    Ok(())
}
