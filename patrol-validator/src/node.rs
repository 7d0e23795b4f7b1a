use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use patrol_chain_data::{ArchiveClient, ChainDataStore, Ingestor, RpcArchiveClient};
use patrol_protocol::communication::HttpCommunication;
use patrol_protocol::{Communication, Dispatcher, PeerBook, ProtocolCodec};
use patrol_utils::keypair::Keypair;
use patrol_validation::{
    DenylistProvider, HttpDenylist, OrchestratorProps, StaticDenylist, ValidationEngine, ValidatorOrchestrator,
    ValidatorPeer,
};

use crate::server;
use crate::settings::{DenylistSource, ValidatorConfig};

/// Loads the keypair at `path`, creating it on first start. Without a path the
/// node runs under a throwaway identity.
pub fn load_or_create_keypair(path: Option<&Path>) -> Result<Keypair> {
    let Some(path) = path else {
        let keypair = Keypair::generate();
        log::warn!(
            "no KEYPAIR_PATH given, running as ephemeral validator {}",
            keypair.as_public_address()
        );
        return Ok(keypair);
    };
    if path.exists() {
        return Keypair::from_json_file(path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let keypair = Keypair::generate();
    keypair.write_json_file(path)?;
    log::info!("created keypair {} at {}", keypair.as_public_address(), path.display());
    Ok(keypair)
}

/// One validator: store, archive ingestion, engine, peer endpoint and the
/// orchestrator driving them.
pub struct ValidatorNode {
    pub id: String,
    pub store: Arc<ChainDataStore>,
    pub peer: Arc<ValidatorPeer>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<ValidatorOrchestrator>,
    listen_addr: SocketAddr,
    max_message_bytes: usize,
}

impl ValidatorNode {
    pub async fn from_config(config: ValidatorConfig, keypair: Keypair) -> Result<Self> {
        if let Some(dir) = &config.db_dir {
            std::fs::create_dir_all(dir).with_context(|| format!("cannot create DB_DIR {}", dir.display()))?;
        }
        let store = Arc::new(
            ChainDataStore::connect(&config.db_url)
                .await
                .with_context(|| format!("cannot open database {}", config.db_url))?,
        );
        let archive: Arc<dyn ArchiveClient> =
            Arc::new(RpcArchiveClient::new(config.archive.clone()).context("cannot build archive client")?);
        Self::with_archive(config, keypair, store, archive)
    }

    /// Wires a node around an already opened store and archive.
    pub fn with_archive(
        config: ValidatorConfig,
        keypair: Keypair,
        store: Arc<ChainDataStore>,
        archive: Arc<dyn ArchiveClient>,
    ) -> Result<Self> {
        let id = keypair.as_public_address();
        let codec = ProtocolCodec::new(config.codec.clone());

        let denylist: Arc<dyn DenylistProvider> = match &config.denylist {
            DenylistSource::Static(entries) => Arc::new(StaticDenylist::new(entries.iter().cloned())),
            DenylistSource::Http(url) => Arc::new(HttpDenylist::new(url.clone(), config.peer_timeout)?),
        };
        let ingestor = Arc::new(Ingestor::new(archive, store.clone()));
        let engine = Arc::new(ValidationEngine::new(
            store.clone(),
            ingestor.clone(),
            denylist,
            config.engine.clone(),
        ));

        let peer_book = Arc::new(PeerBook::with_peers(config.peers.iter().map(|(peer, _)| peer.clone())));
        let communication: Option<Arc<dyn Communication>> = if config.peers.is_empty() {
            None
        } else {
            Some(Arc::new(HttpCommunication::new(
                codec.clone(),
                config.peers.iter().cloned(),
                config.peer_timeout,
            )?))
        };

        let peer = Arc::new(ValidatorPeer::new(id.clone(), store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(codec, peer.clone(), peer_book.clone()));
        let orchestrator = ValidatorOrchestrator::create(OrchestratorProps {
            keypair: Arc::new(keypair),
            engine,
            store: store.clone(),
            ingestor,
            communication,
            peer_book,
            config: config.orchestrator.clone(),
        });

        Ok(Self {
            id,
            store,
            peer,
            dispatcher,
            orchestrator,
            listen_addr: config.listen_addr,
            max_message_bytes: config.codec.max_message_bytes,
        })
    }

    /// Serves the peer endpoint and runs scoring rounds until `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let routes = server::routes(self.dispatcher.clone(), self.store.clone(), self.max_message_bytes);
        let stop = shutdown.clone();
        let (addr, serving) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(self.listen_addr, async move { stop.cancelled().await })
            .with_context(|| format!("cannot listen on {}", self.listen_addr))?;
        log::info!("validator {} listening on {}", self.id, addr);

        let server = tokio::spawn(serving);
        self.orchestrator.clone().run(shutdown).await;
        server.await.context("peer endpoint stopped unexpectedly")?;
        self.store.close().await;
        log::info!("validator {} stopped", self.id);
        Ok(())
    }
}
