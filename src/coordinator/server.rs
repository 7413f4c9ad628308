//! Coordinator server

use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::grpc::CoordGrpcService;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::node_client::NodeClient;
use crate::coordinator::raft_node::start_replica;
use crate::coordinator::synthesis::{RankWeighting, Synthesizer, WeightingFunction};
use crate::coordinator::transport::GrpcTransport;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

pub struct Coordinator {
    config: CoordinatorConfig,
    weighting: Arc<dyn WeightingFunction>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            weighting: Arc::new(RankWeighting),
        }
    }

    /// Replace the rank weighting used for global synthesis.
    pub fn with_weighting(mut self, weighting: Arc<dyn WeightingFunction>) -> Self {
        self.weighting = weighting;
        self
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        tracing::info!("Starting coordinator replica {}", self.config.replica_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Raft gRPC: {}", self.config.raft_addr);
        tracing::info!("  Peers: {:?}", self.config.peers);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let transport = GrpcTransport::new(
            self.config.replica_id,
            &self.config.peers,
            self.config.tick_interval() * self.config.heartbeat_tick as u32,
        )?;
        let replica = start_replica(&self.config, transport, shutdown_rx.clone())?;

        let http_state = CoordState {
            replica: replica.handle.clone(),
            aggregation: replica.aggregation.clone(),
            synthesizer: Arc::new(Synthesizer::new(self.weighting)),
            nodes: NodeClient::new(self.config.node_timeout())?,
        };
        let http_router = create_router(http_state, self.config.max_body_bytes);

        let grpc_service = CoordGrpcService::new(replica.handle.clone());
        let grpc_server = tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve_with_shutdown(self.config.raft_addr, shutdown_requested(shutdown_rx.clone()));

        let http_listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let http_server = axum::serve(http_listener, http_router)
            .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()))
            .into_future();

        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = signal_tx.send(true);
        });

        tracing::info!("✓ Coordinator replica {} ready", self.config.replica_id);

        let mut driver = replica.driver;
        let result = tokio::select! {
            res = http_server => res.map_err(Error::from),
            res = grpc_server => res.map_err(Error::from),
            res = &mut driver => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Internal(format!("consensus driver panicked: {}", e))),
            },
        };

        let _ = shutdown_tx.send(true);
        if !driver.is_finished() {
            let _ = tokio::time::timeout(Duration::from_secs(5), driver).await;
        }

        match &result {
            Ok(()) => tracing::info!("Coordinator replica {} stopped", self.config.replica_id),
            Err(e) => {
                tracing::error!("Coordinator replica {} failed: {}", self.config.replica_id, e)
            }
        }
        result
    }
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
