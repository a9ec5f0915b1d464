//! Service Manager: owns the listener task and the DNS-SD advertiser,
//! and drives the Stopped → Starting → Running → Stopping → Stopped
//! lifecycle (spec.md §4.6).

use std::net::SocketAddr;
use std::sync::Arc;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::handler::http::handle_ipp_via_http;
use crate::handler::{IppHandler, PrinterState};
use crate::store::JobStore;

const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// Lifecycle state of the running service (spec.md §4.6 state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is already running")]
    AlreadyRunning,
    #[error("service is not running")]
    NotRunning,
    #[error("DNS-SD advertisement failed: {0}")]
    Advertisement(String),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Owns everything needed to serve IPP over HTTP and advertise the
/// printer over DNS-SD. One `Service` corresponds to one printer
/// identity (spec.md §3 "Ownership").
pub struct Service {
    config: ServiceConfig,
    state: Arc<RwLock<PrinterState>>,
    store: Arc<JobStore>,
    lifecycle: RwLock<ServiceState>,
    listener_task: RwLock<Option<JoinHandle<()>>>,
    mdns: RwLock<Option<(mdns_sd::ServiceDaemon, String)>>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Result<Service, ServiceError> {
        let store = Arc::new(JobStore::new(&config.job_store_dir)?);
        let state = Arc::new(RwLock::new(PrinterState::from_config(&config)));
        Ok(Service {
            config,
            state,
            store,
            lifecycle: RwLock::new(ServiceState::Stopped),
            listener_task: RwLock::new(None),
            mdns: RwLock::new(None),
        })
    }

    pub async fn lifecycle_state(&self) -> ServiceState {
        *self.lifecycle.read().await
    }

    pub fn job_store(&self) -> Arc<JobStore> {
        self.store.clone()
    }

    /// Bind the HTTP listener, spawn the accept loop, and register the
    /// DNS-SD advertisement. Idempotent: calling `start` while already
    /// running returns [`ServiceError::AlreadyRunning`] without
    /// disturbing the existing listener.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ServiceError> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if *lifecycle != ServiceState::Stopped {
                return Err(ServiceError::AlreadyRunning);
            }
            *lifecycle = ServiceState::Starting;
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        let handler = Arc::new(IppHandler::new(self.state.clone(), self.store.clone()));
        let printer_name = self.config.printer_name.clone();
        let task = tokio::task::spawn(accept_loop(listener, handler, printer_name));
        *self.listener_task.write().await = Some(task);

        if let Err(err) = self.register_mdns(bound_addr.port()).await {
            log::error!("DNS-SD advertisement failed, tearing down listener: {}", err);
            if let Some(task) = self.listener_task.write().await.take() {
                task.abort();
            }
            *self.lifecycle.write().await = ServiceState::Stopped;
            return Err(ServiceError::Advertisement(err));
        }

        *self.lifecycle.write().await = ServiceState::Running;
        log::info!("virtual printer \"{}\" listening on {}", self.config.printer_name, bound_addr);
        Ok(bound_addr)
    }

    /// Stop accepting new connections, unregister DNS-SD, and wait up
    /// to `shutdown_grace` for the listener task to end (spec.md §6
    /// "shutdown_grace").
    pub async fn stop(&self) -> Result<(), ServiceError> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if *lifecycle != ServiceState::Running {
                return Err(ServiceError::NotRunning);
            }
            *lifecycle = ServiceState::Stopping;
        }

        self.unregister_mdns().await;

        if let Some(task) = self.listener_task.write().await.take() {
            task.abort();
            let _ = tokio::time::timeout(self.config.shutdown_grace, task).await;
        }

        *self.lifecycle.write().await = ServiceState::Stopped;
        log::info!("virtual printer \"{}\" stopped", self.config.printer_name);
        Ok(())
    }

    /// Build and register the `_ipp._tcp.` advertisement. Failure here
    /// is reported to the caller (spec.md §4.5, §7 "AdvertisementFailure
    /// at start"), not merely logged — unlike the presswerk advertiser
    /// this is grounded on, which treats DNS-SD as best-effort.
    async fn register_mdns(&self, port: u16) -> Result<(), String> {
        let daemon = mdns_sd::ServiceDaemon::new()
            .map_err(|err| format!("failed to create mDNS daemon: {}", err))?;

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "virtual-printer".to_string());
        let properties = [
            ("txtvers", "1"),
            ("rp", "ipp/print"),
            ("ty", self.config.printer_name.as_str()),
            ("pdl", "application/pdf,image/urf,application/octet-stream"),
            ("URF", "none"),
            ("adminurl", &format!("http://{}.local.:{}/", hostname, port)),
            ("priority", "30"),
            ("qtotal", "1"),
            ("kind", "document"),
            ("TLS", "1.2"),
        ];

        let service_info = mdns_sd::ServiceInfo::new(
            IPP_SERVICE_TYPE,
            &self.config.printer_name,
            &format!("{}.local.", hostname),
            "",
            port,
            &properties[..],
        )
        .map_err(|err| format!("failed to build mDNS service info: {}", err))?;

        let fullname = service_info.get_fullname().to_string();
        daemon
            .register(service_info)
            .map_err(|err| format!("failed to register DNS-SD service: {}", err))?;

        log::info!("advertised \"{}\" over DNS-SD as {}", self.config.printer_name, fullname);
        *self.mdns.write().await = Some((daemon, fullname));
        Ok(())
    }

    async fn unregister_mdns(&self) {
        if let Some((daemon, fullname)) = self.mdns.write().await.take() {
            if let Err(err) = daemon.unregister(&fullname) {
                log::warn!("failed to unregister DNS-SD service: {}", err);
            }
            if let Err(err) = daemon.shutdown() {
                log::warn!("failed to shut down mDNS daemon: {}", err);
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<IppHandler>, printer_name: String) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::error!("failed to accept connection: {}", err);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let handler = handler.clone();
        let printer_name = printer_name.clone();
        tokio::task::spawn(async move {
            let service = hyper::service::service_fn(move |req| {
                let handler = handler.clone();
                let printer_name = printer_name.clone();
                async move { handle_ipp_via_http(req, handler, peer, printer_name).await }
            });
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                log::error!("error serving connection from {}: {:?}", peer, err);
            }
        });
    }
}
