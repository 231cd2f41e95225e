//! Inmate registry MCP gateway
//!
//! Serves the inmate registry tools over stdio (default) or streamable HTTP.
//! Logs go to stderr; in stdio mode stdout carries the MCP protocol.

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use inmate_mcp::{
    gateway_subscriber, GatewayArgs, GatewayConfig, HttpBackend, HttpConfig, InmateMcpServer,
    LogHub, ServerMode, SessionRegistry, SessionSupervisor, ToolDispatcher,
};
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_service::Service;
use tracing::{error, info, warn};
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "inmate-mcp", version, about = "Inmate registry MCP gateway")]
struct Cli {
    #[command(flatten)]
    gateway: GatewayArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Run the MCP server over Streamable HTTP (SSE)
    ServeHttp(ServeHttpArgs),
}

#[derive(Args)]
struct ServeHttpArgs {
    /// Bind address (e.g., 127.0.0.1:8765)
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Use stateless mode (POST only; no sessions, subscriptions or log notifications)
    #[arg(long)]
    stateless: bool,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

type HttpResponse = Response<BoxBody<Bytes, Infallible>>;

/// Rejects browser requests whose Origin is not allow-listed.
#[derive(Clone)]
struct OriginGuard<S> {
    inner: S,
    allowed: Arc<HashSet<String>>,
}

impl<S> OriginGuard<S> {
    fn new(inner: S, allowed: HashSet<String>) -> Self {
        Self {
            inner,
            allowed: Arc::new(allowed),
        }
    }

    fn forbidden() -> HttpResponse {
        let mut resp = Response::new(Full::new(Bytes::from_static(b"Forbidden")).boxed());
        *resp.status_mut() = StatusCode::FORBIDDEN;
        resp
    }
}

impl<B, S> Service<Request<B>> for OriginGuard<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<Request<B>, Response = HttpResponse, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(origin) = origin {
            if !self.allowed.contains(&origin) {
                warn!(origin = %origin, "Rejected request from disallowed origin");
                return Box::pin(async { Ok(Self::forbidden()) });
            }
        }
        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.gateway.into_config()?;

    // Clients receive this crate's own events as log notifications.
    let log_hub = Arc::new(LogHub::default());
    log_hub.set_level(config.client_log_level);

    // Initialize logging to stderr (stdout is used for MCP protocol)
    // The filter applies to stderr only; client forwarding follows the hub level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inmate_mcp=info"));
    gateway_subscriber(log_hub.clone(), filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move {
        let gateway = Gateway::new(&config, log_hub)?;
        match cli.command.unwrap_or(Command::Serve) {
            Command::Serve => run_server(gateway).await,
            Command::ServeHttp(args) => {
                let http = HttpConfig::new(
                    &args.bind,
                    args.sse_keep_alive_secs,
                    args.stateless,
                    &args.allow_origin,
                )?;
                run_server_http(gateway, http).await
            }
        }
    });
    if let Err(err) = &result {
        error!("Server error: {err:#}");
    }
    info!("Server stopped");
    result
}

/// Process-wide state shared by every connection.
struct Gateway {
    dispatcher: Arc<ToolDispatcher>,
    supervisor: SessionSupervisor,
}

impl Gateway {
    fn new(config: &GatewayConfig, log_hub: Arc<LogHub>) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(&config.backend_url, config.request_timeout)?;
        info!(
            backend = %backend.base_url(),
            dry_run = config.dry_run,
            "Backend configured"
        );
        let dispatcher = ToolDispatcher::new(Arc::new(backend)).with_dry_run(config.dry_run);
        let supervisor = SessionSupervisor::new(SessionRegistry::new(), log_hub)
            .with_refresh(config.subscription_refresh);
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            supervisor,
        })
    }

    fn server(&self, mode: ServerMode, shutdown: &CancellationToken) -> InmateMcpServer {
        InmateMcpServer::new(
            self.dispatcher.clone(),
            self.supervisor.clone(),
            mode,
            shutdown,
        )
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        } else {
            warn!("Shutdown signal handler failed; server will continue running");
        }
    });
}

async fn run_server(gateway: Gateway) -> anyhow::Result<()> {
    info!("MCP server listening on stdio");
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let server = gateway.server(ServerMode::Stdio, &shutdown);
    let mut service = Some(server.serve(stdio()).await?);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(mut running) = service.take() {
                    let _ = running.close().await?;
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if service.as_ref().is_some_and(|running| running.is_transport_closed()) {
                    if let Some(running) = service.take() {
                        let _ = running.waiting().await?;
                    }
                    break;
                }
            }
        }
    }
    info!("MCP server shutting down");
    shutdown.cancel();
    Ok(())
}

async fn run_server_http(gateway: Gateway, http: HttpConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mode = if http.stateful {
        ServerMode::Http
    } else {
        ServerMode::HttpStateless
    };
    let config = StreamableHttpServerConfig {
        sse_keep_alive: http.sse_keep_alive,
        sse_retry: None,
        stateful_mode: http.stateful,
        cancellation_token: shutdown.clone(),
    };

    let factory_shutdown = shutdown.clone();
    let service = StreamableHttpService::new(
        move || Ok(gateway.server(mode, &factory_shutdown)),
        Arc::new(LocalSessionManager::default()),
        config,
    );
    let service = OriginGuard::new(service, http.allowed_origins);

    let listener = tokio::net::TcpListener::bind(http.bind)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!(stateful = http.stateful, "MCP HTTP server listening on http://{}", http.bind);

    spawn_shutdown_listener(shutdown.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        error!(peer = %peer, "http connection error: {err}");
                    }
                });
            }
        }
    }
    Ok(())
}
