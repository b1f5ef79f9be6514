use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use callbridge::tools::{builtin_registry, ToolCallServer};
use callbridge::{routes, AppState, ServerConfig};

/// Callbridge - realtime voice bridge for inbound telephone calls
#[derive(Parser, Debug)]
#[command(name = "callbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the HTTP listen port
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Crypto provider must be installed before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    let tools = Arc::new(builtin_registry());
    let state = AppState::new(config, tools.clone());

    // Tool-call RPC server, on its own listener and cancellation token.
    let rpc_cancel = CancellationToken::new();
    if state.config.is_tools_rpc_enabled() {
        let rpc_addr = format!("{}:{}", state.config.host, state.config.tools_rpc_port);
        let listener = TcpListener::bind(&rpc_addr)
            .await
            .map_err(|e| anyhow!("Failed to bind tool RPC listener on {rpc_addr}: {e}"))?;
        info!("Tool RPC server listening on {rpc_addr}");
        let server = ToolCallServer::new(tools);
        let cancel = rpc_cancel.clone();
        tokio::spawn(server.serve(listener, cancel));
    } else {
        info!("Tool RPC server disabled");
    }

    let cors_layer = build_cors_layer(state.config.cors_allowed_origins.as_deref());

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::router(state.clone())
        .layer(cors_layer)
        .layer(security_headers)
        .layer(TraceLayer::new_for_http());

    let address = state.config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    if state.config.is_tls_enabled() {
        let tls = state
            .config
            .tls
            .clone()
            .expect("TLS config must be present when TLS is enabled");
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        info!("Server listening on https://{socket_addr} (TLS enabled)");

        let handle = axum_server::Handle::new();
        tokio::spawn(drain_on_signal(
            state.clone(),
            rpc_cancel.clone(),
            Some(handle.clone()),
        ));

        axum_server::bind_rustls(socket_addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        info!("Server listening on http://{socket_addr}");

        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(drain_on_signal(state.clone(), rpc_cancel.clone(), None))
        .await?;
    }

    info!("Server stopped");
    Ok(())
}

fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => {
            // No allow_origin = same-origin only
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(false)
        }
    }
}

/// Waits for SIGTERM/SIGINT, then drains: refuse new calls, stop the tool
/// RPC listener, and let the HTTP server finish in-flight connections.
async fn drain_on_signal(
    state: Arc<AppState>,
    rpc_cancel: CancellationToken,
    tls_handle: Option<axum_server::Handle>,
) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, draining"),
        _ = terminate => info!("SIGTERM received, draining"),
    }

    state.begin_drain();
    rpc_cancel.cancel();

    if let Some(handle) = tls_handle {
        handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
    }
}
