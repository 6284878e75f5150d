//! Scriptable plugin binary for supervisor integration tests.
//!
//! Behavior is selected by the binary's file name (tests copy this binary
//! into a scratch plugin directory under scenario names): the first
//! `-`-separated segment picks the mode, e.g. `reject`, `error`,
//! `mutate`, `noready`, `unhealthy`. A name like `hash-bbbb` reports
//! `bbbb` as the commit hash. Anything else passes traffic through.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{Request, Response, Status};

use mcpd_plugins::proto::v1::plugin_service_server::{PluginService, PluginServiceServer};
use mcpd_plugins::proto::v1::{
    Capabilities, Flow, HttpRequest, HttpResponse, Metadata, PluginConfig,
};

#[derive(Parser)]
#[command(about = "mcpd test plugin")]
struct Args {
    /// Socket address to listen on.
    #[arg(long)]
    address: PathBuf,

    /// Socket family; only `unix` is supported.
    #[arg(long, default_value = "unix")]
    network: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Pass,
    Reject,
    RpcError,
    Mutate,
    NeverReady,
    Unhealthy,
}

/// Parse the behavior and commit hash out of the binary name.
fn parse_identity(stem: &str) -> (Mode, String) {
    let default_hash = "0000000000".to_string();
    let (head, rest) = match stem.split_once('-') {
        Some((head, rest)) => (head, rest),
        None => (stem, ""),
    };
    match head {
        "reject" => (Mode::Reject, default_hash),
        "error" => (Mode::RpcError, default_hash),
        "mutate" => (Mode::Mutate, default_hash),
        "noready" => (Mode::NeverReady, default_hash),
        "unhealthy" => (Mode::Unhealthy, default_hash),
        "hash" if !rest.is_empty() => (Mode::Pass, rest.to_string()),
        _ => (Mode::Pass, default_hash),
    }
}

struct TestPlugin {
    name: String,
    mode: Mode,
    commit_hash: String,
    shutdown: mpsc::Sender<()>,
}

#[tonic::async_trait]
impl PluginService for TestPlugin {
    async fn get_capabilities(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Capabilities>, Status> {
        Ok(Response::new(Capabilities {
            flows: vec![Flow::Request as i32, Flow::Response as i32],
        }))
    }

    async fn get_metadata(&self, _request: Request<()>) -> Result<Response<Metadata>, Status> {
        Ok(Response::new(Metadata {
            name: self.name.clone(),
            version: "0.1.0".to_string(),
            description: "scriptable test plugin".to_string(),
            commit_hash: self.commit_hash.clone(),
        }))
    }

    async fn configure(&self, _request: Request<PluginConfig>) -> Result<Response<()>, Status> {
        Ok(Response::new(()))
    }

    async fn check_health(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        if self.mode == Mode::Unhealthy {
            return Err(Status::unavailable("scripted unhealthy"));
        }
        Ok(Response::new(()))
    }

    async fn check_ready(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        if self.mode == Mode::NeverReady {
            return Err(Status::unavailable("scripted not ready"));
        }
        Ok(Response::new(()))
    }

    async fn handle_request(
        &self,
        request: Request<HttpRequest>,
    ) -> Result<Response<HttpResponse>, Status> {
        let req = request.into_inner();
        match self.mode {
            Mode::Reject => Ok(Response::new(HttpResponse {
                continue_: false,
                status_code: 401,
                body: b"Unauthorized".to_vec(),
                ..HttpResponse::default()
            })),
            Mode::RpcError => Err(Status::internal("scripted request failure")),
            Mode::Mutate => {
                let mut modified = req;
                modified.path = "/modified".to_string();
                modified
                    .headers
                    .insert("X-Modified".to_string(), "true".to_string());
                Ok(Response::new(HttpResponse {
                    continue_: true,
                    modified_request: Some(modified),
                    ..HttpResponse::default()
                }))
            }
            _ => Ok(Response::new(HttpResponse {
                continue_: true,
                ..HttpResponse::default()
            })),
        }
    }

    async fn handle_response(
        &self,
        request: Request<HttpResponse>,
    ) -> Result<Response<HttpResponse>, Status> {
        let resp = request.into_inner();
        Ok(Response::new(HttpResponse {
            continue_: true,
            ..resp
        }))
    }

    async fn stop(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        let _ = self.shutdown.try_send(());
        Ok(Response::new(()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.network != "unix" {
        return Err(format!("unsupported network: {}", args.network).into());
    }

    let name = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "test-plugin".to_string());
    let (mode, commit_hash) = parse_identity(&name);

    if args.address.exists() {
        std::fs::remove_file(&args.address)?;
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let plugin = TestPlugin {
        name,
        mode,
        commit_hash,
        shutdown: shutdown_tx,
    };

    let listener = UnixListener::bind(&args.address)?;
    let incoming = UnixListenerStream::new(listener);

    tonic::transport::Server::builder()
        .add_service(PluginServiceServer::new(plugin))
        .serve_with_incoming_shutdown(incoming, async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    Ok(())
}
