use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tracing::{error, info, warn};
use tspfac::bus::ReadyPolicy;
use tspfac::config::FactoryConfig;
use tspfac::firmware::{FileFirmwareProvider, FirmwareProvider};
use tspfac::sim::{MemoryFirmware, SimBus, SimFaults, SimFlasher, SimIrq, SimPanel, SimReadyLine};
use tspfac::FactoryEngine;

type SimEngine = FactoryEngine<SimBus, SimReadyLine, SimIrq>;

// Panel the simulator models: 20 drive lines, 12 sense lines, 2 touch keys
const SIM_X_NODES: u8 = 20;
const SIM_Y_NODES: u8 = 12;
const SIM_KEY_NODES: u8 = 2;
const SIM_MAX_POLLS: u32 = 100_000;
const SIM_FIRMWARE_SIZE: usize = 32 * 1024;

/// One request per line, JSON encoded.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Cmd { line: String },
    Status,
    Result,
    Matrix,
    Inject { faults: SimFaults },
    ClearFaults,
    Enable { enabled: bool },
}

#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Response {
    fn value(value: serde_json::Value) -> Self {
        Self { ok: true, value: Some(value), message: None }
    }

    fn error(message: String) -> Self {
        Self { ok: false, value: None, message: Some(message) }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("🖐️  Touch Panel Factory Simulator");
    println!("=================================");

    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => FactoryConfig::load(Path::new(path))?,
        None => FactoryConfig::default(),
    };

    let panel = SimPanel::with_nodes(SIM_X_NODES, SIM_Y_NODES, SIM_KEY_NODES)?;
    let engine = build_engine(&panel, &config, config_path.is_some())?;
    let engine = Arc::new(Mutex::new(engine));

    println!("   Panel: {}x{} nodes, {} keys", SIM_X_NODES, SIM_Y_NODES, SIM_KEY_NODES);
    println!("📡 Ready for commands on TCP port {}", config.sim_port);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.sim_port)).await?;
    info!("🌐 TCP server listening on port {}", config.sim_port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {}", addr);
                let client_engine = Arc::clone(&engine);
                let client_panel = panel.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_engine, client_panel).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

fn build_engine(
    panel: &SimPanel,
    config: &FactoryConfig,
    firmware_from_files: bool,
) -> Result<SimEngine, Box<dyn std::error::Error>> {
    // A faulted panel must not wedge the server.
    let policy = match config.ready_policy {
        ReadyPolicy::Unbounded => ReadyPolicy::MaxPolls(SIM_MAX_POLLS),
        bounded => bounded,
    };
    let device = panel.bring_up(config)?.with_policy(policy);

    let firmware: Box<dyn FirmwareProvider + Send> = if firmware_from_files {
        Box::new(FileFirmwareProvider::from_config(config))
    } else {
        Box::new(MemoryFirmware {
            builtin: Some(vec![0xFF; SIM_FIRMWARE_SIZE]),
            ums: None,
        })
    };

    Ok(FactoryEngine::new(device, firmware, Box::new(SimFlasher::new(panel))))
}

async fn handle_client(
    stream: TcpStream,
    engine: Arc<Mutex<SimEngine>>,
    panel: SimPanel,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break, // Client disconnected
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<Request>(trimmed) {
                    Ok(request) => {
                        info!("📨 Received request: {:?}", request);
                        dispatch(request, Arc::clone(&engine), panel.clone()).await?
                    }
                    Err(e) => {
                        error!("Failed to parse request: {}", e);
                        Response::error(format!("Invalid request format: {}", e))
                    }
                };

                let response_json = serde_json::to_string(&response)?;
                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                info!("📤 Sent response: {}", response_json);
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Run one request on the blocking pool. The engine busy-polls the ready
/// line and must not stall the async workers.
async fn dispatch(
    request: Request,
    engine: Arc<Mutex<SimEngine>>,
    panel: SimPanel,
) -> Result<Response, task::JoinError> {
    task::spawn_blocking(move || {
        let mut engine_guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
        handle_request(request, &mut engine_guard, &panel)
    })
    .await
}

fn handle_request(request: Request, engine: &mut SimEngine, panel: &SimPanel) -> Response {
    match request {
        Request::Cmd { line } => match engine.store_cmd(&line) {
            Ok(written) => Response::value(serde_json::json!(written)),
            Err(e) => Response::error(e.to_string()),
        },
        Request::Status => {
            let status = engine.show_status();
            Response::value(serde_json::json!(status.trim_end()))
        }
        Request::Result => Response::value(serde_json::json!(engine.show_result())),
        Request::Matrix => match engine.run_state().last_matrix() {
            Some(matrix) => match serde_json::to_value(&matrix) {
                Ok(value) => Response::value(value),
                Err(e) => Response::error(e.to_string()),
            },
            None => Response::error("no matrix captured yet".to_string()),
        },
        Request::Inject { faults } => {
            warn!("⚠️  Injecting faults: {:?}", faults);
            panel.set_faults(faults);
            Response::value(serde_json::json!("injected"))
        }
        Request::ClearFaults => {
            panel.clear_faults();
            Response::value(serde_json::json!("cleared"))
        }
        Request::Enable { enabled } => {
            engine.device_mut().set_enabled(enabled);
            Response::value(serde_json::json!(enabled))
        }
    }
}
