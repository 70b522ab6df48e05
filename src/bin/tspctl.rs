use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tspfac::run_state::CmdStatus;
use tspfac::NodeMatrix;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const REQUEST_TIMEOUT_SECS: u64 = 5;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("tspctl")
        .version("0.1.0")
        .author("Touch Panel Bring-up Team")
        .about("🖐️  Touch panel factory test client")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("cmd")
                .about("✍️  Write a command line to the cmd attribute")
                .arg(
                    Arg::with_name("line")
                        .help("Command line, e.g. fw_update,1")
                        .required(true),
                ),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Read cmd_status"))
        .subcommand(
            SubCommand::with_name("result")
                .about("📄 Read cmd_result (releases the engine for the next command)"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🚀 Write a command, then read its status and result")
                .arg(
                    Arg::with_name("line")
                        .help("Command line, e.g. run_cm_abs_read")
                        .required(true),
                ),
        )
        .subcommand(SubCommand::with_name("matrix").about("🔢 Show the last captured node matrix"))
        .subcommand(
            SubCommand::with_name("fault")
                .about("⚠️  Simulated panel fault injection")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("inject")
                        .about("Replace the active faults")
                        .arg(Arg::with_name("never-ready").long("never-ready").help("Ready line never asserts"))
                        .arg(
                            Arg::with_name("wrong-ack")
                                .long("wrong-ack")
                                .value_name("CODE")
                                .help("Event code reported instead of the test mode ack")
                                .takes_value(true)
                                .validator(validate_byte),
                        )
                        .arg(
                            Arg::with_name("fail-read")
                                .long("fail-read")
                                .value_name("REG")
                                .help("Register whose reads fail")
                                .takes_value(true)
                                .validator(validate_byte),
                        )
                        .arg(
                            Arg::with_name("fail-opcode")
                                .long("fail-opcode")
                                .value_name("OPCODE")
                                .help("Universal opcode whose command write fails")
                                .takes_value(true)
                                .validator(validate_byte),
                        )
                        .arg(
                            Arg::with_name("reply-size")
                                .long("reply-size")
                                .value_name("BYTES")
                                .help("Result size reported for every node reply")
                                .takes_value(true)
                                .validator(validate_byte),
                        )
                        .arg(Arg::with_name("flash-fail").long("flash-fail").help("Refuse firmware flashing")),
                )
                .subcommand(SubCommand::with_name("clear").about("Clear all injected faults")),
        )
        .subcommand(
            SubCommand::with_name("enable")
                .about("🔌 Enable or disable the device")
                .arg(
                    Arg::with_name("state")
                        .help("Device state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("cmd", Some(sub)) => {
            let line = sub.value_of("line").unwrap_or_default();
            let response = send_request(host, port, serde_json::json!({"op": "cmd", "line": line})).await?;
            print_response("cmd", &response, format);
        }
        ("status", _) => {
            let response = send_request(host, port, serde_json::json!({"op": "status"})).await?;
            print_status(&response, format);
        }
        ("result", _) => {
            let response = send_request(host, port, serde_json::json!({"op": "result"})).await?;
            print_response("cmd_result", &response, format);
        }
        ("run", Some(sub)) => {
            handle_run(sub, host, port, format).await?;
        }
        ("matrix", _) => {
            let response = send_request(host, port, serde_json::json!({"op": "matrix"})).await?;
            print_matrix(&response, format);
        }
        ("fault", Some(sub)) => {
            handle_fault(sub, host, port, format).await?;
        }
        ("enable", Some(sub)) => {
            let enabled = sub.value_of("state") == Some("on");
            let response =
                send_request(host, port, serde_json::json!({"op": "enable", "enabled": enabled})).await?;
            print_response("enable", &response, format);
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

async fn handle_run(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let line = matches.value_of("line").unwrap_or_default();

    let stored = send_request(host, port, serde_json::json!({"op": "cmd", "line": line})).await?;
    if stored["ok"] != true {
        print_response("cmd", &stored, format);
        return Ok(());
    }

    let status = send_request(host, port, serde_json::json!({"op": "status"})).await?;
    let result = send_request(host, port, serde_json::json!({"op": "result"})).await?;

    match format {
        "json" => println!(
            "{}",
            serde_json::json!({"cmd": line, "status": status["value"], "result": result["value"]})
        ),
        _ => {
            let token = status["value"].as_str().unwrap_or_default();
            let text = result["value"].as_str().unwrap_or_default();
            println!("{} {} {}", paint_status(token), line.bright_white(), text.bright_cyan());
            if CmdStatus::from_token(token) == Some(CmdStatus::Running) {
                println!("{} Another command still holds the engine, read its result first", "💡".yellow());
            }
        }
    }
    Ok(())
}

async fn handle_fault(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let request = match matches.subcommand() {
        ("inject", Some(sub)) => {
            let byte = |name: &str| sub.value_of(name).and_then(parse_byte);
            serde_json::json!({
                "op": "inject",
                "faults": {
                    "never_ready": sub.is_present("never-ready"),
                    "wrong_ack": byte("wrong-ack"),
                    "fail_read": byte("fail-read"),
                    "fail_opcode": byte("fail-opcode"),
                    "reply_size": byte("reply-size"),
                    "flash_fail": sub.is_present("flash-fail"),
                }
            })
        }
        _ => serde_json::json!({"op": "clear_faults"}),
    };

    let response = send_request(host, port, request).await?;
    print_response("fault", &response, format);
    Ok(())
}

fn parse_byte(value: &str) -> Option<u8> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse::<u8>().ok(),
    }
}

fn validate_byte(value: String) -> Result<(), String> {
    match parse_byte(&value) {
        Some(_) => Ok(()),
        None => Err("Value must be a byte, decimal or 0x-prefixed hex".into()),
    }
}

fn paint_status(token: &str) -> ColoredString {
    match CmdStatus::from_token(token) {
        Some(CmdStatus::Ok) => token.green().bold(),
        Some(CmdStatus::Fail) => token.red().bold(),
        Some(CmdStatus::NotApplicable) => token.yellow().bold(),
        Some(CmdStatus::Running) => token.cyan(),
        _ => token.dimmed(),
    }
}

fn print_response(action: &str, response: &serde_json::Value, format: &str) {
    if format == "json" {
        println!("{}", response);
        return;
    }

    if response["ok"] == true {
        let value = match &response["value"] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("{} {} {}", "✅".green(), action.bright_white(), value.bright_cyan());
    } else {
        let message = response["message"].as_str().unwrap_or("unknown error");
        println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red());
    }
}

fn print_status(response: &serde_json::Value, format: &str) {
    if format == "json" {
        println!("{}", response);
        return;
    }
    let token = response["value"].as_str().unwrap_or_default();
    println!("{} {}", "cmd_status".bright_white(), paint_status(token));
}

fn print_matrix(response: &serde_json::Value, format: &str) {
    if format == "json" || response["ok"] != true {
        print_response("matrix", response, format);
        return;
    }

    let matrix: NodeMatrix = match serde_json::from_value(response["value"].clone()) {
        Ok(matrix) => matrix,
        Err(e) => {
            println!("{} Failed to parse matrix: {}", "❌".red(), e);
            return;
        }
    };

    println!("{}", format!("📋 {} matrix", matrix.family).bright_blue().bold());
    for (x, row) in matrix.rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:>6}", v)).collect();
        println!("{} {}", format!("x{:02}", x).dimmed(), cells.join(""));
    }
    if !matrix.keys.is_empty() {
        let cells: Vec<String> = matrix.keys.iter().map(|v| format!("{:>6}", v)).collect();
        println!("{} {}", "key".dimmed(), cells.join(""));
    }
    if let Some((min, max)) = matrix.min_max() {
        println!("{} {}  {} {}", "min".dimmed(), min.to_string().cyan(), "max".dimmed(), max.to_string().cyan());
    }
}

async fn send_request(host: &str, port: u16, request: serde_json::Value) -> CliResult<serde_json::Value> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin tspfac-sim".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let exchange = async {
        writer.write_all(request.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut line = String::new();
        let n = BufReader::new(reader).read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok::<String, std::io::Error>(line)
    };

    match tokio::time::timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS), exchange).await {
        Ok(line) => Ok(serde_json::from_str(line?.trim())?),
        Err(_) => {
            eprintln!("{} Request timed out after {} seconds", "⏰".yellow(), REQUEST_TIMEOUT_SECS);
            Err("Request timeout".into())
        }
    }
}
