use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chatstream_core::{
    config::Config,
    controller::{NoopObserver, StreamController, StreamObserver},
    coordinator::ChatCoordinator,
    model::ChatRequest,
    session::{StreamSession, StreamStatus},
    transport::{ChatTransport, HttpTransport, ScriptedTransport},
};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(author, version, about = "chatstream SSE chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EndpointArgs {
    /// Config file (TOML or JSON)
    #[arg(long, conflicts_with = "url")]
    config: Option<PathBuf>,
    /// SSE endpoint URL, used when no config file is given
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply (Ctrl-C stops it)
    Chat {
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Interactive chat; /regen regenerates, /quit exits
    Repl {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// Decode a captured SSE body in fixed-size chunks
    Replay {
        file: PathBuf,
        #[arg(long, default_value_t = 7)]
        chunk_size: usize,
    },
}

/// Prints only the part of each snapshot not yet on screen.
#[derive(Default)]
struct StdoutObserver {
    printed: usize,
}

impl StreamObserver for StdoutObserver {
    fn on_text(&mut self, snapshot: &str) {
        print!("{}", &snapshot[self.printed..]);
        io::stdout().flush().ok();
        self.printed = snapshot.len();
    }

    fn on_finish(&mut self, session: &StreamSession) {
        match session.status() {
            StreamStatus::Errored => {
                let reason = session
                    .failure()
                    .map(|f| f.to_string())
                    .unwrap_or_default();
                println!(" [error: {reason}]");
            }
            StreamStatus::Cancelled => println!(" [stopped]"),
            _ => println!(),
        }
        self.printed = 0;
    }
}

fn load_config(args: EndpointArgs) -> anyhow::Result<Config> {
    let mut cfg = match (args.config, args.url) {
        (Some(path), _) => Config::from_path(path)?,
        (None, Some(url)) => Config::for_url(url),
        (None, None) => anyhow::bail!("either --config or --url is required"),
    };
    if let Some(model) = args.model {
        cfg.endpoint.model = model;
    }
    Ok(cfg)
}

fn coordinator(args: EndpointArgs) -> anyhow::Result<Arc<ChatCoordinator>> {
    let cfg = load_config(args)?;
    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::from_config(&cfg)?);
    tracing::debug!(url = %cfg.endpoint.url, model = %cfg.endpoint.model, "endpoint configured");
    Ok(Arc::new(ChatCoordinator::from_config(&cfg, transport)))
}

/// Ctrl-C stops the in-flight reply; with nothing streaming it exits.
fn spawn_stop_on_ctrl_c(coord: Arc<ChatCoordinator>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !coord.request_stop() && !coord.is_streaming() {
                std::process::exit(130);
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat { endpoint, message } => {
            let coord = coordinator(endpoint)?;
            spawn_stop_on_ctrl_c(coord.clone());
            coord.send(&message, &mut StdoutObserver::default()).await?;
        }
        Commands::Repl { endpoint } => {
            let coord = coordinator(endpoint)?;
            spawn_stop_on_ctrl_c(coord.clone());
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut out = StdoutObserver::default();
            loop {
                print!("> ");
                io::stdout().flush().ok();
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let result = match line.trim() {
                    "/quit" => break,
                    "/regen" => coord.request_regenerate(&mut out).await,
                    "" => continue,
                    _ => coord.send(&line, &mut out).await,
                };
                if let Err(e) = result {
                    eprintln!("[rejected: {e}]");
                }
            }
        }
        Commands::Replay { file, chunk_size } => {
            let body = std::fs::read(&file)?;
            replay(body, chunk_size, &mut io::stdout().lock()).await?;
        }
    }

    Ok(())
}

/// Decode a captured body and print the summary once, without live deltas.
async fn replay<W: Write>(body: Vec<u8>, chunk_size: usize, out: &mut W) -> anyhow::Result<()> {
    let transport = ScriptedTransport::from_body(body, chunk_size);
    let request = ChatRequest {
        model: "replay".into(),
        messages: Vec::new(),
        temperature: None,
    };
    let chunks = transport.open(&request).await?;
    let session = StreamController::new("replay", "replay")
        .run(chunks, &Default::default(), &mut NoopObserver)
        .await;

    let text = session.text();
    writeln!(out, "[{text}]")?;
    writeln!(out, "status: {}", session.status().as_str())?;
    writeln!(out, "length: {}", text.chars().count())?;
    let points: Vec<String> = text.chars().map(|c| format!("U+{:04X}", c as u32)).collect();
    writeln!(out, "code points: {}", points.join(" "))?;
    if session.malformed_count() > 0 {
        writeln!(out, "malformed frames: {}", session.malformed_count())?;
    }
    Ok(())
}
