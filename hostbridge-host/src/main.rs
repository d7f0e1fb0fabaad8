// hostbridge desktop host: plays the host runtime for hostbridge-core (file picking, image decode, saving).

mod config;
mod host;
mod ppm;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hostbridge_core::TransferManager;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::host::{poll_until, DesktopHost};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input element key used for command-line uploads.
const UPLOAD_KEY: &str = "file-input";

const USAGE: &str = "usage: hostbridge-host upload <file> | decode <file.ppm> | download <name> <file>";

enum Command {
    Upload(PathBuf),
    Decode(PathBuf),
    Download { name: String, path: PathBuf },
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("hostbridge-host {}", VERSION);
        return Ok(());
    }
    let cmd = parse_args(&args)?;

    init_tracing();
    let cfg = config::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            r = run(cmd, cfg) => r,
            r = shutdown_signal() => {
                info!("interrupted");
                r
            }
        }
    })
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [cmd, path] if cmd == "upload" => Ok(Command::Upload(PathBuf::from(path))),
        [cmd, path] if cmd == "decode" => Ok(Command::Decode(PathBuf::from(path))),
        [cmd, name, path] if cmd == "download" => Ok(Command::Download {
            name: name.clone(),
            path: PathBuf::from(path),
        }),
        _ => bail!(USAGE),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hostbridge_core=info,hostbridge_host=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cmd: Command, cfg: config::HostConfig) -> Result<()> {
    let manager = Arc::new(Mutex::new(TransferManager::with_config(cfg.core.clone())));
    let mut host = DesktopHost::new(manager.clone(), &cfg);

    match cmd {
        Command::Upload(path) => {
            let instr = manager.lock().await.upload_start(UPLOAD_KEY);
            if let Some(instr) = instr {
                host.execute(instr).await?;
            }
            host.select_file(UPLOAD_KEY, path)?;
            let file = poll_until(&manager, &cfg, |m| m.take_upload(UPLOAD_KEY)).await?;
            println!("{}: {} bytes", file.file_name, file.data.len());
        }
        Command::Decode(path) => {
            let input = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let (id, instr) = manager.lock().await.decode_enqueue(input)?;
            host.execute(instr).await?;
            let img = poll_until(&manager, &cfg, |m| m.take_decoded(id))
                .await
                .with_context(|| format!("decoding {}", path.display()))?;
            println!("{}x{} ({} bytes RGBA)", img.width, img.height, img.pixels.len());
        }
        Command::Download { name, path } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let instr = manager.lock().await.download_trigger(&name, &data);
            host.execute(instr).await?;
            for saved in host.saved_files() {
                println!("saved {}", saved.display());
            }
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
