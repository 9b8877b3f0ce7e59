//! flashpack - pack, inspect and transfer bitmap containers
//!
//! Usage:
//!   flashpack pack <input> <output>   - Pack a file into a container
//!   flashpack inspect <archive>       - List the chunks of a container
//!   flashpack unpack <archive> <out>  - Decode a container to raw bytes
//!   flashpack simulate <archive>      - Run a transfer against simulated flash

use bytes::Bytes;
use clap::{Parser, Subcommand};
use flashpack::{
    config::Config,
    container::{inspect, ChunkKind, Encoding, Packer, SliceStream, Unpacker},
    link::Fragmenter,
    storage::MemoryFlash,
    transfer::{Device, TransmitState},
    Error, Result,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "flashpack")]
#[command(version)]
#[command(about = "Bitmap containers for block flash over a low-bandwidth link")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/flashpack/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a file into a container
    Pack {
        /// File to pack
        input: PathBuf,

        /// Container to write
        output: PathBuf,

        /// Store every data chunk uncompressed
        #[arg(long)]
        no_compress: bool,
    },

    /// List the chunks of a container
    Inspect {
        /// Container to read
        archive: PathBuf,
    },

    /// Decode a container to raw pixel bytes
    Unpack {
        /// Container to read
        archive: PathBuf,

        /// Raw output file
        output: PathBuf,
    },

    /// Transfer a container to a simulated device
    Simulate {
        /// Container to send
        archive: PathBuf,

        /// Delay between storage completions
        #[arg(long, default_value_t = 2)]
        store_delay_ms: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging, RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;

    match command {
        Commands::Pack {
            input,
            output,
            no_compress,
        } => cmd_pack(&config, &input, &output, no_compress),

        Commands::Inspect { archive } => cmd_inspect(&archive),

        Commands::Unpack { archive, output } => cmd_unpack(&archive, &output),

        Commands::Simulate {
            archive,
            store_delay_ms,
        } => cmd_simulate(&config, &archive, store_delay_ms),
    }
}

fn cmd_pack(config: &Config, input: &Path, output: &Path, no_compress: bool) -> Result<()> {
    let mut codec = config.codec.clone();
    if no_compress {
        codec.compression_enabled = false;
    }

    let (container, summary) = Packer::new(&codec).pack_file(input)?;
    std::fs::write(output, &container)?;

    let saved = summary.saved_per_mille();
    println!("Packed {} -> {:?}", summary.name, output);
    println!("  Original size:  {} bytes", summary.original_size);
    println!("  Container size: {} bytes", summary.container_size);
    println!(
        "  Data chunks:    {} ({} compressed)",
        summary.data_chunks, summary.compressed_chunks
    );
    println!("  Saved:          {}.{}%", saved / 10, saved % 10);

    Ok(())
}

fn cmd_inspect(archive: &Path) -> Result<()> {
    let data = std::fs::read(archive)?;
    let entries = inspect(&mut SliceStream::new(&data), data.len() as u64)?;

    println!("{:?}: {} bytes, {} chunks", archive, data.len(), entries.len());
    println!(
        "{:>8}  {:<10} {:<10} {:>8}  {:<8}  {:>8}",
        "OFFSET", "KIND", "ENCODING", "SIZE", "CHECKSUM", "EXTRA"
    );

    for entry in entries {
        let header = entry.header;
        let kind = match header.kind() {
            ChunkKind::Metadata => "metadata".to_string(),
            ChunkKind::Data => "data".to_string(),
            ChunkKind::Unknown(id) => format!("id {}", id),
        };
        let encoding = match Encoding::from_options(header.options) {
            Some(Encoding::Stored) => "stored".to_string(),
            Some(Encoding::Compressed) => "lz4".to_string(),
            None => format!("opt {}", header.options),
        };

        println!(
            "{:>8}  {:<10} {:<10} {:>8}  {:08X}  {:>8}",
            entry.offset, kind, encoding, header.size, header.checksum, header.extra
        );
    }

    Ok(())
}

fn cmd_unpack(archive: &Path, output: &Path) -> Result<()> {
    let data = std::fs::read(archive)?;

    let mut pixels = Vec::new();
    let summary = Unpacker::new().unpack(
        &mut SliceStream::new(&data),
        data.len() as u64,
        &mut pixels,
    )?;

    if pixels.len() as u64 != summary.declared_length as u64 {
        warn!(
            "decoded {} bytes but metadata declares {}",
            pixels.len(),
            summary.declared_length
        );
    }

    std::fs::write(output, &pixels)?;
    println!(
        "Unpacked {} ({} bytes, {} chunks) -> {:?}",
        summary.name.as_deref().unwrap_or("<unnamed>"),
        pixels.len(),
        summary.chunks,
        output
    );

    Ok(())
}

/// Writes the sender makes to the device
#[derive(Debug)]
enum LinkWrite {
    Status(TransmitState),
    Fragment(Bytes),
}

fn cmd_simulate(config: &Config, archive: &Path, store_delay_ms: u64) -> Result<()> {
    let container = std::fs::read(archive)?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
    let (outcome, device) = runtime.block_on(simulate(config.clone(), container, store_delay_ms))?;

    println!("Transfer finished: {}", outcome);
    match device.last_decode() {
        Some(summary) => println!(
            "  Decoded {} ({} bytes in {} spans)",
            summary.name.as_deref().unwrap_or("<unnamed>"),
            summary.bytes_rendered,
            summary.spans
        ),
        None => println!("  Nothing decoded"),
    }
    println!("  Rendered bytes: {}", device.renderer().len());

    Ok(())
}

/// Sender side: length prefix, then window after window, each acknowledged
async fn send_container(
    mut fragmenter: Fragmenter,
    link: mpsc::Sender<LinkWrite>,
    mut reports: mpsc::UnboundedReceiver<TransmitState>,
) -> Result<TransmitState> {
    let closed = |_| Error::Internal("device link closed".to_string());

    link.send(LinkWrite::Status(TransmitState::Start))
        .await
        .map_err(closed)?;
    link.send(LinkWrite::Fragment(fragmenter.length_prefix()))
        .await
        .map_err(closed)?;

    let mut window = 0;
    while let Some(fragments) = fragmenter.next_window() {
        window += 1;
        debug!("sending window {} ({} fragments)", window, fragments.len());

        for fragment in fragments {
            link.send(LinkWrite::Fragment(fragment))
                .await
                .map_err(closed)?;
        }

        loop {
            match reports.recv().await {
                Some(TransmitState::Ok) => break,
                Some(TransmitState::Error) => return Ok(TransmitState::Error),
                Some(other) => debug!("sender got {} while waiting for OK", other),
                None => return Err(Error::Internal("device stopped reporting".to_string())),
            }
        }
    }

    loop {
        match reports.recv().await {
            Some(state @ (TransmitState::Complete | TransmitState::Error)) => return Ok(state),
            Some(other) => debug!("sender got {} while waiting for COMPLETE", other),
            None => return Err(Error::Internal("device stopped reporting".to_string())),
        }
    }
}

async fn simulate(
    config: Config,
    container: Vec<u8>,
    store_delay_ms: u64,
) -> Result<(TransmitState, Device<MemoryFlash, Vec<u8>>)> {
    let flash = MemoryFlash::from_config(&config.storage);
    let mut device = Device::new(config.clone(), flash, Vec::new())?;
    let fragmenter = Fragmenter::new(container, &config.link)?;

    info!(
        "simulating transfer of {} fragments, store delay {} ms",
        fragmenter.fragment_count(),
        store_delay_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(store_delay_ms.max(1)));

    // The device drops everything until its boot clear is done
    while device.machine().is_clear_pending() {
        ticker.tick().await;
        device.pump_one();
    }

    let (link_tx, mut link_rx) = mpsc::channel(256);
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let sender = tokio::spawn(send_container(fragmenter, link_tx, report_rx));

    loop {
        tokio::select! {
            write = link_rx.recv() => match write {
                Some(LinkWrite::Status(state)) => device.on_status(state),
                Some(LinkWrite::Fragment(fragment)) => device.on_fragment(fragment),
                None => break,
            },
            _ = ticker.tick() => {
                device.pump_one();
            }
        }

        for report in device.take_reports() {
            if report_tx.send(report).is_err() {
                debug!("sender gone, report {} dropped", report);
            }
        }
    }

    // Let storage settle so the region ends up cleared
    while device.storage().pending_ops() > 0 {
        ticker.tick().await;
        device.pump_one();
    }
    for report in device.take_reports() {
        info!("late report {}", report);
    }

    let outcome = sender
        .await
        .map_err(|e| Error::Internal(format!("sender task failed: {}", e)))??;

    Ok((outcome, device))
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashpack::config::CodecConfig;

    #[test]
    fn test_expand_tilde() {
        let plain = PathBuf::from("/etc/flashpack.json");
        assert_eq!(expand_tilde(&plain), plain);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_tilde(Path::new("~/.config/x.json")),
                home.join(".config/x.json")
            );
        }
    }

    #[tokio::test]
    async fn test_simulated_transfer() {
        let data: Vec<u8> = (0..6000u32).map(|i| (i % 199) as u8).collect();
        let codec = CodecConfig {
            compression_enabled: false,
            ..CodecConfig::default()
        };
        let (container, _) = Packer::new(&codec).pack("sim.raw", &data).unwrap();

        let (outcome, device) = simulate(Config::default(), container, 1).await.unwrap();

        assert_eq!(outcome, TransmitState::Complete);
        assert_eq!(device.renderer(), &data);
        assert_eq!(device.storage().pending_ops(), 0);
    }

    #[tokio::test]
    async fn test_simulated_corrupt_transfer() {
        let (mut container, _) = Packer::new(&CodecConfig::default())
            .pack("bad.raw", &[7u8; 500])
            .unwrap();
        let last = container.len() - 1;
        container[last] ^= 0xFF;

        let (outcome, device) = simulate(Config::default(), container, 1).await.unwrap();

        assert_eq!(outcome, TransmitState::Error);
        assert!(device.last_decode().is_none());
    }
}
