use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use trackdfu_core::simulation::simulated_session;
use trackdfu_core::{
    Catalog, DeviceModel, FirmwarePackage, ModeSwitch, PacketDelay, UpdateSession, UpdateStatus,
    UpdaterConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "HaritoraX firmware updater (Nordic Secure DFU over BLE)", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Delay between packets in milliseconds, -1 to let the transport decide
    #[arg(long, global = true, allow_hyphen_values = true)]
    packet_delay: Option<PacketDelay>,

    /// Host that firmware paths resolve against
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Tracker model
    #[arg(long, global = true, default_value = "HaritoraX Wireless")]
    device: DeviceModel,

    /// Use a simulated tracker instead of Bluetooth
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known firmware releases
    Versions,
    /// Show the images in a DFU package
    Inspect {
        /// DFU package path
        package: PathBuf,
    },
    /// Read the firmware version of a tracker
    Check,
    /// Reboot a tracker into update mode
    Mode,
    /// Flash a local DFU package to a tracker in update mode
    Flash {
        /// DFU package path
        package: PathBuf,
    },
    /// Download a release and run the complete update
    Update {
        /// Release to install, latest if omitted
        #[arg(long)]
        version: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<UpdaterConfig> {
    let file = match &args.config {
        Some(path) => UpdaterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => UpdaterConfig::default(),
    };
    let flags = UpdaterConfig {
        packet_delay: args.packet_delay,
        firmware_base_url: args.base_url.clone(),
        ..Default::default()
    };
    Ok(file.merge(flags).with_defaults())
}

async fn open_session(args: &Args, config: &UpdaterConfig, catalog: &Catalog) -> Result<UpdateSession> {
    let session = if args.simulate {
        simulated_session(args.device, catalog, None, config)
    } else {
        UpdateSession::bluetooth(config).await?
    };

    session.set_log_callback(|line| println!("{}", line));
    let last_percent = Mutex::new(None::<(String, u8)>);
    session.set_progress_callback(move |progress| {
        let percent = progress.percent();
        let mut last = last_percent.lock().unwrap_or_else(|e| e.into_inner());
        let key = (progress.object.clone(), percent);
        if last.as_ref() != Some(&key) {
            print!(
                "\r{:>8} {:>3}% ({}/{} bytes)",
                progress.object, percent, progress.current_bytes, progress.total_bytes
            );
            if progress.is_complete() {
                println!();
            }
            let _ = std::io::stdout().flush();
            *last = Some(key);
        }
    });
    session.set_state_callback(|state| info!(state = %state, "Update state"));
    Ok(session)
}

fn print_versions(catalog: &Catalog, model: DeviceModel) {
    println!("{}:", model);
    for release in catalog.versions(model) {
        println!(
            "  {:<8} {}  {}{}",
            release.version,
            release.date,
            release.filename,
            if release.untested { "  (untested)" } else { "" }
        );
    }
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    info!(path = %path.display(), size = bytes.len(), "Loaded package");
    let package = FirmwarePackage::load(bytes)?;

    for line in package.summary() {
        println!("{}", line);
    }
    for image in package.images()? {
        println!(
            "{} image: {} bytes init, {} bytes firmware, crc32 {:08x}",
            image.image_type,
            image.init_data.len(),
            image.image_data.len(),
            crc32fast::hash(&image.image_data)
        );
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let catalog = Catalog::builtin();

    match &args.command {
        Command::Versions => {
            for model in DeviceModel::ALL {
                print_versions(&catalog, model);
            }
            return Ok(());
        }
        Command::Inspect { package } => return inspect(package),
        _ => {}
    }

    let config = load_config(&args)?;
    info!(
        device = %args.device,
        simulate = args.simulate,
        packet_delay = %config.packet_delay(),
        "Starting TrackDFU"
    );
    let session = open_session(&args, &config, &catalog).await?;

    match &args.command {
        Command::Check => {
            let installed = session.check_version(args.device, &catalog).await?;
            println!("{}", installed.status());
        }
        Command::Mode => match session.enter_update_mode().await? {
            ModeSwitch::NeedsReselection => println!("{}", UpdateStatus::UpdateModeSet),
            ModeSwitch::DeviceFound(device) => {
                println!("{} is already in update mode", device)
            }
        },
        Command::Flash { package } => {
            let bytes = std::fs::read(package)
                .with_context(|| format!("Failed to read {}", package.display()))?;
            let device = session.select_device().await?;
            println!(
                "{}",
                UpdateStatus::DfuDeviceSelected {
                    name: device.display_name().to_string()
                }
            );
            session.flash_firmware(&device, bytes).await?;
            println!("{}", UpdateStatus::FirmwareCompleted);
        }
        Command::Update { version } => {
            let release = match version {
                Some(version) => catalog.find(args.device, version),
                None => catalog.latest(args.device),
            }
            .ok_or_else(|| {
                anyhow!(
                    "Unknown firmware version {} for {}",
                    version.as_deref().unwrap_or("latest"),
                    args.device
                )
            })?;
            info!(version = %release.version, date = %release.date, "Installing firmware");
            session.update_firmware(release).await?;
            println!("{}", UpdateStatus::FirmwareCompleted);
        }
        Command::Versions | Command::Inspect { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(e) = run(args).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
