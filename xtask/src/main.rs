use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;
use trackdfu_core::package::{ImageType, PackageBuilder};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the workspace tests
    Test,
    /// Run a simulated update through the CLI
    Demo,
    /// Write a small application-only DFU package for manual testing
    SamplePackage {
        #[arg(default_value = "sample-dfu.zip")]
        output: PathBuf,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Demo => {
            println!("Running simulated update...");
            cargo(
                &["run", "-p", "trackdfu-cli", "--", "--simulate", "update"],
                "Demo",
            )?;
        }
        Commands::SamplePackage { output } => {
            let init: Vec<u8> = (0..145u32).map(|i| i as u8).collect();
            let image: Vec<u8> = (0..16 * 1024u32).map(|i| (i % 251) as u8).collect();
            let bytes = PackageBuilder::new()
                .image(ImageType::Application, "app.dat", &init, "app.bin", &image)
                .build()?;
            std::fs::write(output, &bytes)?;
            println!("Wrote {} ({} bytes)", output.display(), bytes.len());
        }
    }

    Ok(())
}
