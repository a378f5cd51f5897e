//! libpack - bundle binaries with their shared libraries

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use libpack::{bundle, host_platform, BundleConfig, Root, SearchPath};

#[derive(Parser, Debug)]
#[command(
    name = "libpack",
    version,
    about = "Copy binaries and their library closure into bin/ and lib/"
)]
struct Cli {
    /// Executables to bundle into bin/
    #[arg(short, long = "bin", value_delimiter = ';')]
    bins: Vec<PathBuf>,

    /// Libraries to bundle into lib/
    #[arg(short, long = "lib", value_delimiter = ';')]
    libs: Vec<PathBuf>,

    /// Library search directories, in priority order
    #[arg(short, long = "search", value_delimiter = ';', env = "LIBPACK_SEARCH_PATH")]
    search: Vec<PathBuf>,

    /// Directory that receives bin/ and lib/
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Extra path prefixes treated as system libraries (never bundled)
    #[arg(long, value_delimiter = ';')]
    exclude: Vec<PathBuf>,

    /// Dynamic linker to bundle as lib/ld-linux.so (Linux only)
    #[arg(long)]
    loader: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let roots: Vec<Root> = cli
        .bins
        .into_iter()
        .map(Root::binary)
        .chain(cli.libs.into_iter().map(Root::library))
        .collect();
    if roots.is_empty() {
        bail!("specify at least one --bin or --lib file");
    }

    let config = BundleConfig {
        roots,
        search_path: SearchPath::new(cli.search),
        output_root: cli.output,
        extra_system_roots: cli.exclude,
    };

    let platform = host_platform(cli.loader)?;
    let report = bundle(&config, platform.as_ref())
        .with_context(|| format!("failed to bundle into {}", config.output_root.display()))?;

    for file in &report.files {
        println!("{}", file.destination.display());
    }
    Ok(())
}
