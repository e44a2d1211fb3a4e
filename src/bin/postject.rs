use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use postject::{
    inject, Error, Injection, InjectionRequest, ResourceId, API_HEADER, DEFAULT_MACHO_SEGMENT,
};

/// I/O problem or unsupported executable format
const EXIT_IO: u8 = 1;
/// The resource exists and `--overwrite` was not given
const EXIT_ALREADY_EXISTS: u8 = 2;
/// The executable could not be modified
const EXIT_INJECTION_FAILED: u8 = 3;

/// Inject arbitrary read-only resources into an executable for use at runtime
#[derive(Parser)]
#[command(name = "postject", version)]
struct Cli {
    /// The executable to inject into
    #[arg(required_unless_present = "output_api_header")]
    filename: Option<PathBuf>,

    /// The resource name to use (section name on Mach-O and ELF, resource name for PE)
    #[arg(required_unless_present = "output_api_header")]
    resource_name: Option<String>,

    /// The resource to inject
    #[arg(required_unless_present = "output_api_header")]
    resource: Option<PathBuf>,

    /// Name for the Mach-O segment
    #[arg(long, value_name = "SEGMENT_NAME", default_value = DEFAULT_MACHO_SEGMENT)]
    macho_segment_name: String,

    /// Overwrite the resource if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Flip the fuse following this sentinel marker once the resource is injected
    #[arg(long, value_name = "SENTINEL")]
    sentinel_fuse: Option<String>,

    /// Write the result here instead of over the executable
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the C header for finding the resource at runtime and exit
    #[arg(long)]
    output_api_header: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if cli.output_api_header {
        print!("{API_HEADER}");
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(existing)) => {
            eprintln!("{existing} already exists");
            eprintln!("Use --overwrite to overwrite the existing content");
            ExitCode::from(EXIT_ALREADY_EXISTS)
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::UnknownFormat | Error::Disabled(_)) | None => EXIT_IO,
        Some(_) => EXIT_INJECTION_FAILED,
    }
}

/// Inject the resource, returning the blocking resource if it already exists.
fn run(cli: &Cli) -> Result<Option<ResourceId>> {
    let (Some(filename), Some(resource_name), Some(resource_path)) =
        (&cli.filename, &cli.resource_name, &cli.resource)
    else {
        anyhow::bail!("the executable, resource name and resource file are required");
    };
    let executable = std::fs::read(filename)
        .with_context(|| format!("Can't read target executable {}", filename.display()))?;
    let resource = std::fs::read(resource_path)
        .with_context(|| format!("Can't read resource file {}", resource_path.display()))?;

    let mut request = InjectionRequest::new(resource_name, &resource)
        .with_overwrite(cli.overwrite)
        .with_macho_segment_name(&cli.macho_segment_name);
    if let Some(sentinel) = &cli.sentinel_fuse {
        request = request.with_sentinel(sentinel);
    }

    let output = match inject(&executable, &request).context("Error when injecting resource")? {
        Injection::Injected(output) => output,
        Injection::AlreadyExists(existing) => return Ok(Some(existing)),
    };

    let target = cli.output.as_ref().unwrap_or(filename);
    std::fs::write(target, &output)
        .with_context(|| format!("Couldn't write executable {}", target.display()))?;
    log::info!(
        "injected {} bytes as {:?} into {}",
        resource.len(),
        resource_name,
        target.display()
    );
    Ok(None)
}
