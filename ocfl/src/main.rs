mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ocfl_core::{
    Backend, DigestAlgorithm, ExportVersion, FsBackend, IdMapping, ObjectOptions, OcflObject,
    Repository, UpdateMode, UpdateOptions, UpdateOutcome, User, Version, diff_heads,
};
use output::{
    DiffOutput, ExportOutput, FileInfo, InitOutput, LogOutput, LsOutput, OutputWriter,
    RemoveOutput, ShowOutput, UpdateOutput, UpdateStatus, VerifyOutput, VersionInfo,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// ocfl - A versioned, content-addressed object store
#[derive(Parser)]
#[command(name = "ocfl")]
#[command(about = "Versioned object store following the Oxford Common File Layout", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository root directory (defaults to OCFL_ROOT env var or ./ocfl-repo)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Scratch directory for deposits and backups (defaults to OCFL_SCRATCH or <root>/.scratch)
    #[arg(long, global = true)]
    scratch: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init {
        /// How object ids map to paths: hashed-n-tuple or direct
        #[arg(long, default_value = "hashed-n-tuple")]
        layout: String,
    },

    /// Deposit a directory as a new version of an object
    Update {
        /// Object id
        id: String,

        /// Directory holding the new content
        source: PathBuf,

        /// Add the source to the head version instead of replacing it
        #[arg(long)]
        merge: bool,

        /// Show what would change without committing
        #[arg(long)]
        dry_run: bool,

        /// Version message
        #[arg(short, long)]
        message: Option<String>,

        /// Name of the user making the change
        #[arg(long)]
        user: Option<String>,

        /// Address of the user, e.g. a mailto: URI
        #[arg(long, requires = "user")]
        address: Option<String>,

        /// Digest algorithm for a new object
        #[arg(long, default_value = "sha512")]
        algo: String,
    },

    /// Remove files from the head version, creating a new version
    Rm {
        /// Object id
        id: String,

        /// Logical paths to remove
        #[arg(required = true)]
        files: Vec<String>,

        /// Version message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the versions of an object
    Log {
        /// Object id
        id: String,
    },

    /// List the files of a version
    Show {
        /// Object id
        id: String,

        /// Version to show (vN or head)
        #[arg(default_value = "head")]
        version: String,

        /// Show digests and storage paths
        #[arg(short, long)]
        long: bool,
    },

    /// Compare two versions of an object
    Diff {
        /// Object id
        id: String,

        /// Earlier version (vN)
        previous: String,

        /// Later version (vN)
        next: String,
    },

    /// Check an object's files against its inventory
    Verify {
        /// Object id
        id: String,
    },

    /// Copy a version of an object into an empty directory
    Export {
        /// Object id
        id: String,

        /// Destination directory (must exist and be empty)
        dest: PathBuf,

        /// Version to export: vN, head, or all for the physical layout
        #[arg(long, default_value = "head")]
        version: String,
    },

    /// Delete an object from the repository
    Remove {
        /// Object id
        id: String,
    },

    /// List the objects in the repository
    Ls {
        /// Show head versions and paths
        #[arg(short, long)]
        long: bool,
    },
}

/// Repository and scratch locations resolved from flags and environment.
struct Locations {
    root: PathBuf,
    scratch: PathBuf,
}

impl Locations {
    fn options(&self) -> ObjectOptions {
        ObjectOptions::with_scratch(&self.scratch)
    }

    fn backend(&self) -> Arc<dyn Backend> {
        Arc::new(FsBackend::new(&self.root))
    }

    fn open(&self) -> Result<Repository> {
        debug!(root = %self.root.display(), scratch = %self.scratch.display(), "opening repository");
        Repository::open(self.backend(), self.options())
            .with_context(|| format!("Failed to open repository at {}", self.root.display()))
    }

    /// An object that must already have been committed.
    fn existing(&self, id: &str) -> Result<OcflObject> {
        let repo = self.open()?;
        let object = repo
            .object(id)
            .with_context(|| format!("Failed to load object {}", id))?;
        if !object.is_object()? {
            anyhow::bail!("Object not found: {}", id);
        }
        Ok(object)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run a command, returning the process exit code.
fn run(cli: Cli, output: &OutputWriter) -> Result<u8> {
    // Determine repository root: CLI arg > OCFL_ROOT env var > ./ocfl-repo default
    let root = cli
        .root
        .or_else(|| std::env::var("OCFL_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./ocfl-repo"));
    let scratch = cli
        .scratch
        .or_else(|| std::env::var("OCFL_SCRATCH").ok().map(PathBuf::from))
        .unwrap_or_else(|| root.join(".scratch"));
    let ctx = Locations { root, scratch };

    match cli.command {
        Commands::Init { layout } => cmd_init(&ctx, output, &layout),
        Commands::Update {
            id,
            source,
            merge,
            dry_run,
            message,
            user,
            address,
            algo,
        } => {
            let user = user.map(|name| User { name, address });
            let request = UpdateRequest {
                id: &id,
                source: &source,
                merge,
                dry_run,
                message,
                user,
                algo: &algo,
            };
            cmd_update(&ctx, output, request)
        }
        Commands::Rm { id, files, message } => cmd_rm(&ctx, output, &id, files, message),
        Commands::Log { id } => cmd_log(&ctx, output, &id),
        Commands::Show { id, version, long } => cmd_show(&ctx, output, &id, &version, long),
        Commands::Diff { id, previous, next } => cmd_diff(&ctx, output, &id, &previous, &next),
        Commands::Verify { id } => cmd_verify(&ctx, output, &id),
        Commands::Export { id, dest, version } => cmd_export(&ctx, output, &id, &dest, &version),
        Commands::Remove { id } => cmd_remove(&ctx, output, &id),
        Commands::Ls { long } => cmd_ls(&ctx, output, long),
    }
}

fn parse_layout(layout: &str) -> Result<IdMapping> {
    match layout {
        "hashed-n-tuple" => Ok(IdMapping::HashedNTuple),
        "direct" => Ok(IdMapping::Direct),
        _ => anyhow::bail!("Unsupported layout: {} (expected hashed-n-tuple or direct)", layout),
    }
}

fn cmd_init(ctx: &Locations, output: &OutputWriter, layout: &str) -> Result<u8> {
    let options = ObjectOptions {
        id_mapping: parse_layout(layout)?,
        ..ctx.options()
    };
    let repo = Repository::create(ctx.backend(), options)
        .with_context(|| format!("Failed to initialize repository at {}", ctx.root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: ctx.root.display().to_string(),
        layout: repo.options().id_mapping.extension().to_string(),
    };
    output.write(&data, || {
        format!(
            "Initialized OCFL repository at {}\nLayout: {}\n",
            data.root, data.layout
        )
    })?;
    Ok(0)
}

struct UpdateRequest<'a> {
    id: &'a str,
    source: &'a Path,
    merge: bool,
    dry_run: bool,
    message: Option<String>,
    user: Option<User>,
    algo: &'a str,
}

fn cmd_update(ctx: &Locations, output: &OutputWriter, request: UpdateRequest<'_>) -> Result<u8> {
    let options = ObjectOptions {
        digest_algorithm: DigestAlgorithm::parse(request.algo)
            .with_context(|| format!("Invalid digest algorithm: {}", request.algo))?,
        ..ctx.options()
    };
    let repo = Repository::open(ctx.backend(), options)
        .with_context(|| format!("Failed to open repository at {}", ctx.root.display()))?;
    let mut object = repo
        .object(request.id)
        .with_context(|| format!("Failed to load object {}", request.id))?;

    let mut options = UpdateOptions::from_source(request.source);
    if request.merge {
        options = options.mode(UpdateMode::Merge);
    }
    if let Some(message) = request.message {
        options = options.message(message);
    }
    if let Some(user) = request.user {
        options = options.user(user);
    }
    if request.dry_run {
        options = options.staged();
    }

    let outcome = object.update(options).with_context(|| {
        format!(
            "Failed to update {} from {}",
            request.id,
            request.source.display()
        )
    })?;
    let data = describe_update(&mut object, request.id, outcome)?;
    output.write(&data, || data.render())?;
    Ok(0)
}

fn cmd_rm(
    ctx: &Locations,
    output: &OutputWriter,
    id: &str,
    files: Vec<String>,
    message: Option<String>,
) -> Result<u8> {
    let mut object = ctx.existing(id)?;
    let mut options = UpdateOptions::removing(files);
    if let Some(message) = message {
        options = options.message(message);
    }
    let outcome = object
        .update(options)
        .with_context(|| format!("Failed to remove files from {}", id))?;

    let data = describe_update(&mut object, id, outcome)?;
    output.write(&data, || data.render())?;
    Ok(0)
}

/// Build the update DTO. A staged outcome is a dry run: its diff is
/// reported and the deposit is aborted.
fn describe_update(object: &mut OcflObject, id: &str, outcome: UpdateOutcome) -> Result<UpdateOutput> {
    let (status, head, changes) = match outcome {
        UpdateOutcome::Committed(inventory) => (UpdateStatus::Committed, Some(inventory.head), None),
        UpdateOutcome::Unchanged => (UpdateStatus::Unchanged, None, None),
        UpdateOutcome::Staged { head, next } => {
            let changes = diff_heads(head.as_deref(), &next)
                .with_context(|| format!("Failed to compare staged version of {}", id))?;
            object
                .abort()
                .with_context(|| format!("Failed to discard deposit for {}", id))?;
            (UpdateStatus::DryRun, Some(next.head), Some(changes))
        }
    };
    Ok(UpdateOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
        status,
        head,
        changes,
    })
}

fn cmd_log(ctx: &Locations, output: &OutputWriter, id: &str) -> Result<u8> {
    let object = ctx.existing(id)?;
    let versions = object
        .get_all_versions()
        .with_context(|| format!("Failed to read versions of {}", id))?;

    let data = LogOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
        versions: versions.iter().map(VersionInfo::from).collect(),
    };
    output.write(&data, || data.render())?;
    Ok(0)
}

fn cmd_show(ctx: &Locations, output: &OutputWriter, id: &str, version: &str, long: bool) -> Result<u8> {
    let object = ctx.existing(id)?;
    let version: Version = match version {
        "head" => object.get_latest_version(),
        v => object.get_version(v),
    }
    .with_context(|| format!("Failed to read {} of {}", version, id))?;

    let data = ShowOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
        version: VersionInfo::from(&version),
        entries: version.entries().into_iter().map(FileInfo::from).collect(),
    };
    output.write(&data, || data.render(long))?;
    Ok(0)
}

fn cmd_diff(
    ctx: &Locations,
    output: &OutputWriter,
    id: &str,
    previous: &str,
    next: &str,
) -> Result<u8> {
    let object = ctx.existing(id)?;
    let diff = object
        .diff_versions(previous, next)
        .with_context(|| format!("Failed to compare {} and {} of {}", previous, next, id))?;

    let data = DiffOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
        previous: previous.parse()?,
        next: next.parse()?,
        diff,
    };
    output.write(&data, || output::render_diff(&data.diff))?;
    Ok(0)
}

fn cmd_verify(ctx: &Locations, output: &OutputWriter, id: &str) -> Result<u8> {
    let object = ctx.existing(id)?;
    let report = object
        .verify()
        .with_context(|| format!("Failed to verify {}", id))?;

    let result_code = if report.is_valid { 0 } else { 2 };
    let data = VerifyOutput {
        success: report.is_valid,
        result_code,
        id: id.to_string(),
        report,
    };
    output.write(&data, || data.render())?;
    Ok(result_code)
}

fn cmd_export(
    ctx: &Locations,
    output: &OutputWriter,
    id: &str,
    dest: &Path,
    version: &str,
) -> Result<u8> {
    let object = ctx.existing(id)?;
    let export_version =
        ExportVersion::parse(version).with_context(|| format!("Invalid version: {}", version))?;
    let files = object
        .export(dest, export_version)
        .with_context(|| format!("Failed to export {} of {} to {}", version, id, dest.display()))?;

    let data = ExportOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
        version: version.to_string(),
        destination: dest.display().to_string(),
        files,
    };
    output.write(&data, || {
        format!(
            "Exported {} of {} to {} ({} files)\n",
            data.version, data.id, data.destination, data.files
        )
    })?;
    Ok(0)
}

fn cmd_remove(ctx: &Locations, output: &OutputWriter, id: &str) -> Result<u8> {
    let mut object = ctx.existing(id)?;
    object
        .remove()
        .with_context(|| format!("Failed to remove {}", id))?;

    let data = RemoveOutput {
        success: true,
        result_code: 0,
        id: id.to_string(),
    };
    output.write(&data, || format!("Removed {}\n", data.id))?;
    Ok(0)
}

fn cmd_ls(ctx: &Locations, output: &OutputWriter, long: bool) -> Result<u8> {
    let repo = ctx.open()?;
    let objects = repo
        .find_objects()
        .with_context(|| "Failed to list objects")?;

    let data = LsOutput {
        success: true,
        result_code: 0,
        objects,
    };
    output.write(&data, || data.render(long))?;
    Ok(0)
}
