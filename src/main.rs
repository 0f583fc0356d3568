//! mfutil CLI
//!
//! Entry point for the `mfutil` command-line tool.

use std::path::{Path, PathBuf};
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mfutil::config::Project;
use mfutil::manifest::BuildInfo;
use mfutil::publish::Publisher;
use mfutil::query::{download_row, search, SearchRow, ROW_FIELDS};
use mfutil::storage::{GcsStorage, StorageGateway};

#[derive(Parser)]
#[command(name = "mfutil")]
#[command(about = "Track latest successful build artifacts per branch in object storage", version)]
struct Cli {
    /// Output format for listings
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,

    /// Path to the project config file (default: .mf.json in the current directory)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// One JSON object per row
    Json,
    /// Comma separated with a header line
    Csv,
    /// Tab separated, no header
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Operations on build artifacts
    Builds {
        #[command(subcommand)]
        action: BuildsCommands,
    },
}

#[derive(Subcommand)]
enum BuildsCommands {
    /// Upload the current build's binaries and record it as the branch's
    /// latest success
    Put {
        /// Current git branch name
        #[arg(long)]
        git_branch: String,

        /// Current git revision checksum
        #[arg(long)]
        git_commit: String,

        /// Current build id
        #[arg(long)]
        build_id: String,

        /// Merge and print the manifest without uploading anything
        #[arg(long, short = 'n')]
        no_upload: bool,
    },

    /// List the latest successfully built binaries
    List {
        /// Root bucket for all artifacts (overrides the project file)
        #[arg(long)]
        bucket: Option<String>,

        /// Repository name, a.k.a. semantic name (overrides the project file)
        #[arg(long)]
        repo: Option<String>,

        /// Git branch name
        #[arg(long)]
        branch: Option<String>,

        /// Application name within the repository
        #[arg(long)]
        app: Option<String>,

        /// Include only these fields (comma separated; available:
        /// branch,app,built_at,commit,url)
        #[arg(long, value_delimiter = ',')]
        include_fields: Option<Vec<String>>,
    },

    /// Download all binaries matched by branch and app
    Get {
        /// Root bucket for all artifacts (overrides the project file)
        #[arg(long)]
        bucket: Option<String>,

        /// Repository name, a.k.a. semantic name (overrides the project file)
        #[arg(long)]
        repo: Option<String>,

        /// Git branch name
        #[arg(long)]
        branch: String,

        /// Application name within the repository
        #[arg(long)]
        app: Option<String>,

        /// Directory the binaries are placed under
        destination: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("mfutil=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let root = std::env::current_dir()?;

    match cli.command {
        Commands::Builds { action } => match action {
            BuildsCommands::Put {
                git_branch,
                git_commit,
                build_id,
                no_upload,
            } => run_put(
                &root,
                cli.config.as_deref(),
                &git_branch,
                &git_commit,
                &build_id,
                no_upload,
            ),
            BuildsCommands::List {
                bucket,
                repo,
                branch,
                app,
                include_fields,
            } => run_list(
                &root,
                cli.config.as_deref(),
                cli.format,
                bucket,
                repo,
                branch.as_deref(),
                app.as_deref(),
                include_fields.as_deref(),
            ),
            BuildsCommands::Get {
                bucket,
                repo,
                branch,
                app,
                destination,
            } => run_get(
                &root,
                cli.config.as_deref(),
                bucket,
                repo,
                &branch,
                app.as_deref(),
                &destination,
            ),
        },
    }
}

fn run_put(
    root: &Path,
    config: Option<&Path>,
    git_branch: &str,
    git_commit: &str,
    build_id: &str,
    no_upload: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    for (flag, value) in [
        ("--git-branch", git_branch),
        ("--git-commit", git_commit),
        ("--build-id", build_id),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{flag} must be a non-empty string").into());
        }
    }

    let project = Project::load(root, config)?;
    let build = BuildInfo::new(git_branch, git_commit, build_id, Utc::now());
    let storage = GcsStorage::connect(project.bucket(), project.repository())?;
    let publisher = Publisher::new(&storage);

    if no_upload {
        println!("content won't be uploaded...");
        let document = publisher.preview(&build, &project)?;
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        publisher.publish(&build, &project)?;
        info!(
            "published {} as latest success of {}",
            build.rev(),
            build.branch_slug()
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_list(
    root: &Path,
    config: Option<&Path>,
    format: Format,
    bucket: Option<String>,
    repo: Option<String>,
    branch: Option<&str>,
    app: Option<&str>,
    include_fields: Option<&[String]>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (bucket, repo) = resolve_target(root, config, bucket, repo)?;
    let storage = GcsStorage::connect(&bucket, &repo)?;

    let fetched = storage.fetch_manifest()?;
    let rows = search(&fetched.document, branch, app);

    if rows.is_empty() {
        println!("no builds found...");
    }
    emit_rows(&rows, format, include_fields);
    Ok(())
}

fn run_get(
    root: &Path,
    config: Option<&Path>,
    bucket: Option<String>,
    repo: Option<String>,
    branch: &str,
    app: Option<&str>,
    destination: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if !destination.is_dir() {
        return Err(format!("destination {} is not a directory", destination.display()).into());
    }

    let (bucket, repo) = resolve_target(root, config, bucket, repo)?;
    let storage = GcsStorage::connect(&bucket, &repo)?;

    let fetched = storage.fetch_manifest()?;
    let rows = search(&fetched.document, Some(branch), app);

    if rows.is_empty() {
        println!("no builds found...");
        return Ok(());
    }

    for row in &rows {
        info!("downloading... {}", row.url);
        download_row(&storage, row, destination)?;
    }
    Ok(())
}

/// Bucket and repository from explicit flags, falling back to the project
/// file
fn resolve_target(
    root: &Path,
    config: Option<&Path>,
    bucket: Option<String>,
    repo: Option<String>,
) -> Result<(String, String), Box<dyn std::error::Error>> {
    if let (Some(bucket), Some(repo)) = (&bucket, &repo) {
        return Ok((bucket.clone(), repo.clone()));
    }

    match Project::load(root, config) {
        Ok(project) => Ok((
            project.bucket().to_string(),
            project.repository().to_string(),
        )),
        Err(err) => Err(format!(
            "config file not found in {} and no --bucket/--repo given \
             (specify both flags or a --config file): {err}",
            root.display()
        )
        .into()),
    }
}

fn emit_rows(rows: &[SearchRow], format: Format, include_fields: Option<&[String]>) {
    let selected: Vec<&str> = match include_fields {
        Some(fields) => ROW_FIELDS
            .iter()
            .copied()
            .filter(|field| fields.iter().any(|wanted| wanted == field))
            .collect(),
        None => ROW_FIELDS.to_vec(),
    };

    match format {
        Format::Json => {
            for row in rows {
                println!("{}", row_json(row, &selected));
            }
        }
        Format::Csv => {
            println!("{}", selected.join(","));
            for row in rows {
                println!("{}", row_line(row, &selected, ","));
            }
        }
        Format::Text => {
            for row in rows {
                println!("{}", row_line(row, &selected, "\t"));
            }
        }
    }
}

fn row_field<'a>(row: &'a SearchRow, field: &str) -> &'a str {
    match field {
        "branch" => &row.branch,
        "app" => &row.app,
        "built_at" => &row.built_at,
        "commit" => &row.commit,
        "url" => &row.url,
        _ => "",
    }
}

fn row_line(row: &SearchRow, fields: &[&str], separator: &str) -> String {
    fields
        .iter()
        .map(|field| row_field(row, field))
        .collect::<Vec<_>>()
        .join(separator)
}

fn row_json(row: &SearchRow, fields: &[&str]) -> String {
    let mut object = serde_json::Map::new();
    for field in fields {
        object.insert(
            field.to_string(),
            serde_json::Value::String(row_field(row, field).to_string()),
        );
    }
    serde_json::Value::Object(object).to_string()
}
