use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use iocraft::prelude::*;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

use classdrop::{
    archive, auth,
    config::{self, Secret},
    graph::{DEFAULT_GRAPH_BASE_URL, GraphStore},
    orchestrator::UploadProgress,
    policy::{UploadStrategy, chunk_ranges},
    submission::{DEFAULT_ROOT_FOLDER, Submission, SubmissionFile, Submitter},
    ui::{
        ConfigHeader, ErrorMessage, InputPrompt, ProgressBar, SubmittedFiles, SuccessMessage,
        UploadPlan,
    },
};

#[derive(Parser)]
#[command(name = "classdrop")]
#[command(version)]
#[command(about = "Submit coursework files to a OneDrive folder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and upload files for one student
    Submit {
        /// Student ID, used as the innermost folder
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        activity: String,
        /// Class section, e.g. 2-3
        #[arg(long)]
        section: String,
        /// Print the receipt as JSON
        #[arg(long)]
        json: bool,
        /// Files to submit. Directories are zipped first
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    /// Show how a file would be uploaded without contacting the drive
    Plan {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
    /// Configure classdrop interactively
    Config,
    /// Store a secret (refresh-token or client-secret) in the OS keyring
    SetSecret { secret: Secret, value: String },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("classdrop=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();
    init_tracing();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::SetSecret { secret, value } => {
                config::set_secret_keyring(secret, value)?;
                element!(SuccessMessage(message: format!("Stored the {secret} in the OS keyring")))
                    .print();
                Ok(())
            }
            Commands::Plan { path } => plan_upload(&path),
            Commands::Submit {
                student_id,
                subject,
                activity,
                section,
                json,
                paths,
            } => {
                let files = load_files(&paths)?;
                let submission = Submission {
                    student_id,
                    subject,
                    activity,
                    section,
                    files,
                };
                submit(submission, json).await
            }
        }
    })
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))
}

fn load_files(paths: &[PathBuf]) -> Result<Vec<SubmissionFile>> {
    paths
        .iter()
        .map(|path| {
            if path.is_dir() {
                let zipped = archive::zip_dir(path)?;
                let content = fs::read(&zipped)
                    .with_context(|| format!("Failed to read archive of {}", path.display()))?;
                Ok(SubmissionFile {
                    file_name: format!("{}.zip", file_name(path)?),
                    content: Bytes::from(content),
                })
            } else {
                let content =
                    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
                Ok(SubmissionFile {
                    file_name: file_name(path)?,
                    content: Bytes::from(content),
                })
            }
        })
        .collect()
}

async fn submit(submission: Submission, json: bool) -> Result<()> {
    let config = config::read_config()?;
    let client = reqwest::Client::builder()
        .timeout(config.upload.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let access_token = auth::exchange_refresh_token(&client, &config.credentials).await?;
    let store = GraphStore::new(client, config.graph_base_url, access_token)?;
    let submitter = Submitter::new(store, config.upload, &config.root_folder_path);

    let title = format!(
        "Submitting {} file(s) for {}",
        submission.files.len(),
        submission.student_id
    );
    let (tx, rx) = watch::channel(UploadProgress::default());
    let mut progress_bar = element!(ProgressBar(title: title, progress: Some(rx)));

    let receipt = tokio::select! {
        result = submitter.submit(submission, Some(&tx)) => result?,
        _ = progress_bar.render_loop() => {
            unreachable!("render_loop should not terminate")
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        element!(SuccessMessage(message: format!(
            "Submission {} received at {}",
            receipt.submission_id,
            receipt.submitted_at.format("%Y-%m-%d %H:%M:%S UTC")
        )))
        .print();
        element!(SubmittedFiles(files: receipt.files)).print();
    }

    Ok(())
}

fn plan_upload(path: &Path) -> Result<()> {
    let policy = config::read_upload_policy()?;
    let total_bytes = fs::metadata(path)
        .with_context(|| format!("Failed to get metadata of {}", path.display()))?
        .len();
    if total_bytes == 0 {
        bail!("{} is empty", path.display());
    }

    let strategy = policy.strategy(total_bytes);
    let ranges = match strategy {
        UploadStrategy::Chunked { chunk_size } => chunk_ranges(total_bytes, chunk_size),
        UploadStrategy::SinglePut => Vec::new(),
    };

    element! {
        UploadPlan(
            file_name: file_name(path)?,
            total_bytes: total_bytes,
            strategy: Some(strategy),
            ranges: ranges
        )
    }
    .print();
    Ok(())
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    match default {
        Some(def) if input.is_empty() => Ok(def.to_string()),
        _ => Ok(input),
    }
}

fn read_required(prompt: &str, default: Option<&str>, description: &str) -> Result<String> {
    loop {
        let value = read_input(prompt, default, Some(description))?;
        if !value.is_empty() {
            return Ok(value);
        }
        element!(ErrorMessage(message: format!("{prompt} cannot be empty"))).print();
        println!();
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();
    let existing = config::read_config_file()?;

    let ms_tenant_id = read_required(
        "Tenant ID",
        existing.ms_tenant_id.as_deref(),
        "The Microsoft Entra tenant that owns the drive",
    )?;
    let ms_client_id = read_required(
        "Client ID",
        existing.ms_client_id.as_deref(),
        "The application (client) ID registered for classdrop",
    )?;

    let client_secret = read_input(
        "Client Secret",
        None,
        Some("Stored securely in the OS keyring. Leave empty to keep the current one"),
    )?;
    let refresh_token = read_input(
        "Refresh Token",
        None,
        Some("Stored securely in the OS keyring. Leave empty to keep the current one"),
    )?;

    let root_folder_path = read_input(
        "Root Folder",
        Some(
            existing
                .root_folder_path
                .as_deref()
                .unwrap_or(DEFAULT_ROOT_FOLDER),
        ),
        Some("Drive folder that holds every submission"),
    )?;

    let current_base_url = existing
        .graph_base_url
        .as_ref()
        .map(Url::as_str)
        .unwrap_or(DEFAULT_GRAPH_BASE_URL)
        .to_string();
    let graph_base_url = loop {
        let base_url_str = read_input(
            "Graph Base URL",
            Some(&current_base_url),
            Some("The Microsoft Graph endpoint"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    if !client_secret.is_empty() {
        config::set_secret_keyring(Secret::ClientSecret, client_secret)?;
    }
    if !refresh_token.is_empty() {
        config::set_secret_keyring(Secret::RefreshToken, refresh_token)?;
    }

    let config_file = config::ConfigFile {
        ms_tenant_id: Some(ms_tenant_id),
        ms_client_id: Some(ms_client_id),
        root_folder_path: Some(root_folder_path),
        graph_base_url: Some(graph_base_url),
        upload: None,
    };

    config::write_config(config_file)?;

    element!(SuccessMessage(message: "Configuration complete!".to_string())).print();

    Ok(())
}
