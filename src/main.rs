use anyhow::{bail, Context, Result};
use clap::Parser;
use file_converter_lib::config::normalize_base_url;
use file_converter_lib::conversion::SessionSnapshot;
use file_converter_lib::{
    ClientConfig, ConversionController, ConversionOptions, ConversionRequest, ConversionStatus,
    DownloadRequest, FileSystemBridge, MediaType, NativeFileBridge, UploadFile,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Convert files through a conversion server and download the results
#[derive(Debug, Parser)]
#[command(name = "file-converter", version)]
struct Cli {
    /// Media family: image, video, audio, document, data, archive, spreadsheet, subtitle, ebook, font
    media: MediaType,

    /// One file converts on its own; several are sent as a batch
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format, e.g. webp or mp3
    #[arg(long = "to", value_name = "FORMAT")]
    format: String,

    /// Format-specific option, repeatable
    #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_option)]
    options: Vec<(String, String)>,

    #[arg(long, env = "CONVERTER_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "CONVERTER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Stop after conversion without downloading
    #[arg(long)]
    no_download: bool,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // before parsing so `env = ...` arguments see values from `.env`
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(ConversionStatus::Completed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // connection chatter is debug-level, visible in development builds only
    let default_filter = if cfg!(debug_assertions) {
        "info,file_converter=debug,file_converter_lib=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ConversionStatus> {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config.api_base_url = normalize_base_url(url);
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = Some(dir.clone());
    }

    let controller =
        ConversionController::from_config(&config).context("invalid client configuration")?;
    let request = build_request(&cli).await?;

    let watcher = tokio::spawn(log_transitions(controller.subscribe()));
    controller.submit(request).await;
    let outcome = controller.wait_until_terminal().await;
    watcher.abort();

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(e) => {
            controller.reset().await;
            return Err(e).context("conversion did not finish");
        }
    };

    if snapshot.status == ConversionStatus::Failed {
        if let Some(report) = &snapshot.error {
            tracing::error!("{}: {}", report.message, report.detail);
        }
        controller.reset().await;
        return Ok(ConversionStatus::Failed);
    }

    if !cli.no_download {
        download_results(&config, &cli, &snapshot).await?;
    }
    controller.reset().await;

    Ok(snapshot.status)
}

async fn build_request(cli: &Cli) -> Result<ConversionRequest> {
    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        files.push(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?,
        );
    }

    let options = cli
        .options
        .iter()
        .fold(ConversionOptions::new(), |options, (key, value)| {
            options.set(key.as_str(), value)
        });

    let request = if files.len() == 1 {
        let file = files.remove(0);
        ConversionRequest::single(cli.media, file, &cli.format)
    } else {
        ConversionRequest::batch(cli.media, files, &cli.format)
    };

    Ok(request.with_options(options))
}

async fn log_transitions(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut last_status = updates.borrow().status;
    let mut last_upload = 0u8;

    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();

        if snapshot.status != last_status {
            tracing::info!("Status: {:?} -> {:?}", last_status, snapshot.status);
            last_status = snapshot.status;
        }

        match snapshot.status {
            ConversionStatus::Uploading if snapshot.upload_progress >= last_upload + 10 => {
                tracing::info!("Uploading: {}%", snapshot.upload_progress);
                last_upload = snapshot.upload_progress;
            }
            ConversionStatus::Converting => {
                tracing::info!(
                    "Converting: {:.0}% {}",
                    snapshot.progress,
                    snapshot.current_operation.as_deref().unwrap_or(&snapshot.message)
                );
            }
            _ => {}
        }

        if snapshot.stalled {
            tracing::warn!("Progress stream lost; the conversion may still finish on the server");
        }
    }
}

async fn download_results(
    config: &ClientConfig,
    cli: &Cli,
    snapshot: &SessionSnapshot,
) -> Result<()> {
    let bridge = NativeFileBridge::from_config(config)?;
    let directory = bridge.select_output_directory().await?;

    let targets: Vec<(String, String)> = if snapshot.results.is_empty() {
        let Some(url) = &snapshot.download_url else {
            tracing::warn!("Conversion completed without a download URL");
            return Ok(());
        };
        let source = cli.files.first().map(PathBuf::as_path);
        vec![(url.clone(), output_name(source, &cli.format))]
    } else {
        snapshot
            .results
            .iter()
            .filter(|result| result.success)
            .filter_map(|result| {
                let url = result.download_url.clone()?;
                Some((url, output_name(Some(Path::new(&result.filename)), &cli.format)))
            })
            .collect()
    };

    let mut saved = 0usize;
    for (url, filename) in &targets {
        let request = DownloadRequest {
            url: config.absolute_url(url),
            directory: directory.clone(),
            filename: filename.clone(),
        };
        match bridge.download_file(request).await {
            Ok(path) => {
                println!("{}", path.display());
                saved += 1;
            }
            Err(e) => tracing::warn!("Could not download {}: {}", filename, e),
        }
    }

    if saved == 0 && !targets.is_empty() {
        bail!("none of the {} converted file(s) could be downloaded", targets.len());
    }
    for result in snapshot.results.iter().filter(|r| !r.success) {
        tracing::warn!(
            "{} failed: {}",
            result.filename,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

fn output_name(source: Option<&Path>, format: &str) -> String {
    let stem = source
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "converted".to_string());
    format!("{}.{}", stem, format.trim_start_matches('.').to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("quality = 80"),
            Ok(("quality".to_string(), "80".to_string()))
        );
        assert_eq!(
            parse_option("delimiter=;"),
            Ok(("delimiter".to_string(), ";".to_string()))
        );
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=5").is_err());
    }

    #[test]
    fn test_output_name_uses_source_stem() {
        assert_eq!(output_name(Some(Path::new("/in/photo.png")), ".WEBP"), "photo.webp");
        assert_eq!(output_name(None, "mp3"), "converted.mp3");
    }

    #[test]
    fn test_cli_parses_batch_arguments() {
        let cli = Cli::try_parse_from([
            "file-converter",
            "image",
            "a.png",
            "b.png",
            "--to",
            "webp",
            "--opt",
            "quality=80",
            "--no-download",
        ])
        .unwrap();

        assert_eq!(cli.media, MediaType::Image);
        assert_eq!(cli.files.len(), 2);
        assert_eq!(cli.options, vec![("quality".to_string(), "80".to_string())]);
        assert!(cli.no_download);
    }
}
