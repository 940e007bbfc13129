// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Download utility for the ProPublica COMPAS two-year recidivism CSV

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const COMPAS_URL: &str =
    "https://raw.githubusercontent.com/propublica/compas-analysis/master/compas-scores-two-years.csv";
const COMPAS_FILENAME: &str = "compas-scores-two-years.csv";

#[derive(Parser, Debug)]
#[command(name = "download-compas")]
#[command(about = "Download the COMPAS two-year recidivism dataset")]
#[command(version)]
struct Args {
    /// Source URL
    #[arg(short, long, default_value = COMPAS_URL)]
    url: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Expected SHA-256 of the file (hex); verification is skipped when absent
    #[arg(long)]
    sha256: Option<String>,

    /// Force re-download even if the file exists
    #[arg(short, long)]
    force: bool,
}

fn download_file(url: &str, output_path: &Path) -> Result<()> {
    tracing::info!("Downloading from: {}", url);

    let response = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?
        .get(url)
        .send()
        .context("Failed to send request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status: {}", response.status());
    }

    let pb = ProgressBar::new(response.content_length().unwrap_or(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    stream_to_file(response, output_path, &pb)?;
    pb.finish_with_message("Downloaded");
    Ok(())
}

/// Sibling path the download streams into before it is complete
fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output_path.with_file_name(name)
}

fn write_part(mut reader: impl Read, part: &Path, pb: &ProgressBar) -> Result<()> {
    let mut file =
        File::create(part).with_context(|| format!("Failed to create {}", part.display()))?;
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer).context("Failed to read response")?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        pb.inc(bytes_read as u64);
    }
    file.sync_all()?;
    Ok(())
}

/// Copy `reader` into `output_path`, which only appears once every byte has
/// been written. A failed transfer leaves neither file behind.
fn stream_to_file(reader: impl Read, output_path: &Path, pb: &ProgressBar) -> Result<()> {
    let part = partial_path(output_path);

    if let Err(e) = write_part(reader, &part, pb) {
        if let Err(cleanup) = std::fs::remove_file(&part) {
            tracing::warn!("Could not remove {}: {}", part.display(), cleanup);
        }
        return Err(e);
    }

    std::fs::rename(&part, output_path)
        .with_context(|| format!("Failed to move download into {}", output_path.display()))?;
    Ok(())
}

fn sha256_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.output)?;
    let output_path = args.output.join(COMPAS_FILENAME);

    if output_path.exists() && !args.force {
        tracing::info!("File already exists: {}", output_path.display());
        tracing::info!("Use --force to re-download");
    } else if let Err(e) = download_file(&args.url, &output_path) {
        tracing::error!("Failed to download {}: {}", COMPAS_FILENAME, e);
        tracing::info!("Manual download instructions:");
        tracing::info!("  1. Visit: https://github.com/propublica/compas-analysis");
        tracing::info!("  2. Save {} to: {}", COMPAS_FILENAME, args.output.display());
        return Err(e);
    }

    let digest = sha256_hex(&output_path)?;
    println!("SHA-256: {}", digest);

    if let Some(expected) = args.sha256 {
        if !digest.eq_ignore_ascii_case(expected.trim()) {
            anyhow::bail!("Checksum mismatch: expected {}, got {}", expected, digest);
        }
        tracing::info!("Checksum verified");
    }

    println!("Dataset ready: {}", output_path.display());
    Ok(())
}
