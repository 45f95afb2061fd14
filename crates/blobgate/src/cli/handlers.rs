//! Command handlers.

use super::commands::{Commands, OutputFormat};
use anyhow::Context;
use blobgate::{FileMetadata, Gateway, GatewayConfig, StorageBackend, StorageObject};
use blobgate_storage::guess_content_type;
use bytes::Bytes;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Run one CLI command against the configured gateway.
pub async fn handle_command(command: Commands, config: &GatewayConfig) -> anyhow::Result<()> {
    if let Commands::Config = command {
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    let gateway = Gateway::from_config(config)
        .await
        .context("Failed to initialize gateway")?;

    match command {
        Commands::Upload {
            file,
            path,
            content_type,
            format,
        } => upload(&gateway, &file, path.as_deref(), content_type, format).await,

        Commands::Download { path, output } => download(&gateway, &path, output.as_deref()).await,

        Commands::Delete { path } => {
            if gateway.delete(&path).await? {
                println!("Deleted {}", path);
            } else {
                println!("{} did not exist", path);
            }
            Ok(())
        }

        Commands::Exists { path } => {
            println!("{}", gateway.exists(&path).await?);
            Ok(())
        }

        Commands::List {
            prefix,
            recursive,
            format,
        } => list(&gateway, prefix.as_deref(), recursive, format).await,

        Commands::Url { path, expires } => {
            let url = gateway
                .url(&path, expires.map(Duration::from_secs))
                .await?;
            println!("{}", url);
            Ok(())
        }

        Commands::Stats { format } => stats(&gateway, format).await,

        Commands::Extract { path } => {
            let extracted = gateway.extract_text(&path).await?;
            println!("{}", extracted.text());
            eprintln!("confidence: {:.2}", extracted.confidence());
            Ok(())
        }

        Commands::Config => Ok(()),
    }
}

async fn upload(
    gateway: &Gateway,
    file: &Path,
    path: Option<&str>,
    content_type: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file_name));
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let metadata = FileMetadata::for_payload(content_type, extension, &data);

    let stored = gateway.upload(Bytes::from(data), path, metadata).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stored)?),
        OutputFormat::Human => {
            println!("Stored {}", stored.object.path);
            println!("  Size: {} bytes", stored.object.size_bytes);
            println!("  Content type: {}", stored.metadata.content_type);
            println!("  Checksum: {}", stored.metadata.checksum);
            println!("  Compressed: {}", stored.metadata.compressed);
            println!("  Encrypted: {}", stored.metadata.encrypted);
            if let Some(url) = &stored.object.url {
                println!("  URL: {}", url);
            }
        }
    }
    Ok(())
}

async fn download(gateway: &Gateway, path: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let (data, metadata) = gateway.download(path).await?;
    match output {
        Some(output) => {
            tokio::fs::write(output, &data)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            eprintln!(
                "Wrote {} bytes ({}) to {}",
                data.len(),
                metadata.content_type,
                output.display()
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn list(
    gateway: &Gateway,
    prefix: Option<&str>,
    recursive: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut stream = gateway.list(prefix, recursive);
    let mut objects: Vec<StorageObject> = Vec::new();

    while let Some(object) = stream.next().await {
        let object = object?;
        match format {
            OutputFormat::Human => println!(
                "{:<48} {:>12} {:<28} {}",
                object.path,
                object.size_bytes,
                object.content_type,
                object.created_at.format("%Y-%m-%d %H:%M:%S")
            ),
            OutputFormat::Json => objects.push(object),
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&objects)?);
    }
    Ok(())
}

async fn stats(gateway: &Gateway, format: OutputFormat) -> anyhow::Result<()> {
    let storage = gateway.stats();
    let cache = gateway.cache_stats().await;

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({ "storage": storage, "cache": cache });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Human => {
            println!("Storage ({}):", gateway.backend().inner().name());
            println!("  Uploads: {}", storage.uploads());
            println!("  Downloads: {}", storage.downloads());
            println!("  Deletes: {}", storage.deletes());
            println!("  Errors: {}", storage.errors());
            println!("  Bytes uploaded: {}", storage.bytes_uploaded());
            println!("  Bytes downloaded: {}", storage.bytes_downloaded());
            if let Some(cache) = cache {
                println!("Cache:");
                println!("  Hits: {}", cache.hits());
                println!("  Misses: {}", cache.misses());
                println!("  Errors: {}", cache.errors());
                println!("  Size: {} bytes", cache.size_bytes());
                println!("  Hit ratio: {:.2}", cache.hit_ratio());
            }
        }
    }
    Ok(())
}
