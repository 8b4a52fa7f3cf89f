use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::Colorize;
use dfs_client::{DfsClient, FileInfo};
use dfs_meta::MetaServer;
use serde_json::json;
use tokio::sync::watch;

use crate::cli::*;
use crate::config::FileConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = FileConfig::resolve(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::MetaServer(args) => cmd_meta_server(config, args).await,
        Command::DataServer(args) => cmd_data_server(config, args).await,
        command => {
            let mut client = DfsClient::connect(&config.client)
                .await
                .with_context(|| format!("connecting to metadata service at {}", config.client.meta_addr))?;
            run_client_command(&mut client, command, format).await
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn cmd_meta_server(config: FileConfig, args: MetaServerArgs) -> anyhow::Result<()> {
    let mut meta = config.meta;
    if let Some(bind) = args.bind {
        meta.bind_addr = bind;
    }
    if args.in_memory {
        meta.db_path = None;
    } else if let Some(db) = args.db {
        meta.db_path = Some(db);
    }
    let server = MetaServer::bind(&meta).await?;
    println!("{} Metadata service on {}", "✓".green().bold(), server.local_addr()?.to_string().bold());
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn cmd_data_server(config: FileConfig, args: DataServerArgs) -> anyhow::Result<()> {
    let mut data = config.data;
    if let Some(id) = args.node_id {
        data.node_id = id;
    }
    if let Some(bind) = args.bind {
        data.bind_addr = bind;
    }
    if args.advertise.is_some() {
        data.advertise_addr = args.advertise;
    }
    if let Some(root) = args.root {
        data.storage_root = root;
    }
    println!(
        "{} Block node {} on {} (blocks in {})",
        "✓".green().bold(),
        data.node_id.yellow(),
        data.bind_addr.to_string().bold(),
        data.storage_root.display()
    );
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });
    dfs_blockstore::run_data_node(data, rx).await?;
    Ok(())
}

fn done(format: OutputFormat, op: &str, text: String) {
    match format {
        OutputFormat::Text => println!("{} {}", "✓".green(), text),
        OutputFormat::Json => println!("{}", json!({ "ok": true, "op": op })),
    }
}

async fn run_client_command(client: &mut DfsClient, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Ls(args) => {
            let names = client.list_files(&args.path).await?;
            match format {
                OutputFormat::Text => {
                    for name in &names {
                        println!("{name}");
                    }
                }
                OutputFormat::Json => println!("{}", json!({ "path": args.path, "entries": names })),
            }
        }
        Command::Mkdir(args) => {
            client.create_directory(&args.path).await?;
            done(format, "mkdir", format!("Created directory {}", args.path.bold()));
        }
        Command::Touch(args) => {
            client.create_file(&args.path).await?;
            done(format, "touch", format!("Created {}", args.path.bold()));
        }
        Command::Put(args) => {
            let data = tokio::fs::read(&args.local)
                .await
                .with_context(|| format!("reading {}", args.local.display()))?;
            client.write_file(&args.remote, &data).await?;
            done(format, "put", format!("Wrote {} bytes to {}", data.len(), args.remote.bold()));
        }
        Command::Write(args) => {
            client.write_file(&args.remote, args.text.as_bytes()).await?;
            done(format, "write", format!("Wrote {} bytes to {}", args.text.len(), args.remote.bold()));
        }
        Command::Cat(args) => {
            let data = client
                .read_file(&args.remote, args.offset, args.length.unwrap_or(usize::MAX))
                .await?;
            match format {
                OutputFormat::Text => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(&data)?;
                    out.flush()?;
                }
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "path": args.remote, "offset": args.offset, "content": String::from_utf8_lossy(&data) })
                ),
            }
        }
        Command::Get(args) => {
            let n = client.download_file(&args.remote, &args.local).await?;
            done(format, "get", format!("Saved {} bytes to {}", n, args.local.display()));
        }
        Command::Rm(args) => {
            client.delete_file(&args.path).await?;
            done(format, "rm", format!("Deleted {}", args.path.bold()));
        }
        Command::Rmdir(args) => {
            client.delete_directory(&args.path).await?;
            done(format, "rmdir", format!("Deleted directory {}", args.path.bold()));
        }
        Command::Cp(args) => {
            client.copy_file(&args.src, &args.dst).await?;
            done(format, "cp", format!("Copied {} → {}", args.src.bold(), args.dst.bold()));
        }
        Command::Mv(args) => {
            client.move_file(&args.src, &args.dst).await?;
            done(format, "mv", format!("Moved {} → {}", args.src.bold(), args.dst.bold()));
        }
        Command::Info(args) => {
            let info = client.get_file_info(&args.path).await?;
            match format {
                OutputFormat::Text => print_info(&info),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }
        Command::Size(args) => {
            let size = client.get_file_size(&args.path).await?;
            match format {
                OutputFormat::Text => println!("{size}"),
                OutputFormat::Json => println!("{}", json!({ "path": args.path, "size": size })),
            }
        }
        Command::MetaServer(_) | Command::DataServer(_) => {
            anyhow::bail!("server commands do not take a client connection")
        }
    }
    Ok(())
}

fn print_info(info: &FileInfo) {
    let kind = if info.is_directory { "directory".cyan() } else { "file".normal() };
    println!("{} ({})", info.path.bold(), kind);
    println!("  Owner: {}", info.owner.yellow());
    println!("  Size: {}", info.size);
    match DateTime::<Utc>::from_timestamp_millis(info.created_at_ms) {
        Some(created) => println!("  Created: {}", created.to_rfc3339()),
        None => println!("  Created: {} ms", info.created_at_ms),
    }
    if !info.parent_name.is_empty() {
        println!("  Parent: {}", info.parent_name);
    }
    for location in &info.locations {
        println!("  Block: {}", location.to_string().dimmed());
    }
}
