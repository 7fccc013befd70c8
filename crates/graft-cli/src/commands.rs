use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use graft_codec::fragment::parse_fragment;
use graft_codec::{node_from_json, ClosureEntry, ClosureTable};
use graft_registry::TypeRegistry;
use graft_sdk::{Graft, GraftConfig, RemoteConfig};
use graft_server::{GraftServer, ServerConfig};
use graft_transport::SqliteTransport;
use graft_types::{ContentHash, Node};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::cli::*;

const DEFAULT_CONFIG_FILE: &str = "graft.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Serve(args) => cmd_serve(&cli, args),
        Command::Send(args) => cmd_send(&cli, args),
        Command::Receive(args) => cmd_receive(&cli, args),
        Command::Id(args) => cmd_id(&cli, args),
        Command::Show(args) => cmd_show(&cli, args),
        Command::Closure(args) => cmd_closure(&cli, args),
        Command::Stats(_) => cmd_stats(&cli),
    }
}

fn cmd_serve(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    let mut config = match &args.server_config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            ServerConfig::from_toml_str(&text)?
        }
        None => ServerConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_addr = bind
            .parse()
            .with_context(|| format!("invalid bind address {bind}"))?;
    }
    if let Some(storage) = &args.storage {
        config.storage_root = Some(storage.clone());
    }
    if let Some(token) = &cli.token {
        config.auth_token = Some(token.clone());
    }

    let storage = match &config.storage_root {
        Some(root) => root.display().to_string(),
        None => "memory".into(),
    };
    println!(
        "Graft server on {} (storage: {})",
        config.bind_addr.to_string().bold(),
        storage
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        GraftServer::new(config)
            .serve_on(listener, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_send(cli: &Cli, args: &SendArgs) -> anyhow::Result<()> {
    let node = read_document(&args.input)?;
    let graft = open(cli)?;
    let outcome = if args.local_only || graft.remote().is_none() {
        graft.save(&node)?
    } else {
        graft.send(&node)?
    };

    match cli.format {
        OutputFormat::Json => print_json(&json!({
            "root": outcome.root.to_hex(),
            "fragments": outcome.fragments_written,
            "bytes": outcome.bytes_written,
            "descendants": outcome.closure.len(),
        }))?,
        OutputFormat::Text => {
            println!("{} Sent {}", "✓".green().bold(), outcome.root.to_hex().yellow());
            println!("  Fragments:   {}", outcome.fragments_written);
            println!("  Bytes:       {}", outcome.bytes_written);
            println!("  Descendants: {}", outcome.closure.len());
            let target = match graft.remote() {
                Some(remote) if !args.local_only => remote.name().to_string(),
                _ => graft.local().name().to_string(),
            };
            println!("  Target:      {}", target.cyan());
        }
    }
    Ok(())
}

fn cmd_receive(cli: &Cli, args: &ReceiveArgs) -> anyhow::Result<()> {
    let hash = parse_hash(&args.hash)?;
    let graft = open(cli)?;
    let node = graft.receive(&hash)?;
    let document = graft.decomposer().to_json(&node)?;
    let text = serde_json::to_string_pretty(&document)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, text + "\n")
                .with_context(|| format!("writing {}", path.display()))?;
            if cli.format == OutputFormat::Text {
                println!(
                    "{} Received {} into {}",
                    "✓".green().bold(),
                    hash.short_hex().yellow(),
                    path.display()
                );
            }
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn cmd_id(cli: &Cli, args: &IdArgs) -> anyhow::Result<()> {
    let node = read_document(&args.input)?;
    let config = load_config(cli)?;
    let decomposer =
        graft_codec::Decomposer::with_config(Arc::new(TypeRegistry::new()), config.decomposer);
    let id = decomposer.compute_id(&node)?;
    match cli.format {
        OutputFormat::Json => print_json(&json!({ "id": id.to_hex() })),
        OutputFormat::Text => {
            println!("{}", id.to_hex());
            Ok(())
        }
    }
}

fn cmd_show(cli: &Cli, args: &ShowArgs) -> anyhow::Result<()> {
    let hash = parse_hash(&args.hash)?;
    let graft = open(cli)?;
    let (bytes, source) = fetch(&graft, &hash)?;
    let body = parse_fragment(&hash, &bytes)?;

    match cli.format {
        OutputFormat::Json => print_json(&JsonValue::Object(body)),
        OutputFormat::Text => {
            println!(
                "Fragment {} ({} bytes, from {})",
                hash.to_hex().yellow().bold(),
                bytes.len(),
                source.cyan()
            );
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

fn cmd_closure(cli: &Cli, args: &ClosureArgs) -> anyhow::Result<()> {
    let hash = parse_hash(&args.hash)?;
    let graft = open(cli)?;
    let (bytes, _) = fetch(&graft, &hash)?;
    let closure = ClosureTable::of_fragment(&hash, &bytes)?;

    let hashes = closure.hashes();
    let present = graft.local().has_many(&hashes)?;
    let rows: Vec<(&ContentHash, &ClosureEntry, bool)> = closure
        .iter()
        .zip(present)
        .filter(|(_, present)| !args.missing || !present)
        .map(|((hash, entry), present)| (hash, entry, present))
        .collect();

    match cli.format {
        OutputFormat::Json => print_json(&JsonValue::Array(
            rows.iter()
                .map(|(hash, entry, present)| {
                    json!({
                        "hash": hash.to_hex(),
                        "depth": entry.depth(),
                        "path": match entry {
                            ClosureEntry::Path(path) => JsonValue::from(path.as_str()),
                            ClosureEntry::Depth(_) => JsonValue::Null,
                        },
                        "local": present,
                    })
                })
                .collect(),
        )),
        OutputFormat::Text => {
            if closure.is_empty() {
                println!("{} has no descendants.", hash.short_hex().yellow());
                return Ok(());
            }
            for (hash, entry, present) in &rows {
                let mark = if *present { "✓".green() } else { "✗".red() };
                println!("{} {}  depth {}", mark, hash.to_hex(), entry.depth());
            }
            println!(
                "\n{} descendants, {} shown",
                closure.len().to_string().bold(),
                rows.len()
            );
            Ok(())
        }
    }
}

fn cmd_stats(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let sqlite = SqliteTransport::open(&config.local)?;
    let count = sqlite.count()?;
    let bytes = sqlite.total_bytes()?;
    let path = config.local.db_path();

    match cli.format {
        OutputFormat::Json => print_json(&json!({
            "path": path.display().to_string(),
            "fragments": count,
            "bytes": bytes,
        })),
        OutputFormat::Text => {
            println!("Local cache {}", path.display().to_string().bold());
            println!("  Fragments: {}", count);
            println!("  Bytes:     {}", bytes);
            Ok(())
        }
    }
}

// ---- Helpers ----

/// The configuration file, if any, with command-line overrides applied.
fn load_config(cli: &Cli) -> anyhow::Result<GraftConfig> {
    let mut config = match &cli.config {
        Some(path) => GraftConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            GraftConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => GraftConfig::default(),
    };
    if let Some(local) = &cli.local {
        config.local.base_path = local.clone();
    }
    if let Some(url) = &cli.remote {
        config.remote.get_or_insert_with(RemoteConfig::default).base_url = url.clone();
    }
    if let Some(remote) = config.remote.as_mut() {
        if let Some(namespace) = &cli.namespace {
            remote.namespace = namespace.clone();
        }
        if let Some(token) = &cli.token {
            remote.token = Some(token.clone());
        }
    } else if cli.namespace.is_some() {
        bail!("--namespace needs a remote; pass --remote or configure [remote]");
    }
    debug!(
        local = %config.local.db_path().display(),
        remote = config.remote.as_ref().map(|r| r.base_url.as_str()),
        "loaded configuration"
    );
    Ok(config)
}

fn open(cli: &Cli) -> anyhow::Result<Graft> {
    Ok(Graft::open(load_config(cli)?, Arc::new(TypeRegistry::new()))?)
}

fn read_document(input: &str) -> anyhow::Result<Node> {
    let text = if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))?
    };
    let document: JsonValue =
        serde_json::from_str(&text).with_context(|| format!("parsing {input}"))?;
    Ok(node_from_json(&document)?)
}

/// A fragment from the local cache, or from the remote when the cache lacks it.
fn fetch(graft: &Graft, hash: &ContentHash) -> anyhow::Result<(Vec<u8>, String)> {
    if let Some(bytes) = graft.local().get(hash)? {
        return Ok((bytes, graft.local().name().to_string()));
    }
    if let Some(remote) = graft.remote() {
        if let Some(bytes) = remote.get(hash)? {
            return Ok((bytes, remote.name().to_string()));
        }
    }
    bail!("fragment {} not found", hash.to_hex())
}

fn parse_hash(s: &str) -> anyhow::Result<ContentHash> {
    ContentHash::from_hex(s.trim()).map_err(|e| anyhow!("invalid hash {s}: {e}"))
}

fn print_json(value: &JsonValue) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("graft").chain(args.iter().copied())).unwrap()
    }

    const DOCUMENT: &str = r#"{
        "_type": "Objects.Line",
        "units": "m",
        "@start": {"_type": "Objects.Point", "x": 0, "y": 0},
        "@end": {"_type": "Objects.Point", "x": 3.5, "y": 4}
    }"#;

    #[test]
    fn overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graft.toml");
        std::fs::write(
            &path,
            "[remote]\nbase_url = \"http://a:1\"\nnamespace = \"from-file\"\n",
        )
        .unwrap();
        let config = load_config(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--namespace",
            "p7",
            "--local",
            "/tmp/cache",
            "stats",
        ]))
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.base_url, "http://a:1");
        assert_eq!(remote.namespace, "p7");
        assert_eq!(config.local.base_path, Path::new("/tmp/cache"));
    }

    #[test]
    fn namespace_without_remote_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.toml");
        std::fs::write(&empty, "").unwrap();
        let result = load_config(&cli(&[
            "--config",
            empty.to_str().unwrap(),
            "--namespace",
            "p7",
            "stats",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_hash_is_rejected() {
        assert!(parse_hash("not-hex").is_err());
        assert!(parse_hash("abcd").is_err());
    }

    #[test]
    fn send_then_receive_locally() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("line.json");
        let output = dir.path().join("out.json");
        let cache = dir.path().join("cache");
        std::fs::write(&input, DOCUMENT).unwrap();
        let config = dir.path().join("graft.toml");
        std::fs::write(&config, "").unwrap();
        let base = vec![
            "--config".to_string(),
            config.display().to_string(),
            "--local".to_string(),
            cache.display().to_string(),
        ];
        let with = |rest: &[&str]| {
            let args = base.iter().cloned().chain(rest.iter().map(|s| s.to_string()));
            Cli::try_parse_from(std::iter::once("graft".to_string()).chain(args)).unwrap()
        };

        run_command(with(&["send", input.to_str().unwrap()])).unwrap();

        let id = graft_codec::Decomposer::new(Arc::new(TypeRegistry::new()))
            .compute_id(&read_document(input.to_str().unwrap()).unwrap())
            .unwrap();
        run_command(with(&["receive", &id.to_hex(), "-o", output.to_str().unwrap()])).unwrap();
        run_command(with(&["closure", &id.to_hex()])).unwrap();
        run_command(with(&["--format", "json", "show", &id.to_hex()])).unwrap();
        run_command(with(&["stats"])).unwrap();

        assert_eq!(
            read_document(output.to_str().unwrap()).unwrap(),
            read_document(input.to_str().unwrap()).unwrap()
        );
    }
}
