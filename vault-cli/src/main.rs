use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use vault_core::config::{VaultConfig, CONFIG_FILE};
use vault_core::store::JsonDirStore;
use vault_core::{UploadRequest, Vault, VaultError};

#[derive(Parser)]
#[command(name = "vault", version, about = "Chunked file vault with Merkle integrity checks")]
struct Cli {
    /// Data directory holding node directories and metadata
    #[arg(long, global = true, env = "VAULT_ROOT")]
    root: Option<PathBuf>,
    /// Config file (default: <root>/vault.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Comma-separated node ids, in placement order
    #[arg(long, global = true, value_delimiter = ',')]
    nodes: Option<Vec<String>>,
    #[arg(long, global = true)]
    chunk_size: Option<usize>,
    #[arg(long, global = true, env = "VAULT_OWNER", default_value = "local")]
    owner: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Chunk a local file into the vault
    Upload {
        path: PathBuf,
        /// Stored file name (default: the path's file name)
        #[arg(long)]
        name: Option<String>,
        /// Declared MIME type (default: guessed from the name)
        #[arg(long = "type")]
        file_type: Option<String>,
        /// File id (default: random UUID)
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value_t = false)]
        enforce_quota: bool,
    },
    /// List the owner's files, newest first
    List {
        #[arg(long)]
        recent: Option<usize>,
    },
    /// Reassemble a file from its chunks
    Download {
        file_id: String,
        /// Output path, or "-" for stdout (default: the stored file name)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Re-hash stored chunks against the committed digests
    Verify {
        file_id: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Storage used by the owner against the quota
    Usage,
    /// Remove chunks no committed record references
    Sweep {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let mut cfg = load_config(&cli)?;
    let owner = cli.owner;
    match cli.cmd {
        Cmd::Upload { path, name, file_type, id, enforce_quota } => {
            cfg.enforce_quota |= enforce_quota;
            let vault = open(&cfg)?;
            let req = UploadRequest { file_id: id, file_name: name.unwrap_or_default(), file_type };
            let summary = vault
                .upload_path(&owner, &path, req)
                .with_context(|| format!("upload {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Cmd::List { recent } => {
            let vault = open(&cfg)?;
            let files = match recent {
                Some(n) => vault.recent(&owner, n)?,
                None => vault.list(&owner)?,
            };
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        Cmd::Download { file_id, output } => download(&open(&cfg)?, &owner, &file_id, output)?,
        Cmd::Verify { file_id, json } => verify(&open(&cfg)?, &owner, &file_id, json)?,
        Cmd::Usage => {
            let usage = open(&cfg)?.usage(&owner)?;
            println!("{}", serde_json::to_string_pretty(&usage)?);
        }
        Cmd::Sweep { dry_run } => {
            let report = open(&cfg)?.sweep(dry_run)?;
            for o in &report.orphans {
                println!("{}", o);
            }
            println!(
                "scanned={} referenced={} orphans={} removed={}{}",
                report.scanned,
                report.referenced,
                report.orphans.len(),
                report.removed,
                if dry_run { " (dry run)" } else { "" }
            );
        }
    }
    Ok(())
}

/// Defaults, then the config file, then flags and environment.
fn load_config(cli: &Cli) -> Result<VaultConfig> {
    let file = match &cli.config {
        Some(p) => Some(p.clone()),
        None => {
            let root = cli.root.clone().unwrap_or_else(|| VaultConfig::default().root);
            Some(root.join(CONFIG_FILE)).filter(|p| p.exists())
        }
    };
    let mut cfg = match &file {
        Some(p) => {
            debug!("config: {}", p.display());
            VaultConfig::load(p).with_context(|| format!("load config {}", p.display()))?
        }
        None => VaultConfig::default(),
    };
    if let Some(r) = &cli.root {
        cfg.root = r.clone();
    }
    if let Some(n) = &cli.nodes {
        cfg.nodes = n.iter().map(|s| s.trim().to_string()).collect();
    }
    if let Some(cs) = cli.chunk_size {
        cfg.chunk_size = cs;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn open(cfg: &VaultConfig) -> Result<Vault<JsonDirStore>> {
    Vault::open(cfg).with_context(|| format!("open vault at {}", cfg.root.display()))
}

fn lookup_err(e: VaultError, file_id: &str) -> anyhow::Error {
    if e.is_not_found() {
        anyhow!("file not found: {}", file_id)
    } else {
        e.into()
    }
}

fn download(
    vault: &Vault<JsonDirStore>,
    owner: &str,
    file_id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let dl = vault.open_download(owner, file_id).map_err(|e| lookup_err(e, file_id))?;
    let info = dl.info();
    eprintln!("Content-Type: {}", info.content_type);
    eprintln!("Content-Disposition: {}", info.content_disposition());

    let n = match output {
        Some(p) if p.as_os_str() == "-" => dl.stream_to(&mut io::stdout().lock())?,
        other => {
            // The stored name is untrusted: keep only its last component.
            let path = other.unwrap_or_else(|| {
                Path::new(&info.file_name)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(file_id))
            });
            let f = File::create(&path).with_context(|| format!("create {}", path.display()))?;
            dl.stream_to(&mut BufWriter::new(f))
                .with_context(|| format!("write {}", path.display()))?
        }
    };
    debug!("downloaded {} ({} bytes)", file_id, n);
    Ok(())
}

fn verify(vault: &Vault<JsonDirStore>, owner: &str, file_id: &str, json: bool) -> Result<()> {
    let vr = vault.verify(owner, file_id).map_err(|e| lookup_err(e, file_id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&vr)?);
        return Ok(());
    }
    eprintln!(
        "Chunks ok={}, bad={}; Merkle={}; File hash={}",
        vr.chunks_ok,
        vr.chunks_bad,
        if vr.merkle_root_matches { "OK" } else { "MISMATCH" },
        if vr.file_hash_matches { "OK" } else { "MISMATCH" }
    );
    for (i, ok) in vr.chunk_matches.iter().enumerate() {
        if !ok {
            eprintln!("chunk {} does not match its digest", i);
        }
    }
    if vr.is_intact() {
        println!("OK");
    } else {
        println!("BAD");
    }
    Ok(())
}
