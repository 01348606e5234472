use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::binary::{self, ShaderConfig, ShaderInfo};
use crate::cache::{DiskCache, DiskEntry, PersistentKey, PersistentStore, default_cache_root};
use crate::utils::logger;
use crate::version::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "shadercache",
    version = VERSION,
    about = "Inspect and maintain the persistent shader binary cache"
)]
pub struct ShaderCacheCli {
    #[arg(long, global = true)]
    /// Cache directory; defaults to $SHADERCACHE_DIR or the user cache directory.
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print entry count, total size and the most recent write.
    Stats,
    /// Check every entry's checksum.
    Verify {
        #[arg(long)]
        /// Delete entries that fail verification.
        purge: bool,
    },
    /// Delete every entry.
    Clear,
    /// Decode one entry and print its metadata.
    Show { key: String },
}

impl ShaderCacheCli {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn cache_dir(&self) -> Option<&PathBuf> {
        self.cache_dir.as_ref()
    }

    fn open_cache(&self) -> Result<DiskCache> {
        let root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_root()?,
        };
        DiskCache::open(&root)
            .with_context(|| format!("failed to open shader cache at {}", root.display()))
    }
}

pub fn run() -> Result<()> {
    logger::init_logging();
    let cli = ShaderCacheCli::parse();
    let cache = cli.open_cache()?;
    debug!(root = %cache.root().display(), command = ?cli.command, "running");
    match &cli.command {
        Command::Stats => handle_stats(&cache),
        Command::Verify { purge } => handle_verify(&cache, *purge),
        Command::Clear => handle_clear(&cache),
        Command::Show { key } => handle_show(&cache, key),
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn handle_stats(cache: &DiskCache) -> Result<()> {
    let entries = cache.entries()?;
    let total: u64 = entries.iter().map(|entry| entry.size).sum();
    let newest = entries.iter().filter_map(|entry| entry.modified).max();

    println!("{} {}", "cache".bold(), cache.root().display());
    println!("  entries: {}", entries.len());
    println!("  bytes:   {total}");
    match newest {
        Some(time) => println!("  newest:  {}", format_time(time)),
        None => println!("  newest:  -"),
    }
    Ok(())
}

/// Reads and decodes one entry, returning the failure text if it is bad.
fn check_entry(entry: &DiskEntry) -> Option<String> {
    match std::fs::read(&entry.path) {
        Ok(data) => binary::decode(&data).err().map(|err| err.to_string()),
        Err(err) => Some(err.to_string()),
    }
}

fn handle_verify(cache: &DiskCache, purge: bool) -> Result<()> {
    let entries = cache.entries()?;
    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("verifying [{elapsed_precise}] {wide_bar} {pos}/{len}")?
            .progress_chars("=> "),
    );

    let corrupt: Vec<(&DiskEntry, String)> = entries
        .par_iter()
        .filter_map(|entry| {
            let failure = check_entry(entry);
            pb.inc(1);
            failure.map(|reason| (entry, reason))
        })
        .collect();
    pb.finish_and_clear();

    for (entry, reason) in &corrupt {
        println!("{} {} ({reason})", "corrupt".red().bold(), entry.key);
    }
    if purge {
        for (entry, _) in &corrupt {
            cache.remove(&entry.key)?;
        }
        info!(removed = corrupt.len(), "purged corrupt cache entries");
    }

    let verdict = if corrupt.is_empty() {
        "ok".green().bold()
    } else if purge {
        "purged".yellow().bold()
    } else {
        "corrupt".red().bold()
    };
    println!(
        "{verdict} {} entries checked, {} corrupt",
        entries.len(),
        corrupt.len()
    );
    if !corrupt.is_empty() && !purge {
        bail!("{} corrupt cache entries", corrupt.len());
    }
    Ok(())
}

fn handle_clear(cache: &DiskCache) -> Result<()> {
    let removed = cache.clear()?;
    println!("{} {removed} entries", "removed".green().bold());
    Ok(())
}

#[derive(Serialize)]
struct EntryView<'a> {
    key: String,
    entry_bytes: usize,
    code_bytes: usize,
    config: &'a ShaderConfig,
    info: &'a ShaderInfo,
    has_disassembly: bool,
}

fn handle_show(cache: &DiskCache, key: &str) -> Result<()> {
    let key = PersistentKey::from_hex(key)?;
    let Some(data) = cache.get(&key)? else {
        bail!("no cache entry {key}");
    };
    let binary = binary::decode(&data).with_context(|| format!("cache entry {key} is corrupt"))?;

    let view = EntryView {
        key: key.to_hex(),
        entry_bytes: data.len(),
        code_bytes: binary.size(),
        config: &binary.config,
        info: &binary.info,
        has_disassembly: binary.disassembly.is_some(),
    };
    print!("{}", serde_yaml::to_string(&view)?);
    if let Some(text) = &binary.disassembly {
        println!("{}", "== disassembly ==".bold());
        println!("{text}");
    }
    Ok(())
}
