use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fatscope_core::{FatError, FileBlockSource, LongNamePolicy, ReaderOptions};
use fatscope_fat32::{DirEntry, Fat32Volume, PartitionTable, ResolvedEntry};
use log::debug;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

type Volume = Fat32Volume<FileBlockSource>;

#[derive(Parser)]
#[command(name = "fatscope")]
#[command(about = "Read-only explorer for FAT32 disk images", long_about = None)]
struct Cli {
    /// Disk image or block device
    image: PathBuf,

    /// MBR slot of the FAT32 partition (default: first FAT32 slot)
    #[arg(short, long, global = true, conflicts_with = "lba")]
    partition: Option<usize>,

    /// Start sector of the volume, bypassing the partition table
    #[arg(long, global = true)]
    lba: Option<u64>,

    /// Reject malformed long filenames instead of accepting them
    #[arg(long, global = true)]
    strict: bool,

    /// Reader options as JSON
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the MBR partition table
    Partitions,
    /// Show volume geometry
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Include "." and ".." entries
        #[arg(short, long)]
        all: bool,
    },
    /// Write a file's content to stdout
    Cat { path: String },
    /// Show an entry and the clusters it occupies
    Stat { path: String },
}

#[derive(Serialize)]
struct StatReport<'a> {
    #[serde(flatten)]
    entry: &'a ResolvedEntry,
    clusters: Vec<u32>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_options(cli: &Cli) -> anyhow::Result<ReaderOptions> {
    let mut options = match &cli.config {
        Some(path) => ReaderOptions::from_file(path)
            .with_context(|| format!("Failed to load reader options from {}", path.display()))?,
        None => ReaderOptions::default(),
    };
    if cli.strict {
        options.long_names = LongNamePolicy::Strict;
    }
    Ok(options)
}

fn open_source(cli: &Cli) -> anyhow::Result<FileBlockSource> {
    FileBlockSource::open(&cli.image).with_context(|| format!("Failed to open {}", cli.image.display()))
}

fn open_volume(cli: &Cli) -> anyhow::Result<Volume> {
    let options = load_options(cli)?;
    let source = open_source(cli)?;

    if let Some(lba) = cli.lba {
        return Ok(Fat32Volume::open_with_options(source, lba, options)?);
    }
    if cli.partition.is_some() {
        return Ok(Fat32Volume::open_partition(source, cli.partition, options)?);
    }

    // An unpartitioned image has its boot sector at LBA 0
    match Fat32Volume::open_with_options(source, 0, options.clone()) {
        Ok(volume) => Ok(volume),
        Err(FatError::UnsupportedLayout(reason)) => {
            debug!("LBA 0 is not a FAT32 boot sector ({}), trying the partition table", reason);
            Ok(Fat32Volume::open_partition(open_source(cli)?, None, options)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

fn print_entry(entry: &DirEntry) {
    let modified = entry
        .modified
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16));
    let size = if entry.is_directory() {
        "<DIR>".to_string()
    } else {
        entry.file_size.to_string()
    };
    println!("{}  {}  {:>10}  {}", entry.attributes, modified, size, entry.name());
}

fn cmd_partitions(cli: &Cli) -> anyhow::Result<()> {
    let source = open_source(cli)?;
    let table = PartitionTable::read(&source)?;
    if cli.json {
        return print_json(&table);
    }

    println!("Disk signature: {:#010x}\n", table.disk_signature);
    let mut any = false;
    for entry in table.used() {
        any = true;
        println!("Partition {}: {} (type {:#04x})", entry.slot, entry.type_name(), entry.system_id);
        println!("  Start LBA: {}", entry.lba_start);
        println!("  Size: {}", format_size(entry.size_bytes()));
        println!("  Bootable: {}", if entry.is_bootable() { "Yes" } else { "No" });
    }
    if !any {
        println!("No partitions found.");
    }
    Ok(())
}

fn cmd_info(volume: &Volume, json: bool) -> anyhow::Result<()> {
    let geometry = volume.geometry();
    if json {
        return print_json(geometry);
    }

    println!("Volume label: {}", geometry.volume_label);
    println!("Volume ID: {:08X}", geometry.volume_id);
    println!("Partition offset: {:#x}", geometry.partition_offset);
    println!("Cluster size: {} bytes ({} sectors)", geometry.cluster_size(), geometry.sectors_per_cluster);
    println!("Sectors per FAT: {}", geometry.sectors_per_fat);
    println!("FAT start: {:#x}", geometry.fat_begin_offset);
    println!("Data start: {:#x}", geometry.data_begin_offset);
    println!("Root cluster: {}", geometry.root_dir_first_cluster);
    println!(
        "Data clusters: {} ({})",
        geometry.cluster_count,
        format_size(geometry.cluster_count as u64 * geometry.cluster_size() as u64)
    );
    Ok(())
}

fn cmd_ls(volume: &Volume, path: &str, all: bool, json: bool) -> anyhow::Result<()> {
    let mut entries = Vec::new();
    for entry in volume.list_path(path)? {
        let entry = entry?;
        if entry.is_dot_entry() && !all {
            continue;
        }
        entries.push(entry);
    }

    if json {
        return print_json(&entries);
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn cmd_cat(volume: &Volume, path: &str) -> anyhow::Result<()> {
    let entry = volume.resolve(path)?;
    let mut stream = volume.open_file(&entry)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    while let Some(chunk) = stream.read_chunk()? {
        out.write_all(&chunk)?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_stat(volume: &Volume, path: &str, json: bool) -> anyhow::Result<()> {
    let entry = volume.resolve(path)?;
    let clusters = volume.cluster_chain(&entry)?;
    if json {
        return print_json(&StatReport { entry: &entry, clusters });
    }

    println!("Name: {}", entry.display_name());
    if !entry.short_name.is_empty() && entry.short_name != entry.name {
        println!("Short name: {}", entry.short_name);
    }
    println!("Type: {}", if entry.is_directory() { "directory" } else { "file" });
    println!("Attributes: {}", entry.attributes);
    if !entry.is_directory() {
        println!("Size: {} ({} bytes)", format_size(entry.file_size as u64), entry.file_size);
    }
    if let Some(modified) = entry.modified {
        println!("Modified: {}", modified);
    }
    println!("First cluster: {}", entry.start_cluster);
    println!("Clusters: {}", clusters.len());
    if !clusters.is_empty() {
        println!("  {:?}", clusters);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Partitions => cmd_partitions(&cli),
        Commands::Info => cmd_info(&open_volume(&cli)?, cli.json),
        Commands::Ls { path, all } => cmd_ls(&open_volume(&cli)?, path, *all, cli.json),
        Commands::Cat { path } => {
            if cli.json {
                bail!("--json is not supported for cat");
            }
            cmd_cat(&open_volume(&cli)?, path)
        }
        Commands::Stat { path } => cmd_stat(&open_volume(&cli)?, path, cli.json),
    }
}
