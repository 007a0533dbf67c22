use std::path::PathBuf;
use std::fs::OpenOptions;
use clap::Parser;
use serde::Serialize;

mod array;
mod buffer;
mod error;
mod filesys;
mod io;
mod journal;
mod logger;
mod problem;
#[cfg(test)]
mod testimg;

use error::CheckError;
use filesys::FsType;
use filesys::e2fs::{self, Fs};
use io::FileChannel;
use logger::Logger;
use problem::{CliReporter, FixPolicy, Reporter};

#[derive(Debug, Parser)]
struct Args {
    /// Drive path
    #[clap(short, long, parse(from_os_str), value_name = "DRIVE")]
    drive: PathBuf,

    /// Open the drive read-only and answer no to every prompt
    #[clap(short = 'n', long, conflicts_with_all = &["yes", "preen"])]
    no: bool,

    /// Answer yes to every prompt
    #[clap(short = 'y', long, conflicts_with = "preen")]
    yes: bool,

    /// Apply safe fixes without prompting, decline the rest
    #[clap(short = 'p', long)]
    preen: bool,

    /// Type of file system
    #[clap(short = 't', long = "type", arg_enum, value_name = "TYPE")]
    fs_type: Option<FsType>,

    /// Set verbosity of the output (can be used multiple times)
    #[clap(short, long, parse(from_occurrences))]
    verbose: u32,

    /// Log file
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print a JSON summary of the journal state when done
    #[clap(long)]
    summary: bool,
}

fn main()
{
    let args = Args::parse();

    let mut cfg = Config::default();
    cfg.drive_path = args.drive;
    cfg.readonly = args.no;
    cfg.verbosity = args.verbose;
    cfg.log_file_path = args.log_file;
    cfg.summary = args.summary;
    cfg.policy = if args.yes {
        FixPolicy::Yes
    } else if args.no {
        FixPolicy::No
    } else if args.preen {
        FixPolicy::Preen
    } else {
        FixPolicy::Ask
    };

    let mut log_file = None;

    // Create the log file in rw mode.

    if let Some(path) = &cfg.log_file_path {
        let f = OpenOptions::new()
            .create(true)
            .read(false)
            .write(true)
            .open(&path);

        log_file = match f {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: {}: {}", &path.display(), e.to_string());
                cfg.log_file_path = None;
                None
            }
        };
    }

    // Open the drive; rw unless running read-only.

    let drive = OpenOptions::new()
        .create(false)
        .read(true)
        .write(!cfg.readonly)
        .open(&cfg.drive_path);

    let drive = match drive {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}: {}", &cfg.drive_path.display(), e.to_string());
            std::process::exit(8);
        }
    };

    let mut chan = FileChannel::new(drive, 1024);

    // Set or detect the FS type.

    if let Some(fs_type) = args.fs_type {
        cfg.fs_type = fs_type;
    } else {
        cfg.fs_type = match filesys::detect_fs(&mut chan) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("error: {}: {}", &cfg.drive_path.display(), e.to_string());
                std::process::exit(8);
            }
        };
    }

    let fs = match Fs::open(Box::new(chan)) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("error: {}: {}", &cfg.drive_path.display(), e.to_string());
            std::process::exit(8);
        }
    };

    let mut context = Context {
        device_name: cfg.drive_path.display().to_string(),
        readonly: cfg.readonly,
        logger: Logger::new(cfg.verbosity, log_file),
        reporter: Box::new(CliReporter::new(cfg.policy)),
        fs,
    };

    if let Err(e) = process_drive(&mut context, &cfg) {
        eprintln!("error: {}: {}", &context.device_name, e.to_string());
        std::process::exit(8);
    }
}

/// Normalizes the journal state of the drive: checks the superblock's
/// journal fields, replays the journal when the image needs recovery, and
/// flushes any superblock changes.
fn process_drive(ctx: &mut Context, cfg: &Config) -> Result<(), CheckError>
{
    journal::check_journal(ctx)?;

    let mut recovered = false;
    if e2fs::IncompatFeatures(ctx.fs.sb.s_feature_incompat).has_recover() {
        journal::run_journal(ctx)?;
        recovered = true;
    }

    ctx.fs.flush()?;

    let stats = ctx.fs.stats;
    ctx.logger.log(3, &format!(
        "buffer layer: {} reads, {} writes, {} live",
        stats.reads, stats.writes, stats.live,
    ));

    if cfg.summary {
        print_summary(ctx, cfg, recovered);
    }

    Ok(())
}

/// The `--summary` report.
#[derive(Debug, Serialize)]
struct Summary<'a> {
    device: &'a str,
    fs_type: FsType,
    has_journal: bool,
    journal_inode: u32,
    needs_recovery: bool,
    recovered: bool,
    valid: bool,
}

fn print_summary(ctx: &mut Context, cfg: &Config, recovered: bool)
{
    let sb = &ctx.fs.sb;
    let summary = Summary {
        device: &ctx.device_name,
        fs_type: cfg.fs_type,
        has_journal: e2fs::CompatFeatures(sb.s_feature_compat).has_has_journal(),
        journal_inode: sb.s_journal_inum,
        needs_recovery: e2fs::IncompatFeatures(sb.s_feature_incompat).has_recover(),
        recovered,
        valid: e2fs::State(sb.s_state).has_valid(),
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: {}", e.to_string()),
    }
}

/// Contains configuration options.
#[derive(Debug)]
pub struct Config {
    pub fs_type: FsType,
    pub drive_path: PathBuf,
    pub log_file_path: Option<PathBuf>,
    pub readonly: bool,
    pub verbosity: u32,
    pub policy: FixPolicy,
    pub summary: bool,
}

impl Default for Config {
    fn default() -> Self
    {
        Self {
            fs_type: FsType::Ext2,
            drive_path: PathBuf::default(),
            log_file_path: None,
            readonly: false,
            verbosity: 0,
            policy: FixPolicy::Ask,
            summary: false,
        }
    }
}

/// Contains shared mutable state.
pub struct Context {
    pub device_name: String,
    pub readonly: bool,
    pub logger: Logger,
    pub reporter: Box<dyn Reporter>,
    pub fs: Fs,
}
