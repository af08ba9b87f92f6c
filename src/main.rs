//! CLI entry point for `mailkeep`.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailkeep::config::{self, Config};
use mailkeep::folder::Folder;
use mailkeep::model::flags::{parse_flag_name, Flags};
use mailkeep::model::record::Uid;
use mailkeep::reconcile::{numbered, ChangeSet, Layout, ScanControl};
use mailkeep::summary::store;

#[derive(Parser)]
#[command(
    name = "mailkeep",
    version,
    about = "Keep a mailbox directory and its message index consistent"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Force a full rescan, ignoring the persisted summary
    #[arg(short, long, global = true)]
    force: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new mailbox directory
    Init {
        path: PathBuf,
        /// Use the numbered-file layout instead of Maildir
        #[arg(long)]
        numbered: bool,
    },
    /// Reconcile the index against the mailbox and report changes
    Check {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check, then write pending flag changes back to the messages
    Sync {
        path: PathBuf,
        /// Physically delete messages flagged deleted
        #[arg(long)]
        expunge: bool,
        #[arg(long)]
        json: bool,
    },
    /// List indexed messages
    List {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show cached counts without loading the full index
    Status {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Set or clear flags on a message
    Flags {
        path: PathBuf,
        uid: String,
        /// Flags to set (comma separated: seen,answered,flagged,deleted,draft)
        #[arg(long, value_delimiter = ',')]
        add: Vec<String>,
        /// Flags to clear
        #[arg(long, value_delimiter = ',')]
        remove: Vec<String>,
    },
    /// Deliver a new message into the mailbox
    Deliver {
        path: PathBuf,
        /// Read the message from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// List sub-mailboxes from the .folders manifest
    Folders { path: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let force = cli.force;

    match cli.command {
        Commands::Init { path, numbered } => cmd_init(&path, numbered, &config),
        Commands::Check { path, json } => cmd_reconcile(&path, false, false, json, force, &config),
        Commands::Sync {
            path,
            expunge,
            json,
        } => cmd_reconcile(&path, true, expunge, json, force, &config),
        Commands::List { path, json } => cmd_list(&path, json, &config),
        Commands::Status { path, json } => cmd_status(&path, json),
        Commands::Flags {
            path,
            uid,
            add,
            remove,
        } => cmd_flags(&path, &uid, &add, &remove, &config),
        Commands::Deliver { path, file } => cmd_deliver(&path, file.as_deref(), &config),
        Commands::Folders { path } => cmd_folders(&path),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailkeep.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_init(path: &Path, numbered: bool, config: &Config) -> anyhow::Result<()> {
    let layout = if numbered {
        Layout::Numbered
    } else {
        Layout::Maildir
    };
    let folder = Folder::create(path, layout, config)?;
    println!("Created {:?} mailbox at {}", folder.layout(), path.display());
    Ok(())
}

/// Run a check or sync pass with a progress bar, then print the
/// resulting change set.
fn cmd_reconcile(
    path: &Path,
    commit: bool,
    expunge: bool,
    json: bool,
    force: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut folder = Folder::open(path, config)?;
    if force {
        folder.force_rescan();
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{bar:40}] {pos}/{len} messages")?
            .progress_chars("=> "),
    );
    let progress = |done: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(done);
    };
    let ctrl = ScanControl {
        progress: Some(&progress),
        cancel: None,
    };

    let mut changes = ChangeSet::default();
    let result = if commit {
        folder.sync(expunge, &mut changes, ctrl)
    } else {
        folder.check(&mut changes, ctrl)
    };
    pb.finish_and_clear();
    result?;

    print_changes(&changes, json)?;
    Ok(())
}

fn print_changes(changes: &ChangeSet, json: bool) -> anyhow::Result<()> {
    if json {
        let value = serde_json::json!({
            "added": uid_strings(&changes.added),
            "removed": uid_strings(&changes.removed),
            "flags_changed": uid_strings(&changes.flags_changed),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "{} added, {} removed, {} flags changed",
        changes.added.len(),
        changes.removed.len(),
        changes.flags_changed.len()
    );
    for uid in &changes.added {
        println!("  + {uid}");
    }
    for uid in &changes.removed {
        println!("  - {uid}");
    }
    for uid in &changes.flags_changed {
        println!("  ~ {uid}");
    }
    Ok(())
}

fn uid_strings(uids: &[Uid]) -> Vec<String> {
    uids.iter().map(|u| u.to_string()).collect()
}

fn cmd_list(path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let folder = Folder::open(path, config)?;

    if json {
        let entries: Vec<serde_json::Value> = folder
            .records()
            .map(|r| {
                serde_json::json!({
                    "uid": r.uid.to_string(),
                    "flags": flag_letters(r.flags),
                    "date": r.date_received.to_rfc3339(),
                    "from": r.from,
                    "subject": r.subject,
                    "size": r.size,
                    "location": r.location,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let (total, unseen) = folder.counts();
    for record in folder.records() {
        println!(
            "{:>12}  {:<5}  {}  {:<28}  {}",
            record.uid.to_string(),
            flag_letters(record.flags),
            record.date_received.format("%Y-%m-%d %H:%M"),
            truncate(&record.from, 28),
            record.subject
        );
    }
    println!("{total} messages, {unseen} unseen");
    if total == 0 {
        println!("(run `mailkeep check` to index the mailbox)");
    }
    Ok(())
}

fn cmd_status(path: &Path, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    match store::peek_counts(path)? {
        Some((total, unseen)) => {
            let idx_size = std::fs::metadata(store::summary_path_for(path))
                .map(|m| m.len())
                .unwrap_or(0);
            if json {
                let value = serde_json::json!({
                    "messages": total,
                    "unseen": unseen,
                    "summary_bytes": idx_size,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Messages: {total}");
                println!("Unseen:   {unseen}");
                println!("Summary:  {}", format_size(idx_size, BINARY));
            }
        }
        None => {
            anyhow::bail!(
                "No summary for {} (run `mailkeep check` first)",
                path.display()
            );
        }
    }
    Ok(())
}

fn cmd_flags(
    path: &Path,
    uid: &str,
    add: &[String],
    remove: &[String],
    config: &Config,
) -> anyhow::Result<()> {
    let mut folder = Folder::open(path, config)?;
    let uid = Uid::from(uid);

    for (names, value) in [(add, true), (remove, false)] {
        for name in names {
            let mask = parse_flag_name(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown flag name: {name}"))?;
            folder.set_flags(&uid, mask, value)?;
        }
    }

    let mut changes = ChangeSet::default();
    folder.sync(false, &mut changes, ScanControl::default())?;

    match folder.lookup(&uid) {
        Some(record) => println!("{uid}: {}", flag_letters(record.flags)),
        None => println!("{uid}: removed during sync"),
    }
    Ok(())
}

fn cmd_deliver(path: &Path, file: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    let bytes = match file {
        Some(file) => std::fs::read(file)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    if bytes.is_empty() {
        anyhow::bail!("Refusing to deliver an empty message");
    }

    let mut folder = Folder::open(path, config)?;
    let uid = folder.add_message(&bytes, Flags::empty())?;
    println!("Delivered as {uid}");
    Ok(())
}

fn cmd_folders(path: &Path) -> anyhow::Result<()> {
    let folders = numbered::read_folder_manifest(path)?;
    if folders.is_empty() {
        println!("No .folders manifest at {}", path.display());
        return Ok(());
    }
    for name in folders {
        println!("{name}");
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailkeep", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Maildir-style letters for display ("DFRST" subset, "-" when none).
fn flag_letters(flags: Flags) -> String {
    let mut letters = String::new();
    for (c, bit) in [
        ('D', Flags::DRAFT),
        ('F', Flags::FLAGGED),
        ('R', Flags::ANSWERED),
        ('S', Flags::SEEN),
        ('T', Flags::DELETED),
    ] {
        if flags.contains(bit) {
            letters.push(c);
        }
    }
    if letters.is_empty() {
        letters.push('-');
    }
    letters
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
