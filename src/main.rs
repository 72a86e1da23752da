//! Binary entrypoint for the empiredb CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and the data directory skeleton
//! - `check` - open the database, report bootstrap repairs and invariant problems
//! - `show <name> [--json]` - print one player record
//! - `aggregate [--empire <vnum>] [--techs]` - recompute empire membership
//! - `delete <name>` - permanently delete a player
//!
//! See the library crate docs for module-level details: `empiredb::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use empiredb::config::Config;
use empiredb::playerdb::{membership, EmpireTable, NoOnlinePlayers, PlayerRepository};

#[derive(Parser)]
#[command(name = "empiredb")]
#[command(about = "Player persistence and empire membership tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration and data directory
    Init,
    /// Open the database and verify accounts and the player index
    Check,
    /// Show one player
    Show {
        name: String,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute empire membership, greatness and playtime
    Aggregate {
        /// Only this empire
        #[arg(short, long)]
        empire: Option<i32>,
        /// Also rebuild learned techs
        #[arg(long)]
        techs: bool,
    },
    /// Permanently delete a player
    Delete { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so there may not be one to load yet
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load(&cli.config).await?),
    };
    init_logging(&pre_config, cli.verbose);
    let now = chrono::Utc::now().timestamp();

    match cli.command {
        Commands::Init => {
            info!("Initializing new empiredb configuration");
            let config = if tokio::fs::try_exists(&cli.config).await? {
                warn!("{} already exists; keeping it", cli.config);
                Config::load(&cli.config).await?
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
                Config::default()
            };
            let layout = config.layout();
            layout.ensure_dirs()?;
            let empires_path = layout.empire_table();
            if !empires_path.exists() {
                EmpireTable::new().save(&empires_path)?;
            }
            let repo = PlayerRepository::open(layout, config.repository_options(), now)?;
            info!("Initialized data directory at {}", repo.layout().root().display());
        }
        Commands::Check => {
            let config = require(pre_config)?;
            let repo = PlayerRepository::open(config.layout(), config.repository_options(), now)?;
            let boot = repo.boot_report();
            println!("players:  {}", repo.index().len());
            println!("accounts: {}", repo.accounts().len());
            println!("top idnum: {}  top account: {}", boot.top_idnum, boot.top_account_id);
            for (account, name) in &boot.dropped_links {
                println!("repaired: dropped '{}' from account #{}", name, account);
            }
            for account in &boot.deleted_accounts {
                println!("repaired: deleted empty account #{}", account);
            }
            let problems = repo.verify();
            for p in &problems {
                error!("{}", p);
            }
            if !problems.is_empty() {
                println!("{} problems found", problems.len());
                std::process::exit(1);
            }
            println!("ok");
        }
        Commands::Show { name, json } => {
            let config = require(pre_config)?;
            let repo = PlayerRepository::open(config.layout(), config.repository_options(), now)?;
            let record = repo.read_record(&name, now)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{} (#{})", record.name, record.idnum);
                println!("  account:  {:?}", record.account_id);
                println!("  access:   {}", record.access_level);
                println!("  empire:   {:?} rank {}", record.loyalty, record.rank);
                println!("  birth:    {}", format_time(record.birth));
                println!("  logon:    {}", format_time(record.prev_logon));
                println!("  played:   {:.1}h", record.played_hours());
                println!("  loadroom: {} (check {})", record.load_room, record.load_room_check);
                println!("  flags:    {:?}", record.player_flags);
                println!(
                    "  restore on login: {}  reread techs: {}",
                    record.transient.restore_on_login, record.transient.reread_empire_tech_on_login
                );
            }
        }
        Commands::Aggregate { empire, techs } => {
            let config = require(pre_config)?;
            let repo = PlayerRepository::open(config.layout(), config.repository_options(), now)?;
            let path = repo.layout().empire_table();
            let mut empires = EmpireTable::load(&path)?;
            if empire.is_some_and(|v| !empires.contains(v)) {
                return Err(anyhow!("no such empire #{}", empire.unwrap_or_default()));
            }
            let report = if techs {
                membership::reread_empire_tech(&repo, &mut empires, &NoOnlinePlayers, empire, now)?
            } else {
                membership::read_empire_members(&repo, &mut empires, &NoOnlinePlayers, empire, false, now)?
            };
            empires.save(&path)?;
            for e in empires.ranked() {
                println!(
                    "#{:<3} {:<20} members {:>3}/{:<3} greatness {:>4} playtime {:>6}h",
                    e.vnum, e.name, e.members, e.total_member_count, e.greatness, e.total_playtime
                );
            }
            for vnum in &report.deleted_empires {
                println!("deleted empty empire #{}", vnum);
            }
        }
        Commands::Delete { name } => {
            let config = require(pre_config)?;
            let mut repo = PlayerRepository::open(config.layout(), config.repository_options(), now)?;
            let path = repo.layout().empire_table();
            let mut empires = EmpireTable::load(&path)?;
            let mut record = repo.load_player(&name, now)?;
            let account_deleted = repo.delete_player(&mut record, &mut empires, &NoOnlinePlayers, now)?;
            empires.save(&path)?;
            println!("deleted {} (#{})", record.name, record.idnum);
            if account_deleted {
                println!("their account had no other players and was removed");
            }
        }
    }

    Ok(())
}

fn require(config: Option<Config>) -> Result<Config> {
    config.ok_or_else(|| anyhow!("configuration not loaded"))
}

fn format_time(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(file) = config.as_ref().and_then(|c| c.logging.file.clone()) {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // Check if stdout is a terminal (TTY) - if so, write to both file and console
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }
    builder.format(|fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
    });
    let _ = builder.try_init();
}
