mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_dashboard, cmd_goals_set, cmd_goals_show, cmd_init, cmd_profile_set, cmd_profile_show,
    cmd_steps_sample, cmd_steps_today, cmd_steps_watch, cmd_steps_week, cmd_water_add,
    cmd_water_presets, cmd_water_today, cmd_water_week,
};
use crate::config::Config;
use stride_core::db::SqliteBackend;
use stride_core::models::CountingStrategy;
use stride_core::service::{Tracker, TrackerConfig};

#[derive(Parser)]
#[command(
    name = "stride",
    version,
    about = "A simple step and hydration tracker CLI",
    long_about = "\n\n  ███████╗████████╗██████╗ ██╗██████╗ ███████╗
  ██╔════╝╚══██╔══╝██╔══██╗██║██╔══██╗██╔════╝
  ███████╗   ██║   ██████╔╝██║██║  ██║█████╗
  ╚════██║   ██║   ██╔══██╗██║██║  ██║██╔══╝
  ███████║   ██║   ██║  ██║██║██████╔╝███████╗
  ╚══════╝   ╚═╝   ╚═╝  ╚═╝╚═╝╚═════╝ ╚══════╝
        every step counts.
"
)]
struct Cli {
    /// User id to track (default: this machine's local user)
    #[arg(long, global = true, env = "STRIDE_USER")]
    user: Option<String>,
    /// Step counting strategy: baseline or midnight-query
    #[arg(long, global = true, env = "STRIDE_STRATEGY")]
    strategy: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create your profile
    Init {
        /// Your full name
        full_name: String,
        /// Age in years (13-120)
        #[arg(long)]
        age: u32,
        /// Height in cm (50-250)
        #[arg(long)]
        height: f64,
        /// Weight in kg (20-300)
        #[arg(long)]
        weight: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Show or set daily goals
    Goals {
        #[command(subcommand)]
        command: GoalsCommands,
    },
    /// Record and review steps
    Steps {
        #[command(subcommand)]
        command: StepsCommands,
    },
    /// Log and review water intake
    Water {
        #[command(subcommand)]
        command: WaterCommands,
    },
    /// Show today's progress, points and the last 7 days
    Dashboard {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile and BMI
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update profile fields
    Set {
        /// Full name
        #[arg(long)]
        name: Option<String>,
        /// Age in years
        #[arg(long)]
        age: Option<u32>,
        /// Height in cm
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GoalsCommands {
    /// Show current goals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one or both daily goals
    Set {
        /// Daily step goal
        #[arg(long)]
        steps: Option<u32>,
        /// Daily water goal in ml
        #[arg(long)]
        water: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StepsCommands {
    /// Record a raw cumulative pedometer reading
    Sample {
        /// Raw device step count
        raw: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show today's steps
    Today {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the last 7 days of steps
    Week {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read raw pedometer counts from stdin, one per line, and print today's total as it changes
    Watch {
        /// Output each update as a JSON line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WaterCommands {
    /// Log water by amount ("250", "250ml") or preset name ("glass", "large-bottle")
    Add {
        /// Amount or preset
        amount: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show today's water log
    Today {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the last 7 days of water
    Week {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List quick-add presets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STRIDE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Presets need no user or database.
    if let Commands::Water {
        command: WaterCommands::Presets { json },
    } = cli.command
    {
        return cmd_water_presets(json);
    }

    let config = Config::load()?;
    let uid = match cli.user {
        Some(uid) => uid,
        None => config.load_or_create_user_id()?.0,
    };
    let strategy = match cli.strategy.as_deref() {
        Some(s) => s.parse::<CountingStrategy>()?,
        None => CountingStrategy::default(),
    };
    let backend = SqliteBackend::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let device_id = backend.with_db(|db| db.get_or_create_device_id())?;
    tracing::debug!(uid = %uid, device_id = %device_id, strategy = %strategy, "opening tracker");
    let tracker = Tracker::with_backend(&TrackerConfig::new(uid).with_strategy(strategy), &backend)?;

    match cli.command {
        Commands::Init {
            full_name,
            age,
            height,
            weight,
            json,
        } => cmd_init(&tracker, full_name, age, height, weight, json).await,
        Commands::Profile { command } => match command {
            ProfileCommands::Show { json } => cmd_profile_show(&tracker, json).await,
            ProfileCommands::Set {
                name,
                age,
                height,
                weight,
                json,
            } => cmd_profile_set(&tracker, name, age, height, weight, json).await,
        },
        Commands::Goals { command } => match command {
            GoalsCommands::Show { json } => cmd_goals_show(&tracker, json).await,
            GoalsCommands::Set { steps, water, json } => {
                cmd_goals_set(&tracker, steps, water, json).await
            }
        },
        Commands::Steps { command } => match command {
            StepsCommands::Sample { raw, json } => {
                cmd_steps_sample(&tracker, &backend, raw, json).await
            }
            StepsCommands::Today { json } => cmd_steps_today(&tracker, json).await,
            StepsCommands::Week { json } => cmd_steps_week(&tracker, json).await,
            StepsCommands::Watch { json } => cmd_steps_watch(&tracker, &backend, json).await,
        },
        Commands::Water { command } => match command {
            WaterCommands::Add { amount, json } => cmd_water_add(&tracker, &amount, json).await,
            WaterCommands::Today { json } => cmd_water_today(&tracker, json).await,
            WaterCommands::Week { json } => cmd_water_week(&tracker, json).await,
            WaterCommands::Presets { json } => cmd_water_presets(json),
        },
        Commands::Dashboard { json } => cmd_dashboard(&tracker, json).await,
    }
}
