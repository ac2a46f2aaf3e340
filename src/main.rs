use clap::{Parser, Subcommand};
use leaderboard::{
    config::Settings,
    store::SqliteStore,
    Leaderboard, PlayerStanding,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "leaderboard")]
#[clap(about = "Track player scores and query the ranked leaderboard", long_about = None)]
struct Cli {
    /// Settings file layered over the defaults
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new player
    AddUser {
        #[clap(short, long)]
        username: String,
    },

    /// Add a score to a player's total
    Submit {
        #[clap(short, long)]
        user_id: i64,

        #[clap(short, long, allow_hyphen_values = true)]
        score: i64,

        /// Game mode label recorded with the event
        #[clap(short, long)]
        game_mode: Option<String>,
    },

    /// Show the top of the leaderboard
    Top {
        /// Number of rows (defaults to leaderboard.default_top_limit)
        #[clap(short, long)]
        limit: Option<usize>,
    },

    /// Show one player's total and rank
    Rank {
        #[clap(short, long)]
        user_id: i64,
    },

    /// Check every total against the sum of its score events
    Audit,
}

fn print_standing(standing: &PlayerStanding) {
    let rank = standing
        .rank
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>5}  {:<20} {:>10}  (id {})",
        rank, standing.username, standing.total_score, standing.user_id
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::load(cli.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.app.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("{} v{} starting", settings.app.name, settings.app.version);

    let store = SqliteStore::connect(&settings.database).await?;
    let board = Leaderboard::with_configured_cache(Arc::new(store.clone()), &settings);

    let outcome = run(&board, cli.command).await;

    board.shutdown().await?;
    store.close().await;
    outcome
}

async fn run(board: &Leaderboard, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::AddUser { username } => {
            let user = board.register_user(&username).await?;
            println!("Registered {} with id {}", user.username, user.id);
        }

        Commands::Submit { user_id, score, game_mode } => {
            let standing = match game_mode {
                Some(mode) => board.submit_score_in_mode(user_id, score, &mode).await?,
                None => board.submit_score(user_id, score).await?,
            };
            println!("Total score updated successfully");
            print_standing(&standing);
        }

        Commands::Top { limit } => {
            let top = match limit {
                Some(limit) => board.get_top(limit).await?,
                None => board.get_default_top().await?,
            };

            if top.is_empty() {
                println!("Leaderboard is empty");
            }
            for standing in &top {
                print_standing(standing);
            }
        }

        Commands::Rank { user_id } => {
            let standing = board.get_rank(user_id).await?;
            print_standing(&standing);
        }

        Commands::Audit => {
            let mismatches = board.audit_totals().await?;
            if mismatches.is_empty() {
                println!("All totals match their score events");
            }
            for m in &mismatches {
                println!(
                    "user {}: recorded {} but events sum to {}",
                    m.user_id, m.recorded_total, m.event_sum
                );
            }
        }
    }

    Ok(())
}
