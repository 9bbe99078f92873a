use std::path::PathBuf;

use anyhow::{Context, Result};
use checkin_core::geofence::{self, Coordinates};
use checkin_service::{Config, SqliteStore};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod embed;
mod models;

#[derive(Parser)]
#[command(name = "checkin", version, about = "Attendance check-in tools")]
struct Cli {
    /// TOML config file; `CHECKIN_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List embedding model variants, or verify the configured one
    Models {
        #[arg(long)]
        verify: bool,
        /// Print the SHA-256 of the configured model file
        #[arg(long, requires = "verify")]
        print_digest: bool,
    },
    /// Print the embedding of a pre-cropped face image as JSON
    Embed { image: PathBuf },
    /// Compare two pre-cropped face images
    Compare { a: PathBuf, b: PathBuf },
    /// Distance from a device position to an office, and the geofence verdict
    Geofence {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        office_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        office_lon: f64,
        #[arg(long, default_value_t = 100.0)]
        radius: f64,
    },
    /// List a user's attendance records
    Attendance { user_id: String },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("failed to load {}", p.display())),
        None => Ok(Config::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Models {
            verify,
            print_digest,
        } => {
            if verify {
                models::verify(&config, print_digest)
            } else {
                models::list(&config)
            }
        }
        Command::Embed { image } => embed::embed(&config, &image),
        Command::Compare { a, b } => embed::compare(&config, &a, &b),
        Command::Geofence {
            lat,
            lon,
            office_lat,
            office_lon,
            radius,
        } => {
            let verdict = geofence::check(
                Coordinates::new(lat, lon),
                Coordinates::new(office_lat, office_lon),
                radius,
            );
            println!("{}", verdict.message());
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::Attendance { user_id } => {
            let store = SqliteStore::open(&config.db_path)
                .await
                .with_context(|| format!("failed to open {}", config.db_path.display()))?;
            let rows = store.attendance_for_user(&user_id).await?;
            if rows.is_empty() {
                println!("No attendance records for {user_id}.");
                return Ok(());
            }
            for (id, record) in rows {
                println!(
                    "{}  {}  {:.6},{:.6}  {}  {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    record.latitude,
                    record.longitude,
                    record.seating.as_deref().unwrap_or("-"),
                    id
                );
            }
            Ok(())
        }
    }
}
