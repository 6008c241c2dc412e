use blogbase_backend::config::Config;
use blogbase_backend::models::db_operations::users_db_operations;
use blogbase_backend::setup::db_setup;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for setup and maintenance tasks.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Removes unverified accounts whose verification window has passed.
    CleanupUnverified,
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates the database schema and indexes.
    Setup,
    /// Inserts the starter tag set. Safe to run repeatedly.
    SeedTags,
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup => setup_database(&config),
            DbAction::SeedTags => seed_tags(&config),
        },
        Commands::CleanupUnverified => cleanup_unverified(&config),
    }
}

fn setup_database(config: &Config) {
    let db_path = config.db_path();
    if db_path.exists() {
        println!(
            "ℹ️ Database already exists at '{}'. Skipping creation.",
            db_path.display()
        );
        return;
    }
    println!("\nSetting up database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create database file.");
    match db_setup::setup_blog_db(&mut conn) {
        Ok(_) => println!("✅ Database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up database: {}", e),
    }
}

fn seed_tags(config: &Config) {
    let db_path = config.db_path();
    if !db_path.exists() {
        eprintln!(
            "❌ Error: Database not found at '{}'. Please run `setup_cli db setup` first.",
            db_path.display()
        );
        return;
    }
    let mut conn = Connection::open(&db_path).expect("Could not open database.");
    match db_setup::seed_tags(&mut conn) {
        Ok(count) => println!("✅ Seeded {} tags.", count),
        Err(e) => eprintln!("❌ Error seeding tags: {}", e),
    }
}

fn cleanup_unverified(config: &Config) {
    let db_path = config.db_path();
    if !db_path.exists() {
        eprintln!(
            "❌ Error: Database not found at '{}'. Please run `setup_cli db setup` first.",
            db_path.display()
        );
        return;
    }
    let mut conn = Connection::open(&db_path).expect("Could not open database.");
    match users_db_operations::purge_expired_unverified(&mut conn) {
        Ok(count) => println!("✅ Removed {} expired unverified accounts.", count),
        Err(e) => eprintln!("❌ Error removing unverified accounts: {}", e),
    }
}
