use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;

use docflow::{auth::password::hash_password, config::AppConfig, db, schema::notifications};

const USAGE: &str = "Usage: maintenance <hash-password PASSWORD | purge-notifications DAYS>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("hash-password") => {
            let password = args.next().context("hash-password needs a password")?;
            println!("{}", hash_password(&password)?);
        }
        Some("purge-notifications") => {
            let days = args
                .next()
                .context("purge-notifications needs a number of days")?
                .parse::<i64>()
                .context("days must be an integer")?;
            purge_notifications(days)?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Deletes read notifications older than `days`.
fn purge_notifications(days: i64) -> Result<()> {
    if days < 1 {
        bail!("days must be at least 1");
    }

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded docflow configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let cutoff = (Utc::now() - Duration::days(days)).naive_utc();
    let purged = diesel::delete(
        notifications::table
            .filter(notifications::is_read.eq(true))
            .filter(notifications::created_at.lt(cutoff)),
    )
    .execute(&mut conn)
    .context("failed to purge notifications")?;

    println!("Purged {purged} read notifications older than {days} days.");
    Ok(())
}
