// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry status` command implementation.
//!
//! Prints pipeline statistics from the local database and exits.

use ferry_config::FerryConfig;
use ferry_core::FerryError;
use ferry_storage::{Database, queries};

/// Runs the `ferry status` command.
pub async fn run_status(config: FerryConfig) -> Result<(), FerryError> {
    let db = Database::open(&config.storage.database_path).await?;

    let events = queries::events::stats(&db).await?;
    let queue = queries::queue::stats(&db).await?;

    println!("webhook events");
    println!("  total:        {}", events.total);
    println!("  pending:      {}", events.pending);
    println!("  processing:   {}", events.processing);
    println!("  processed:    {}", events.processed);
    println!("  failed:       {}", events.failed);
    println!("  dead letter:  {}", events.dead_letter);
    if let Some(ref ts) = events.last_received {
        println!("  last received: {ts}");
    }

    println!();
    println!("message queue");
    println!("  total:         {}", queue.total);
    println!("  pending:       {}", queue.pending);
    println!("  processing:    {}", queue.processing);
    println!("  ready to send: {}", queue.ready_to_send);
    println!("  sent:          {}", queue.sent);
    println!("  failed:        {}", queue.failed);
    println!("  dead letter:   {}", queue.dead_letter);
    if let Some(ref ts) = queue.last_created {
        println!("  last created:  {ts}");
    }

    if queue.dead_letter > 0 {
        println!();
        println!("dead-lettered messages (newest first):");
        let items = queries::queue::find_by_status(
            &db,
            ferry_core::QueueStatus::DeadLetter,
            10,
            0,
        )
        .await?;
        for item in items {
            println!(
                "  {}  retries={}  error={}",
                item.message_id,
                item.retry_count,
                item.last_error.as_deref().unwrap_or("-")
            );
        }
    }

    db.close().await?;
    Ok(())
}
