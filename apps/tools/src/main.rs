use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use shared::domain::{ReviewableId, ReviewableKind, TopicId, UserId};
use storage::{NewReviewable, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/reviewables.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        #[arg(long)]
        moderator: bool,
    },
    CreateReviewable {
        /// queued_post, flagged_post or user
        kind: String,
        #[arg(long)]
        topic_id: Option<i64>,
        #[arg(long)]
        target_id: Option<i64>,
        #[arg(long)]
        created_by: Option<i64>,
        /// JSON object with the reviewable's fields.
        #[arg(long, default_value = "{}")]
        fields: String,
    },
    /// Marks the target of a reviewable as gone, as when a user is deleted.
    ClearTarget { reviewable_id: i64 },
    ListActions { reviewable_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser {
            username,
            moderator,
        } => {
            let user_id = storage.create_user(&username, moderator).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::CreateReviewable {
            kind,
            topic_id,
            target_id,
            created_by,
            fields,
        } => {
            let kind = ReviewableKind::from_str(&kind).map_err(anyhow::Error::msg)?;
            let fields: Map<String, Value> =
                serde_json::from_str(&fields).context("--fields must be a JSON object")?;
            let reviewable_id = storage
                .create_reviewable(&NewReviewable {
                    kind,
                    topic_id: topic_id.map(TopicId),
                    target_id,
                    created_by: created_by.map(UserId),
                    fields,
                })
                .await?;
            println!("created reviewable_id={}", reviewable_id.0);
        }
        Command::ClearTarget { reviewable_id } => {
            if !storage.clear_target(ReviewableId(reviewable_id)).await? {
                bail!("reviewable {reviewable_id} not found");
            }
            println!("cleared target of reviewable_id={reviewable_id}");
        }
        Command::ListActions { reviewable_id } => {
            for action in storage.list_actions(ReviewableId(reviewable_id)).await? {
                println!(
                    "{} {} by user {} -> {} (v{}) {}",
                    action.created_at.to_rfc3339(),
                    action.action_id,
                    action.user_id.0,
                    action.status_after.as_str(),
                    action.version_after,
                    Value::Object(action.args)
                );
            }
        }
    }

    Ok(())
}
