use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    PageContext, PageList, MarkdownRenderer, ReconcileOutcome, Reconciler, ReviewPage,
    ReviewablesClient, SubscriptionManager, WsChannelBus,
};
use serde_json::{json, Map, Value};
use shared::{
    domain::{ReviewableId, TopicId, UserId},
    error::{ApiException, ErrorCode},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8443")]
    server_url: String,
    #[arg(long)]
    user_id: i64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the pending queue.
    Queue {
        #[arg(long)]
        topic_id: Option<i64>,
    },
    /// Show a topic's queue and keep it in sync with other moderators.
    Watch {
        #[arg(long)]
        topic_id: i64,
    },
    /// Replace the raw body (and optionally the title) of a queued post.
    Edit {
        reviewable_id: i64,
        #[arg(long)]
        version: i64,
        #[arg(long)]
        raw: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    Perform {
        reviewable_id: i64,
        action_id: String,
        #[arg(long)]
        version: i64,
        /// Extra action parameter as key=value; repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    Claim {
        reviewable_id: i64,
    },
    Release {
        reviewable_id: i64,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let user_id = UserId(args.user_id);
    let client = ReviewablesClient::new(args.server_url.clone(), user_id);

    let outcome = match args.command {
        Command::Queue { topic_id } => print_queue(&client, topic_id.map(TopicId)).await,
        Command::Watch { topic_id } => watch(&args.server_url, client, TopicId(topic_id)).await,
        Command::Edit {
            reviewable_id,
            version,
            raw,
            title,
        } => edit(&client, ReviewableId(reviewable_id), version, raw, title).await,
        Command::Perform {
            reviewable_id,
            action_id,
            version,
            params,
        } => {
            let extra: Map<String, Value> = params
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            let result = client
                .perform(ReviewableId(reviewable_id), &action_id, version, extra)
                .await?;
            if result.success {
                let status = result.transition_to.map(|s| s.as_str()).unwrap_or("unchanged");
                println!("{action_id}: now {status} at version {}", result.version);
            } else {
                println!("{action_id} failed:");
                for error in &result.errors {
                    println!("  {error}");
                }
            }
            Ok(())
        }
        Command::Claim { reviewable_id } => {
            let claimed = client.claim(ReviewableId(reviewable_id)).await?;
            println!("claimed reviewable {} at version {}", claimed.reviewable_id, claimed.version);
            Ok(())
        }
        Command::Release { reviewable_id } => {
            let released = client.release(ReviewableId(reviewable_id)).await?;
            println!("released={released}");
            Ok(())
        }
    };

    outcome.map_err(explain_rejection)
}

async fn print_queue(client: &ReviewablesClient, topic_id: Option<TopicId>) -> Result<()> {
    let queue = client.list(topic_id).await?;
    if queue.is_empty() {
        println!("queue is empty");
    }
    for item in queue {
        let title = item
            .fields
            .get("payload")
            .and_then(|payload| payload.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("(untitled)");
        let claim = item
            .claimed_by
            .map(|user| format!(" claimed by {user}"))
            .unwrap_or_default();
        println!(
            "#{} {} v{} {title}{claim}",
            item.reviewable_id,
            item.kind.as_str(),
            item.version
        );
    }
    Ok(())
}

async fn watch(server_url: &str, client: ReviewablesClient, topic_id: TopicId) -> Result<()> {
    let queue = client.list(Some(topic_id)).await?;
    let renderer = MarkdownRenderer;
    let mut page = ReviewPage::load(PageList::from_summaries(&queue, &renderer));
    print_page(page.view());

    let (bus, mut deliveries) = WsChannelBus::connect(server_url, client.user_id())
        .await
        .context("failed to open update channel")?;
    let mut subscriptions = SubscriptionManager::new(bus);
    subscriptions
        .on_navigate(PageContext::Topic(Some(topic_id)))
        .await?;
    info!(topic_id = topic_id.0, "watching review queue; ctrl-c to stop");

    let reconciler = Reconciler::new(client, renderer);
    tokio::select! {
        _ = page.run(&reconciler, &subscriptions, &mut deliveries, |view, outcome| {
            if !matches!(outcome, ReconcileOutcome::NotOnPage) {
                println!("-- {outcome:?}");
                print_page(view);
            }
        }) => bail!("update channel closed"),
        _ = tokio::signal::ctrl_c() => {}
    }

    subscriptions.on_navigate(PageContext::Other).await?;
    Ok(())
}

fn print_page(view: &PageList) {
    for detail in view.detail_items() {
        println!("[{}] {}", detail.reviewable_id, detail.body);
    }
    println!("({} pending)", view.len());
}

async fn edit(
    client: &ReviewablesClient,
    reviewable_id: ReviewableId,
    version: i64,
    raw: Option<String>,
    title: Option<String>,
) -> Result<()> {
    let mut payload = Map::new();
    if let Some(raw) = raw {
        payload.insert("raw".into(), json!(raw));
    }
    if let Some(title) = title {
        payload.insert("title".into(), json!(title));
    }
    if payload.is_empty() {
        bail!("nothing to edit; pass --raw or --title");
    }
    let mut fields = Map::new();
    fields.insert("payload".into(), Value::Object(payload));

    let updated = client.update(reviewable_id, version, fields).await?;
    println!("reviewable {reviewable_id} now at version {}", updated.version);
    Ok(())
}

/// Conflicts are never retried; the moderator reloads and decides again.
fn explain_rejection(error: anyhow::Error) -> anyhow::Error {
    match error.downcast_ref::<ApiException>() {
        Some(exception) if exception.code == ErrorCode::Conflict => {
            error.context("someone else changed this reviewable; run `queue` for the current version")
        }
        Some(exception) if !exception.errors.is_empty() => {
            let detail = exception.errors.join("; ");
            error.context(detail)
        }
        _ => error,
    }
}
