//! Command implementations behind the `rag` binary.
//!
//! Each `run_*` function takes a ready [`RagClient`], performs one
//! operation and prints the result to stdout. Errors are returned to
//! `main`, which prints them and picks the exit message.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime};
use rag_client_core::models::{HealthResponse, HistoryItem, SearchRequest, SearchResponse};
use rag_client_core::validate::FeedbackDraft;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::AuthState;
use crate::cache::{CacheEvent, QueryError, QueryKey};
use crate::client::RagClient;
use crate::error::ApiError;

/// Printed when the backend rejects the saved token.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Run `rag login`.";

pub async fn run_login(client: &RagClient, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt("Password: ")?,
    };
    if password.is_empty() {
        bail!("Password must not be empty.");
    }

    let user = match client.login(email, password).await {
        Ok(user) => user,
        Err(e) if e.is_unauthorized() => bail!("Invalid email or password."),
        Err(e) => return Err(e.into()),
    };
    println!("Logged in as {} <{}>", user.name, user.email);
    println!("  department: {}", user.department);
    println!("  access:     {}", user.access_label());
    Ok(())
}

pub async fn run_logout(client: &RagClient) -> Result<()> {
    if !client.auth().is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }
    client.logout().await;
    println!("Logged out.");
    Ok(())
}

pub fn run_whoami(client: &RagClient) -> Result<()> {
    match client.auth().state() {
        AuthState::Authenticated(user) => {
            println!("id:         {}", user.id);
            println!("name:       {}", user.name);
            println!("email:      {}", user.email);
            println!("department: {}", user.department);
            println!("access:     {}", user.access_label());
        }
        AuthState::Anonymous | AuthState::Unknown => println!("Not logged in."),
    }
    Ok(())
}

pub async fn run_search(client: &RagClient, query: &str, limit: Option<u32>) -> Result<()> {
    let mut request = SearchRequest::new(query);
    if let Some(limit) = limit {
        request = request.with_limit(limit);
    }
    let response = client.search(request).await?;
    print_search(&response);
    Ok(())
}

fn print_search(response: &SearchResponse) {
    println!("{}", response.answer);
    println!();

    if response.metadata.is_fallback {
        let reason = response
            .metadata
            .fallback_reason
            .as_deref()
            .unwrap_or("unknown reason");
        println!("(fallback answer: {})", reason);
        println!();
    }

    if response.sources.is_empty() {
        println!("No sources.");
    } else {
        println!("--- Sources ({}) ---", response.sources.len());
        for (i, source) in response.sources.iter().enumerate() {
            let page = source
                .page_number
                .map(|p| format!(", p. {}", p))
                .unwrap_or_default();
            println!(
                "{}. [{:.2}] {} ({}{})",
                i + 1,
                source.relevance_score,
                source.document_title,
                source.document_source,
                page
            );
        }
    }
    println!();
    println!("query_id: {}", response.query_id);
    println!(
        "model: {}  total: {:.0} ms",
        response.metadata.model_used, response.performance.total_time_ms
    );
}

pub async fn run_history(client: &RagClient, page: u32, page_size: u32) -> Result<()> {
    let history = client
        .history(page, page_size)
        .await
        .map_err(QueryError::into_inner)?;

    if history.items.is_empty() {
        println!("No history.");
        return Ok(());
    }

    for item in &history.items {
        print_history_item(item);
    }
    println!(
        "Page {} of {} ({} total){}{}",
        history.page,
        history.total_pages().max(1),
        history.total,
        if history.has_prev() { "  [prev]" } else { "" },
        if history.has_next() { "  [next]" } else { "" },
    );
    Ok(())
}

fn print_history_item(item: &HistoryItem) {
    let rating = item
        .rating
        .map(|r| format!("{}/5", r))
        .unwrap_or_else(|| "unrated".to_string());
    println!(
        "[{}] {}  ({})",
        format_timestamp(&item.created_at),
        item.query,
        rating
    );
    println!("  id: {}", item.query_id);
    println!("  {}", first_line(&item.answer, 120));
    println!();
}

pub async fn run_feedback(
    client: &RagClient,
    query_id: &str,
    rating: u8,
    comment: Option<String>,
) -> Result<()> {
    let mut draft = FeedbackDraft::new(query_id).rating(rating);
    if let Some(comment) = comment {
        draft = draft.comment(comment);
    }
    let response = client.submit_feedback(draft).await?;
    println!("{}", response.message);
    println!("feedback_id: {}", response.feedback_id);
    Ok(())
}

pub async fn run_health(client: &RagClient, watch: bool) -> Result<()> {
    if !watch {
        let health = client.health().await.map_err(QueryError::into_inner)?;
        println!(
            "{}  version {}  at {}",
            health.status,
            health.version,
            format_timestamp(&health.timestamp)
        );
        if !health.is_healthy() {
            bail!("Backend reports status '{}'", health.status);
        }
        return Ok(());
    }

    let mut events = client.cache().subscribe();
    let _monitor = client.watch_health();
    println!(
        "Polling health every {}s. Press Ctrl-C to stop.",
        client.config().health.poll_interval_secs
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(CacheEvent::Updated(key)) if key == QueryKey::health() => {
                    if let Some(health) = client.cache().peek::<HealthResponse>(&key) {
                        println!("{}  version {}", health.status, health.version);
                    }
                }
                Ok(CacheEvent::FetchFailed { key, error }) if key == QueryKey::health() => {
                    println!("unreachable: {}", error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Message to print for a failed command.
pub fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(api) if api.is_unauthorized() => SESSION_EXPIRED_MESSAGE.to_string(),
        _ => format!("Error: {:#}", err),
    }
}

/// Render an ISO 8601 timestamp as `YYYY-MM-DD HH:MM`.
///
/// Timestamps that fail to parse are returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    raw.to_string()
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max_chars {
        let truncated: String = line.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        line.to_string()
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
