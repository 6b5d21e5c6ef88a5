use tracing::info;

use super::{format_transcript_entry, send_chunked};
use crate::chat::session::lock;
use crate::state::Context;

/// Show suggested starter questions
#[poise::command(slash_command)]
pub async fn suggest(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let suggestions = match ctx.data().sessions.get(ctx.author().id.get()).await {
        Some(session) => lock(&session).suggestions(),
        None => None,
    };

    let text = match suggestions {
        Some(list) => {
            let mut text = String::from("**Try one of these questions:**\n");
            for s in &list {
                text.push_str(&format!("- {}\n", s));
            }
            text
        }
        None => "Suggestions are only offered before your first question. \
                 Use `/genealogy start` to begin, or `/genealogy restart` to start over."
            .to_string(),
    };
    ctx.say(text).await?;
    Ok(())
}

/// Show this conversation so far
#[poise::command(slash_command)]
pub async fn transcript(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let text = match ctx.data().sessions.get(ctx.author().id.get()).await {
        Some(session) => lock(&session)
            .transcript()
            .iter()
            .map(format_transcript_entry)
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    if text.is_empty() {
        ctx.say("No conversation yet. Use `/genealogy start` to begin.")
            .await?;
    } else {
        send_chunked(&ctx, &text).await?;
    }
    Ok(())
}

/// Start over with new preferences
#[poise::command(slash_command)]
pub async fn restart(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let Some(session) = ctx.data().sessions.get(ctx.author().id.get()).await else {
        ctx.say("Nothing to restart. Use `/genealogy start` to begin.")
            .await?;
        return Ok(());
    };
    lock(&session).restart();

    info!(user = ctx.author().name, "Conversation restarted");
    ctx.say("Conversation cleared. Use `/genealogy start` to choose your preferences again.")
        .await?;
    Ok(())
}

/// Show assistant and session status
#[poise::command(slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let state = ctx.data();
    let service = state.assistant.client().init_state();
    let active_sessions = state.sessions.len().await;

    let mine = match state.sessions.get(ctx.author().id.get()).await {
        Some(session) => {
            let guard = lock(&session);
            let prefs = match guard.preferences() {
                Some(p) => format!("{} / {}", p.website, p.answer_style),
                None => "not chosen".to_string(),
            };
            format!(
                "**Preferences:** {}\n**Messages:** {}\n**Answering:** {}",
                prefs,
                guard.transcript().len(),
                if guard.is_streaming() { "yes" } else { "no" }
            )
        }
        None => "**Preferences:** not chosen".to_string(),
    };

    ctx.say(format!(
        "**AI service:** {}\n**Active sessions:** {}\n{}",
        service, active_sessions, mine
    ))
    .await?;
    Ok(())
}
