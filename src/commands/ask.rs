use std::time::Duration;

use poise::CreateReply;
use tracing::{debug, info, warn};

use super::{capitalize, format_answer, send_chunked, split_chunks, MESSAGE_LIMIT};
use crate::chat::assistant::settle;
use crate::chat::session::{lock, Exchange, SharedSession};
use crate::state::Context;

/// Discord throttles message edits, so streamed text is pushed at most this often.
const RENDER_INTERVAL: Duration = Duration::from_millis(1200);

const THINKING: &str = "_Researching…_";

/// Current text of the exchange's message, or None once the session moved on.
fn snapshot(session: &SharedSession, exchange: &Exchange) -> Option<String> {
    let guard = lock(session);
    if guard.epoch() != exchange.epoch {
        return None;
    }
    guard.transcript().get(exchange.index).map(|m| m.text.clone())
}

/// Streaming preview that fits in one Discord message: the tail of the text.
fn preview(text: &str) -> String {
    if text.is_empty() {
        return THINKING.to_string();
    }
    let budget = MESSAGE_LIMIT - 2;
    if text.len() <= budget {
        return format!("{} ▌", text);
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{} ▌", &text[start..])
}

/// Ask a genealogy research question
#[poise::command(slash_command)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
) -> Result<(), anyhow::Error> {
    let session = ctx.data().session_for(ctx.author().id.get()).await;

    let mut pending = match ctx.data().assistant.ask(&session, &question) {
        Ok(p) => p,
        Err(e) => {
            ctx.say(capitalize(&e.to_string())).await?;
            return Ok(());
        }
    };
    let exchange = pending.exchange;

    info!(user = ctx.author().name, question, "Answer streaming started");

    let reply = ctx
        .say(format!("**Q:** {}\n\n{}", question.trim(), THINKING))
        .await?;

    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut rendered = String::new();

    let joined = loop {
        tokio::select! {
            res = &mut pending.task => break res,
            _ = ticker.tick() => {
                let Some(text) = snapshot(&session, &exchange) else {
                    continue;
                };
                if text == rendered {
                    continue;
                }
                let body = preview(&text);
                rendered = text;
                if let Err(e) = reply.edit(ctx, CreateReply::default().content(body)).await {
                    debug!(error = %e, "Preview edit failed");
                }
            }
        }
    };

    let outcome = settle(&session, &exchange, joined);
    if let Some(e) = &outcome.error {
        warn!(error = %e, fragments = outcome.fragments, "Answer ended with an error");
    }

    // Session restarted mid-answer: nothing left to show.
    let final_text = {
        let guard = lock(&session);
        if guard.epoch() != exchange.epoch {
            None
        } else {
            guard
                .transcript()
                .get(exchange.index)
                .map(|m| format!("**Q:** {}\n\n{}", question.trim(), format_answer(m)))
        }
    };
    let Some(final_text) = final_text else {
        reply
            .edit(ctx, CreateReply::default().content("_Conversation restarted._"))
            .await?;
        return Ok(());
    };

    let chunks = split_chunks(&final_text, MESSAGE_LIMIT);
    let (first, rest) = match chunks.split_first() {
        Some((first, rest)) => (first.to_string(), rest.concat()),
        None => (String::new(), String::new()),
    };
    reply.edit(ctx, CreateReply::default().content(first)).await?;
    if !rest.is_empty() {
        send_chunked(&ctx, &rest).await?;
    }

    Ok(())
}
