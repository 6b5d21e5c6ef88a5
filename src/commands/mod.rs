mod ask;
mod manage;
mod start;

use crate::chat::session::{ChatMessage, Role};
use crate::state::Context;

/// Discord rejects messages above 2000 characters.
const MESSAGE_LIMIT: usize = 1990;

/// Genealogy Helper - your AI research assistant
#[poise::command(
    slash_command,
    subcommands(
        "start::start",
        "ask::ask",
        "manage::suggest",
        "manage::transcript",
        "manage::restart",
        "manage::status"
    )
)]
pub async fn genealogy(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Split text into pieces under `limit` bytes, preferring newline then space boundaries.
fn split_chunks(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut end = remaining.len().min(limit);
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = remaining.chars().next().map_or(1, char::len_utf8);
        }
        let split_at = if end < remaining.len() {
            remaining[..end]
                .rfind('\n')
                .or_else(|| remaining[..end].rfind(' '))
                .map(|i| i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Send a message in Discord-safe chunks.
/// Uses ctx.say() for all chunks so follow-ups go through the interaction
/// webhook, which doesn't require Send Messages channel permission.
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in split_chunks(text, MESSAGE_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Uppercase the first letter of an error message for display.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render a finished model message with its sources appended.
fn format_answer(message: &ChatMessage) -> String {
    let mut out = message.text.clone();
    if let Some(sources) = &message.sources {
        out.push_str("\n\n**Sources**\n");
        for source in sources {
            out.push_str(&format!("- **{}:** {}\n", source.title, source.explanation));
        }
    }
    out
}

/// Render one transcript entry for `/genealogy transcript`.
fn format_transcript_entry(message: &ChatMessage) -> String {
    let speaker = match message.role {
        Role::User => "**You**",
        Role::Model => "**Helper**",
    };
    let body = if message.is_streaming && message.text.is_empty() {
        "_…thinking_".to_string()
    } else {
        format_answer(message)
    };
    format!(
        "{} ({}):\n{}\n",
        speaker,
        message.created_at.format("%H:%M UTC"),
        body
    )
}
