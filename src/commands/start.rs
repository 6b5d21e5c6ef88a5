use tracing::{info, warn};

use super::capitalize;
use crate::chat::assistant::StartError;
use crate::chat::preferences::{AnswerStyle, Preferences, Website};
use crate::state::Context;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum WebsiteChoice {
    #[name = "Any Website"]
    Any,
    #[name = "FamilySearch.org"]
    FamilySearch,
    #[name = "Ancestry.com"]
    Ancestry,
    #[name = "MyHeritage"]
    MyHeritage,
    #[name = "Findmypast"]
    Findmypast,
    #[name = "US National Archives"]
    UsNationalArchives,
    #[name = "Other"]
    Other,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum StyleChoice {
    #[name = "Detailed Answer"]
    Detailed,
    #[name = "Step-by-Step"]
    StepByStep,
}

impl From<StyleChoice> for AnswerStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Detailed => AnswerStyle::Detailed,
            StyleChoice::StepByStep => AnswerStyle::StepByStep,
        }
    }
}

fn website_from_choice(
    choice: WebsiteChoice,
    custom: Option<&str>,
) -> Result<Website, crate::chat::preferences::PreferenceError> {
    Ok(match choice {
        WebsiteChoice::Any => Website::Any,
        WebsiteChoice::FamilySearch => Website::FamilySearch,
        WebsiteChoice::Ancestry => Website::Ancestry,
        WebsiteChoice::MyHeritage => Website::MyHeritage,
        WebsiteChoice::Findmypast => Website::Findmypast,
        WebsiteChoice::UsNationalArchives => Website::UsNationalArchives,
        WebsiteChoice::Other => Website::other(custom.unwrap_or_default())?,
    })
}

/// Choose your website and answer style to begin
#[poise::command(slash_command)]
pub async fn start(
    ctx: Context<'_>,
    #[description = "Which website are you interested in?"] website: WebsiteChoice,
    #[description = "How would you like your answers?"] style: StyleChoice,
    #[description = "Website name when choosing \"Other\""] custom_website: Option<String>,
) -> Result<(), anyhow::Error> {
    let website = match website_from_choice(website, custom_website.as_deref()) {
        Ok(w) => w,
        Err(e) => {
            ctx.say(format!("Couldn't start: {}.", e)).await?;
            return Ok(());
        }
    };
    let preferences = Preferences::new(website, style.into());

    info!(user = ctx.author().name, website = %preferences.website, "Start requested");

    let session = ctx.data().session_for(ctx.author().id.get()).await;
    match ctx.data().assistant.start(&session, preferences).await {
        Ok(reply) => {
            let mut text = reply.greeting;
            if !reply.suggestions.is_empty() {
                text.push_str("\n\nOr, try one of these questions:\n");
                for s in &reply.suggestions {
                    text.push_str(&format!("- {}\n", s));
                }
            }
            ctx.say(text).await?;
        }
        Err(StartError::Initialization(e)) => {
            warn!(error = %e, "Start blocked by initialization failure");
            ctx.say(format!(
                "**Initialization Failed**\nWe couldn't connect to the AI service. \
                 Please check the configuration and try again.\n`{}`",
                e
            ))
            .await?;
        }
        Err(StartError::Session(e)) => {
            ctx.say(format!("{}.", capitalize(&e.to_string()))).await?;
        }
    }

    Ok(())
}
