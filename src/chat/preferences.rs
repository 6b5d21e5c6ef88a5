use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("a custom website name is required when choosing \"Other\"")]
    EmptyCustomWebsite,
}

/// Genealogy website the user wants answers focused on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Website {
    Any,
    FamilySearch,
    Ancestry,
    MyHeritage,
    Findmypast,
    UsNationalArchives,
    Other(String),
}

impl Website {
    /// Build a custom website entry. The name must be non-empty once trimmed.
    pub fn other(name: &str) -> Result<Self, PreferenceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PreferenceError::EmptyCustomWebsite);
        }
        Ok(Website::Other(name.to_string()))
    }

    /// Display label; also the literal value that goes into prompts.
    pub fn label(&self) -> &str {
        match self {
            Website::Any => "Any Website",
            Website::FamilySearch => "FamilySearch.org",
            Website::Ancestry => "Ancestry.com",
            Website::MyHeritage => "MyHeritage",
            Website::Findmypast => "Findmypast",
            Website::UsNationalArchives => "US National Archives",
            Website::Other(name) => name.as_str(),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Website::Any)
    }
}

impl fmt::Display for Website {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStyle {
    Detailed,
    StepByStep,
}

impl AnswerStyle {
    pub fn label(self) -> &'static str {
        match self {
            AnswerStyle::Detailed => "detailed",
            AnswerStyle::StepByStep => "step-by-step",
        }
    }
}

impl fmt::Display for AnswerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Session-scoped answer preferences, chosen once before chatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub website: Website,
    pub answer_style: AnswerStyle,
}

impl Preferences {
    pub fn new(website: Website, answer_style: AnswerStyle) -> Self {
        Self {
            website,
            answer_style,
        }
    }

    /// Opening model message posted once preferences are accepted.
    pub fn greeting(&self) -> String {
        let style = match self.answer_style {
            AnswerStyle::Detailed => "detailed answers",
            AnswerStyle::StepByStep => "step-by-step instructions",
        };
        let topic = if self.website.is_any() {
            "genealogy in general".to_string()
        } else {
            format!("for {}", self.website)
        };
        format!("Great! I'm ready to help you with {style} about {topic}. What's your first question?")
    }

    /// Starter questions tailored to the chosen website.
    pub fn suggested_prompts(&self) -> Vec<String> {
        let fixed: &[&str] = match self.website {
            Website::FamilySearch => &[
                "How do I get started with the Family Tree on FamilySearch.org?",
                "Explain how to search the catalog on FamilySearch.org.",
                "What are \"Record Hints\" on FamilySearch.org?",
            ],
            Website::Ancestry => &[
                "How do I use ThruLines® on Ancestry.com?",
                "What is AncestryDNA and how can it help my research?",
                "Can you explain how to build a family tree on Ancestry.com?",
            ],
            Website::MyHeritage => &[
                "How do I use the 'Theory of Family Relativity' on MyHeritage?",
                "What are the benefits of the MyHeritage DNA test?",
                "Can you explain how to use Photo Discoveries™?",
            ],
            Website::UsNationalArchives => &[
                "How do I find military records at the US National Archives?",
                "Can you explain how to search the National Archives Catalog online?",
                "What kind of immigration records are available at archives.gov?",
            ],
            Website::Any | Website::Findmypast | Website::Other(_) => &[],
        };

        if !fixed.is_empty() {
            return fixed.iter().map(|s| s.to_string()).collect();
        }

        let target = if self.website.is_any() {
            "the internet"
        } else {
            self.website.label()
        };
        vec![
            format!("What are the best free resources on {target}?"),
            "How do I find birth records for an ancestor?".to_string(),
            "Explain the difference between a primary and secondary source in genealogy."
                .to_string(),
        ]
    }
}
