use super::preferences::{AnswerStyle, Preferences};

pub const SYSTEM_DIRECTIVE: &str = r#"You are an expert genealogy research assistant chatbot. Your purpose is to answer questions about 'how to do genealogy' and provide information about top genealogy websites.
- You MUST focus on these top 5 websites: FamilySearch.org, Ancestry.com, MyHeritage, Findmypast, and the US National Archives (archives.gov).
- When a user asks a general question, provide information that covers multiple relevant sites.
- You must be able to discuss both major and lesser-known online sources for genealogy records (e.g., state archives, historical societies, specific record collections like the Freedmen's Bureau).
- Your answers are shown in a narrow chat window. Keep answers concise and well-formatted for a small screen. Use markdown for lists and emphasis.
- You will be given user preferences for a specific website and a desired answer format (detailed vs. step-by-step). You must tailor your response to these preferences.
- At the end of every response, you MUST include a section titled "--- Sources ---".
- In this section, list the primary websites or resources you used to formulate your answer, one per line, each starting with "* " and followed by a one-sentence explanation for why the source is relevant. For example: "* FamilySearch.org: A primary source for vital records and user-submitted family trees.""#;

const STEP_BY_STEP_INSTRUCTION: &str = "Please provide the answer as step-by-step instructions. The instructions should be clear, numbered, and easy to follow.";

const DETAILED_INSTRUCTION: &str = "Please provide a detailed, comprehensive answer.";

/// Build the user-turn prompt for a question under the session preferences.
///
/// Callers guarantee the question is non-empty; the text is embedded verbatim.
pub fn compose(question: &str, prefs: &Preferences) -> String {
    let mut prompt = format!("The user wants to know about \"{}\".", question);

    if !prefs.website.is_any() {
        prompt.push_str(&format!(
            "\nTheir question is specifically about the website: {}.",
            prefs.website
        ));
    }

    prompt.push('\n');
    prompt.push_str(match prefs.answer_style {
        AnswerStyle::StepByStep => STEP_BY_STEP_INSTRUCTION,
        AnswerStyle::Detailed => DETAILED_INSTRUCTION,
    });

    prompt
}
