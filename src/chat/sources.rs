/// Separator the model is instructed to place before its citations.
pub const SOURCES_MARKER: &str = "--- Sources ---";

/// A single cited resource parsed from the trailing sources block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub explanation: String,
}

/// Answer text split into its body and the structured citations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub main_text: String,
    pub sources: Vec<Source>,
}

/// Split a finished answer into body text and sources.
///
/// Only the first marker splits. Everything after it is scanned line by
/// line; lines that are not bulleted, or that lack a `Title: explanation`
/// shape, are dropped without error.
pub fn extract(full_text: &str) -> Extracted {
    let Some(idx) = full_text.find(SOURCES_MARKER) else {
        return Extracted {
            main_text: full_text.trim().to_string(),
            sources: Vec::new(),
        };
    };

    let before = &full_text[..idx];
    let after = &full_text[idx + SOURCES_MARKER.len()..];

    Extracted {
        main_text: before.trim().to_string(),
        sources: after.lines().filter_map(parse_source_line).collect(),
    }
}

/// Parse one `* **Title**: explanation` line.
///
/// Bold is stripped before splitting, so `**Title:** explanation` parses too.
fn parse_source_line(line: &str) -> Option<Source> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix('*')
        .or_else(|| trimmed.strip_prefix('-'))?;

    let rest = strip_bold(rest);
    let (title, explanation) = rest.split_once(": ")?;
    let title = title.trim().to_string();
    let explanation = explanation.trim();

    if title.is_empty() || explanation.is_empty() {
        return None;
    }

    Some(Source {
        title,
        explanation: explanation.to_string(),
    })
}

/// Remove paired `**` emphasis, leaving unpaired asterisks alone.
fn strip_bold(text: &str) -> String {
    let pairs = text.matches("**").count() / 2;
    if pairs == 0 {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut removed = 0;
    while removed < pairs * 2 {
        let Some(pos) = rest.find("**") else { break };
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 2..];
        removed += 1;
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source(title: &str, explanation: &str) -> Source {
        Source {
            title: title.to_string(),
            explanation: explanation.to_string(),
        }
    }

    #[test]
    fn test_extract_mixed_bullets() {
        let input = "Here is your answer.\n--- Sources ---\n* **FamilySearch.org**: A primary source for vital records.\n- Ancestry.com: Good for DNA matching.";
        let out = extract(input);
        assert_eq!(out.main_text, "Here is your answer.");
        assert_eq!(
            out.sources,
            vec![
                source("FamilySearch.org", "A primary source for vital records."),
                source("Ancestry.com", "Good for DNA matching."),
            ]
        );
    }

    #[test]
    fn test_colon_inside_bold_title() {
        let input = "Answer\n--- Sources ---\n* **Ancestry.com:** Good for DNA.\n* **MyHeritage**: Photo tools.";
        let out = extract(input);
        assert_eq!(
            out.sources,
            vec![
                source("Ancestry.com", "Good for DNA."),
                source("MyHeritage", "Photo tools."),
            ]
        );
    }

    #[test]
    fn test_extract_no_marker() {
        let out = extract("  Just an answer with no citations.\n\n");
        assert_eq!(out.main_text, "Just an answer with no citations.");
        assert!(out.sources.is_empty());
    }

    #[test]
    fn test_extract_is_idempotent() {
        let first = extract("Body text.\n--- Sources ---\n* Findmypast: British records.");
        let second = extract(&first.main_text);
        assert_eq!(second.main_text, first.main_text);
        assert!(second.sources.is_empty());

        let plain = extract("  no marker here  ");
        assert_eq!(extract(&plain.main_text), plain);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let input = "Answer\n--- Sources ---\n* just a note with no colon\n* MyHeritage: European records.";
        let out = extract(input);
        assert_eq!(out.sources, vec![source("MyHeritage", "European records.")]);
    }

    #[test]
    fn test_unbulleted_lines_are_ignored() {
        let input = "Answer\n--- Sources ---\nFamilySearch.org: not bulleted\n\n   - archives.gov: Federal census and military files.  ";
        let out = extract(input);
        assert_eq!(
            out.sources,
            vec![source("archives.gov", "Federal census and military files.")]
        );
    }

    #[test]
    fn test_first_colon_space_splits() {
        let out = extract("x\n--- Sources ---\n* FamilySearch: Wiki: guides for every county.");
        assert_eq!(
            out.sources,
            vec![source("FamilySearch", "Wiki: guides for every county.")]
        );
    }

    #[test]
    fn test_colon_without_space_is_not_a_split() {
        let out = extract("x\n--- Sources ---\n* https://www.archives.gov");
        assert!(out.sources.is_empty());
    }

    #[test]
    fn test_only_first_marker_splits() {
        let input = "Body\n--- Sources ---\n* A: first.\n--- Sources ---\n* B: second.";
        let out = extract(input);
        assert_eq!(out.main_text, "Body");
        assert_eq!(out.sources, vec![source("A", "first."), source("B", "second.")]);
    }

    #[test]
    fn test_marker_with_no_entries() {
        let out = extract("Body\n--- Sources ---\n");
        assert_eq!(out.main_text, "Body");
        assert!(out.sources.is_empty());
    }

    #[test]
    fn test_strip_bold() {
        assert_eq!(strip_bold("**Ancestry.com**"), "Ancestry.com");
        assert_eq!(strip_bold("The **National** Archives"), "The National Archives");
        assert_eq!(strip_bold("**unpaired"), "**unpaired");
        assert_eq!(strip_bold("plain"), "plain");
    }
}
