use pulldown_cmark::{Event, Parser, TagEnd};

use crate::platform::Author;

use super::ReplyContext;

const QUOTE_SNIPPET_LEN: usize = 100;

/// Substitutes `{user}`, `{tenant}`, `{username}`, `{displayname}` and `{pronouns}`
/// in one pass, so substituted values are never expanded again.
pub fn render_template(template: &str, author: &Author, tenant: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            rest = tail;
            break;
        };

        let value = match &tail[1..close] {
            "user" => Some(author.id.to_string()),
            "tenant" => Some(tenant.to_owned()),
            "username" => Some(author.username.clone()),
            "displayname" => Some(author.shown_name().to_owned()),
            "pronouns" => Some(author.pronouns.clone().unwrap_or_default()),
            _ => None,
        };
        match value {
            Some(value) => {
                out.push_str(&value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// `prefix author suffix`, skipping blank parts, cut to `limit` characters.
pub fn compose_name(prefix: &str, author: &str, suffix: &str, limit: usize) -> String {
    let name = [prefix, author, suffix]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        return "Unknown".to_owned();
    }
    truncate(&name, limit).trim_end().to_owned()
}

/// Flattens markdown to single-line plain text.
pub fn plain_text(markdown: &str) -> String {
    let mut text = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(chunk) | Event::Code(chunk) => text.push_str(&chunk),
            Event::SoftBreak | Event::HardBreak | Event::End(TagEnd::Paragraph) => text.push(' '),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => text[..end].to_owned(),
        None => text.to_owned(),
    }
}

pub fn quote_with_link(reply: &ReplyContext, link: &str) -> String {
    format!("> [Reply to {}]({link})\n", reply.author)
}

pub fn quote_with_text(reply: &ReplyContext) -> String {
    let mut snippet = plain_text(&reply.content);
    if snippet.chars().count() > QUOTE_SNIPPET_LEN {
        snippet = format!("{}…", truncate(&snippet, QUOTE_SNIPPET_LEN - 1));
    }
    if snippet.is_empty() {
        snippet = "(no text)".to_owned();
    }
    format!("> **{}**: {snippet}\n", reply.author)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MessageId, UserId};

    fn author() -> Author {
        Author {
            id: UserId(42),
            username: "u1".to_owned(),
            display_name: None,
            pronouns: None,
            avatar_url: None,
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let mut author = author();
        author.display_name = Some("Ulla".to_owned());
        author.pronouns = Some("she/her".to_owned());

        assert_eq!(
            render_template("{user}|{tenant}|{username}|{displayname}|{pronouns}", &author, "A"),
            "42|A|u1|Ulla|she/her"
        );
        assert_eq!(render_template("{unknown} {tenant", &author, "A"), "{unknown} {tenant");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let mut author = author();
        author.username = "{tenant}".to_owned();
        assert_eq!(render_template("{username} {tenant}", &author, "A"), "{tenant} A");
    }

    #[test]
    fn missing_display_name_and_pronouns_fall_back() {
        assert_eq!(render_template("{displayname}", &author(), "A"), "u1");
        assert_eq!(render_template("{pronouns}", &author(), "A"), "");
    }

    #[test]
    fn blank_parts_leave_no_stray_spaces() {
        assert_eq!(compose_name("[GC]", "u1", "• B", 80), "[GC] u1 • B");
        assert_eq!(compose_name("", "u1", "", 80), "u1");
        assert_eq!(compose_name("[GC]", "u1", "", 80), "[GC] u1");
        assert_eq!(compose_name("", "u1", "  ", 80), "u1");
    }

    #[test]
    fn names_are_cut_to_the_limit() {
        let long = "x".repeat(100);
        assert_eq!(compose_name("[GC]", &long, "• B", 80).chars().count(), 80);
        assert_eq!(compose_name("ééé", "u1", "", 2), "éé");
    }

    #[test]
    fn quotes_flatten_markdown() {
        let reply = ReplyContext {
            message: MessageId(1),
            author: "u2".to_owned(),
            content: "**bold** and `code`\n\nnext paragraph".to_owned(),
        };
        assert_eq!(quote_with_text(&reply), "> **u2**: bold and code next paragraph\n");
        assert_eq!(
            quote_with_link(&reply, "https://x/1"),
            "> [Reply to u2](https://x/1)\n"
        );
    }

    #[test]
    fn long_quotes_are_shortened() {
        let reply = ReplyContext {
            message: MessageId(1),
            author: "u2".to_owned(),
            content: "word ".repeat(60),
        };
        let quote = quote_with_text(&reply);
        assert!(quote.ends_with("…\n"));
        assert!(quote.chars().count() < 120);
    }
}
