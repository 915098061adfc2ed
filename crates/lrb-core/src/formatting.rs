//! Text shaping for mirrored messages (markup flattening, headers, limits).

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{AuthorDisplay, Platform};

/// Discord embed description limit.
pub const DISCORD_EMBED_DESCRIPTION_MAX: usize = 4096;
/// Slack section block text limit.
pub const SLACK_SECTION_TEXT_MAX: usize = 3000;

fn slack_markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // <@U123>, <@U123|name>, <#C1|name>, <!here>, <https://x|label>, <https://x>
    RE.get_or_init(|| Regex::new(r"<([@#!]?)([^<>|]+)(?:\|([^<>]*))?>").expect("valid regex"))
}

fn discord_markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // <@123>, <@!123>, <@&123>, <#123>, <:name:123>, <a:name:123>
    RE.get_or_init(|| {
        Regex::new(r"<(?:(@!?|@&|#)(\d+)|a?:(\w+):\d+)>").expect("valid regex")
    })
}

/// Flatten Slack's angle-bracket markup into plain text.
pub fn flatten_slack_markup(text: &str) -> String {
    let flattened = slack_markup_re().replace_all(text, |caps: &regex::Captures<'_>| {
        let sigil = caps.get(1).map_or("", |m| m.as_str());
        let body = &caps[2];
        let label = caps.get(3).map(|m| m.as_str()).filter(|l| !l.is_empty());
        match (sigil, label) {
            ("@", Some(l)) => format!("@{l}"),
            ("@", None) => format!("@{body}"),
            ("#", Some(l)) => format!("#{l}"),
            ("#", None) => format!("#{body}"),
            // <!here>, <!channel>, <!subteam^S1|@team>
            ("!", Some(l)) => l.to_string(),
            ("!", None) => format!("@{body}"),
            (_, Some(l)) => format!("{l} ({body})"),
            (_, None) => body.to_string(),
        }
    });
    unescape_slack(&flattened)
}

/// Slack escapes these three characters in message text.
fn unescape_slack(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Flatten Discord mention and custom-emoji markup into plain text.
pub fn flatten_discord_markup(text: &str) -> String {
    discord_markup_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if let Some(name) = caps.get(3) {
                return format!(":{}:", name.as_str());
            }
            let id = &caps[2];
            match &caps[1] {
                "#" => format!("#{id}"),
                "@&" => format!("@role-{id}"),
                _ => format!("@{id}"),
            }
        })
        .into_owned()
}

/// Char-boundary-safe truncation with a trailing ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

/// Title of a mirrored message on the receiving side.
pub fn mirror_title(author: &AuthorDisplay) -> String {
    match author.origin {
        Platform::Slack => format!("Message from #{}", author.channel_name),
        Platform::Discord => format!("Message from Discord #{}", author.channel_name),
    }
}

/// Attribution line placed under a mirrored message.
pub fn mirror_attribution(author: &AuthorDisplay) -> String {
    match author.origin {
        Platform::Slack => format!("Sent from Slack • {}", author.channel_name),
        Platform::Discord => format!("Sent by *{}* from Discord", author.author_name),
    }
}

pub fn file_comment(author: &AuthorDisplay) -> String {
    format!(
        "File shared by {} from {}",
        author.author_name,
        author.origin.display_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(origin: Platform) -> AuthorDisplay {
        AuthorDisplay {
            author_name: "Alice".to_string(),
            channel_name: "general".to_string(),
            origin,
        }
    }

    #[test]
    fn slack_mentions_and_links_flatten() {
        let text = "hi <@U123|alice> see <#C1|random> and <https://ex.com|docs> or <https://ex.com/raw>";
        assert_eq!(
            flatten_slack_markup(text),
            "hi @alice see #random and docs (https://ex.com) or https://ex.com/raw"
        );
    }

    #[test]
    fn slack_specials_and_escapes() {
        assert_eq!(flatten_slack_markup("<!here> a &lt; b &amp;&amp; c"), "@here a < b && c");
        assert_eq!(flatten_slack_markup("<@U999>"), "@U999");
        assert_eq!(flatten_slack_markup("plain"), "plain");
    }

    #[test]
    fn discord_mentions_flatten() {
        let text = "<@123> <@!456> <@&7> <#89> <:party:1234> <a:spin:55>";
        assert_eq!(
            flatten_discord_markup(text),
            "@123 @456 @role-7 #89 :party: :spin:"
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 3), "hé…");
        assert_eq!(truncate_chars("日本語テキスト", 4).chars().count(), 4);
    }

    #[test]
    fn titles_follow_origin() {
        assert_eq!(mirror_title(&author(Platform::Slack)), "Message from #general");
        assert_eq!(
            mirror_title(&author(Platform::Discord)),
            "Message from Discord #general"
        );
        assert_eq!(
            mirror_attribution(&author(Platform::Discord)),
            "Sent by *Alice* from Discord"
        );
        assert_eq!(
            file_comment(&author(Platform::Slack)),
            "File shared by Alice from Slack"
        );
    }
}
