//! Reaction emoji mapping between Slack short names and Discord unicode.
//!
//! The table is static and read-only; every lookup is a pure function.

use crate::domain::Platform;

/// One row of the mapping table.
#[derive(Clone, Copy, Debug)]
pub struct EmojiMapping {
    /// Platform-neutral token.
    pub token: &'static str,
    /// Slack short name without colons.
    pub slack: &'static str,
    /// Discord unicode emoji.
    pub discord: &'static str,
}

const fn row(token: &'static str, slack: &'static str, discord: &'static str) -> EmojiMapping {
    EmojiMapping { token, slack, discord }
}

pub const EMOJI_TABLE: &[EmojiMapping] = &[
    row("smile", "smile", "😄"),
    row("blush", "blush", "😊"),
    row("laughing", "laughing", "😆"),
    row("thumbsup", "thumbsup", "👍"),
    row("thumbsdown", "thumbsdown", "👎"),
    row("heart", "heart", "❤️"),
    row("warning", "warning", "⚠️"),
    row("anger", "anger", "💢"),
    row("star", "star", "⭐"),
    row("question", "question", "❓"),
    row("exclamation", "exclamation", "❗"),
    row("ok", "ok", "🆗"),
    row("pray", "pray", "🙏"),
    row("clap", "clap", "👏"),
    row("fire", "fire", "🔥"),
    row("eyes", "eyes", "👀"),
    row("paper", "page_facing_up", "📄"),
    row("books", "books", "📚"),
    row("computer", "computer", "💻"),
    row("bulb", "bulb", "💡"),
    row("calendar", "date", "📅"),
    row("alarm_clock", "alarm_clock", "⏰"),
    row("check", "white_check_mark", "✅"),
];

/// Other Slack names for a table symbol. Accepted on input only; we always
/// send the table's name.
const SLACK_ALIASES: &[(&str, &str)] = &[
    ("+1", "thumbsup"),
    ("-1", "thumbsdown"),
    ("satisfied", "laughing"),
    ("heavy_exclamation_mark", "exclamation"),
];

/// Translate a reaction symbol from `from`'s notation into the other platform's.
///
/// `None` means there is no equivalent; callers skip the reaction sync.
pub fn to_other_platform(from: Platform, symbol: &str) -> Option<&'static str> {
    let row = lookup(from, symbol)?;
    Some(notation_of(row, from.other()))
}

/// Platform-neutral token for a platform-native symbol.
pub fn token_for(platform: Platform, symbol: &str) -> Option<&'static str> {
    lookup(platform, symbol).map(|row| row.token)
}

/// Platform-native notation for a neutral token.
pub fn notation(platform: Platform, token: &str) -> Option<&'static str> {
    EMOJI_TABLE
        .iter()
        .find(|row| row.token == token)
        .map(|row| notation_of(row, platform))
}

fn notation_of(row: &EmojiMapping, platform: Platform) -> &'static str {
    match platform {
        Platform::Discord => row.discord,
        Platform::Slack => row.slack,
    }
}

fn lookup(platform: Platform, symbol: &str) -> Option<&'static EmojiMapping> {
    match platform {
        Platform::Slack => {
            let name = normalize_slack(symbol);
            EMOJI_TABLE.iter().find(|row| row.slack == name)
        }
        Platform::Discord => {
            let wanted = normalize_discord(symbol);
            EMOJI_TABLE
                .iter()
                .find(|row| normalize_discord(row.discord) == wanted)
        }
    }
}

/// `:+1::skin-tone-3:` → `thumbsup`
fn normalize_slack(symbol: &str) -> &str {
    let s = symbol.trim().trim_matches(':');
    let base = match s.split_once("::") {
        Some((base, _modifier)) => base,
        None => s,
    };
    SLACK_ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map_or(base, |(_, canonical)| *canonical)
}

/// Discord reports some emoji with and some without the U+FE0F variation selector.
fn normalize_discord(symbol: &str) -> String {
    symbol.trim().chars().filter(|c| *c != '\u{FE0F}').collect()
}
