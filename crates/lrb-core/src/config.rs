use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    correlation::DEFAULT_RETENTION,
    domain::{ChannelId, Platform},
    errors::Error,
    relay::{
        files::{FileLimits, DEFAULT_ALLOWED_FILE_TYPES, DEFAULT_MAX_FILE_SIZE},
        filter::{RelayRoute, RelayRoutes},
    },
    Result,
};

/// Typed configuration, loaded once at startup and read-only afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub discord_bot_token: String,
    pub slack_bot_token: String,

    // Relay
    pub routes: RelayRoutes,
    pub file_limits: FileLimits,
    pub correlation_ttl: Duration,
    pub call_timeout: Duration,

    // Polling listeners
    pub poll_interval: Duration,
    pub poll_history_limit: usize,

    // Relay log
    pub relay_log_path: PathBuf,
    pub relay_log_json: bool,
    pub relay_log_capacity: usize,

    // Status
    pub status_interval: Duration,
}

impl Config {
    /// Load from the process environment (plus `.env` if present).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_str = |key: &str| get(key).and_then(non_empty);

        let discord_bot_token = env_str("DISCORD_BOT_TOKEN").ok_or_else(|| {
            Error::Config("DISCORD_BOT_TOKEN environment variable is required".to_string())
        })?;
        let slack_bot_token = env_str("SLACK_BOT_TOKEN").ok_or_else(|| {
            Error::Config("SLACK_BOT_TOKEN environment variable is required".to_string())
        })?;

        let slack_to_discord = parse_route(
            "SLACK_RELAY_CHANNELS",
            env_str("SLACK_RELAY_CHANNELS"),
            "DISCORD_TARGET_CHANNEL",
            env_str("DISCORD_TARGET_CHANNEL"),
        )?;
        let discord_to_slack = parse_route(
            "DISCORD_RELAY_CHANNELS",
            env_str("DISCORD_RELAY_CHANNELS"),
            "SLACK_TARGET_CHANNEL",
            env_str("SLACK_TARGET_CHANNEL"),
        )?;
        if slack_to_discord.is_none() && discord_to_slack.is_none() {
            return Err(Error::Config(
                "no relay direction configured: set SLACK_RELAY_CHANNELS + DISCORD_TARGET_CHANNEL \
                 and/or DISCORD_RELAY_CHANNELS + SLACK_TARGET_CHANNEL"
                    .to_string(),
            ));
        }
        let routes = RelayRoutes::new(slack_to_discord, discord_to_slack);

        let max_bytes = parse_num::<u64>(&env_str, "MAX_FILE_SIZE")?.unwrap_or(DEFAULT_MAX_FILE_SIZE);
        let allowed_extensions = match env_str("ALLOWED_FILE_TYPES") {
            Some(v) => parse_extensions(&v),
            None => DEFAULT_ALLOWED_FILE_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let file_limits = FileLimits::new(max_bytes, allowed_extensions);

        let correlation_ttl = parse_num::<u64>(&env_str, "CORRELATION_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETENTION);
        let call_timeout =
            Duration::from_millis(parse_num::<u64>(&env_str, "CALL_TIMEOUT_MS")?.unwrap_or(30_000));

        let poll_interval =
            Duration::from_millis(parse_num::<u64>(&env_str, "POLL_INTERVAL_MS")?.unwrap_or(2_000));
        let poll_history_limit = parse_num::<usize>(&env_str, "POLL_HISTORY_LIMIT")?
            .unwrap_or(50)
            .clamp(1, 100);

        let relay_log_path = PathBuf::from(
            env_str("RELAY_LOG_PATH").unwrap_or_else(|| "/tmp/lrb-relay.log".to_string()),
        );
        let relay_log_json = env_str("RELAY_LOG_JSON").map(|s| parse_bool(&s)).unwrap_or(false);
        let relay_log_capacity =
            parse_num::<usize>(&env_str, "RELAY_LOG_CAPACITY")?.unwrap_or(200).max(1);

        let status_interval = Duration::from_secs(
            parse_num::<u64>(&env_str, "STATUS_INTERVAL_SECS")?
                .unwrap_or(60)
                .max(1),
        );

        Ok(Self {
            discord_bot_token,
            slack_bot_token,
            routes,
            file_limits,
            correlation_ttl,
            call_timeout,
            poll_interval,
            poll_history_limit,
            relay_log_path,
            relay_log_json,
            relay_log_capacity,
            status_interval,
        })
    }

    /// Channels a platform's listener has to watch: relay sources plus the
    /// mirror target on that platform (for reactions on mirrored copies).
    pub fn watched_channels(&self, platform: Platform) -> Vec<ChannelId> {
        self.routes.watched_channels(platform)
    }
}

fn parse_route(
    allow_key: &str,
    allow: Option<String>,
    target_key: &str,
    target: Option<String>,
) -> Result<Option<RelayRoute>> {
    let allow_list = parse_csv(allow.as_deref().unwrap_or_default());
    match (allow_list.is_empty(), target) {
        (true, None) => Ok(None),
        (false, Some(target)) => Ok(Some(RelayRoute {
            allow_list: allow_list.into_iter().map(ChannelId).collect(),
            target: ChannelId(target.trim().to_string()),
        })),
        (false, None) => Err(Error::Config(format!(
            "{allow_key} is set but {target_key} is missing"
        ))),
        (true, Some(_)) => Err(Error::Config(format!(
            "{target_key} is set but {allow_key} is empty"
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(
    env_str: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = env_str(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// `pdf, .PNG` → `[".pdf", ".png"]`
fn parse_extensions(v: &str) -> Vec<String> {
    parse_csv(v)
        .into_iter()
        .map(|s| {
            let lower = s.to_lowercase();
            if lower.starts_with('.') {
                lower
            } else {
                format!(".{lower}")
            }
        })
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const TOKENS: [(&str, &str); 2] = [("DISCORD_BOT_TOKEN", "d"), ("SLACK_BOT_TOKEN", "s")];

    #[test]
    fn defaults_apply_when_optional_vars_unset() {
        let mut vars = TOKENS.to_vec();
        vars.push(("SLACK_RELAY_CHANNELS", "C1, C2,,C3"));
        vars.push(("DISCORD_TARGET_CHANNEL", "100"));
        let cfg = load(&vars).unwrap();

        assert_eq!(cfg.file_limits.max_bytes, 10 * 1024 * 1024);
        assert!(cfg.file_limits.allowed_extensions.contains(&".pdf".to_string()));
        assert_eq!(cfg.correlation_ttl, Duration::from_secs(300));
        assert_eq!(cfg.status_interval, Duration::from_secs(60));

        let route = cfg.routes.route(Platform::Slack).unwrap();
        assert_eq!(route.allow_list.len(), 3);
        assert_eq!(route.target, ChannelId::from("100"));
        assert!(cfg.routes.route(Platform::Discord).is_none());
    }

    #[test]
    fn tokens_are_required() {
        let err = load(&[("SLACK_BOT_TOKEN", "s")]).unwrap_err();
        assert!(err.to_string().contains("DISCORD_BOT_TOKEN"));
    }

    #[test]
    fn at_least_one_direction_is_required() {
        let err = load(&TOKENS).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn half_configured_direction_is_rejected() {
        let mut vars = TOKENS.to_vec();
        vars.push(("DISCORD_RELAY_CHANNELS", "200"));
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("SLACK_TARGET_CHANNEL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = TOKENS.to_vec();
        vars.extend([
            ("DISCORD_RELAY_CHANNELS", "200"),
            ("SLACK_TARGET_CHANNEL", "C4"),
            ("MAX_FILE_SIZE", "1024"),
            ("ALLOWED_FILE_TYPES", "PDF, .md"),
            ("CORRELATION_TTL_SECS", "30"),
            ("RELAY_LOG_JSON", "yes"),
        ]);
        let cfg = load(&vars).unwrap();

        assert_eq!(cfg.file_limits.max_bytes, 1024);
        assert_eq!(
            cfg.file_limits.allowed_extensions,
            vec![".pdf".to_string(), ".md".to_string()]
        );
        assert_eq!(cfg.correlation_ttl, Duration::from_secs(30));
        assert!(cfg.relay_log_json);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let mut vars = TOKENS.to_vec();
        vars.extend([
            ("DISCORD_RELAY_CHANNELS", "200"),
            ("SLACK_TARGET_CHANNEL", "C4"),
            ("MAX_FILE_SIZE", "ten megabytes"),
        ]);
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("MAX_FILE_SIZE"));
    }

    #[test]
    fn watched_channels_include_mirror_targets() {
        let mut vars = TOKENS.to_vec();
        vars.extend([
            ("SLACK_RELAY_CHANNELS", "C1"),
            ("DISCORD_TARGET_CHANNEL", "100"),
            ("DISCORD_RELAY_CHANNELS", "200"),
            ("SLACK_TARGET_CHANNEL", "C4"),
        ]);
        let cfg = load(&vars).unwrap();

        assert_eq!(
            cfg.watched_channels(Platform::Discord),
            vec![ChannelId::from("100"), ChannelId::from("200")]
        );
        assert_eq!(
            cfg.watched_channels(Platform::Slack),
            vec![ChannelId::from("C1"), ChannelId::from("C4")]
        );
    }
}
