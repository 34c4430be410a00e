//! BigPanda poller configuration
use std::{fmt, time::Duration};

use clap::{Parser, ValueEnum};
use eyre::{WrapErr, bail};
use serde::{Deserialize, Deserializer};
use url::Url;

/// Default incidents endpoint, `{environment_id}` is resolved once at startup.
pub const DEFAULT_API_URL: &str =
    "https://api.bigpanda.io/resources/v2.0/environments/{environment_id}/incidents";

/// Default per-incident activities endpoint, `{incident_id}` is resolved per request.
pub const DEFAULT_ACTIVITIES_URL: &str =
    "https://api.bigpanda.io/resources/v2.0/incidents/{incident_id}/activities";

/// Default polling interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

const ENVIRONMENT_PLACEHOLDER: &str = "{environment_id}";

/// Which change-detection strategy the poller runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Emit whole incidents whenever their change marker moves.
    Incidents,
    /// Emit `{incident, activity}` pairs for activities not seen before.
    #[default]
    Activities,
}

/// BigPanda API connection options
#[derive(Debug, Clone, Parser)]
pub struct BigPandaOpts {
    /// BigPanda API token
    #[clap(long, env = "BIGPANDA_API_TOKEN")]
    pub api_token: String,
    /// BigPanda environment ID
    #[clap(long, env = "BIGPANDA_ENVIRONMENT_ID")]
    pub environment_id: String,
    /// Incidents endpoint template containing `{environment_id}`
    #[clap(long, env = "BIGPANDA_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    /// Activities endpoint template containing `{incident_id}`
    #[clap(long, env = "BIGPANDA_ACTIVITIES_URL", default_value = DEFAULT_ACTIVITIES_URL)]
    pub activities_url: String,
}

/// Polling behaviour options
#[derive(Debug, Clone, Parser)]
pub struct PollOpts {
    /// Poll interval in seconds
    #[clap(
        long,
        env = "INTERVAL",
        default_value_t = DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: u64,
    /// Emit activities already present on the first poll
    #[clap(
        long,
        env = "RETURN_FIRST_POLL",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub return_first_poll: bool,
    /// Change-detection strategy
    #[clap(long, env = "POLL_MODE", value_enum, default_value_t = PollMode::Activities)]
    pub mode: PollMode,
    /// Maximum number of activity requests in flight during one cycle
    #[clap(long, env = "ACTIVITY_FETCH_CONCURRENCY", default_value_t = 1)]
    pub activity_concurrency: usize,
}

/// CLI options for the standalone poller
#[derive(Debug, Clone, Parser)]
#[clap(name = "bigpanda-poller")]
pub struct Opts {
    /// BigPanda API configuration
    #[clap(flatten)]
    pub bigpanda: BigPandaOpts,

    /// Polling configuration
    #[clap(flatten)]
    pub poll: PollOpts,
}

/// Immutable configuration of one poller.
///
/// Hosts build it from a key/value object with [`PollConfig::from_args`]; the
/// standalone binary converts its [`Opts`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PollConfig {
    /// Bearer token attached to every request
    pub api_token: String,
    /// Environment whose incidents are watched
    pub environment_id: String,
    /// Incidents endpoint template
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Activities endpoint template
    #[serde(default = "default_activities_url")]
    pub activities_url: String,
    /// Seconds to sleep between cycles
    #[serde(default = "default_interval", deserialize_with = "lenient_u64")]
    pub interval: u64,
    /// Emit activities already present on the first poll (activities mode only)
    #[serde(default, deserialize_with = "lenient_bool")]
    pub return_first_poll: bool,
    /// Change-detection strategy
    #[serde(default)]
    pub mode: PollMode,
    /// Maximum number of activity requests in flight during one cycle
    #[serde(default = "default_activity_concurrency")]
    pub activity_concurrency: usize,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

fn default_activities_url() -> String {
    DEFAULT_ACTIVITIES_URL.to_owned()
}

const fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

const fn default_activity_concurrency() -> usize {
    1
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(de)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    match BoolOrString::deserialize(de)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(s) => parse_boolish(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid boolean value {s:?}"))
        }),
    }
}

/// Accepts the same spellings as clap's `BoolishValueParser`.
fn parse_boolish(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl PollConfig {
    /// Build a validated configuration from the host's key/value object.
    pub fn from_args(args: serde_json::Value) -> eyre::Result<Self> {
        let config: Self =
            serde_json::from_value(args).wrap_err("invalid poller configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never produce a successful request.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.api_token.trim().is_empty() {
            bail!("api_token is required");
        }
        if self.environment_id.trim().is_empty() {
            bail!("environment_id is required");
        }
        if self.interval == 0 {
            bail!("interval must be at least 1 second");
        }
        if self.activity_concurrency == 0 {
            bail!("activity_concurrency must be at least 1");
        }
        self.incidents_url()?;
        Ok(())
    }

    /// Incidents endpoint with the environment placeholder resolved.
    pub fn incidents_url(&self) -> eyre::Result<Url> {
        let resolved = self.api_url.replace(ENVIRONMENT_PLACEHOLDER, &self.environment_id);
        Url::parse(&resolved).wrap_err_with(|| format!("invalid api_url {resolved:?}"))
    }

    /// Sleep between two cycles.
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl fmt::Debug for PollConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollConfig")
            .field("api_token", &"<redacted>")
            .field("environment_id", &self.environment_id)
            .field("api_url", &self.api_url)
            .field("activities_url", &self.activities_url)
            .field("interval", &self.interval)
            .field("return_first_poll", &self.return_first_poll)
            .field("mode", &self.mode)
            .field("activity_concurrency", &self.activity_concurrency)
            .finish()
    }
}

impl From<Opts> for PollConfig {
    fn from(opts: Opts) -> Self {
        Self {
            api_token: opts.bigpanda.api_token,
            environment_id: opts.bigpanda.environment_id,
            api_url: opts.bigpanda.api_url,
            activities_url: opts.bigpanda.activities_url,
            interval: opts.poll.interval,
            return_first_poll: opts.poll.return_first_poll,
            mode: opts.poll.mode,
            activity_concurrency: opts.poll.activity_concurrency,
        }
    }
}
