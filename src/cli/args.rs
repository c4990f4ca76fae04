//! CLI argument definitions
//!
//! Global CLI options and configuration merging logic.

use std::io::IsTerminal;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{Config, ConfigColorMode, ConfigYieldMode};
use crate::consts::{DEFAULT_BASE_URL, DEFAULT_STREAM_PATH, EXPECTED_AUDIENCE, EXPECTED_ISSUER};
use crate::stream::{StreamOptions, YieldPolicy};

use super::commands::{Commands, StreamArgs};

const DEFAULT_YIELD_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq)]
pub(crate) enum ColorMode {
    /// Auto-detect based on terminal (default)
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Parser)]
#[command(name = "riego")]
#[command(about = "Command-line client for the Riego irrigation API", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// API base URL (default: http://localhost:5001/api)
    #[arg(long, global = true, value_name = "URL")]
    pub(crate) base_url: Option<String>,

    /// Output as JSON
    #[arg(short, long, global = true)]
    pub(crate) json: bool,

    /// Filter JSON output with jq expression (requires jq installed)
    #[arg(long, global = true, value_name = "FILTER")]
    pub(crate) jq: Option<String>,

    /// Enable debug output (show processing details)
    #[arg(long, global = true)]
    pub(crate) debug: bool,

    /// Suppress progress messages
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Timezone for date display (e.g., "America/Lima", "UTC")
    #[arg(long, global = true, value_name = "TZ")]
    pub(crate) timezone: Option<String>,

    /// Locale for number formatting: en, es or pt (e.g., "es-PE")
    #[arg(long, global = true, value_name = "LOCALE")]
    pub(crate) locale: Option<String>,

    /// Color output mode
    #[arg(long, global = true, value_enum, default_value = "auto")]
    pub(crate) color: ColorMode,

    /// Disable colored output (shorthand for --color=never)
    #[arg(long, global = true)]
    pub(crate) no_color: bool,

    /// Settings that only come from the config file
    #[arg(skip)]
    pub(crate) settings: Settings,
}

/// Values with no flag of their own, resolved from config and defaults.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) issuer: String,
    pub(crate) audience: String,
    pub(crate) stream_path: String,
    pub(crate) stream: StreamOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            issuer: EXPECTED_ISSUER.to_string(),
            audience: EXPECTED_AUDIENCE.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            stream: StreamOptions::default(),
        }
    }
}

impl Cli {
    /// Merge config file values into CLI (CLI args take precedence)
    pub(crate) fn with_config(mut self, config: &Config) -> Self {
        // For boolean flags, config only applies if CLI is false (default)
        if !self.no_color && config.no_color {
            self.no_color = true;
        }
        if !self.debug && config.debug {
            self.debug = true;
        }

        if let Some(color) = config.color
            && self.color == ColorMode::Auto
        {
            self.color = match color {
                ConfigColorMode::Auto => ColorMode::Auto,
                ConfigColorMode::Always => ColorMode::Always,
                ConfigColorMode::Never => ColorMode::Never,
            };
        }

        // String options: only apply if CLI didn't set them
        if self.base_url.is_none() {
            self.base_url = config.base_url.clone();
        }
        if self.timezone.is_none() {
            self.timezone = config.timezone.clone();
        }
        if self.locale.is_none() {
            self.locale = config.locale.clone();
        }

        let settings = &mut self.settings;
        if let Some(issuer) = &config.issuer {
            settings.issuer = issuer.clone();
        }
        if let Some(audience) = &config.audience {
            settings.audience = audience.clone();
        }
        if let Some(path) = &config.stream_path {
            settings.stream_path = path.clone();
        }
        if let Some(size) = config.batch_size {
            settings.stream.batch_size = size.max(1);
        }
        if let Some(ms) = config.flush_interval_ms {
            settings.stream.flush_interval = Duration::from_millis(ms);
        }
        if let Some(milestone) = config.milestone {
            settings.stream.milestone = milestone;
        }
        if let Some(mode) = config.yield_mode {
            let sleep = config
                .yield_sleep_ms
                .map_or(DEFAULT_YIELD_SLEEP, Duration::from_millis);
            settings.stream.yield_policy = match mode {
                ConfigYieldMode::None => YieldPolicy::None,
                ConfigYieldMode::Yield => YieldPolicy::Yield,
                ConfigYieldMode::Sleep => YieldPolicy::Sleep(sleep),
            };
        }

        self
    }

    pub(crate) fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Stream options with per-command overrides applied.
    pub(crate) fn stream_options(&self, args: &StreamArgs) -> StreamOptions {
        let mut options = self.settings.stream.clone();
        if let Some(size) = args.batch_size {
            options.batch_size = size.max(1);
        }
        if let Some(ms) = args.flush_interval_ms {
            options.flush_interval = Duration::from_millis(ms);
        }
        options
    }

    /// Progress lines go to stderr unless suppressed or output is JSON.
    pub(crate) fn show_progress(&self) -> bool {
        !self.quiet && !self.json && self.jq.is_none()
    }

    pub(crate) fn use_color(&self) -> bool {
        if self.no_color {
            return false;
        }
        match self.color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }
}
