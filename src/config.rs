// =============================================================================
// Gateway Configuration — closed set of recognized options
// =============================================================================
//
// Every tunable threshold of the gating pipeline lives here. Values come
// from the environment (a `.env` file is honoured at startup); every field
// also carries a serde default so a JSON-supplied config misses nothing.
//
// Unknown environment variables are ignored; unparseable values fall back
// to the default with a warning rather than aborting startup.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Mode, RiskProfile};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_cooldown_minutes() -> u64 {
    20
}

fn default_mode() -> Mode {
    Mode::Swing
}

fn default_risk_profile() -> RiskProfile {
    RiskProfile::Balanced
}

fn default_momentum_min() -> f64 {
    0.10
}

fn default_shock_oi_min() -> f64 {
    0.50
}

fn default_shock_price_min() -> f64 {
    0.20
}

fn default_edge_pct_1h() -> f64 {
    0.15
}

fn default_swing_min_oi_pct() -> f64 {
    -0.50
}

fn default_swing_reversal_min_5m() -> f64 {
    0.05
}

fn default_scalp_sweep_lookback() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_macro_btc_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_macro_btc_4h_price_min() -> f64 {
    2.0
}

fn default_macro_btc_4h_oi_min() -> f64 {
    0.5
}

fn default_regime_expansion_price_min() -> f64 {
    2.0
}

fn default_regime_expansion_oi_min() -> f64 {
    0.5
}

fn default_regime_contraction_price_max() -> f64 {
    0.8
}

fn default_regime_contraction_oi_max() -> f64 {
    -1.0
}

fn default_regime_contraction_band_mult() -> f64 {
    1.5
}

fn default_leverage_max_cap() -> u32 {
    20
}

fn default_leverage_instability_warn_pct() -> f64 {
    1.0
}

fn default_leverage_instability_high_pct() -> f64 {
    2.0
}

fn default_leverage_funding_warn() -> f64 {
    0.0005
}

fn default_leverage_funding_high() -> f64 {
    0.001
}

fn default_heartbeat_key() -> String {
    crate::store::keys::DEFAULT_HEARTBEAT.to_string()
}

fn default_heartbeat_ttl_seconds() -> u64 {
    86_400
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_bind_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_eval_concurrency() -> usize {
    8
}

// =============================================================================
// GatewayConfig
// =============================================================================

/// Full runtime configuration. Thresholds are percentages unless the field
/// name says otherwise; funding thresholds are raw rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Modes & cadence -----------------------------------------------------
    /// Minimum interval between notifications per instrument.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,

    /// Mode used when neither `DEFAULT_MODES` nor a request override is set.
    #[serde(default = "default_mode")]
    pub default_mode: Mode,

    /// Optional multi-mode default (comma-separated in the environment).
    /// Overrides `default_mode` when non-empty.
    #[serde(default)]
    pub default_modes: Vec<Mode>,

    /// Risk profile used when the request does not carry one.
    #[serde(default = "default_risk_profile")]
    pub default_risk_profile: RiskProfile,

    // --- Detection gate ------------------------------------------------------
    /// |5m priceΔ%| needed for a momentum_confirm trigger.
    #[serde(default = "default_momentum_min")]
    pub momentum_min: f64,

    /// oiΔ% needed for a positioning shock (also the scalp 15m OI floor).
    #[serde(default = "default_shock_oi_min")]
    pub shock_oi_min: f64,

    /// |priceΔ%| needed for a positioning shock.
    #[serde(default = "default_shock_price_min")]
    pub shock_price_min: f64,

    // --- Structure & entries -------------------------------------------------
    /// Edge band width as a fraction of the 1h range.
    #[serde(default = "default_edge_pct_1h")]
    pub edge_pct_1h: f64,

    /// 15m oiΔ% floor for swing/build entries (reject sharper counter-trend).
    #[serde(default = "default_swing_min_oi_pct")]
    pub swing_min_oi_pct: f64,

    /// 5m priceΔ% micro-confirm for the swing/build reversal path.
    #[serde(default = "default_swing_reversal_min_5m")]
    pub swing_reversal_min_5m: f64,

    /// Series points examined for the scalp sweep check.
    #[serde(default = "default_scalp_sweep_lookback")]
    pub scalp_sweep_lookback: usize,

    /// When set, `force=1` additionally bypasses the 1h warmup gate (the
    /// entry triggers still deny on a degenerate range).
    #[serde(default)]
    pub force_bypass_warmup: bool,

    // --- Macro gate ----------------------------------------------------------
    #[serde(default = "default_true")]
    pub macro_enabled: bool,

    #[serde(default = "default_macro_btc_symbol")]
    pub macro_btc_symbol: String,

    /// BTC 4h priceΔ% floor for bull expansion.
    #[serde(default = "default_macro_btc_4h_price_min")]
    pub macro_btc_4h_price_min: f64,

    /// BTC 4h oiΔ% floor for bull expansion.
    #[serde(default = "default_macro_btc_4h_oi_min")]
    pub macro_btc_4h_oi_min: f64,

    /// Whether bull expansion blocks shorts on non-BTC symbols.
    #[serde(default = "default_true")]
    pub macro_block_shorts: bool,

    // --- Regime hooks --------------------------------------------------------
    #[serde(default = "default_true")]
    pub regime_enabled: bool,

    /// 4h |priceΔ%| floor for a strong expansion (downgrade hook).
    #[serde(default = "default_regime_expansion_price_min")]
    pub regime_expansion_price_min: f64,

    /// 4h oiΔ% floor for a strong expansion.
    #[serde(default = "default_regime_expansion_oi_min")]
    pub regime_expansion_oi_min: f64,

    /// 4h |priceΔ%| ceiling for a contraction (band-widening hook).
    #[serde(default = "default_regime_contraction_price_max")]
    pub regime_contraction_price_max: f64,

    /// 4h oiΔ% ceiling for a contraction (strongly negative).
    #[serde(default = "default_regime_contraction_oi_max")]
    pub regime_contraction_oi_max: f64,

    /// Edge-band multiplier applied under contraction.
    #[serde(default = "default_regime_contraction_band_mult")]
    pub regime_contraction_band_mult: f64,

    // --- Advisory leverage ---------------------------------------------------
    #[serde(default = "default_true")]
    pub leverage_enabled: bool,

    #[serde(default = "default_leverage_max_cap")]
    pub leverage_max_cap: u32,

    /// Instability (max |oiΔ%| of 5m/15m) above which leverage scales ×0.75.
    #[serde(default = "default_leverage_instability_warn_pct")]
    pub leverage_instability_warn_pct: f64,

    /// Instability above which leverage scales ×0.6.
    #[serde(default = "default_leverage_instability_high_pct")]
    pub leverage_instability_high_pct: f64,

    /// |funding rate| above which leverage scales ×0.75.
    #[serde(default = "default_leverage_funding_warn")]
    pub leverage_funding_warn: f64,

    /// |funding rate| above which leverage scales ×0.6.
    #[serde(default = "default_leverage_funding_high")]
    pub leverage_funding_high: f64,

    // --- Heartbeat -----------------------------------------------------------
    #[serde(default = "default_heartbeat_key")]
    pub heartbeat_key: String,

    #[serde(default = "default_heartbeat_ttl_seconds")]
    pub heartbeat_ttl_seconds: u64,

    // --- Deployment glue -----------------------------------------------------
    /// Default watchlist when the request carries no `symbols`.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Shared secret required by the evaluator endpoint. Empty rejects all.
    #[serde(default)]
    pub alert_key: String,

    /// Telegram bot credentials. Empty token selects the log-only notifier.
    #[serde(default)]
    pub telegram_bot_token: String,

    #[serde(default)]
    pub telegram_chat_id: String,

    /// Base URL of the drilldown dashboard linked from notifications.
    #[serde(default)]
    pub dash_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// In-process tick driver (off by default — production uses cron pings).
    #[serde(default)]
    pub scheduler_enabled: bool,

    /// Concurrent symbol pipelines per evaluator invocation.
    #[serde(default = "default_eval_concurrency")]
    pub eval_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config must deserialize via defaults")
    }
}

impl GatewayConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        env_u64("COOLDOWN_MINUTES", &mut cfg.cooldown_minutes);
        if let Some(raw) = read_env("DEFAULT_MODE") {
            match Mode::parse(&raw) {
                Some(mode) => cfg.default_mode = mode,
                None => warn!(value = %raw, "DEFAULT_MODE unrecognized — keeping default"),
            }
        }
        if let Some(raw) = read_env("DEFAULT_MODES") {
            cfg.default_modes = parse_mode_list(&raw);
        }
        if let Some(raw) = read_env("DEFAULT_RISK_PROFILE") {
            match RiskProfile::parse(&raw) {
                Some(profile) => cfg.default_risk_profile = profile,
                None => warn!(value = %raw, "DEFAULT_RISK_PROFILE unrecognized — keeping default"),
            }
        }

        env_f64("MOMENTUM_MIN", &mut cfg.momentum_min);
        env_f64("SHOCK_OI_MIN", &mut cfg.shock_oi_min);
        env_f64("SHOCK_PRICE_MIN", &mut cfg.shock_price_min);
        env_f64("EDGE_PCT_1H", &mut cfg.edge_pct_1h);
        env_f64("SWING_MIN_OI_PCT", &mut cfg.swing_min_oi_pct);
        env_f64("SWING_REVERSAL_MIN_5M", &mut cfg.swing_reversal_min_5m);
        env_usize("SCALP_SWEEP_LOOKBACK", &mut cfg.scalp_sweep_lookback);
        env_bool("FORCE_BYPASS_WARMUP", &mut cfg.force_bypass_warmup);

        env_bool("MACRO_ENABLED", &mut cfg.macro_enabled);
        env_string("MACRO_BTC_SYMBOL", &mut cfg.macro_btc_symbol);
        env_f64("MACRO_BTC_4H_PRICE_MIN", &mut cfg.macro_btc_4h_price_min);
        env_f64("MACRO_BTC_4H_OI_MIN", &mut cfg.macro_btc_4h_oi_min);
        env_bool("MACRO_BLOCK_SHORTS", &mut cfg.macro_block_shorts);

        env_bool("REGIME_ENABLED", &mut cfg.regime_enabled);
        env_f64(
            "REGIME_EXPANSION_PRICE_MIN",
            &mut cfg.regime_expansion_price_min,
        );
        env_f64("REGIME_EXPANSION_OI_MIN", &mut cfg.regime_expansion_oi_min);
        env_f64(
            "REGIME_CONTRACTION_PRICE_MAX",
            &mut cfg.regime_contraction_price_max,
        );
        env_f64(
            "REGIME_CONTRACTION_OI_MAX",
            &mut cfg.regime_contraction_oi_max,
        );
        env_f64(
            "REGIME_CONTRACTION_BAND_MULT",
            &mut cfg.regime_contraction_band_mult,
        );

        env_bool("LEVERAGE_ENABLED", &mut cfg.leverage_enabled);
        env_u32("LEVERAGE_MAX_CAP", &mut cfg.leverage_max_cap);
        env_f64(
            "LEVERAGE_INSTABILITY_WARN_PCT",
            &mut cfg.leverage_instability_warn_pct,
        );
        env_f64(
            "LEVERAGE_INSTABILITY_HIGH_PCT",
            &mut cfg.leverage_instability_high_pct,
        );
        env_f64("LEVERAGE_FUNDING_WARN", &mut cfg.leverage_funding_warn);
        env_f64("LEVERAGE_FUNDING_HIGH", &mut cfg.leverage_funding_high);

        env_string("HEARTBEAT_KEY", &mut cfg.heartbeat_key);
        env_u64("HEARTBEAT_TTL_SECONDS", &mut cfg.heartbeat_ttl_seconds);

        if let Some(raw) = read_env("GATEWAY_SYMBOLS") {
            let symbols: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                cfg.symbols = symbols;
            }
        }
        env_string("ALERT_KEY", &mut cfg.alert_key);
        env_string("TELEGRAM_BOT_TOKEN", &mut cfg.telegram_bot_token);
        env_string("TELEGRAM_CHAT_ID", &mut cfg.telegram_chat_id);
        env_string("DASH_URL", &mut cfg.dash_url);
        env_string("BIND_ADDR", &mut cfg.bind_addr);
        env_bool("SCHEDULER_ENABLED", &mut cfg.scheduler_enabled);
        env_usize("EVAL_CONCURRENCY", &mut cfg.eval_concurrency);

        cfg
    }

    /// Cooldown window in milliseconds.
    pub fn cooldown_ms(&self) -> i64 {
        (self.cooldown_minutes as i64) * 60_000
    }

    /// Modes evaluated when the request does not pick any, already in
    /// priority order.
    pub fn effective_modes(&self) -> Vec<Mode> {
        let mut modes = if self.default_modes.is_empty() {
            vec![self.default_mode]
        } else {
            self.default_modes.clone()
        };
        modes.sort_by_key(|m| m.priority());
        modes.dedup();
        modes
    }
}

/// Parse a comma-separated mode list, dropping unknown entries with a
/// warning and keeping priority order.
pub fn parse_mode_list(raw: &str) -> Vec<Mode> {
    let mut modes: Vec<Mode> = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| {
            let mode = Mode::parse(s);
            if mode.is_none() {
                warn!(value = %s.trim(), "unrecognized mode dropped");
            }
            mode
        })
        .collect();
    modes.sort_by_key(|m| m.priority());
    modes.dedup();
    modes
}

// -------------------------------------------------------------------------
// Environment helpers
// -------------------------------------------------------------------------

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_string(name: &str, slot: &mut String) {
    if let Some(v) = read_env(name) {
        *slot = v.trim().to_string();
    }
}

fn env_f64(name: &str, slot: &mut f64) {
    if let Some(v) = read_env(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(name, value = %v, "not a number — keeping default"),
        }
    }
}

fn env_u64(name: &str, slot: &mut u64) {
    if let Some(v) = read_env(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(name, value = %v, "not an integer — keeping default"),
        }
    }
}

fn env_u32(name: &str, slot: &mut u32) {
    if let Some(v) = read_env(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(name, value = %v, "not an integer — keeping default"),
        }
    }
}

fn env_usize(name: &str, slot: &mut usize) {
    if let Some(v) = read_env(name) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(name, value = %v, "not an integer — keeping default"),
        }
    }
}

fn env_bool(name: &str, slot: &mut bool) {
    if let Some(v) = read_env(name) {
        match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            other => warn!(name, value = %other, "not a boolean — keeping default"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
