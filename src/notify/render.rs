// =============================================================================
// Alert Rendering — the multi-line notification body
// =============================================================================
//
// One header line with the driver timeframe and FORCE/DRY tags, an ISO-8601
// timestamp, one block per triggered symbol referencing explicit numeric
// levels, and a final drilldown URL scoped to the alerted symbols plus BTC.
// The whole message stays under the transport's ~4096-char ceiling.

use chrono::{TimeZone, Utc};

use crate::derive::format_price;
use crate::pipeline::entry::ExecReason;
use crate::pipeline::Candidate;
use crate::series::{recent_high, recent_low};
use crate::types::{Lean, Timeframe};

/// Hard cap on the rendered message.
pub const MESSAGE_MAX_CHARS: usize = 3900;

/// Render the full notification for one evaluator tick.
pub fn render_message(
    driver_tf: Timeframe,
    force: bool,
    dry: bool,
    now_ms: i64,
    candidates: &[Candidate],
    dash_url: &str,
    btc_symbol: &str,
    sweep_lookback: usize,
) -> String {
    let mut header = format!("[{driver_tf}] perp entries");
    if force {
        header.push_str(" [FORCE]");
    }
    if dry {
        header.push_str(" [DRY]");
    }

    let ts = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let footer = drilldown_url(dash_url, candidates, btc_symbol);

    // Assemble symbol blocks under the cap, dropping from the tail when the
    // watchlist is unusually noisy.
    let reserved = header.len() + ts.len() + footer.len() + 64;
    let mut body = String::new();
    let mut dropped = 0usize;
    for candidate in candidates {
        let block = symbol_block(candidate, sweep_lookback);
        if body.len() + block.len() + reserved > MESSAGE_MAX_CHARS {
            dropped += 1;
            continue;
        }
        body.push('\n');
        body.push_str(&block);
    }
    if dropped > 0 {
        body.push_str(&format!("\n(+{dropped} more symbols)\n"));
    }

    let mut message = format!("{header}\n{ts}\n{body}");
    if !footer.is_empty() {
        message.push('\n');
        message.push_str(&footer);
    }
    message
}

fn symbol_block(candidate: &Candidate, sweep_lookback: usize) -> String {
    let view = &candidate.view;
    let levels = &candidate.levels_1h;

    let mut block = format!(
        "{} {} {} | 1h {} / {}\n",
        view.symbol,
        format_price(view.price),
        candidate.bias.as_str().to_uppercase(),
        format_price(levels.hi),
        format_price(levels.lo),
    );

    block.push_str(&format!("Entry: {}\n", entry_line(candidate, sweep_lookback)));
    block.push_str(&format!("Confidence: {}\n", candidate.confidence));

    if let Some(band) = candidate.leverage {
        block.push_str(&format!("Leverage: {}x-{}x\n", band.low, band.high));
    }

    let stop = match candidate.bias {
        Lean::Short => levels.hi,
        _ => levels.lo,
    };
    if candidate.exec_reason.reversal_confirmed() {
        let (zone_lo, zone_hi, targets) = match candidate.bias {
            Lean::Short => (
                levels.hi - candidate.b1.edge,
                levels.hi,
                (levels.mid, levels.lo),
            ),
            _ => (
                levels.lo,
                levels.lo + candidate.b1.edge,
                (levels.mid, levels.hi),
            ),
        };
        block.push_str(&format!(
            "Zone: {}-{} | Stop: {} | Targets: {} / {}\n",
            format_price(zone_lo),
            format_price(zone_hi),
            format_price(stop),
            format_price(targets.0),
            format_price(targets.1),
        ));
    } else {
        block.push_str(&format!("Stop: {}\n", format_price(stop)));
    }

    block
}

/// Human-readable entry reason with the levels it references.
fn entry_line(candidate: &Candidate, sweep_lookback: usize) -> String {
    let levels = &candidate.levels_1h;
    let points = &candidate.view.points;
    let hi = format_price(levels.hi);
    let lo = format_price(levels.lo);

    match candidate.exec_reason {
        ExecReason::LongBreakout => format!("long_breakout above 1h high {hi}"),
        ExecReason::ShortBreakdown => format!("short_breakdown below 1h low {lo}"),
        ExecReason::LongBreak => format!("long_break above 1h high {hi}"),
        ExecReason::ShortBreak => format!("short_break below 1h low {lo}"),
        ExecReason::LongSweepReclaim => {
            let swept = recent_low(points, sweep_lookback)
                .map(format_price)
                .unwrap_or_else(|| "?".into());
            format!("long_sweep_reclaim of 1h low {lo} (swept {swept})")
        }
        ExecReason::ShortSweepReject => {
            let swept = recent_high(points, sweep_lookback)
                .map(format_price)
                .unwrap_or_else(|| "?".into());
            format!("short_sweep_reject of 1h high {hi} (swept {swept})")
        }
        ExecReason::LongReversal => format!(
            "long_reversal in band {lo}-{}",
            format_price(levels.lo + candidate.b1.edge)
        ),
        ExecReason::ShortReversal => format!(
            "short_reversal in band {}-{hi}",
            format_price(levels.hi - candidate.b1.edge)
        ),
    }
}

/// Drilldown link scoped to the alerted symbols plus BTC.
fn drilldown_url(dash_url: &str, candidates: &[Candidate], btc_symbol: &str) -> String {
    if dash_url.is_empty() {
        return String::new();
    }

    let mut symbols: Vec<&str> = candidates.iter().map(|c| c.view.symbol.as_str()).collect();
    if !symbols.contains(&btc_symbol) {
        symbols.push(btc_symbol);
    }
    format!("{dash_url}?symbols={}", symbols.join(","))
}

// =============================================================================
// Tests
// =============================================================================
