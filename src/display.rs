//! Console presentation of aggregation results.
//!
//! Pure formatting over the aggregation state: a sorted per-asset price
//! table and a one-line status summary. Nothing here feeds back into the
//! engine.

use chrono::Utc;

use crate::config::DisplayConfig;
use crate::engine::AggregationState;
use crate::types::Asset;

/// "1234567.89" → "1,234,567.89"-style price string, 4 decimals under $1.
pub fn format_price(price: Option<f64>) -> String {
    let Some(price) = price.filter(|p| *p > 0.0) else {
        return "N/A".to_string();
    };
    let decimals = if price < 1.0 { 4 } else { 2 };
    let formatted = format!("{price:.decimals$}");
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((&formatted, ""));
    format!("${}.{}", group_thousands(int_part), frac_part)
}

/// Abbreviated magnitude: "532.10 k", "1.25 m", "3.40 b".
pub fn format_volume(volume: f64) -> String {
    let magnitude = volume.abs();
    let (scaled, suffix) = if magnitude >= 1e12 {
        (volume / 1e12, " t")
    } else if magnitude >= 1e9 {
        (volume / 1e9, " b")
    } else if magnitude >= 1e6 {
        (volume / 1e6, " m")
    } else if magnitude >= 1e3 {
        (volume / 1e3, " k")
    } else {
        (volume, "")
    };
    format!("{scaled:.2}{suffix}")
}

/// "1h:02m:03s" from a chrono duration; sub-second spans become "0s".
pub fn format_elapsed(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (hours, rest) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h:{minutes:02}m:{seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m:{seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// One-line run summary with the configured coins highlighted.
pub fn status_line(state: &AggregationState, config: &DisplayConfig) -> String {
    let elapsed = Utc::now() - state.started_at;
    let per_iteration = match state.iteration_ended_at {
        Some(ended) if state.iteration > 0 => {
            (ended - state.started_at) / state.iteration as i32
        }
        _ => elapsed,
    };

    let mut line = format!(
        "iter {} | coins {} | tickers {} | elapsed {} | per-iter {}",
        state.iteration,
        state.asset_count(),
        state.store.total_observations(),
        format_elapsed(elapsed),
        format_elapsed(per_iteration),
    );

    for coin in &config.coins_in_status_bar {
        let asset = Asset::new(coin);
        if let Some(consensus) = state.consensus_for(&asset) {
            line.push_str(&format!(
                " | {} {} vol {}",
                asset,
                format_price(Some(consensus.price_usd)),
                format_volume(consensus.volume_usd),
            ));
        }
    }
    line
}

/// Sorted table of every published consensus price.
pub fn render_price_table(state: &AggregationState) -> String {
    const HEADERS: [&str; 8] = [
        "#",
        "Symbol",
        "Tickers",
        "Xchngs",
        "Price (USD)",
        "Reference (USD)",
        "Diff (%)",
        "Volume (USD)",
    ];

    let mut rows: Vec<[String; 8]> = Vec::with_capacity(state.consensus.len());
    for (index, (asset, consensus)) in state.consensus.iter().enumerate() {
        let reference = state.reference_for(asset).map(|r| r.price_usd);
        let diff = match reference.filter(|r| *r > 0.0) {
            Some(reference) => {
                let pct = (reference - consensus.price_usd) / reference * 100.0;
                format!("{pct:.0}%")
            }
            None => "N/A".to_string(),
        };

        rows.push([
            (index + 1).to_string(),
            asset.to_string(),
            state.store.observation_count(asset).to_string(),
            state.store.exchange_count(asset).to_string(),
            format_price(Some(consensus.price_usd)),
            format_price(reference),
            diff,
            format_volume(consensus.volume_usd),
        ]);
    }

    let mut widths: [usize; 8] = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    render_row(&mut out, &HEADERS.map(String::from), &widths);
    let total_width: usize = widths.iter().sum::<usize>() + 3 * (widths.len() - 1);
    out.push_str(&"-".repeat(total_width));
    out.push('\n');
    for row in &rows {
        render_row(&mut out, row, &widths);
    }
    out
}

fn render_row(out: &mut String, cells: &[String; 8], widths: &[usize; 8]) {
    for (i, (cell, &width)) in cells.iter().zip(widths.iter()).enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        // Numbers read better right-aligned; the symbol column left-aligns.
        if i == 1 {
            out.push_str(&format!("{cell:<width$}"));
        } else {
            out.push_str(&format!("{cell:>width$}"));
        }
    }
    out.push('\n');
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}
