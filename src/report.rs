use crate::aggregate::{DaySource, TrendPoint};
use crate::config::EngineSettings;
use crate::models::CapKind;
use crate::quota::CapStatus;
use crate::service::RefreshReport;
use std::fmt::Write;

const BAR_WIDTH: usize = 20;

/// `#` cells for the used share, `.` for the rest. Over-limit fills the bar.
pub fn usage_bar(pct: f64, width: usize) -> String {
    let filled = if pct.is_finite() && pct > 0.0 {
        ((pct / 100.0 * width as f64).round() as usize).min(width)
    } else {
        0
    };
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
}

fn cap_line(status: &CapStatus, primary_label: &str) -> String {
    format!(
        "  {:<12} [{}] {:>5.1}%  ${:.2} / ${:.2}  {}",
        status.cap.display_name(primary_label),
        usage_bar(status.utilization_pct, BAR_WIDTH),
        status.utilization_pct,
        status.week_cost,
        status.limit,
        status.tier.label(),
    )
}

fn trend_line(point: &TrendPoint, max_cost: f64) -> String {
    let pct = if max_cost > 0.0 {
        point.cost / max_cost * 100.0
    } else {
        0.0
    };
    format!(
        "  {}  ${:>7.2}  {:>5.1}x  {}",
        point.date.format("%a %m-%d"),
        point.cost,
        point.ratio,
        usage_bar(pct, BAR_WIDTH),
    )
}

/// Single plain-text render of one refresh cycle.
pub fn render_text(report: &RefreshReport, settings: &EngineSettings) -> String {
    let snap = &report.snapshot;
    let label = settings.primary_label.as_str();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "quota-meter  {}{}",
        snap.generated_at.format("%Y-%m-%d %H:%M"),
        if report.is_stale() { "  [stale]" } else { "" },
    );
    for warning in report.warnings() {
        let _ = writeln!(out, "! {warning}");
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "QUOTA  week of {}  day {}/7",
        snap.week.window.start.format("%b %d"),
        snap.week.days_elapsed
    );
    let _ = writeln!(out, "{}", cap_line(&snap.quota.all_models, label));
    let _ = writeln!(out, "{}", cap_line(&snap.quota.primary, label));
    let _ = writeln!(
        out,
        "  binding      {} {:.1}%  sprint room ${:.2}",
        snap.quota.binding.display_name(label),
        snap.quota.binding_pct(),
        snap.quota.sprint_room,
    );
    let calibrated = match snap.calibrated_on {
        Some(day) => format!("calibrated {day}"),
        None => "default limits".into(),
    };
    let _ = writeln!(out, "  limits       {calibrated}");
    let _ = writeln!(out, "  resets       {}", snap.reset.describe(label));
    out.push('\n');

    let eff = &snap.efficiency;
    let _ = writeln!(out, "EFFICIENCY  baseline {:.1}x", eff.baseline);
    let today_note = match snap.today.source {
        DaySource::Primary => String::new(),
        DaySource::History => " (history)".into(),
        DaySource::Missing => " (no data)".into(),
    };
    let _ = writeln!(
        out,
        "  today        ${:.2}{today_note}  {:.1}x  {}",
        snap.today.cost,
        eff.today_ratio,
        eff.today_tier.label(),
    );
    let _ = writeln!(
        out,
        "  {}-day        ${:.2}  {:.1}x  {}",
        snap.rolling.days,
        snap.rolling.cost,
        eff.rolling_ratio,
        eff.rolling_tier.label(),
    );
    if snap.today.source == DaySource::Primary && !snap.today.models.is_empty() {
        let _ = writeln!(out, "  models       {}", snap.today.models.join(", "));
    }
    out.push('\n');

    let proj = &snap.projection;
    let _ = writeln!(out, "PATTERN");
    let _ = writeln!(
        out,
        "  week spend   ${:.2} of ${:.0} baseline  {:.0}%  {}",
        snap.spend.week_cost,
        snap.spend.baseline,
        snap.spend.spend_pct,
        snap.spend.tier.label(),
    );
    let _ = writeln!(
        out,
        "  other models {:.1}% of week",
        snap.week.secondary_share_pct()
    );
    let _ = writeln!(
        out,
        "  pace         ${:.2}/day ({}d avg) -> ${:.2} by reset",
        proj.smoothed_daily, snap.week.smoothing_days, proj.projected_total,
    );
    let _ = writeln!(
        out,
        "  projected    {} {:.1}% | {} {:.1}%  {}",
        CapKind::AllModels.display_name(label),
        proj.projected_all_models_pct,
        CapKind::Primary.display_name(label),
        proj.projected_primary_pct,
        proj.tier.label(),
    );
    out.push('\n');

    let _ = writeln!(out, "TREND");
    let max_cost = snap.trend.iter().map(|p| p.cost).fold(0.0, f64::max);
    for point in &snap.trend {
        let _ = writeln!(out, "{}", trend_line(point, max_cost));
    }

    out
}
