use crate::aggregate::{DaySource, EfficiencyTier};
use crate::calendar::ResetStatus;
use crate::config::EngineSettings;
use crate::engine::AggregateSnapshot;
use crate::error::AppError;
use crate::models::CapKind;
use crate::projection::{PaceTier, SpendTier};
use crate::quota::{CapStatus, QuotaTier};
use crate::service::{MeterService, RefreshReport};
use crate::ui::app::AppState;
use chrono::{Local, NaiveDateTime};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};
use ratatui::Terminal;
use std::io;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const COLOR_ACCENT: Color = Color::Cyan;
const COLOR_INFO: Color = Color::Green;
const COLOR_WARN: Color = Color::Yellow;
const COLOR_ALERT: Color = Color::Red;
const COLOR_MUTED: Color = Color::DarkGray;
const COLOR_HEADER: Color = Color::White;

/// Timing for the live view: redraw every `tick`, re-fetch every `interval`.
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub tick: Duration,
    pub interval: Duration,
}

impl LoopTiming {
    pub fn new(tick_seconds: u64, interval_seconds: u64) -> Self {
        let tick = Duration::from_secs(tick_seconds.max(1));
        Self {
            tick,
            interval: Duration::from_secs(interval_seconds).max(tick),
        }
    }
}

struct RefreshJob {
    started_at: Instant,
    handle: JoinHandle<RefreshReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Quit,
    Refresh,
    None,
}

pub async fn run_dashboard(service: MeterService, timing: LoopTiming) -> Result<(), AppError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let loop_result = run_loop(&mut terminal, &service, timing).await;

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    loop_result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    service: &MeterService,
    timing: LoopTiming,
) -> Result<(), AppError> {
    let mut state = AppState::default();
    let mut refresh_job: Option<RefreshJob> = None;
    let mut last_refresh_started: Option<Instant> = None;
    let mut last_tick = Instant::now();

    while state.running {
        if refresh_job
            .as_ref()
            .is_some_and(|job| job.handle.is_finished())
        {
            process_refresh_job(&mut state, &mut refresh_job).await;
        }

        if refresh_job.is_none() && refresh_due(last_refresh_started, Instant::now(), timing.interval)
        {
            queue_refresh_job(service, &mut refresh_job);
            last_refresh_started = Some(Instant::now());
            state.status = "refreshing...".into();
        }

        let now = Local::now().naive_local();
        let reset = service.engine().reset_status(now);
        terminal.draw(|f| render(f, service.engine().settings(), &state, &reset, now))?;

        let timeout = timing
            .tick
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key_action(key.code, key.modifiers) {
                    KeyAction::Quit => state.running = false,
                    KeyAction::Refresh if refresh_job.is_none() => {
                        last_refresh_started = None;
                    }
                    KeyAction::Refresh => {
                        state.status = "refresh already running".into();
                    }
                    KeyAction::None => {}
                }
            }
        }

        if last_tick.elapsed() >= timing.tick {
            last_tick = Instant::now();
        }
    }

    if let Some(job) = refresh_job.take() {
        job.handle.abort();
    }

    Ok(())
}

fn refresh_due(last_started: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last_started {
        None => true,
        Some(started) => now.saturating_duration_since(started) >= interval,
    }
}

fn key_action(code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return KeyAction::Quit;
    }
    match code {
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('r') => KeyAction::Refresh,
        _ => KeyAction::None,
    }
}

fn queue_refresh_job(service: &MeterService, refresh_job: &mut Option<RefreshJob>) {
    let svc = service.clone();
    let handle = tokio::spawn(async move { svc.refresh(Local::now().naive_local()).await });
    *refresh_job = Some(RefreshJob {
        started_at: Instant::now(),
        handle,
    });
}

async fn process_refresh_job(state: &mut AppState, refresh_job: &mut Option<RefreshJob>) {
    let Some(job) = refresh_job.take() else {
        return;
    };
    let took = job.started_at.elapsed();
    match job.handle.await {
        Ok(report) => {
            tracing::debug!(took_ms = took.as_millis() as u64, "refresh finished");
            state.apply_report(report, Local::now().format("%H:%M:%S").to_string());
        }
        Err(err) => {
            tracing::error!(error = %err, "refresh task failed");
            state.refresh_failed(&err.to_string());
        }
    }
}

fn quota_color(tier: QuotaTier) -> Color {
    match tier {
        QuotaTier::Open => COLOR_INFO,
        QuotaTier::Gate => COLOR_WARN,
        QuotaTier::Protect => COLOR_ALERT,
    }
}

fn pace_color(tier: PaceTier) -> Color {
    match tier {
        PaceTier::Light => COLOR_MUTED,
        PaceTier::Good => COLOR_INFO,
        PaceTier::Full => COLOR_WARN,
        PaceTier::Gate => COLOR_ALERT,
    }
}

fn spend_color(tier: SpendTier) -> Color {
    match tier {
        SpendTier::Normal => COLOR_INFO,
        SpendTier::High => COLOR_WARN,
        SpendTier::Heavy => COLOR_ALERT,
    }
}

fn efficiency_color(tier: EfficiencyTier) -> Color {
    match tier {
        EfficiencyTier::On => COLOR_INFO,
        EfficiencyTier::Below => COLOR_WARN,
        EfficiencyTier::Low => COLOR_ALERT,
    }
}

fn reset_color(reset: &ResetStatus) -> Color {
    if reset.dead_zone_active() {
        COLOR_ALERT
    } else if reset.is_imminent() {
        COLOR_WARN
    } else {
        COLOR_MUTED
    }
}

fn render(
    f: &mut ratatui::Frame,
    settings: &EngineSettings,
    state: &AppState,
    reset: &ResetStatus,
    now: NaiveDateTime,
) {
    let size = f.area();
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(9),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(size);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" quota-meter  ·  {}", now.format("%a %b %d %H:%M:%S")),
            Style::default().fg(COLOR_HEADER),
        ),
        Span::styled(
            format!(
                "  ·  {}  ·  last refresh {} (#{})",
                state.status, state.last_refresh, state.refreshes
            ),
            Style::default().fg(COLOR_MUTED),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title(" Session "));
    f.render_widget(header, root[0]);

    render_reset_and_quota(f, root[1], settings, state.report.as_ref(), reset);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(root[2]);

    match &state.report {
        Some(report) => {
            let left = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(6), Constraint::Min(6)])
                .split(body[0]);
            render_efficiency(f, left[0], &report.snapshot);
            render_pattern(f, left[1], settings, &report.snapshot);
            render_trend(f, body[1], &report.snapshot);
        }
        None => {
            let waiting = Paragraph::new("waiting for first refresh...")
                .block(Block::default().borders(Borders::ALL))
                .style(Style::default().fg(COLOR_MUTED));
            f.render_widget(waiting, root[2]);
        }
    }

    let footer = Paragraph::new("r refresh | q/Esc quit")
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(COLOR_MUTED));
    f.render_widget(footer, root[3]);
}

fn cap_gauge<'a>(status: &CapStatus, label: &str) -> Gauge<'a> {
    Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} · {} ", status.cap.display_name(label), status.tier.label())),
        )
        .gauge_style(Style::default().fg(quota_color(status.tier)))
        .ratio((status.utilization_pct / 100.0).clamp(0.0, 1.0))
        .label(format!(
            "{:.1}%  ${:.2} / ${:.2}",
            status.utilization_pct, status.week_cost, status.limit
        ))
}

fn render_reset_and_quota(
    f: &mut ratatui::Frame,
    area: Rect,
    settings: &EngineSettings,
    report: Option<&RefreshReport>,
    reset: &ResetStatus,
) {
    let label = settings.primary_label.as_str();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Length(3)])
        .split(area);

    let reset_line = Paragraph::new(reset.describe(label))
        .block(Block::default().borders(Borders::ALL).title(" Resets "))
        .style(
            Style::default()
                .fg(reset_color(reset))
                .add_modifier(Modifier::BOLD),
        );
    f.render_widget(reset_line, rows[0]);

    let Some(report) = report else {
        return;
    };
    let quota = &report.snapshot.quota;
    let gauges = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);
    f.render_widget(cap_gauge(&quota.all_models, label), gauges[0]);
    f.render_widget(cap_gauge(&quota.primary, label), gauges[1]);

    let binding = Paragraph::new(format!(
        "binding {} {:.1}%  ·  sprint room ${:.2}  ·  {}",
        quota.binding.display_name(label),
        quota.binding_pct(),
        quota.sprint_room,
        match report.snapshot.calibrated_on {
            Some(day) => format!("calibrated {day}"),
            None => "default limits".into(),
        },
    ))
    .block(Block::default().borders(Borders::ALL).title(" Binding "))
    .style(Style::default().fg(quota_color(quota.binding_status().tier)));
    f.render_widget(binding, rows[2]);
}

fn render_efficiency(f: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let eff = &snap.efficiency;
    let models = match snap.today.source {
        DaySource::Primary if snap.today.models.is_empty() => "-".to_string(),
        _ => snap.today.models.join(", "),
    };
    let lines = vec![
        Line::from(vec![
            Span::raw(format!("today   ${:.2}  {:.1}x  ", snap.today.cost, eff.today_ratio)),
            Span::styled(
                eff.today_tier.label(),
                Style::default()
                    .fg(efficiency_color(eff.today_tier))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw(format!(
                "{}-day   ${:.2}  {:.1}x  ",
                snap.rolling.days, snap.rolling.cost, eff.rolling_ratio
            )),
            Span::styled(
                eff.rolling_tier.label(),
                Style::default().fg(efficiency_color(eff.rolling_tier)),
            ),
        ]),
        Line::from(Span::styled(
            format!("models  {models}"),
            Style::default().fg(COLOR_MUTED),
        )),
    ];
    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Efficiency · baseline {:.1}x ", eff.baseline)),
    );
    f.render_widget(panel, area);
}

fn render_pattern(
    f: &mut ratatui::Frame,
    area: Rect,
    settings: &EngineSettings,
    snap: &AggregateSnapshot,
) {
    let label = settings.primary_label.as_str();
    let proj = &snap.projection;
    let lines = vec![
        Line::from(vec![
            Span::raw(format!(
                "week    ${:.2} of ${:.0}  {:.0}%  ",
                snap.spend.week_cost, snap.spend.baseline, snap.spend.spend_pct
            )),
            Span::styled(
                snap.spend.tier.label(),
                Style::default().fg(spend_color(snap.spend.tier)),
            ),
        ]),
        Line::from(format!(
            "other   {:.1}% of week",
            snap.week.secondary_share_pct()
        )),
        Line::from(format!(
            "pace    ${:.2}/day ({}d) -> ${:.2}",
            proj.smoothed_daily, snap.week.smoothing_days, proj.projected_total
        )),
        Line::from(vec![
            Span::raw(format!(
                "proj    {} {:.0}% | {} {:.0}%  ",
                CapKind::AllModels.display_name(label),
                proj.projected_all_models_pct,
                CapKind::Primary.display_name(label),
                proj.projected_primary_pct,
            )),
            Span::styled(
                proj.tier.label(),
                Style::default()
                    .fg(pace_color(proj.tier))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
    ];
    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Pattern · day {}/7 ", snap.week.days_elapsed)),
    );
    f.render_widget(panel, area);
}

fn render_trend(f: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let rows = snap
        .trend
        .iter()
        .map(|p| {
            Row::new(vec![
                Cell::from(p.date.format("%a %m-%d").to_string()),
                Cell::from(format!("${:.2}", p.cost)),
                Cell::from(format!("{:.1}x", p.ratio)),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(40),
            Constraint::Percentage(35),
            Constraint::Percentage(25),
        ],
    )
    .header(
        Row::new(vec!["Day", "Cost", "Ratio"]).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
    )
    .block(Block::default().borders(Borders::ALL).title(" 7-Day Trend "))
    .style(Style::default().fg(COLOR_ACCENT));
    f.render_widget(table, area);
}
