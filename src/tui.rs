#![cfg(feature = "tui")]

use crate::dispatch::{LaneOutcome, LaneResult, LaneUpdate, Session, TurnReport};
use crate::lane::LaneId;
use crate::think;
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
struct ChatLine {
    role: &'static str,
    text: String,
}

/// Transcript of one lane as shown on screen.
#[derive(Debug, Clone)]
struct LaneView {
    id: LaneId,
    lines: Vec<ChatLine>,
    status: String,
}

impl LaneView {
    fn new(id: LaneId) -> Self {
        Self {
            id,
            lines: Vec::new(),
            status: String::new(),
        }
    }

    fn start_turn(&mut self, msg: &str) {
        self.lines.push(ChatLine {
            role: "user",
            text: msg.to_string(),
        });
        self.lines.push(ChatLine {
            role: "assistant",
            text: String::new(),
        });
        self.status = "streaming…".to_string();
    }

    fn apply(&mut self, update: LaneUpdate) {
        match update {
            LaneUpdate::Delta { text, .. } => {
                if let Some(last) = self.lines.last_mut() {
                    if last.role == "assistant" {
                        last.text.push_str(&text);
                    }
                }
            }
            LaneUpdate::Finished { elapsed, .. } => {
                self.status = format!("{} ms", elapsed.as_millis());
            }
            LaneUpdate::Failed { .. } => {
                self.status = "failed".to_string();
            }
        }
    }

    /// Replace streamed text with the settled outcome.
    fn settle(&mut self, outcome: &LaneOutcome) {
        let elapsed = outcome.elapsed().as_millis();
        match outcome {
            LaneOutcome::Completed { content, .. } => {
                if let Some(last) = self.lines.last_mut().filter(|l| l.role == "assistant") {
                    last.text = content.clone();
                }
                self.status = format!("{elapsed} ms");
            }
            LaneOutcome::Failed { error, .. } => {
                if self.lines.last().is_some_and(|l| l.role == "assistant" && l.text.is_empty()) {
                    self.lines.pop();
                }
                self.lines.push(ChatLine {
                    role: "error",
                    text: error.clone(),
                });
                self.status = format!("failed after {elapsed} ms");
            }
        }
    }
}

pub async fn run_tui(mut session: Session) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ui = Ui {
        input: String::new(),
        notice: Some("Type a message and press Enter. Commands: /quit, /clear".to_string()),
        views: session.lanes().iter().map(|l| LaneView::new(l.id)).collect(),
    };
    let mut updates: Option<mpsc::UnboundedReceiver<LaneUpdate>> = None;
    let mut turn: Option<oneshot::Receiver<anyhow::Result<TurnReport>>> = None;

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ui, session.is_running()) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut ui, &mut session, &mut updates, &mut turn) {
                        break Ok(());
                    }
                }
            }
            Some(update) = async {
                match &mut updates {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                ui.apply(update);
            }
            Some(report) = async {
                match &mut turn {
                    Some(rx) => rx.await.ok(),
                    None => None,
                }
            } => {
                turn = None;
                // Late deltas must not land on top of the settled text.
                updates = None;
                match session.finish_turn(report) {
                    Ok(results) => ui.settle(&results),
                    Err(e) => ui.notice = Some(format!("turn failed: {e:#}")),
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

struct Ui {
    input: String,
    notice: Option<String>,
    views: Vec<LaneView>,
}

impl Ui {
    fn view_mut(&mut self, lane: LaneId) -> Option<&mut LaneView> {
        self.views.iter_mut().find(|v| v.id == lane)
    }

    fn apply(&mut self, update: LaneUpdate) {
        let lane = match &update {
            LaneUpdate::Delta { lane, .. } | LaneUpdate::Finished { lane, .. } | LaneUpdate::Failed { lane, .. } => *lane,
        };
        if let Some(view) = self.view_mut(lane) {
            view.apply(update);
        }
    }

    fn settle(&mut self, results: &[LaneResult]) {
        for r in results {
            if let Some(view) = self.view_mut(r.lane) {
                view.settle(&r.outcome);
            }
        }
    }
}

/// Returns true when the UI should exit.
fn handle_key(
    key: KeyEvent,
    ui: &mut Ui,
    session: &mut Session,
    updates: &mut Option<mpsc::UnboundedReceiver<LaneUpdate>>,
    turn: &mut Option<oneshot::Receiver<anyhow::Result<TurnReport>>>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => ui.input.push(c),
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Enter => {
            let msg = ui.input.trim().to_string();
            ui.input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                match session.clear() {
                    Ok(()) => {
                        for v in &mut ui.views {
                            v.lines.clear();
                            v.status.clear();
                        }
                        ui.notice = None;
                    }
                    Err(e) => ui.notice = Some(format!("{e:#}")),
                }
                return false;
            }

            let pending = match session.begin_turn(&msg) {
                Ok(p) => p,
                Err(e) => {
                    ui.notice = Some(format!("{e:#}"));
                    return false;
                }
            };

            ui.notice = None;
            for v in &mut ui.views {
                v.start_turn(&msg);
            }

            let (up_tx, up_rx) = mpsc::unbounded_channel::<LaneUpdate>();
            let (done_tx, done_rx) = oneshot::channel();
            *updates = Some(up_rx);
            *turn = Some(done_rx);

            tokio::spawn(async move {
                let report = pending.run(Some(up_tx)).await;
                let _ = done_tx.send(report);
            });
        }
        _ => {}
    }

    false
}

fn lane_text(view: &LaneView) -> Text<'static> {
    let mut text = Text::default();
    for l in &view.lines {
        match l.role {
            "user" => {
                text.lines.push(Line::styled("you:", Style::default().add_modifier(Modifier::BOLD)));
                text.lines.extend(Text::from(l.text.clone()).lines);
            }
            "assistant" => {
                let split = think::split(&l.text);
                let thinking = Style::default().add_modifier(Modifier::DIM | Modifier::ITALIC);
                text.lines.extend(Text::styled(split.reasoning.to_string(), thinking).lines);
                if split.has_answer() {
                    text.lines.extend(Text::from(split.answer.trim_start().to_string()).lines);
                }
            }
            _ => {
                let style = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
                text.lines.extend(Text::styled(format!("error: {}", l.text), style).lines);
            }
        }
        text.lines.push(Line::from(""));
    }
    text
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, ui: &Ui, running: bool) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let n = ui.views.len().max(1) as u32;
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(ui.views.iter().map(|_| Constraint::Ratio(1, n)).collect::<Vec<_>>())
            .split(rows[0]);

        for (view, area) in ui.views.iter().zip(cols.iter()) {
            let title = if view.status.is_empty() {
                view.id.label().to_string()
            } else {
                format!("{} — {}", view.id.label(), view.status)
            };
            let p = Paragraph::new(lane_text(view))
                .block(Block::default().borders(Borders::ALL).title(title))
                .wrap(Wrap { trim: false });
            f.render_widget(p, *area);
        }

        let title = match (&ui.notice, running) {
            (Some(n), _) => n.clone(),
            (None, true) => "input (waiting for every lane to finish)".to_string(),
            (None, false) => "input".to_string(),
        };
        let input_w = Paragraph::new(ui.input.clone()).block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(input_w, rows[1]);

        let x = rows[1].x + 1 + ui.input.chars().count() as u16;
        let y = rows[1].y + 1;
        f.set_cursor_position((x.min(rows[1].x + rows[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn view_streams_then_settles() {
        let mut v = LaneView::new(LaneId::Fireworks);
        v.start_turn("hi");
        v.apply(LaneUpdate::Delta {
            lane: LaneId::Fireworks,
            text: "<think>x".into(),
        });
        assert_eq!(v.lines[1].text, "<think>x");

        v.settle(&LaneOutcome::Completed {
            content: "<think>x</think>hello".into(),
            elapsed: Duration::from_millis(5),
        });
        assert_eq!(v.lines.len(), 2);
        assert_eq!(v.lines[1].text, "<think>x</think>hello");
        assert_eq!(v.status, "5 ms");
    }

    #[test]
    fn failed_view_shows_error_line() {
        let mut v = LaneView::new(LaneId::Together);
        v.start_turn("hi");
        v.settle(&LaneOutcome::Failed {
            error: "HTTP 401".into(),
            elapsed: Duration::ZERO,
        });
        assert_eq!(v.lines.len(), 2);
        assert_eq!(v.lines[1].role, "error");
    }
}
