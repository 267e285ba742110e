use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, List, ListItem, ListState as UiListState, Paragraph},
};

use todo_sync::application::session::SessionTracker;
use todo_sync::application::sync::{ListState, SyncService};
use todo_sync::domain::auth::AuthGateway;
use todo_sync::domain::task::TaskSnapshot;
use todo_sync::infrastructure::sqlite_auth::SqliteAuthGateway;
use todo_sync::infrastructure::sqlite_store::SqliteTaskStore;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://todos.db".to_string());

    let store = Arc::new(SqliteTaskStore::connect(&database_url).await?);
    store.init().await?;
    let gateway = Arc::new(SqliteAuthGateway::connect(&database_url).await?);
    gateway.init().await?;

    let session = SessionTracker::new(gateway);
    let sync = SyncService::start(store, session.observe());

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, session, &sync).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    sync.shutdown();
    res
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    View,
    Create,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SignInField {
    Email,
    Password,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CreateField {
    Title,
    Detail,
}

struct App {
    mode: Mode,
    signin_field: SignInField,
    email: String,
    password: String,
    create_field: CreateField,
    draft_title: String,
    draft_detail: String,
    selected: usize,
    list_state: UiListState,
    status: Option<String>,
}

async fn run_app<A: AuthGateway>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    session: SessionTracker<A>,
    sync: &SyncService<SqliteTaskStore>,
) -> Result<()> {
    let tick_rate = Duration::from_millis(200);
    let states = sync.observe();
    let mut app = App {
        mode: Mode::View,
        signin_field: SignInField::Email,
        email: String::new(),
        password: String::new(),
        create_field: CreateField::Title,
        draft_title: String::new(),
        draft_detail: String::new(),
        selected: 0,
        list_state: UiListState::default(),
        status: None,
    };

    loop {
        let signed_in = session.current().is_some();
        let list = states.borrow().clone();

        // Clamp selection to the latest snapshot
        if let Some(snapshot) = list.snapshot() {
            if app.selected >= snapshot.len() && !snapshot.is_empty() {
                app.selected = snapshot.len() - 1;
            }
        }

        terminal.draw(|f| {
            if signed_in {
                draw_list(f, &mut app, &list);
            } else {
                draw_sign_in(f, &app);
            }
        })?;

        if !event::poll(tick_rate)? {
            continue;
        }
        let Event::Key(key) = event::read()? else { continue };
        // Only act on key presses; ignore repeats and releases
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if !signed_in {
            match key.code {
                KeyCode::Esc => break,
                KeyCode::Tab => {
                    app.signin_field = match app.signin_field {
                        SignInField::Email => SignInField::Password,
                        SignInField::Password => SignInField::Email,
                    };
                }
                KeyCode::Backspace => {
                    match app.signin_field {
                        SignInField::Email => app.email.pop(),
                        SignInField::Password => app.password.pop(),
                    };
                }
                KeyCode::Char(c) => match app.signin_field {
                    SignInField::Email => app.email.push(c),
                    SignInField::Password => app.password.push(c),
                },
                KeyCode::Enter => {
                    match session.gateway().sign_in_with_password(&app.email, &app.password).await {
                        Ok(()) => {
                            app.status = None;
                            app.password.clear();
                        }
                        Err(err) => app.status = Some(err.to_string()),
                    }
                }
                KeyCode::F(2) => {
                    match session.gateway().sign_up_with_password(&app.email, &app.password).await {
                        Ok(()) => {
                            app.status = None;
                            app.password.clear();
                        }
                        Err(err) => app.status = Some(err.to_string()),
                    }
                }
                _ => {}
            }
            continue;
        }

        match app.mode {
            Mode::View => match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Up => {
                    if app.selected > 0 {
                        app.selected -= 1;
                    }
                }
                KeyCode::Down => {
                    let len = list.snapshot().map(TaskSnapshot::len).unwrap_or(0);
                    if app.selected + 1 < len {
                        app.selected += 1;
                    }
                }
                KeyCode::Enter => {
                    if let Some(task) = list.snapshot().and_then(|s| s.tasks.get(app.selected)) {
                        if let Err(err) = sync.toggle_task(task.id).await {
                            app.status = Some(err.to_string());
                        }
                    }
                }
                KeyCode::Char('d') => {
                    if let Some(task) = list.snapshot().and_then(|s| s.tasks.get(app.selected)) {
                        if let Err(err) = sync.delete_task(task.id).await {
                            app.status = Some(err.to_string());
                        }
                        if app.selected > 0 {
                            app.selected -= 1;
                        }
                    }
                }
                KeyCode::Char('n') => {
                    app.mode = Mode::Create;
                    app.create_field = CreateField::Title;
                    app.draft_title.clear();
                    app.draft_detail.clear();
                }
                KeyCode::Char('r') => sync.resync(),
                KeyCode::Char('o') => {
                    if let Err(err) = session.gateway().sign_out().await {
                        app.status = Some(err.to_string());
                    }
                    app.selected = 0;
                }
                _ => {}
            },
            Mode::Create => match key.code {
                KeyCode::Esc => {
                    app.mode = Mode::View;
                    app.draft_title.clear();
                    app.draft_detail.clear();
                }
                KeyCode::Enter => {
                    match sync.create_task(&app.draft_title, &app.draft_detail).await {
                        Ok(_) => {
                            app.status = None;
                            app.mode = Mode::View;
                            app.draft_title.clear();
                            app.draft_detail.clear();
                        }
                        Err(err) => app.status = Some(err.to_string()),
                    }
                }
                KeyCode::Backspace => {
                    match app.create_field {
                        CreateField::Title => app.draft_title.pop(),
                        CreateField::Detail => app.draft_detail.pop(),
                    };
                }
                KeyCode::Tab => {
                    app.create_field = match app.create_field {
                        CreateField::Title => CreateField::Detail,
                        CreateField::Detail => CreateField::Title,
                    };
                }
                KeyCode::Char(c) => match app.create_field {
                    CreateField::Title => app.draft_title.push(c),
                    CreateField::Detail => app.draft_detail.push(c),
                },
                _ => {}
            },
        }
    }
    Ok(())
}

fn draw_sign_in(f: &mut ratatui::Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1), Constraint::Length(3)])
        .split(f.size());

    let header = Paragraph::new("Sign in (Enter) or sign up (F2) — Tab switches field, Esc quits")
        .block(Block::default().borders(Borders::ALL).title("todo-sync"));
    f.render_widget(header, chunks[0]);

    let marker = |field| if app.signin_field == field { ">" } else { " " };
    let body = Paragraph::new(format!(
        "{} Email:    {}\n{} Password: {}",
        marker(SignInField::Email),
        app.email,
        marker(SignInField::Password),
        "*".repeat(app.password.len()),
    ))
    .block(Block::default().borders(Borders::ALL).title("credentials"));
    f.render_widget(body, chunks[1]);

    let footer = Paragraph::new(app.status.clone().unwrap_or_default())
        .block(Block::default().borders(Borders::ALL).title("status"));
    f.render_widget(footer, chunks[2]);
}

fn draw_list(f: &mut ratatui::Frame, app: &mut App, list: &ListState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1), Constraint::Length(3)])
        .split(f.size());

    let header_text = match list {
        ListState::Live(snapshot) => format!(
            "To-Do List — {} tasks left  (Enter: toggle, n: new, d: delete, o: sign out, q: quit)",
            snapshot.remaining()
        ),
        ListState::Unavailable { reason } => format!("Sync unavailable: {reason}  (r to retry)"),
        ListState::SignedOut => "Signed out".to_string(),
    };
    let header = Paragraph::new(header_text)
        .block(Block::default().borders(Borders::ALL).title("todo-sync"));
    f.render_widget(header, chunks[0]);

    let empty = TaskSnapshot::default();
    let snapshot = list.snapshot().unwrap_or(&empty);
    let items: Vec<ListItem> = snapshot
        .tasks
        .iter()
        .map(|t| {
            let mark = if t.completed { "[x]" } else { "[ ]" };
            let line = if t.detail.is_empty() {
                format!("{} {}", mark, t.title)
            } else {
                format!("{} {} — {}", mark, t.title, t.detail)
            };
            ListItem::new(line)
        })
        .collect();
    if snapshot.is_empty() {
        app.list_state.select(None);
    } else {
        app.list_state.select(Some(app.selected));
    }
    let widget = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("tasks"))
        .highlight_style(
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD | Modifier::REVERSED),
        )
        .highlight_symbol(">> ");
    f.render_stateful_widget(widget, chunks[1], &mut app.list_state);

    let footer_text = match app.mode {
        Mode::View => app.status.clone().unwrap_or_default(),
        Mode::Create => format!(
            "New — {}: {}_  |  (Tab to switch, Enter to save, Esc to cancel)",
            match app.create_field {
                CreateField::Title => "Title",
                CreateField::Detail => "Detail",
            },
            match app.create_field {
                CreateField::Title => &app.draft_title,
                CreateField::Detail => &app.draft_detail,
            }
        ),
    };
    let footer = Paragraph::new(footer_text).block(Block::default().borders(Borders::ALL).title(
        match app.mode {
            Mode::View => "status",
            Mode::Create => "create",
        },
    ));
    f.render_widget(footer, chunks[2]);
}
