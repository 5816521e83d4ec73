mod ui;

use manga_window::backend::bato::Bato;
use manga_window::backend::library::{
    LibraryEntry, LibraryStore, library_entries, open_library_or_memory,
};
use manga_window::{
    ChapterView, Config, ContentProvider, ImageBuffers, LibraryError, ReaderError, ReaderSession,
};
use image::DynamicImage;
use ui::ui::{App, AppState, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::{error::Error, fs, io};
use tokio::sync::mpsc;

const LIBRARY_SIZE: usize = 50;

enum BackgroundTask {
    LibraryLoaded(Result<Vec<LibraryEntry>, LibraryError>),
    ThumbnailLoaded { series_id: String, image: DynamicImage },
    ChapterOpened(Result<Arc<ChapterView>, ReaderError>),
    PageDecoded { key: String, image: DynamicImage },
    PageUnavailable { key: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = Config::load();
    let library: Arc<dyn LibraryStore> = Arc::from(open_library_or_memory(&config).await);

    let provider: Arc<dyn ContentProvider> = Arc::new(Bato::new(&config)?);
    let session = ReaderSession::with_library(provider, ImageBuffers::new(), Some(library));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    match std::env::args().nth(1) {
        Some(address) => {
            app.set_loading(&format!("Opening {address}..."));
            spawn_chapter_opener(session.clone(), address, task_tx.clone());
        }
        None => {
            app.set_loading("Loading library...");
            spawn_library_loader(session.clone(), task_tx.clone());
        }
    }
    terminal.draw(|f| ui(f, &mut app))?;

    let res = run_app(&mut terminal, &mut app, &session, &mut task_rx, task_tx).await;

    session.exit().await;
    session.wait_idle().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

/// The terminal belongs to the reader, so logs go to a file.
fn init_logging() {
    let log_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("manga-window");
    fs::create_dir_all(&log_dir).ok();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("reader.log"))
    {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

fn spawn_library_loader(session: ReaderSession, tx: mpsc::UnboundedSender<BackgroundTask>) {
    tokio::spawn(async move {
        let entries = match session.library() {
            Some(library) => library_entries(&**library, LIBRARY_SIZE).await,
            None => Ok(Vec::new()),
        };
        let _ = tx.send(BackgroundTask::LibraryLoaded(entries));
    });
}

/// Thumbnails go through the provider so they share its client settings.
fn spawn_thumbnail_loaders(
    app: &App,
    entries: &[LibraryEntry],
    session: &ReaderSession,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    for entry in entries {
        let series_id = entry.position.series_id.clone();
        let Some(url) = entry.thumbnail.clone() else {
            continue;
        };
        if app.has_thumbnail(&series_id) {
            continue;
        }

        let provider = Arc::clone(session.provider());
        let tx = tx.clone();
        tokio::spawn(async move {
            let image = match provider.fetch_image(&url).await {
                Ok(bytes) => decode_page(&bytes),
                Err(e) => {
                    log::warn!("Could not fetch thumbnail for series {}: {}", series_id, e);
                    None
                }
            };
            if let Some(image) = image {
                let _ = tx.send(BackgroundTask::ThumbnailLoaded { series_id, image });
            }
        });
    }
}

fn spawn_chapter_opener(
    session: ReaderSession,
    address: String,
    tx: mpsc::UnboundedSender<BackgroundTask>,
) {
    tokio::spawn(async move {
        let result = session.open_new(&address).await;
        let _ = tx.send(BackgroundTask::ChapterOpened(result));
    });
}

fn spawn_page_decoder(session: ReaderSession, key: String, tx: mpsc::UnboundedSender<BackgroundTask>) {
    tokio::spawn(async move {
        let image = match session.image(&key).await {
            Some(bytes) => decode_page(&bytes),
            None => None,
        };

        let _ = match image {
            Some(image) => tx.send(BackgroundTask::PageDecoded { key, image }),
            None => tx.send(BackgroundTask::PageUnavailable { key }),
        };
    });
}

fn decode_page(bytes: &[u8]) -> Option<DynamicImage> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()
}

fn request_current_page(
    app: &App,
    session: &ReaderSession,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    if let Some(key) = app.current_key() {
        spawn_page_decoder(session.clone(), key, tx.clone());
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &ReaderSession,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    task_tx: mpsc::UnboundedSender<BackgroundTask>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            // Keeps the spinner moving
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        return Ok(());
                    }
                    match app.state {
                        AppState::Library => handle_library_input(app, key.code, session, &task_tx),
                        AppState::Reading => {
                            handle_reader_input(app, key.code, session, &task_tx).await
                        }
                        AppState::Failed if key.code == KeyCode::Char('l') => {
                            show_library(app, session, &task_tx)
                        }
                        _ => {}
                    }
                }
            }

            Some(task) = task_rx.recv() => {
                match task {
                    BackgroundTask::LibraryLoaded(Ok(entries)) => {
                        spawn_thumbnail_loaders(app, &entries, session, &task_tx);
                        app.show_library(entries);
                    }
                    BackgroundTask::LibraryLoaded(Err(e)) => {
                        log::error!("Could not read the library: {}", e);
                        app.set_failed(&e.to_string());
                    }
                    BackgroundTask::ThumbnailLoaded { series_id, image } => {
                        app.add_thumbnail(&series_id, image);
                    }
                    BackgroundTask::ChapterOpened(Ok(chapter)) => {
                        app.show_chapter(chapter);
                        request_current_page(app, session, &task_tx);
                    }
                    BackgroundTask::ChapterOpened(Err(e)) => {
                        app.set_failed(&e.to_string());
                    }
                    BackgroundTask::PageDecoded { key, image } => {
                        app.set_page_image(&key, image);
                    }
                    BackgroundTask::PageUnavailable { key } => {
                        log::warn!("Page {} is not in the buffer store", key);
                        app.set_status("This page could not be displayed");
                    }
                }
            }
        }
    }
}

fn show_library(
    app: &mut App,
    session: &ReaderSession,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    app.set_loading("Loading library...");
    spawn_library_loader(session.clone(), task_tx.clone());
}

fn handle_library_input(
    app: &mut App,
    key: KeyCode,
    session: &ReaderSession,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match key {
        KeyCode::Right | KeyCode::Down => app.select_next(),
        KeyCode::Left | KeyCode::Up => app.select_prev(),
        KeyCode::Enter => {
            if let Some(entry) = app.selected_entry() {
                let address = entry.position.address.clone();
                app.set_loading(&format!("Opening {address}..."));
                spawn_chapter_opener(session.clone(), address, task_tx.clone());
            }
        }
        _ => {}
    }
}

async fn handle_reader_input(
    app: &mut App,
    key: KeyCode,
    session: &ReaderSession,
    task_tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    match key {
        KeyCode::Right => {
            if app.next_page() {
                request_current_page(app, session, task_tx);
            }
        }
        KeyCode::Left => {
            if app.prev_page() {
                request_current_page(app, session, task_tx);
            }
        }
        KeyCode::Char('n') => match session.advance().await {
            Some(chapter) => {
                app.show_chapter(chapter);
                request_current_page(app, session, task_tx);
            }
            None => app.set_status("No next chapter (yet)"),
        },
        KeyCode::Char('p') => match session.retreat().await {
            Some(chapter) => {
                app.show_chapter(chapter);
                request_current_page(app, session, task_tx);
            }
            None => app.set_status("No previous chapter (yet)"),
        },
        KeyCode::Char('l') => show_library(app, session, task_tx),
        KeyCode::Char('o') => {
            let address = session.snapshot().await.current.address;
            if !address.is_empty() {
                let url = session.provider().page_url(&address);
                if let Err(e) = webbrowser::open(&url) {
                    log::error!("Could not open {} in a browser: {}", url, e);
                    app.set_status("Could not open a browser");
                }
            }
        }
        _ => {}
    }
}
