use image::DynamicImage;
use manga_window::ChapterView;
use manga_window::backend::library::LibraryEntry;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Library,
    Reading,
    Failed,
}

pub struct App {
    pub state: AppState,
    pub loading_message: String,
    pub status_message: String,
    pub chapter: Option<Arc<ChapterView>>,
    pub page: usize,
    pub picker: Option<Picker>,
    pub page_state: Option<StatefulProtocol>,
    pub library: Vec<LibraryEntry>,
    pub selected: usize,
    pub thumbnails: HashMap<String, StatefulProtocol>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            status_message: String::new(),
            chapter: None,
            page: 0,
            picker,
            page_state: None,
            library: Vec::new(),
            selected: 0,
            thumbnails: HashMap::new(),
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_failed(&mut self, message: &str) {
        self.state = AppState::Failed;
        self.loading_message = message.to_string();
    }

    pub fn set_status(&mut self, message: &str) {
        self.status_message = message.to_string();
    }

    pub fn show_library(&mut self, entries: Vec<LibraryEntry>) {
        self.state = AppState::Library;
        self.status_message.clear();
        self.library = entries;
        self.selected = self.selected.min(self.library.len().saturating_sub(1));
    }

    pub fn selected_entry(&self) -> Option<&LibraryEntry> {
        self.library.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.library.len() {
            self.selected += 1;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn has_thumbnail(&self, series_id: &str) -> bool {
        self.thumbnails.contains_key(series_id)
    }

    pub fn add_thumbnail(&mut self, series_id: &str, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.thumbnails.insert(series_id.to_string(), protocol);
        }
    }

    pub fn show_chapter(&mut self, chapter: Arc<ChapterView>) {
        self.state = AppState::Reading;
        self.status_message.clear();
        self.chapter = Some(chapter);
        self.page = 0;
        self.page_state = None;
    }

    pub fn page_count(&self) -> usize {
        self.chapter.as_ref().map_or(0, |c| c.images.len())
    }

    /// Buffer key of the page on screen.
    pub fn current_key(&self) -> Option<String> {
        self.chapter
            .as_ref()
            .and_then(|c| c.images.get(self.page))
            .map(|image| image.key.clone())
    }

    pub fn next_page(&mut self) -> bool {
        if self.page + 1 < self.page_count() {
            self.page += 1;
            self.page_state = None;
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        if self.page > 0 {
            self.page -= 1;
            self.page_state = None;
            true
        } else {
            false
        }
    }

    /// Ignores pages decoded for a key that is no longer on screen.
    pub fn set_page_image(&mut self, key: &str, image: DynamicImage) {
        if self.current_key().as_deref() != Some(key) {
            return;
        }
        if let Some(ref picker) = self.picker {
            self.page_state = Some(picker.new_resize_protocol(image));
        }
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Library => draw_library(f, app),
        AppState::Reading => draw_reader(f, app),
        AppState::Failed => draw_failure(f, app),
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Manga Window")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let frame_idx = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        / 100) as usize
        % spinner_frames.len();

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner_frames[frame_idx]),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);

    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

const CARD_WIDTH: u16 = 30;

fn draw_library(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Min(10),   // cards
            Constraint::Length(3), // footer
        ])
        .split(area);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Library",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {} series", app.library.len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Manga Window")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(header, root[0]);

    draw_library_cards(f, root[1], app);

    let footer = Paragraph::new(Line::from(vec![
        Span::styled("←/→", Style::default().fg(Color::Yellow)),
        Span::raw(": select  "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(": continue reading  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(": quit"),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    )
    .alignment(Alignment::Center);
    f.render_widget(footer, root[2]);
}

fn draw_library_cards(f: &mut Frame, area: Rect, app: &mut App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White));

    let inner = block.inner(area);
    f.render_widget(block, area);

    if app.library.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from("Nothing read yet"),
            Line::from(Span::styled(
                "Start with: manga-window <chapter address>",
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .alignment(Alignment::Center);
        f.render_widget(empty, inner);
        return;
    }

    let cards_visible = (inner.width / CARD_WIDTH).max(1) as usize;
    // Keep the selection on screen
    let offset = (app.selected + 1).saturating_sub(cards_visible);

    let card_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints((0..cards_visible).map(|_| Constraint::Length(CARD_WIDTH)))
        .split(inner);

    for (i, card_area) in card_areas.iter().enumerate() {
        let index = offset + i;
        let Some(entry) = app.library.get(index) else {
            break;
        };
        let thumbnail = app.thumbnails.get_mut(&entry.position.series_id);
        draw_library_card(f, *card_area, entry, index == app.selected, thumbnail);
    }

    if offset > 0 {
        let left = Paragraph::new("◀").style(Style::default().fg(Color::Yellow));
        f.render_widget(left, Rect::new(inner.x, inner.y + inner.height / 2, 1, 1));
    }
    if offset + cards_visible < app.library.len() {
        let right = Paragraph::new("▶").style(Style::default().fg(Color::Yellow));
        f.render_widget(
            right,
            Rect::new(
                inner.x + inner.width.saturating_sub(1),
                inner.y + inner.height / 2,
                1,
                1,
            ),
        );
    }
}

fn draw_library_card(
    f: &mut Frame,
    area: Rect,
    entry: &LibraryEntry,
    selected: bool,
    thumbnail: Option<&mut StatefulProtocol>,
) {
    let border_style = if selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);

    let inner = block.inner(area);
    f.render_widget(block, area);

    if inner.height < 4 || inner.width < 5 {
        return;
    }

    let card_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),    // thumbnail
            Constraint::Length(2), // title
            Constraint::Length(1), // chapter
            Constraint::Length(1), // last read
        ])
        .split(inner);

    if let Some(state) = thumbnail {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, card_layout[0], state);
    } else {
        let placeholder = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled("📚", Style::default().fg(Color::Magenta))),
        ])
        .alignment(Alignment::Center);
        f.render_widget(placeholder, card_layout[0]);
    }

    let width = inner.width.saturating_sub(2) as usize;
    let title = Paragraph::new(truncate_text(&entry.display_title(), width)).style(
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(title, card_layout[1]);

    let chapter = Paragraph::new(truncate_text(&entry.display_label(), width))
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(chapter, card_layout[2]);

    let last_read = Paragraph::new(Line::from(vec![
        Span::styled("⏱ ", Style::default().fg(Color::Yellow)),
        Span::styled(entry.last_read(), Style::default().fg(Color::DarkGray)),
    ]));
    f.render_widget(last_read, card_layout[3]);
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn draw_failure(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Manga Window")
        .border_style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "Could not open chapter",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            app.loading_message.as_str(),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled("l", Style::default().fg(Color::Yellow)),
            Span::raw(": library  "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(": quit"),
        ]),
    ];
    f.render_widget(Paragraph::new(lines).alignment(Alignment::Center), inner);
}

fn draw_reader(f: &mut Frame, app: &mut App) {
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Min(10),   // page
            Constraint::Length(3), // footer
        ])
        .split(area);

    draw_header(f, root[0], app);
    draw_page(f, root[1], app);
    draw_footer(f, root[2], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let title = app
        .chapter
        .as_ref()
        .map(|c| c.title.as_str())
        .unwrap_or("");

    let line = Line::from(vec![
        Span::styled(
            title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  page {}/{}", app.page + 1, app.page_count()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Manga Window")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(header, area);
}

fn draw_page(f: &mut Frame, area: Rect, app: &mut App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(state) = app.page_state.as_mut() {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, inner, state);
        return;
    }

    let placeholder = if app.picker.is_none() {
        "This terminal cannot display images (press o to open in a browser)"
    } else {
        "Loading page..."
    };
    let paragraph = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled("📖", Style::default().fg(Color::Magenta))),
        Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray))),
    ])
    .alignment(Alignment::Center);
    f.render_widget(paragraph, inner);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![
        Span::styled("←/→", Style::default().fg(Color::Yellow)),
        Span::raw(": page  "),
        Span::styled("n/p", Style::default().fg(Color::Yellow)),
        Span::raw(": next/prev chapter  "),
        Span::styled("o", Style::default().fg(Color::Yellow)),
        Span::raw(": open in browser  "),
        Span::styled("l", Style::default().fg(Color::Yellow)),
        Span::raw(": library  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(": quit"),
    ];
    if !app.status_message.is_empty() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            app.status_message.as_str(),
            Style::default().fg(Color::Magenta),
        ));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}
