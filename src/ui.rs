use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
};

use crate::model::{FilterMenu, Model, UIData};
use crate::view::SortDirection;

pub const TITLE: &str = " Grouped Data Table ";
pub const SEARCH_PLACEHOLDER: &str = "Search...";
pub const COLUMN_WIDTH_MARGIN: usize = 1;
pub const TABLE_BORDER_WIDTH: usize = 2;
const SEARCH_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 1;
const STATUSLINE_HEIGHT: u16 = 1;

#[derive(Debug, Default)]
pub struct TableUI;

impl TableUI {
    pub fn new() -> Self {
        Self
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [search_area, table_area, footer_area, status_area] = Layout::vertical([
            Constraint::Length(SEARCH_HEIGHT),
            Constraint::Min(1),
            Constraint::Length(FOOTER_HEIGHT),
            Constraint::Length(STATUSLINE_HEIGHT),
        ])
        .areas(frame.area());

        self.draw_search(uidata, frame, search_area);
        self.draw_table(uidata, frame, table_area);
        self.draw_footer(uidata, frame, footer_area);
        frame.render_widget(
            Paragraph::new(Line::from(uidata.status_message.as_str()).dark_gray()),
            status_area,
        );

        if let Some(menu) = &uidata.filter_menu {
            self.draw_filter_menu(menu, frame);
        } else if let Some(message) = &uidata.popup_message {
            self.draw_popup(" Help ", message, frame);
        }
    }

    fn draw_search(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let border_style = if uidata.search_active {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let block = Block::bordered()
            .title(Line::from(TITLE.bold()).centered())
            .border_style(border_style);

        let text = if uidata.search.input.is_empty() && !uidata.search_active {
            Line::from(SEARCH_PLACEHOLDER.dark_gray())
        } else {
            Line::from(vec!["/ ".blue().bold(), uidata.search.input.as_str().into()])
        };
        frame.render_widget(Paragraph::new(text).block(block), area);

        if uidata.search_active {
            frame.set_cursor_position(search_cursor(area, uidata.search.cursor_pos));
        }
    }

    fn draw_table(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let block = Block::bordered()
            .title(Line::from(format!(" {} ", uidata.name)))
            .border_set(border::THICK);

        if uidata.rows.is_empty() {
            let paragraph =
                Paragraph::new(Line::from("No data".dark_gray()).centered()).block(block);
            frame.render_widget(paragraph, area);
            return;
        }

        let header = Row::new(uidata.columns.iter().map(|c| {
            let sort = match c.sort {
                Some(SortDirection::Ascending) => "▲",
                Some(SortDirection::Descending) => "▼",
                None => "",
            };
            let filter = if c.filtered { "*" } else { "" };
            Cell::from(Span::styled(
                format!("{}{sort}{filter}", c.name),
                Style::default().add_modifier(Modifier::BOLD),
            ))
        }))
        .underlined();

        let rows = uidata.rows.iter().map(|r| {
            let row = Row::new(r.cells.iter().map(|c| Cell::from(c.as_str())));
            if r.is_group { row.bold() } else { row }
        });
        let widths = uidata
            .columns
            .iter()
            .map(|c| Constraint::Length(c.width as u16));

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .block(block)
            .row_highlight_style(Style::new().bg(Color::Blue))
            .column_highlight_style(Style::new().fg(Color::Yellow));

        let mut state = TableState::default();
        state.select(Some(uidata.selected_row));
        state.select_column(Some(uidata.selected_column));
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn draw_footer(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let pages = Line::from(vec![
            " Page ".into(),
            format!("{}/{}", uidata.page, uidata.page_count).yellow().bold(),
            format!(" · {} / page · ", uidata.page_size).into(),
            format!(
                "{} tenants, {} of {} records",
                uidata.tenants, uidata.records, uidata.total_records
            )
            .into(),
        ]);
        let help = Line::from(vec![" Help ".into(), "<?> ".blue().bold()]).right_aligned();
        let [pages_area, help_area] =
            Layout::horizontal([Constraint::Min(0), Constraint::Length(10)]).areas(area);
        frame.render_widget(Paragraph::new(pages), pages_area);
        frame.render_widget(Paragraph::new(help), help_area);
    }

    fn draw_popup(&self, title: &str, message: &str, frame: &mut Frame) {
        let area = popup_area(frame.area(), 60, 80);
        let block = Block::bordered()
            .title(Line::from(title.bold()).centered())
            .title_bottom(Line::from(" <Esc> ".blue().bold()).centered())
            .border_set(border::THICK);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(message).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_filter_menu(&self, menu: &FilterMenu, frame: &mut Frame) {
        let area = popup_area(frame.area(), 50, 60);
        let block = Block::bordered()
            .title(Line::from(format!(" Filter {} ", menu.title).bold()).centered())
            .title_bottom(
                Line::from(vec![
                    " <Space> ".blue().bold(),
                    "select ".into(),
                    "<Enter> ".blue().bold(),
                    "apply ".into(),
                    "<r> ".blue().bold(),
                    "reset ".into(),
                ])
                .centered(),
            )
            .border_set(border::THICK);

        let lines: Vec<Line> = menu
            .entries
            .iter()
            .enumerate()
            .map(|(idx, (value, selected))| {
                let mark = if *selected { "[x] " } else { "[ ] " };
                let value = if value.is_empty() { "(empty)" } else { value.as_str() };
                let line = Line::from(format!("{mark}{value}"));
                if idx == menu.cursor {
                    line.style(Style::new().bg(Color::Blue))
                } else {
                    line
                }
            })
            .collect();

        // Keep the cursor inside the popup
        let inner_height = area.height.saturating_sub(2) as usize;
        let offset = (menu.cursor + 1).saturating_sub(inner_height) as u16;
        frame.render_widget(Clear, area);
        frame.render_widget(Paragraph::new(lines).block(block).scroll((offset, 0)), area);
    }
}

// Cursor behind the "/ " prompt, held inside the box for long input.
fn search_cursor(area: Rect, cursor_pos: usize) -> Position {
    let offset = u16::try_from(cursor_pos).unwrap_or(u16::MAX);
    let x = area.x.saturating_add(3).saturating_add(offset);
    Position::new(x.min(area.right().saturating_sub(2)), area.y.saturating_add(1))
}

fn popup_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::vertical([Constraint::Percentage(percent_y)]).flex(Flex::Center);
    let horizontal = Layout::horizontal([Constraint::Percentage(percent_x)]).flex(Flex::Center);
    let [area] = vertical.areas(area);
    let [area] = horizontal.areas(area);
    area
}
