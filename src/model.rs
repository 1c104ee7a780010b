use std::collections::BTreeSet;
use std::time::Instant;

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, info, trace};

use crate::columns::{ColumnDefinition, derive_columns, nested_columns, unrendered_fields};
use crate::domain::{GridConfig, GridError, HELP_TEXT, Message, PAGE_SIZE_OPTIONS};
use crate::grouping::{Group, group};
use crate::inputter::{InputResult, Inputter};
use crate::record::Record;
use crate::ui::{COLUMN_WIDTH_MARGIN, TABLE_BORDER_WIDTH};
use crate::view::{SortDirection, ViewState};

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    SEARCH,
    FILTERMENU,
    POPUP,
}

// A line of the current page: a tenant, or one record of an expanded tenant.
// Indices point into `Model::visible`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RowRef {
    Group(usize),
    Child(usize, usize),
}

impl RowRef {
    fn group(&self) -> usize {
        match *self {
            RowRef::Group(g) | RowRef::Child(g, _) => g,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterMenu {
    pub column: usize,
    pub title: String,
    pub entries: Vec<(String, bool)>,
    pub cursor: usize,
}

impl FilterMenu {
    fn selected(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, on)| *on)
            .map(|(v, _)| v.clone())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub sort: Option<SortDirection>,
    pub filtered: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowView {
    pub is_group: bool,
    pub cells: Vec<String>,
}

pub struct UIData {
    pub name: String,
    pub columns: Vec<ColumnView>,
    pub rows: Vec<RowView>,
    pub selected_row: usize,
    pub selected_column: usize,
    pub search: InputResult,
    pub search_active: bool,
    pub page: usize,
    pub page_count: usize,
    pub page_size: usize,
    pub tenants: usize,
    pub records: usize,
    pub total_records: usize,
    pub popup_message: Option<String>,
    pub filter_menu: Option<FilterMenu>,
    pub status_message: String,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            selected_row: 0,
            selected_column: 0,
            search: InputResult::default(),
            search_active: false,
            page: 1,
            page_count: 1,
            page_size: PAGE_SIZE_OPTIONS[0],
            tenants: 0,
            records: 0,
            total_records: 0,
            popup_message: None,
            filter_menu: None,
            status_message: String::new(),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width: ui_width.saturating_sub(TABLE_BORDER_WIDTH),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

pub struct Model {
    name: String,
    config: GridConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    total_records: usize,
    columns: Vec<ColumnDefinition>,
    base: Vec<Group>,
    view: ViewState,
    visible: Vec<Group>,
    rows: Vec<RowRef>,
    visible_columns: Vec<usize>,
    column_widths: Vec<usize>,
    cursor_row: usize,
    cursor_column: usize,
    offset_column: usize,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    last_input: InputResult,
    popup_message: Option<String>,
    filter_menu: Option<FilterMenu>,
    status_message: String,
}

impl Model {
    pub fn init(
        config: &GridConfig,
        name: impl Into<String>,
        records: Vec<Record>,
        skipped: usize,
        ui_width: usize,
        ui_height: usize,
    ) -> Self {
        let start_time = Instant::now();
        let columns = derive_columns(records.first(), &records, &config.relationship_label);
        let hidden = unrendered_fields(records.first(), &records);
        let base = group(&records);
        info!(
            "Prepared {} tenants and {} columns in {}ms",
            base.len(),
            columns.len(),
            start_time.elapsed().as_millis()
        );

        let mut model = Self {
            name: name.into(),
            config: config.clone(),
            status: Status::READY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            total_records: records.len(),
            columns,
            visible: base.clone(),
            base,
            view: ViewState::new(config.page_size, config.search_mode),
            rows: Vec::new(),
            visible_columns: Vec::new(),
            column_widths: Vec::new(),
            cursor_row: 0,
            cursor_column: 0,
            offset_column: 0,
            uilayout: UILayout::from_values(ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard: None,
            input: Inputter::default(),
            last_input: InputResult::default(),
            popup_message: None,
            filter_menu: None,
            status_message: String::new(),
        };
        model.rebuild_rows();
        let mut status = format!("Loaded {} records", model.total_records);
        if skipped > 0 {
            status.push_str(&format!(", skipped {skipped} non-object elements"));
        }
        if !hidden.is_empty() {
            status.push_str(&format!(", not shown: {}", hidden.join(", ")));
        }
        model.set_status_message(status);
        model
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.modus == Modus::SEARCH
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.uidata.status_message = self.status_message.clone();
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), GridError> {
        if let Some(msg) = message {
            match self.modus {
                Modus::TABLE => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveUp => self.move_selection_up(),
                    Message::MoveDown => self.move_selection_down(),
                    Message::MoveLeft => self.move_selection_left(),
                    Message::MoveRight => self.move_selection_right(),
                    Message::Enter | Message::ToggleSelection => self.toggle_expansion(),
                    Message::ExpandAll => self.expand_page(true),
                    Message::CollapseAll => self.expand_page(false),
                    Message::NextPage => self.goto_page(self.view.pagination.current_page + 1),
                    Message::PrevPage => {
                        self.goto_page(self.view.pagination.current_page.saturating_sub(1))
                    }
                    Message::FirstPage => self.goto_page(1),
                    Message::LastPage => self.goto_page(usize::MAX),
                    Message::GrowPageSize => self.step_page_size(true),
                    Message::ShrinkPageSize => self.step_page_size(false),
                    Message::Search => self.enter_search(),
                    Message::ToggleSort => self.toggle_sort(),
                    Message::Filter => self.open_filter_menu(),
                    Message::ResetFilter => self.reset_filter(self.cursor_column),
                    Message::CopyCell => self.copy_cell(),
                    Message::CopyRow => self.copy_row(),
                    Message::Help => self.show_help(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::SEARCH => match msg {
                    Message::Quit => self.quit(),
                    Message::RawKey(key) => self.raw_input(key),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::FILTERMENU => match msg {
                    Message::Quit => self.quit(),
                    Message::MoveUp => self.move_filter_cursor(-1),
                    Message::MoveDown => self.move_filter_cursor(1),
                    Message::ToggleSelection => self.toggle_filter_entry(),
                    Message::Enter => self.apply_filter_menu(),
                    Message::ResetFilter => {
                        if let Some(menu) = self.filter_menu.take() {
                            self.modus = Modus::TABLE;
                            self.reset_filter(menu.column);
                        }
                    }
                    Message::Exit => self.close_popup(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
                Modus::POPUP => match msg {
                    Message::Quit => self.quit(),
                    Message::Exit | Message::Help | Message::Enter => self.close_popup(),
                    Message::Resize(width, height) => self.ui_resize(width, height),
                    _ => (),
                },
            }
        }
        self.update_uidata();
        Ok(())
    }

    // ------------------------- View derivation --------------------------- //

    // Query, filter or sort changed: derive the groups again.
    fn refresh_view(&mut self) {
        let start_time = Instant::now();
        self.visible = self.view.derive(&self.base, &self.columns);
        self.view = self.view.clamped(self.visible.len());
        debug!(
            "View refresh: {} of {} tenants in {}ms",
            self.visible.len(),
            self.base.len(),
            start_time.elapsed().as_millis()
        );
        self.rebuild_rows();
    }

    // Page or expansion changed: rebuild the display rows of the current page.
    fn rebuild_rows(&mut self) {
        let range = self.view.pagination.range(self.visible.len());
        let mut rows = Vec::new();
        for gidx in range {
            rows.push(RowRef::Group(gidx));
            let g = &self.visible[gidx];
            if self.view.is_expanded(g) {
                rows.extend((0..g.children.len()).map(|c| RowRef::Child(gidx, c)));
            }
        }
        self.rows = rows;
        self.cursor_row = std::cmp::min(self.cursor_row, self.rows.len().saturating_sub(1));
        self.update_table_data();
    }

    fn cell_text(&self, row: RowRef, cidx: usize) -> String {
        match row {
            RowRef::Group(g) => {
                let group = &self.visible[g];
                if cidx != 0 {
                    return String::new();
                }
                let marker = match (group.is_expandable(), self.view.is_expanded(group)) {
                    (false, _) => " ",
                    (true, true) => "▾",
                    (true, false) => "▸",
                };
                format!("{marker} {} ({})", group.tenant_id(), group.children.len())
            }
            RowRef::Child(g, c) => {
                let group = &self.visible[g];
                if cidx == 0 {
                    let last = c + 1 == group.children.len();
                    return if last { "  └─" } else { "  ├─" }.to_string();
                }
                nested_columns(&self.columns)[cidx - 1]
                    .cell(&group.children[c])
                    .replace("\r\n", " ↵ ")
                    .replace('\n', " ↵ ")
            }
        }
    }

    fn calculate_column_width(&self, cidx: usize) -> usize {
        // Title plus room for the sort and filter markers
        let title = self.columns[cidx].title.chars().count() + 2;
        let content = self
            .rows
            .iter()
            .map(|&r| self.cell_text(r, cidx).chars().count())
            .max()
            .unwrap_or(0);
        let width = std::cmp::max(title, content) + COLUMN_WIDTH_MARGIN;
        std::cmp::min(width, self.config.max_column_width)
    }

    fn update_table_data(&mut self) {
        self.column_widths = (0..self.columns.len())
            .map(|c| self.calculate_column_width(c))
            .collect();
        self.cursor_column =
            std::cmp::min(self.cursor_column, self.columns.len().saturating_sub(1));
        self.offset_column = std::cmp::min(self.offset_column, self.cursor_column);

        // Create a list of columns that fit, the last one may be cut
        let mut visible_width = 0;
        self.visible_columns.clear();
        for cidx in self.offset_column..self.columns.len() {
            let width = self.column_widths[cidx];
            if visible_width + width + 1 <= self.uilayout.table_width
                || self.visible_columns.is_empty()
            {
                self.visible_columns.push(cidx);
                visible_width += width + 1;
            } else {
                if visible_width < self.uilayout.table_width {
                    self.visible_columns.push(cidx);
                }
                break;
            }
        }
        trace!(
            "Table: Cr {}, Cc {}, Oc {}, rows {}, columns {:?}",
            self.cursor_row,
            self.cursor_column,
            self.offset_column,
            self.rows.len(),
            self.visible_columns
        );
        self.update_uidata();
    }

    fn update_uidata(&mut self) {
        let columns = self
            .visible_columns
            .iter()
            .map(|&c| ColumnView {
                name: self.columns[c].title.clone(),
                width: self.column_widths[c],
                sort: self.view.sort.filter(|s| s.column == c).map(|s| s.direction),
                filtered: self.view.is_filtered(c),
            })
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|&r| RowView {
                is_group: matches!(r, RowRef::Group(_)),
                cells: self
                    .visible_columns
                    .iter()
                    .map(|&c| self.cell_text(r, c))
                    .collect(),
            })
            .collect();

        let pagination = self.view.pagination;
        self.uidata = UIData {
            name: self.name.clone(),
            columns,
            rows,
            selected_row: self.cursor_row,
            selected_column: self
                .visible_columns
                .iter()
                .position(|&c| c == self.cursor_column)
                .unwrap_or(0),
            search: if self.modus == Modus::SEARCH {
                self.last_input.clone()
            } else {
                InputResult {
                    cursor_pos: self.view.query.chars().count(),
                    input: self.view.query.clone(),
                    ..InputResult::default()
                }
            },
            search_active: self.modus == Modus::SEARCH,
            page: pagination.current_page,
            page_count: pagination.page_count(self.visible.len()),
            page_size: pagination.page_size,
            tenants: self.visible.len(),
            records: self.visible.iter().map(|g| g.children.len()).sum(),
            total_records: self.total_records,
            popup_message: self.popup_message.clone(),
            filter_menu: self.filter_menu.clone(),
            status_message: self.status_message.clone(),
        };
    }

    // -------------------- Control handling functions ---------------------- //

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
        self.update_table_data();
    }

    fn move_selection_up(&mut self) {
        self.cursor_row = self.cursor_row.saturating_sub(1);
    }

    fn move_selection_down(&mut self) {
        if self.cursor_row + 1 < self.rows.len() {
            self.cursor_row += 1;
        }
    }

    fn move_selection_left(&mut self) {
        if self.cursor_column > 0 {
            self.cursor_column -= 1;
            if self.cursor_column < self.offset_column {
                self.offset_column = self.cursor_column;
            }
            self.update_table_data();
        }
    }

    fn move_selection_right(&mut self) {
        if self.cursor_column + 1 < self.columns.len() {
            self.cursor_column += 1;
            // Scroll until the selected column is fully visible or the first visible one
            self.update_table_data();
            while self.offset_column < self.cursor_column
                && self.visible_columns.last().is_some_and(|&c| c <= self.cursor_column)
                && !self.fits_fully(self.cursor_column)
            {
                self.offset_column += 1;
                self.update_table_data();
            }
        }
    }

    fn fits_fully(&self, cidx: usize) -> bool {
        let used: usize = self
            .visible_columns
            .iter()
            .take_while(|&&c| c <= cidx)
            .map(|&c| self.column_widths[c] + 1)
            .sum();
        self.visible_columns.contains(&cidx) && used <= self.uilayout.table_width
    }

    fn current_row(&self) -> Option<RowRef> {
        self.rows.get(self.cursor_row).copied()
    }

    fn toggle_expansion(&mut self) {
        let Some(row) = self.current_row() else {
            return;
        };
        let gidx = row.group();
        let group = &self.visible[gidx];
        if !group.is_expandable() {
            return;
        }
        self.view = self.view.with_expansion_toggled(&group.key);
        self.rebuild_rows();
        // Keep the cursor on the tenant that was toggled
        if let Some(pos) = self.rows.iter().position(|&r| r == RowRef::Group(gidx)) {
            self.cursor_row = pos;
        }
    }

    fn expand_page(&mut self, expand: bool) {
        let keys = self.view.pagination.slice(&self.visible).iter().map(|g| g.key.as_str());
        self.view = self.view.with_expanded(keys, expand);
        let gidx = self.current_row().map(|r| r.group());
        self.rebuild_rows();
        if let Some(g) = gidx
            && let Some(pos) = self.rows.iter().position(|&r| r == RowRef::Group(g))
        {
            self.cursor_row = pos;
        }
    }

    fn goto_page(&mut self, page: usize) {
        let before = self.view.pagination.current_page;
        self.view = self.view.with_page(page, self.visible.len());
        if self.view.pagination.current_page != before {
            self.cursor_row = 0;
            self.rebuild_rows();
        }
    }

    fn step_page_size(&mut self, grow: bool) {
        let current = self.view.pagination.page_size;
        let next = if grow {
            PAGE_SIZE_OPTIONS.iter().copied().find(|&s| s > current)
        } else {
            PAGE_SIZE_OPTIONS.iter().rev().copied().find(|&s| s < current)
        };
        if let Some(size) = next {
            self.view = self.view.with_page_size(size, self.visible.len());
            self.cursor_row = 0;
            self.rebuild_rows();
            self.set_status_message(format!("{size} tenants per page"));
        }
    }

    fn enter_search(&mut self) {
        trace!("Entering search input ...");
        self.previous_modus = self.modus;
        self.modus = Modus::SEARCH;
        self.input.set(&self.view.query);
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        self.last_input = self.input.read(key);
        // Every keystroke filters the view again
        if self.last_input.input != self.view.query {
            self.apply_query(&self.last_input.input.clone());
        }
        if self.last_input.finished {
            self.modus = self.previous_modus;
            self.previous_modus = Modus::SEARCH;
            if self.last_input.canceled {
                self.set_status_message("Search cleared");
            } else {
                self.set_status_message(format!(
                    "{} tenants, {} records match",
                    self.visible.len(),
                    self.visible.iter().map(|g| g.children.len()).sum::<usize>()
                ));
            }
        }
    }

    fn apply_query(&mut self, query: &str) {
        trace!("Search for {query:?}");
        self.view = self.view.with_query(query);
        self.cursor_row = 0;
        self.refresh_view();
    }

    fn toggle_sort(&mut self) {
        self.view = self.view.with_sort_toggled(self.cursor_column);
        let title = &self.columns[self.cursor_column].title;
        let msg = match self.view.sort.map(|s| s.direction) {
            Some(SortDirection::Ascending) => format!("Sorted by {title} ascending"),
            Some(SortDirection::Descending) => format!("Sorted by {title} descending"),
            None => "Sort cleared".to_string(),
        };
        self.refresh_view();
        self.set_status_message(msg);
    }

    fn open_filter_menu(&mut self) {
        let column = &self.columns[self.cursor_column];
        let selected = self.view.column_filters.get(&self.cursor_column);
        let entries = column
            .filter_values
            .iter()
            .map(|v| (v.clone(), selected.is_some_and(|s| s.contains(v))))
            .collect();
        self.filter_menu = Some(FilterMenu {
            column: self.cursor_column,
            title: column.title.clone(),
            entries,
            cursor: 0,
        });
        self.previous_modus = self.modus;
        self.modus = Modus::FILTERMENU;
    }

    fn move_filter_cursor(&mut self, step: isize) {
        if let Some(menu) = self.filter_menu.as_mut() {
            let last = menu.entries.len().saturating_sub(1);
            menu.cursor = menu.cursor.saturating_add_signed(step).min(last);
        }
    }

    fn toggle_filter_entry(&mut self) {
        if let Some(menu) = self.filter_menu.as_mut()
            && let Some(entry) = menu.entries.get_mut(menu.cursor)
        {
            entry.1 = !entry.1;
        }
    }

    fn apply_filter_menu(&mut self) {
        if let Some(menu) = self.filter_menu.take() {
            let selected = menu.selected();
            let count = selected.len();
            self.view = self.view.with_column_filter(menu.column, selected);
            self.modus = Modus::TABLE;
            self.cursor_row = 0;
            self.refresh_view();
            if count == 0 {
                self.set_status_message(format!("Filter on {} removed", menu.title));
            } else {
                self.set_status_message(format!("Filter on {}: {count} values", menu.title));
            }
        }
    }

    fn reset_filter(&mut self, column: usize) {
        if self.view.is_filtered(column) {
            self.view = self.view.with_column_filter(column, BTreeSet::new());
            self.refresh_view();
            self.set_status_message(format!("Filter on {} removed", self.columns[column].title));
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.popup_message = Some(HELP_TEXT.to_string());
    }

    fn close_popup(&mut self) {
        trace!("Close popup ...");
        self.popup_message = None;
        self.filter_menu = None;
        self.modus = Modus::TABLE;
        self.previous_modus = Modus::POPUP;
    }

    fn wrap_cell_content(c: &str) -> String {
        let needs_escaping = c.contains('"');
        let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
        let mut out = c.to_string();

        if needs_escaping {
            out = out.replace('"', "\"\"");
        }
        if needs_wrapping {
            out = format!("\"{out}\"");
        }
        out
    }

    // Csv line of a record over all columns after the tenant column.
    fn record_line(&self, gidx: usize, cidx: usize) -> String {
        let child = &self.visible[gidx].children[cidx];
        let mut cells = vec![Self::wrap_cell_content(self.visible[gidx].tenant_id())];
        cells.extend(
            nested_columns(&self.columns)
                .iter()
                .map(|c| Self::wrap_cell_content(&c.cell(child))),
        );
        cells.join(",")
    }

    fn copy_cell(&mut self) {
        if let Some(row) = self.current_row() {
            let cell = match row {
                RowRef::Group(g) => match self.cursor_column {
                    0 => self.visible[g].tenant_id().to_string(),
                    _ => String::new(),
                },
                RowRef::Child(g, c) => match self.cursor_column {
                    0 => self.visible[g].tenant_id().to_string(),
                    col => self.columns[col].cell(&self.visible[g].children[c]),
                },
            };
            self.copy_to_clipboard(cell);
        }
    }

    fn copy_row(&mut self) {
        if let Some(row) = self.current_row() {
            let content = match row {
                RowRef::Group(g) => (0..self.visible[g].children.len())
                    .map(|c| self.record_line(g, c))
                    .collect::<Vec<String>>()
                    .join("\n"),
                RowRef::Child(g, c) => self.record_line(g, c),
            };
            self.copy_to_clipboard(content);
        }
    }

    fn copy_to_clipboard(&mut self, content: String) {
        trace!("Copy content: {content}");
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(c) => self.clipboard = Some(c),
                Err(e) => {
                    debug!("Clipboard not available: {e:?}");
                    self.set_status_message("Clipboard not available");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            match clipboard.set_text(content) {
                Ok(_) => self.set_status_message("Copied to clipboard"),
                Err(e) => {
                    debug!("Error copying to clipboard: {e:?}");
                    self.set_status_message("Copy failed");
                }
            }
        }
    }
}
