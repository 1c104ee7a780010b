use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::trace;

use crate::columns::ColumnDefinition;
use crate::domain::SearchMode;
use crate::grouping::{Group, search};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number.
    pub current_page: usize,
    pub page_size: usize,
}

impl Pagination {
    pub fn new(page_size: usize) -> Self {
        Self {
            current_page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page_count(&self, total: usize) -> usize {
        total.div_ceil(self.page_size).max(1)
    }

    /// Range of group indices shown on the current page.
    pub fn range(&self, total: usize) -> std::ops::Range<usize> {
        let begin = std::cmp::min((self.current_page - 1) * self.page_size, total);
        let end = std::cmp::min(begin + self.page_size, total);
        begin..end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range(items.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: usize,
    pub direction: SortDirection,
}

/// Everything the user can change about what the grid shows.
///
/// Each `with_*` function returns a new state; the base groups are never touched.
/// Only query, filter and sort changes require [`ViewState::derive`] to run again.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub query: String,
    pub search_mode: SearchMode,
    pub pagination: Pagination,
    pub sort: Option<SortOrder>,
    pub column_filters: BTreeMap<usize, BTreeSet<String>>,
    pub expanded: HashSet<String>,
}

impl ViewState {
    pub fn new(page_size: usize, search_mode: SearchMode) -> Self {
        Self {
            query: String::new(),
            search_mode,
            pagination: Pagination::new(page_size),
            sort: None,
            column_filters: BTreeMap::new(),
            expanded: HashSet::new(),
        }
    }

    pub fn with_query(&self, query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..self.clone()
        }
    }

    pub fn with_page(&self, page: usize, total: usize) -> Self {
        let last = self.pagination.page_count(total);
        Self {
            pagination: Pagination {
                current_page: page.clamp(1, last),
                ..self.pagination
            },
            ..self.clone()
        }
    }

    /// Changes the page size, keeping the first visible group on screen.
    pub fn with_page_size(&self, page_size: usize, total: usize) -> Self {
        let page_size = page_size.max(1);
        let first = (self.pagination.current_page - 1) * self.pagination.page_size;
        Self {
            pagination: Pagination {
                current_page: first / page_size + 1,
                page_size,
            },
            ..self.clone()
        }
        .clamped(total)
    }

    /// Moves the current page back into range after the view shrank.
    pub fn clamped(&self, total: usize) -> Self {
        self.with_page(self.pagination.current_page, total)
    }

    /// Cycles the sort of `column`: none, ascending, descending, none.
    pub fn with_sort_toggled(&self, column: usize) -> Self {
        let sort = match self.sort {
            Some(SortOrder {
                column: c,
                direction: SortDirection::Ascending,
            }) if c == column => Some(SortOrder {
                column,
                direction: SortDirection::Descending,
            }),
            Some(SortOrder {
                column: c,
                direction: SortDirection::Descending,
            }) if c == column => None,
            _ => Some(SortOrder {
                column,
                direction: SortDirection::Ascending,
            }),
        };
        Self {
            sort,
            ..self.clone()
        }
    }

    /// Replaces the selected filter values of `column`; an empty selection removes the filter.
    pub fn with_column_filter(&self, column: usize, selected: BTreeSet<String>) -> Self {
        let mut column_filters = self.column_filters.clone();
        if selected.is_empty() {
            column_filters.remove(&column);
        } else {
            column_filters.insert(column, selected);
        }
        Self {
            column_filters,
            ..self.clone()
        }
    }

    pub fn with_expansion_toggled(&self, group_key: &str) -> Self {
        let mut expanded = self.expanded.clone();
        if !expanded.remove(group_key) {
            expanded.insert(group_key.to_string());
        }
        Self {
            expanded,
            ..self.clone()
        }
    }

    pub fn with_expanded<'a>(&self, keys: impl Iterator<Item = &'a str>, expand: bool) -> Self {
        let mut expanded = self.expanded.clone();
        for key in keys {
            if expand {
                expanded.insert(key.to_string());
            } else {
                expanded.remove(key);
            }
        }
        Self {
            expanded,
            ..self.clone()
        }
    }

    pub fn is_expanded(&self, group: &Group) -> bool {
        group.is_expandable() && self.expanded.contains(&group.key)
    }

    pub fn is_filtered(&self, column: usize) -> bool {
        self.column_filters.contains_key(&column)
    }

    /// Applies search, column filters and sort to the base groups.
    pub fn derive(&self, base: &[Group], columns: &[ColumnDefinition]) -> Vec<Group> {
        let mut groups = search(base, &self.query, self.search_mode);

        if !self.column_filters.is_empty() {
            groups = groups
                .into_iter()
                .filter_map(|mut g| {
                    g.children.retain(|child| {
                        self.column_filters.iter().all(|(&cidx, selected)| {
                            columns
                                .get(cidx)
                                .is_none_or(|c| selected.contains(&c.cell(child)))
                        })
                    });
                    (!g.children.is_empty()).then_some(g)
                })
                .collect();
        }

        if let Some(order) = self.sort
            && let Some(column) = columns.get(order.column)
        {
            let descending = order.direction == SortDirection::Descending;
            if column.is_tenant() {
                groups.sort_by(|a, b| {
                    let o = a.key.cmp(&b.key);
                    if descending { o.reverse() } else { o }
                });
            } else {
                for g in groups.iter_mut() {
                    g.children.sort_by(|a, b| {
                        let o = column.compare(a, b);
                        if descending { o.reverse() } else { o }
                    });
                }
            }
        }

        trace!(
            "Derived view: query {:?}, {} filters, sort {:?} => {} tenants",
            self.query,
            self.column_filters.len(),
            self.sort,
            groups.len()
        );
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::derive_columns;
    use crate::domain::PAGE_SIZE_OPTIONS;
    use crate::grouping::group;
    use crate::grouping::tests::scenario_records;
    use crate::record::{Record, Value};

    fn setup() -> (Vec<Group>, Vec<ColumnDefinition>) {
        let records = scenario_records();
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        (group(&records), columns)
    }

    fn names(groups: &[Group]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.children.iter().map(|c| c.record.text("NAME")).collect())
            .collect()
    }

    #[test]
    fn default_view_equals_base() {
        let (base, columns) = setup();
        let view = ViewState::new(10, SearchMode::IgnoreCase);
        assert_eq!(view.derive(&base, &columns), base);
    }

    #[test]
    fn column_filter_keeps_selected_values() {
        let (base, columns) = setup();
        let view = ViewState::new(10, SearchMode::IgnoreCase)
            .with_column_filter(2, BTreeSet::from(["b".to_string(), "c".to_string()]));
        let derived = view.derive(&base, &columns);
        assert_eq!(names(&derived), vec![vec!["b"], vec!["c"]]);
        assert!(view.is_filtered(2));

        let view = view.with_column_filter(1, BTreeSet::from(["owner".to_string()]));
        assert!(view.derive(&base, &columns).is_empty());

        let cleared = view
            .with_column_filter(1, BTreeSet::new())
            .with_column_filter(2, BTreeSet::new());
        assert_eq!(cleared.derive(&base, &columns), base);
    }

    #[test]
    fn filters_combine_with_search() {
        let (base, columns) = setup();
        let view = ViewState::new(10, SearchMode::IgnoreCase)
            .with_query("T1")
            .with_column_filter(2, BTreeSet::from(["b".to_string(), "c".to_string()]));
        assert_eq!(names(&view.derive(&base, &columns)), vec![vec!["b"]]);
    }

    #[test]
    fn sort_cycles_and_orders() {
        let (base, columns) = setup();
        let view = ViewState::new(10, SearchMode::IgnoreCase);

        let asc = view.with_sort_toggled(0);
        let keys: Vec<String> = asc.derive(&base, &columns).into_iter().map(|g| g.key).collect();
        assert_eq!(keys, vec!["T1", "T2"]);

        let desc = asc.with_sort_toggled(0);
        let keys: Vec<String> = desc.derive(&base, &columns).into_iter().map(|g| g.key).collect();
        assert_eq!(keys, vec!["T2", "T1"]);

        assert_eq!(desc.with_sort_toggled(0).sort, None);

        // Sorting a record column reorders children, not tenants
        let by_name = view.with_sort_toggled(2).with_sort_toggled(2);
        assert_eq!(
            names(&by_name.derive(&base, &columns)),
            vec![vec!["b", "a"], vec!["c"]]
        );
    }

    #[test]
    fn sort_puts_absent_first() {
        let records = vec![
            Record::from_pairs([
                ("TENANT_ID", Value::Text("T".into())),
                ("X", Value::Text("b".into())),
            ]),
            Record::from_pairs([("TENANT_ID", Value::Text("T".into()))]),
            Record::from_pairs([
                ("TENANT_ID", Value::Text("T".into())),
                ("X", Value::Text("a".into())),
            ]),
        ];
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        let base = group(&records);
        let view = ViewState::new(10, SearchMode::IgnoreCase).with_sort_toggled(2);
        let derived = view.derive(&base, &columns);
        let xs: Vec<String> = derived[0].children.iter().map(|c| c.record.text("X")).collect();
        assert_eq!(xs, vec!["", "a", "b"]);
    }

    #[test]
    fn pagination_slices_and_clamps() {
        let p = Pagination::new(10);
        assert_eq!(p.page_count(0), 1);
        assert_eq!(p.page_count(10), 1);
        assert_eq!(p.page_count(11), 2);
        assert_eq!(p.range(0), 0..0);

        let items: Vec<usize> = (0..25).collect();
        let view = ViewState::new(10, SearchMode::IgnoreCase);
        let last = view.with_page(7, items.len());
        assert_eq!(last.pagination.current_page, 3);
        assert_eq!(last.pagination.slice(&items), &[20, 21, 22, 23, 24]);

        let covered: Vec<usize> = (1..=3)
            .flat_map(|p| view.with_page(p, items.len()).pagination.slice(&items).to_vec())
            .collect();
        assert_eq!(covered, items);

        // Shrinking the view clamps the page
        assert_eq!(last.clamped(4).pagination.current_page, 1);
        assert_eq!(view.with_page(0, 25).pagination.current_page, 1);
    }

    #[test]
    fn page_size_change_keeps_first_row_visible() {
        let view = ViewState::new(10, SearchMode::IgnoreCase).with_page(3, 100);
        let bigger = view.with_page_size(PAGE_SIZE_OPTIONS[2], 100);
        assert_eq!(bigger.pagination, Pagination { current_page: 1, page_size: 50 });
        let smaller = bigger.with_page(2, 100).with_page_size(20, 100);
        assert_eq!(smaller.pagination.current_page, 3);
    }

    #[test]
    fn page_change_does_not_touch_derived_fields() {
        let view = ViewState::new(10, SearchMode::IgnoreCase).with_query("a");
        let next = view.with_page(2, 30);
        assert_eq!(next.query, view.query);
        assert_eq!(next.sort, view.sort);
        assert_eq!(next.column_filters, view.column_filters);
    }

    #[test]
    fn expansion_toggles() {
        let (base, _) = setup();
        let view = ViewState::new(10, SearchMode::IgnoreCase);
        assert!(!view.is_expanded(&base[0]));
        let open = view.with_expansion_toggled("T1");
        assert!(open.is_expanded(&base[0]));
        assert!(!open.with_expansion_toggled("T1").is_expanded(&base[0]));

        let all = view.with_expanded(base.iter().map(|g| g.key.as_str()), true);
        assert!(base.iter().all(|g| all.is_expanded(g)));
        let none = all.with_expanded(base.iter().map(|g| g.key.as_str()), false);
        assert!(none.expanded.is_empty());
    }
}
