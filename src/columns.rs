use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::domain::{KEY_FIELD, RELATIONSHIP_FIELD, TENANT_FIELD};
use crate::grouping::{Child, group, tenant_key};
use crate::record::Record;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub title: String,
    pub data_index: String,
    /// Distinct stringified values of the field across all records, first seen first.
    pub filter_values: Vec<String>,
}

impl ColumnDefinition {
    fn new(title: &str, data_index: &str, records: &[Record]) -> Self {
        let mut column = Self {
            title: title.to_string(),
            data_index: data_index.to_string(),
            filter_values: Vec::new(),
        };
        column.filter_values = if column.data_index == KEY_FIELD {
            // Synthetic keys are unique per record
            group(records)
                .into_iter()
                .flat_map(|g| g.children.into_iter().map(|c| c.key))
                .collect()
        } else {
            let mut seen = HashSet::new();
            records
                .iter()
                .map(|r| column.value(r))
                .filter(|v| seen.insert(v.clone()))
                .collect()
        };
        column
    }

    pub fn is_tenant(&self) -> bool {
        self.data_index == TENANT_FIELD
    }

    // The tenant column shows the resolved tenant, so missing ids read `Unknown`.
    fn value(&self, record: &Record) -> String {
        if self.is_tenant() {
            tenant_key(record)
        } else {
            record.text(&self.data_index)
        }
    }

    pub fn cell(&self, child: &Child) -> String {
        if self.data_index == KEY_FIELD {
            child.key.clone()
        } else {
            self.value(&child.record)
        }
    }

    /// Ascending lexicographic order of the stringified values, absent sorting first.
    pub fn compare(&self, a: &Child, b: &Child) -> Ordering {
        self.cell(a).cmp(&self.cell(b))
    }
}

/// Columns of the grid: tenant, relationship, then every other field of `sample` in its order.
pub fn derive_columns(
    sample: Option<&Record>,
    records: &[Record],
    relationship_label: &str,
) -> Vec<ColumnDefinition> {
    let mut columns = vec![
        ColumnDefinition::new(TENANT_FIELD, TENANT_FIELD, records),
        ColumnDefinition::new(relationship_label, RELATIONSHIP_FIELD, records),
    ];
    if let Some(sample) = sample {
        columns.extend(
            sample
                .field_names()
                .filter(|&name| name != TENANT_FIELD && name != RELATIONSHIP_FIELD)
                .map(|name| ColumnDefinition::new(name, name, records)),
        );
    }
    debug!(
        "Derived columns: {:?}",
        columns.iter().map(|c| c.title.as_str()).collect::<Vec<_>>()
    );
    columns
}

/// Columns of the nested table shown inside an expanded tenant.
pub fn nested_columns(columns: &[ColumnDefinition]) -> &[ColumnDefinition] {
    columns.get(1..).unwrap_or_default()
}

/// Fields that appear in later records but not in `sample` and therefore get no column.
pub fn unrendered_fields(sample: Option<&Record>, records: &[Record]) -> Vec<String> {
    let Some(sample) = sample else {
        return Vec::new();
    };
    let known: HashSet<&str> = sample.field_names().collect();
    let mut missing: Vec<String> = Vec::new();
    for name in records.iter().flat_map(|r| r.field_names()) {
        if !known.contains(name) && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    if !missing.is_empty() {
        warn!("Fields missing from the first record are not shown: {missing:?}");
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::tests::scenario_records;
    use crate::record::Value;

    fn child(record: &Record) -> Child {
        Child {
            key: String::new(),
            record: record.clone(),
        }
    }

    fn titles(columns: &[ColumnDefinition]) -> Vec<&str> {
        columns.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn derives_fixed_then_sample_columns() {
        let records = scenario_records();
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        assert_eq!(titles(&columns), vec!["TENANT_ID", "RELATIONSHIP", "NAME"]);
        assert_eq!(columns[2].filter_values, vec!["a", "b", "c"]);
        assert_eq!(columns[0].filter_values, vec!["T1", "T2"]);
        assert!(columns[0].is_tenant());
    }

    #[test]
    fn relationship_label_is_configurable() {
        let records = scenario_records();
        let columns = derive_columns(records.first(), &records, "Data");
        assert_eq!(columns[1].title, "Data");
        assert_eq!(columns[1].data_index, "RELATIONSHIP");
        // The record without a relationship contributes the empty value
        assert_eq!(columns[1].filter_values, vec!["owner", "viewer", ""]);
    }

    #[test]
    fn filter_values_are_distinct() {
        let records: Vec<Record> = ["x", "y", "x", "x", "z", "y"]
            .iter()
            .map(|v| Record::from_pairs([("K", Value::Text(v.to_string()))]))
            .collect();
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        assert_eq!(columns[2].filter_values, vec!["x", "y", "z"]);
    }

    #[test]
    fn tenant_filter_values_match_group_keys() {
        let records = vec![
            Record::from_pairs([("TENANT_ID", Value::Text("T1".into()))]),
            Record::from_pairs([("NAME", Value::Text("x".into()))]),
            Record::from_pairs([("TENANT_ID", Value::Text(String::new()))]),
            Record::from_pairs([("TENANT_ID", Value::Integer(7))]),
        ];
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        assert_eq!(columns[0].filter_values, vec!["T1", "Unknown", "7"]);

        let groups = crate::grouping::group(&records);
        let unknown = &groups[1];
        assert_eq!(unknown.key, "Unknown");
        assert!(unknown.children.iter().all(|c| columns[0].cell(c) == "Unknown"));
    }

    #[test]
    fn key_column_shows_synthetic_keys() {
        let records = vec![
            Record::from_pairs([
                ("TENANT_ID", Value::Text("T1".into())),
                ("key", Value::Integer(1)),
            ]),
            Record::from_pairs([
                ("TENANT_ID", Value::Text("T1".into())),
                ("key", Value::Integer(1)),
            ]),
        ];
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        let key = &columns[2];
        assert_eq!(key.title, "key");
        assert_eq!(key.filter_values, vec!["T1-0", "T1-1"]);
        let groups = group(&records);
        assert_eq!(key.cell(&groups[0].children[1]), "T1-1");
    }

    #[test]
    fn no_records_gives_fixed_columns_only() {
        let columns = derive_columns(None, &[], "Data");
        assert_eq!(titles(&columns), vec!["TENANT_ID", "Data"]);
        assert!(columns.iter().all(|c| c.filter_values.is_empty()));
        assert_eq!(titles(nested_columns(&columns)), vec!["Data"]);
    }

    #[test]
    fn comparator_is_lexicographic_with_absent_first() {
        let records = scenario_records();
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        let relationship = &columns[1];
        let [owner, viewer, absent] = [0, 1, 2].map(|i| child(&records[i]));
        assert_eq!(relationship.compare(&owner, &viewer), Ordering::Less);
        assert_eq!(relationship.compare(&viewer, &owner), Ordering::Greater);
        assert_eq!(relationship.compare(&absent, &owner), Ordering::Less);
        assert_eq!(relationship.compare(&owner, &owner), Ordering::Equal);

        let numbers = [Value::Integer(10), Value::Integer(9)]
            .map(|v| Record::from_pairs([("N", v)]));
        let n = ColumnDefinition::new("N", "N", &numbers);
        // "10" < "9" as strings
        assert_eq!(n.compare(&child(&numbers[0]), &child(&numbers[1])), Ordering::Less);
    }

    #[test]
    fn later_fields_are_reported_not_rendered() {
        let mut records = scenario_records();
        records.push(Record::from_pairs([
            ("TENANT_ID", Value::Text("T3".into())),
            ("EXTRA", Value::Text("e".into())),
        ]));
        let columns = derive_columns(records.first(), &records, "RELATIONSHIP");
        assert!(!columns.iter().any(|c| c.data_index == "EXTRA"));
        assert_eq!(unrendered_fields(records.first(), &records), vec!["EXTRA"]);
    }
}
