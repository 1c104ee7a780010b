use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::domain::{KEY_FIELD, SearchMode, TENANT_FIELD, UNKNOWN_TENANT};
use crate::record::Record;

/// A record placed in a tenant group, with a key that is stable for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    pub key: String,
    pub record: Record,
}

impl Child {
    /// All stringified values of the record, followed by the synthetic key.
    /// A record field named `key` is shadowed by the synthetic key.
    pub fn texts(&self) -> impl Iterator<Item = String> + '_ {
        self.record
            .fields()
            .filter(|&(name, _)| name != KEY_FIELD)
            .map(|(_, v)| v.to_string())
            .chain(std::iter::once(self.key.clone()))
    }

    fn matches(&self, query: &str, mode: SearchMode) -> bool {
        match mode {
            SearchMode::IgnoreCase => self.texts().any(|t| t.to_lowercase().contains(query)),
            SearchMode::CaseSensitive => self.texts().any(|t| t.contains(query)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    pub children: Vec<Child>,
}

impl Group {
    /// The value shown in the tenant column, identical to the group key.
    pub fn tenant_id(&self) -> &str {
        &self.key
    }

    pub fn is_expandable(&self) -> bool {
        !self.children.is_empty()
    }
}

pub fn tenant_key(record: &Record) -> String {
    match record.get(TENANT_FIELD).map(|v| v.to_string()) {
        Some(id) if !id.is_empty() => id,
        _ => UNKNOWN_TENANT.to_string(),
    }
}

/// Partitions records by tenant, keeping first-seen tenant order and input order inside a tenant.
pub fn group(records: &[Record]) -> Vec<Group> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<&Record>> = HashMap::new();

    for record in records {
        let key = tenant_key(record);
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record);
    }

    let groups: Vec<Group> = order
        .into_iter()
        .map(|key| {
            let children = buckets
                .remove(&key)
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(idx, record)| Child {
                    key: format!("{key}-{idx}"),
                    record: record.clone(),
                })
                .collect();
            Group { key, children }
        })
        .collect();

    debug!("Grouped {} records into {} tenants", records.len(), groups.len());
    groups
}

/// Keeps the children with at least one value containing `query`, dropping groups left empty.
pub fn search(groups: &[Group], query: &str, mode: SearchMode) -> Vec<Group> {
    if query.is_empty() {
        return groups.to_vec();
    }
    let query = match mode {
        SearchMode::IgnoreCase => query.to_lowercase(),
        SearchMode::CaseSensitive => query.to_string(),
    };

    let result: Vec<Group> = groups
        .par_iter()
        .filter_map(|g| {
            let children: Vec<Child> = g
                .children
                .iter()
                .filter(|c| c.matches(&query, mode))
                .cloned()
                .collect();
            (!children.is_empty()).then(|| Group {
                key: g.key.clone(),
                children,
            })
        })
        .collect();

    trace!("Search for {query:?} kept {} of {} tenants", result.len(), groups.len());
    result
}
