//! Source selection queries

use deploy_models::{SelectMode, Selection};
use record_store::{Document, Filter, RecordStore};
use serde_json::Value;

use crate::errors::MigrationError;

/// The filter selecting records by `id_field`, or `None` when the selection
/// can never yield a record
pub fn selection_filter(selection: &Selection, id_field: &str) -> Option<Filter> {
    let ids = || selection.ids.iter().map(|id| id.to_value()).collect::<Vec<Value>>();
    match selection.select {
        SelectMode::None => None,
        SelectMode::All => Some(Filter::All),
        SelectMode::Include if selection.ids.is_empty() => None,
        SelectMode::Include => Some(Filter::is_in(id_field, ids())),
        SelectMode::Exclude if selection.ids.is_empty() => Some(Filter::All),
        SelectMode::Exclude => Some(Filter::not_in(id_field, ids())),
    }
}

/// Query shape for [`select_docs`]
#[derive(Debug, Clone)]
pub struct SelectQuery<'a> {
    pub collection: &'a str,

    /// Field holding the identifier units are keyed by
    pub id_field: &'a str,

    /// Paths to load; empty loads whole records
    pub fields: &'a [&'a str],

    /// Extra restriction, e.g. eligible records only
    pub filter: Filter,
}

impl<'a> SelectQuery<'a> {
    pub fn new(collection: &'a str) -> Self {
        Self {
            collection,
            id_field: "_id",
            fields: &[],
            filter: Filter::All,
        }
    }

    pub fn id_field(mut self, id_field: &'a str) -> Self {
        self.id_field = id_field;
        self
    }

    pub fn fields(mut self, fields: &'a [&'a str]) -> Self {
        self.fields = fields;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Load the selected records of a collection. When the id field is not `_id`
/// each result's `_id` is replaced by that field's value.
pub async fn select_docs(
    store: &dyn RecordStore,
    selection: &Selection,
    query: SelectQuery<'_>,
) -> Result<Vec<Document>, MigrationError> {
    let Some(filter) = selection_filter(selection, query.id_field) else {
        return Ok(Vec::new());
    };

    let mut fields: Vec<&str> = query.fields.to_vec();
    if !fields.is_empty() && !fields.contains(&query.id_field) {
        fields.push(query.id_field);
    }

    let mut docs = store
        .find(query.collection, &filter.and(query.filter), &fields)
        .await?;

    if query.id_field != "_id" {
        for doc in docs.iter_mut() {
            if let Some(id) = doc.get(query.id_field).cloned() {
                doc.insert("_id".to_string(), id);
            }
        }
    }
    Ok(docs)
}

/// Apply a selection to records already in memory, keyed by `_id`
pub fn select_embedded(records: Vec<Document>, selection: &Selection) -> Vec<Document> {
    if selection.selects_nothing() {
        return Vec::new();
    }
    records
        .into_iter()
        .filter(|r| {
            r.get("_id")
                .and_then(deploy_models::RecordId::from_any_value)
                .is_some_and(|id| selection.admits(&id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_models::RecordId;
    use record_store::MemoryStore;
    use serde_json::json;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for (id, lookup) in [("1", "l1"), ("2", "l2"), ("3", "l3")] {
            let doc = json!({"_id": id, "lookup": lookup, "name": format!("n{}", id)});
            store
                .insert("objects", doc.as_object().cloned().unwrap_or_default())
                .await
                .unwrap();
        }
        store
    }

    fn ids(docs: &[Document]) -> Vec<String> {
        docs.iter()
            .map(|d| d["_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_selection_modes() {
        let store = store().await;
        let query = || SelectQuery::new("objects");

        let all = select_docs(&store, &Selection::all(), query()).await.unwrap();
        assert_eq!(ids(&all), vec!["1", "2", "3"]);

        let none = select_docs(&store, &Selection::none(), query()).await.unwrap();
        assert!(none.is_empty());

        let empty = select_docs(&store, &Selection::include(vec![]), query())
            .await
            .unwrap();
        assert!(empty.is_empty());

        let excluded = select_docs(&store, &Selection::exclude(vec![RecordId::from("2")]), query())
            .await
            .unwrap();
        assert_eq!(ids(&excluded), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_id_field_replaces_id() {
        let store = store().await;
        let docs = select_docs(
            &store,
            &Selection::include(vec![RecordId::from("l2")]),
            SelectQuery::new("objects").id_field("lookup").fields(&["name"]),
        )
        .await
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(Value::Object(docs[0].clone()), json!({"_id": "l2", "lookup": "l2", "name": "n2"}));
    }

    #[test]
    fn test_embedded_selection() {
        let records: Vec<Document> = ["a", "b"]
            .iter()
            .filter_map(|id| json!({"_id": id}).as_object().cloned())
            .collect();
        assert_eq!(select_embedded(records.clone(), &Selection::exclude(vec![RecordId::from("a")])).len(), 1);
        assert!(select_embedded(records, &Selection::none()).is_empty());
    }
}
