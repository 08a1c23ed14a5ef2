use crate::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Table,
    View,
    /// Elasticsearch index.
    Index,
    /// Elasticsearch alias pointing at one or more indices.
    Alias,
    /// Elasticsearch data stream.
    DataStream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub name: String,
    pub kind: ObjectKind,
    pub columns: Vec<CatalogColumn>,
    /// Secondary indexes of a table, or backing indices of an alias/data stream.
    pub indexes: Vec<String>,
}

impl CatalogObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSchema {
    pub name: String,
    pub objects: Vec<CatalogObject>,
}

/// Crawled metadata of one database (or Elasticsearch cluster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub database: String,
    pub schemas: Vec<CatalogSchema>,
    pub crawled_at: DateTime<Utc>,
}

impl Catalog {
    pub fn new(database: impl Into<String>, schemas: Vec<CatalogSchema>) -> Self {
        Self {
            database: database.into(),
            schemas,
            crawled_at: Utc::now(),
        }
    }

    /// Object names, qualified with their schema when there is more than one.
    pub fn object_names(&self) -> Vec<String> {
        let qualify = self.schemas.len() > 1;
        self.schemas
            .iter()
            .flat_map(|schema| {
                schema.objects.iter().map(move |object| {
                    if qualify {
                        format!("{}.{}", schema.name, object.name)
                    } else {
                        object.name.clone()
                    }
                })
            })
            .collect()
    }

    pub fn find_object(&self, schema: Option<&str>, name: &str) -> Option<&CatalogObject> {
        self.schemas
            .iter()
            .filter(|s| schema.is_none_or(|wanted| s.name.eq_ignore_ascii_case(wanted)))
            .flat_map(|s| s.objects.iter())
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }

    pub fn object_count(&self) -> usize {
        self.schemas.iter().map(|s| s.objects.len()).sum()
    }
}

/// Something that can read a database's metadata.
pub trait CatalogCrawler: Send + Sync {
    fn crawl(&self, database: &str) -> Result<Catalog, DbError>;
}
