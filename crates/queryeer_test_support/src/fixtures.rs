use queryeer_core::{
    Catalog, CatalogColumn, CatalogObject, CatalogSchema, ColumnMeta, ConnectionProfile, DbKind,
    ObjectKind, QueryResult, Row, Value,
};

pub fn profile(name: &str, kind: DbKind) -> ConnectionProfile {
    ConnectionProfile::new(name, kind, format!("fake://{}", name))
}

pub fn basic_profile(name: &str, kind: DbKind, username: &str) -> ConnectionProfile {
    profile(name, kind).with_basic_auth(username)
}

pub fn column(name: impl Into<String>, type_name: impl Into<String>) -> ColumnMeta {
    ColumnMeta::new(name, type_name)
}

pub fn int_cell(value: i64) -> Value {
    Value::Int(value)
}

pub fn text_cell(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn table_result(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> QueryResult {
    QueryResult::new(columns, rows)
}

pub fn single_int_result(column_name: &str, value: i64) -> QueryResult {
    table_result(vec![column(column_name, "int")], vec![vec![int_cell(value)]])
}

/// `count` rows of `(id, name)`.
pub fn numbered_rows(count: i64) -> QueryResult {
    table_result(
        vec![column("id", "int"), column("name", "varchar")],
        (1..=count)
            .map(|i| vec![int_cell(i), text_cell(format!("row {}", i))])
            .collect(),
    )
}

pub fn table_object(name: &str, columns: &[&str]) -> CatalogObject {
    let mut object = CatalogObject::new(name, ObjectKind::Table);
    object.columns = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| CatalogColumn {
            name: column.to_string(),
            type_name: if idx == 0 { "integer" } else { "text" }.to_string(),
            nullable: idx != 0,
            is_primary_key: idx == 0,
        })
        .collect();
    object
}

/// Catalog with one schema holding a table per name, each with `id` and `name`.
pub fn catalog_with_tables(database: &str, schema: &str, tables: &[&str]) -> Catalog {
    Catalog::new(
        database,
        vec![CatalogSchema {
            name: schema.to_string(),
            objects: tables
                .iter()
                .map(|table| table_object(table, &["id", "name"]))
                .collect(),
        }],
    )
}
