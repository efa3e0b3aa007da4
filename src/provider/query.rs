use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;

use super::{DataProvider, IndexQuery};
use crate::database::dynamic::{bind_param, row_to_json};
use crate::database::manager::is_valid_identifier;
use crate::database::{quote_identifier, DatabaseError};
use crate::error::ApiError;
use crate::resource::source::{BackendKind, BackendRecord};

/// Rows of one Postgres table, addressed by a text-comparable id column
pub struct DbQueryDataProvider {
    pool: PgPool,
    table: String,
    id_column: String,
    columns: Vec<String>,
    multiple: Arc<HashSet<String>>,
}

impl DbQueryDataProvider {
    /// `columns` lists every column the resource may read or write;
    /// `multiple` marks the array-typed ones.
    pub fn new(
        pool: PgPool,
        table: &str,
        id_column: &str,
        columns: &[&str],
        multiple: &[&str],
    ) -> Result<Self, DatabaseError> {
        for name in std::iter::once(&table).chain(std::iter::once(&id_column)).chain(columns) {
            if !is_valid_identifier(name) {
                return Err(DatabaseError::InvalidIdentifier(name.to_string()));
            }
        }
        Ok(Self {
            pool,
            table: table.to_string(),
            id_column: id_column.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            multiple: Arc::new(multiple.iter().map(|c| c.to_string()).collect()),
        })
    }

    fn check_column(&self, name: &str) -> Result<String, ApiError> {
        if name == self.id_column || self.columns.iter().any(|c| c == name) {
            Ok(quote_identifier(name))
        } else {
            Err(ApiError::bad_request(format!("Unknown column '{}'", name)))
        }
    }

    fn row(&self, columns: Map<String, Value>) -> BackendRecord {
        BackendRecord::Row {
            columns,
            multiple: self.multiple.clone(),
        }
    }

    /// `WHERE` clause plus its text parameters, numbered from `$1`
    fn where_clause(&self, query: &IndexQuery) -> Result<(String, Vec<Value>), ApiError> {
        if query.filters.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (property, value) in &query.filters {
            let column = self.check_column(property)?;
            params.push(Value::String(value.clone()));
            let n = params.len();
            if self.multiple.contains(property) {
                clauses.push(format!("${}::text = ANY({}::text[])", n, column));
            } else {
                clauses.push(format!("{}::text = ${}", column, n));
            }
        }
        Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
    }

    fn writable(&self, values: Map<String, Value>) -> Result<Vec<(String, Value)>, ApiError> {
        values
            .into_iter()
            .filter(|(name, _)| *name != self.id_column)
            .map(|(name, value)| self.check_column(&name).map(|column| (column, value)))
            .collect()
    }
}

#[async_trait]
impl DataProvider for DbQueryDataProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::Row
    }

    async fn index(&self, query: &IndexQuery) -> Result<Vec<BackendRecord>, ApiError> {
        let (where_sql, params) = self.where_clause(query)?;
        let mut sql = format!("SELECT * FROM {}{}", quote_identifier(&self.table), where_sql);

        let mut order = Vec::new();
        for (property, direction) in &query.sort {
            order.push(format!("{} {}", self.check_column(property)?, direction.to_sql()));
        }
        if order.is_empty() {
            order.push(format!("{} ASC", quote_identifier(&self.id_column)));
        }
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }

        tracing::debug!("Index query: {}", sql);
        let mut q = sqlx::query(&sql);
        for p in params.iter() {
            q = bind_param(q, p);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(DatabaseError::from)?;
        Ok(rows.iter().map(|row| self.row(row_to_json(row))).collect())
    }

    async fn count(&self, query: &IndexQuery) -> Result<u64, ApiError> {
        let (where_sql, params) = self.where_clause(query)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", quote_identifier(&self.table), where_sql);
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for p in params.iter() {
            if let Value::String(s) = p {
                q = q.bind(s.as_str());
            }
        }
        let count = q.fetch_one(&self.pool).await.map_err(DatabaseError::from)?;
        Ok(count.max(0) as u64)
    }

    async fn view(&self, id: &str) -> Result<Option<BackendRecord>, ApiError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {}::text = $1",
            quote_identifier(&self.table),
            quote_identifier(&self.id_column)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(row.map(|row| self.row(row_to_json(&row))))
    }

    async fn create(&self, values: Map<String, Value>) -> Result<String, ApiError> {
        let values = self.writable(values)?;
        let id_column = quote_identifier(&self.id_column);
        let sql = if values.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}::text",
                quote_identifier(&self.table),
                id_column
            )
        } else {
            let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}::text",
                quote_identifier(&self.table),
                columns.join(", "),
                placeholders.join(", "),
                id_column
            )
        };

        let mut q = sqlx::query_scalar::<_, String>(&sql);
        for (_, value) in values.iter() {
            q = bind_scalar(q, value);
        }
        let id = q.fetch_one(&self.pool).await.map_err(DatabaseError::from)?;
        tracing::info!("Created row {} in {}", id, self.table);
        Ok(id)
    }

    async fn update(
        &self,
        id: &str,
        values: Map<String, Value>,
        replace: bool,
    ) -> Result<bool, ApiError> {
        let mut values = self.writable(values)?;
        if replace {
            // Columns absent from a replacement are cleared
            for column in &self.columns {
                let quoted = quote_identifier(column);
                if *column != self.id_column && !values.iter().any(|(c, _)| *c == quoted) {
                    values.push((quoted, Value::Null));
                }
            }
        }
        if values.is_empty() {
            return Ok(self.view(id).await?.is_some());
        }

        let assignments: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ${}", column, i + 2))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}::text = $1",
            quote_identifier(&self.table),
            assignments.join(", "),
            quote_identifier(&self.id_column)
        );

        let mut q = sqlx::query(&sql).bind(id);
        for (_, value) in values.iter() {
            q = bind_param(q, value);
        }
        let result = q.execute(&self.pool).await.map_err(DatabaseError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: &str) -> Result<bool, ApiError> {
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = $1",
            quote_identifier(&self.table),
            quote_identifier(&self.id_column)
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected() > 0)
    }
}

type ScalarQuery<'q> =
    sqlx::query::QueryScalar<'q, sqlx::Postgres, String, sqlx::postgres::PgArguments>;

/// `bind_param` for scalar-returning queries
fn bind_scalar<'q>(q: ScalarQuery<'q>, v: &'q Value) -> ScalarQuery<'q> {
    match v {
        Value::Null => q.bind(Option::<String>::None),
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => q.bind(i),
            (None, Some(f)) => q.bind(f),
            _ => q.bind(n.to_string()),
        },
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(items) => {
            if items.iter().all(|i| i.as_i64().is_some()) {
                q.bind(items.iter().filter_map(Value::as_i64).collect::<Vec<i64>>())
            } else {
                q.bind(
                    items
                        .iter()
                        .map(|i| match i {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<String>>(),
                )
            }
        }
        Value::Object(_) => q.bind(v.clone()),
    }
}
