//! Server-side data-table protocol used by the admin list views.
//!
//! The widget sends `draw`, `start`, `length`, `search[value]`,
//! `order[0][column]` and `order[0][dir]`, and expects
//! `{draw, recordsTotal, recordsFiltered, data}` back. Ordering and searching
//! only ever touch column expressions from a per-list whitelist.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataTableParams {
    pub draw: Option<u64>,
    pub start: Option<i64>,
    pub length: Option<i64>,
    #[serde(rename = "search[value]")]
    pub search: Option<String>,
    /// Kept as text so a blank or garbled index falls back to the default
    #[serde(rename = "order[0][column]")]
    pub order_column: Option<String>,
    #[serde(rename = "order[0][dir]")]
    pub order_dir: Option<String>,
}

impl DataTableParams {
    pub const DEFAULT_LENGTH: i64 = 10;
    pub const MAX_LENGTH: i64 = 500;

    pub fn draw(&self) -> u64 {
        self.draw.unwrap_or(0)
    }

    pub fn offset(&self) -> i64 {
        self.start.unwrap_or(0).max(0)
    }

    /// `length = -1` asks for everything; that is capped like any other size.
    pub fn limit(&self) -> i64 {
        match self.length {
            Some(-1) => Self::MAX_LENGTH,
            Some(n) => n.clamp(1, Self::MAX_LENGTH),
            None => Self::DEFAULT_LENGTH,
        }
    }

    /// `ORDER BY` body built from the whitelist only.
    pub fn order_clause(&self, columns: &[&str], default_column: usize) -> String {
        let column = self
            .order_column
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .and_then(|idx| columns.get(idx))
            .or_else(|| columns.get(default_column))
            .copied()
            .unwrap_or("1");
        let direction = match self.order_dir.as_deref() {
            Some(dir) if dir.eq_ignore_ascii_case("desc") => "DESC",
            _ => "ASC",
        };
        format!("{} {}", column, direction)
    }

    /// `ILIKE` pattern for the search box, or `None` when it is blank.
    pub fn search_pattern(&self) -> Option<String> {
        let term = self.search.as_deref()?.trim();
        if term.is_empty() {
            return None;
        }
        let mut escaped = String::with_capacity(term.len() + 2);
        escaped.push('%');
        for c in term.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped.push('%');
        Some(escaped)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTableResponse<T> {
    pub draw: u64,
    pub records_total: i64,
    pub records_filtered: i64,
    pub data: Vec<T>,
}

impl<T> DataTableResponse<T> {
    /// Converts each row, keeping the counts.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<DataTableResponse<U>, E> {
        Ok(DataTableResponse {
            draw: self.draw,
            records_total: self.records_total,
            records_filtered: self.records_filtered,
            data: self.data.into_iter().map(f).collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl<T: Serialize> IntoResponse for DataTableResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// A bound value for an equality filter on a list query.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Text(String),
    Uuid(Uuid),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct Filter {
    column: &'static str,
    value: FilterValue,
}

impl Filter {
    pub fn eq(column: &'static str, value: FilterValue) -> Self {
        Self { column, value }
    }

    /// Collects the filters whose value is present.
    pub fn collect(candidates: Vec<(&'static str, Option<FilterValue>)>) -> Vec<Filter> {
        candidates
            .into_iter()
            .filter_map(|(column, value)| value.map(|v| Filter::eq(column, v)))
            .collect()
    }
}

/// Describes one admin list: what to select, from where, and which
/// expressions may be ordered by or searched.
pub struct DataTableQuery<'q> {
    pub select: &'q str,
    pub from: &'q str,
    pub columns: &'q [&'q str],
    pub default_order: usize,
    pub searchable: &'q [&'q str],
}

impl DataTableQuery<'_> {
    fn push_where(
        &self,
        qb: &mut QueryBuilder<'static, Postgres>,
        filters: &[Filter],
        pattern: Option<&str>,
    ) {
        qb.push(" WHERE TRUE");
        for filter in filters {
            qb.push(" AND ").push(filter.column).push(" = ");
            match &filter.value {
                FilterValue::Text(v) => qb.push_bind(v.clone()),
                FilterValue::Uuid(v) => qb.push_bind(*v),
                FilterValue::Bool(v) => qb.push_bind(*v),
            };
        }
        if let Some(pattern) = pattern {
            if !self.searchable.is_empty() {
                qb.push(" AND (");
                for (i, column) in self.searchable.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    qb.push(format!("{}::text ILIKE ", column));
                    qb.push_bind(pattern.to_string());
                }
                qb.push(")");
            }
        }
    }

    async fn count(
        &self,
        db: &PgPool,
        filters: &[Filter],
        pattern: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) {}", self.from));
        self.push_where(&mut qb, filters, pattern);
        qb.build_query_scalar::<i64>().fetch_one(db).await
    }

    pub async fn fetch<T>(
        &self,
        db: &PgPool,
        params: &DataTableParams,
        filters: &[Filter],
    ) -> Result<DataTableResponse<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let pattern = params.search_pattern();

        let records_total = self.count(db, filters, None).await?;
        let records_filtered = if pattern.is_some() {
            self.count(db, filters, pattern.as_deref()).await?
        } else {
            records_total
        };

        let mut qb = QueryBuilder::new(format!("SELECT {} {}", self.select, self.from));
        self.push_where(&mut qb, filters, pattern.as_deref());
        qb.push(" ORDER BY ")
            .push(params.order_clause(self.columns, self.default_order))
            .push(" LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());

        let data = qb.build_query_as::<T>().fetch_all(db).await?;

        Ok(DataTableResponse {
            draw: params.draw(),
            records_total,
            records_filtered,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;

    const COLUMNS: &[&str] = &["u.email", "u.name", "u.created_at"];

    #[test]
    fn length_is_clamped() {
        let mut params = DataTableParams::default();
        assert_eq!(params.limit(), 10);
        params.length = Some(-1);
        assert_eq!(params.limit(), 500);
        params.length = Some(10_000);
        assert_eq!(params.limit(), 500);
        params.length = Some(0);
        assert_eq!(params.limit(), 1);
        params.start = Some(-20);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn order_uses_whitelist_only() {
        let params = DataTableParams {
            order_column: Some("1".into()),
            order_dir: Some("DESC".into()),
            ..Default::default()
        };
        assert_eq!(params.order_clause(COLUMNS, 2), "u.name DESC");

        let out_of_range = DataTableParams {
            order_column: Some("99".into()),
            order_dir: Some("; DROP TABLE users".into()),
            ..Default::default()
        };
        assert_eq!(out_of_range.order_clause(COLUMNS, 2), "u.created_at ASC");
    }

    #[test]
    fn search_pattern_escapes_wildcards() {
        let params = DataTableParams {
            search: Some(" 50%_off\\ ".into()),
            ..Default::default()
        };
        assert_eq!(params.search_pattern().as_deref(), Some("%50\\%\\_off\\\\%"));

        let blank = DataTableParams {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.search_pattern(), None);
    }

    #[test]
    fn query_params_use_widget_names() {
        let params: DataTableParams = serde_json::from_value(serde_json::json!({
            "draw": 3,
            "start": 20,
            "length": 25,
            "search[value]": "acme",
            "order[0][column]": "0",
            "order[0][dir]": "desc"
        }))
        .unwrap();
        assert_eq!(params.draw(), 3);
        assert_eq!(params.offset(), 20);
        assert_eq!(params.search.as_deref(), Some("acme"));
        assert_eq!(params.order_clause(COLUMNS, 2), "u.email DESC");
    }

    #[test]
    fn unparseable_order_column_uses_default() {
        for query in ["order%5B0%5D%5Bcolumn%5D=", "order%5B0%5D%5Bcolumn%5D=name"] {
            let uri: axum::http::Uri = format!("/admin/users?draw=2&{}&order%5B0%5D%5Bdir%5D=desc", query)
                .parse()
                .unwrap();
            let Query(params) = Query::<DataTableParams>::try_from_uri(&uri).unwrap();
            assert_eq!(params.draw(), 2);
            assert_eq!(params.order_clause(COLUMNS, 2), "u.created_at DESC");
        }
    }

    #[test]
    fn raw_rows_are_mapped_before_serializing() {
        struct RawRow {
            secret: String,
        }

        let page = DataTableResponse {
            draw: 4,
            records_total: 9,
            records_filtered: 2,
            data: vec![RawRow { secret: "sk_live_1".into() }, RawRow { secret: "x".into() }],
        };
        let masked = page
            .try_map(|row| Ok::<_, ()>(row.secret.len()))
            .unwrap();
        let json = serde_json::to_value(&masked).unwrap();
        assert_eq!(json["draw"], 4);
        assert_eq!(json["recordsTotal"], 9);
        assert_eq!(json["data"], serde_json::json!([9, 1]));

        let failed: Result<DataTableResponse<usize>, &str> = DataTableResponse {
            draw: 1,
            records_total: 1,
            records_filtered: 1,
            data: vec![RawRow { secret: String::new() }],
        }
        .try_map(|_| Err("bad row"));
        assert_eq!(failed.err(), Some("bad row"));
    }

    #[test]
    fn response_uses_camel_case_counts() {
        let response = DataTableResponse::<String> {
            draw: 1,
            records_total: 10,
            records_filtered: 2,
            data: vec![],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["recordsTotal"], 10);
        assert_eq!(json["recordsFiltered"], 2);
    }
}
