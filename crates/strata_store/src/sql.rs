//! Statement plumbing and live catalog introspection shared by the store modules.
//!
//! Metadata is always read from the engine, never cached, so concurrent DDL from
//! another writer is observed as soon as it commits.

use sea_orm::sea_query::{
    Iden, MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, QueryResult, Statement, StatementBuilder,
    Value as SeaValue,
};

use strata_core::StrataResult;

/// One column as reported by engine metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CatalogColumn {
    pub table: String,
    pub name: String,
    pub sql_type: String,
    pub comment: Option<String>,
    pub ordinal: i64,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum TableFilter<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

impl TableFilter<'_> {
    fn param(&self) -> String {
        match self {
            TableFilter::Exact(name) => (*name).to_string(),
            TableFilter::Prefix(prefix) => like_prefix(prefix),
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            TableFilter::Exact(_) => "=",
            TableFilter::Prefix(_) => "LIKE",
        }
    }

    fn escape_clause(&self) -> &'static str {
        match self {
            TableFilter::Exact(_) => "",
            TableFilter::Prefix(_) => " ESCAPE '!'",
        }
    }
}

/// LIKE pattern matching names that start with `prefix` literally.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 4);
    for ch in prefix.chars() {
        if matches!(ch, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn col_name(column: impl Iden) -> String {
    column.to_string()
}

pub(crate) fn quote_ident(backend: DatabaseBackend, ident: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{}`", ident.replace('`', "``")),
        _ => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

fn placeholder(backend: DatabaseBackend, index: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${index}"),
        _ => "?".to_string(),
    }
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> StrataResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> StrataResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

/// Execute a schema statement (CREATE/ALTER TABLE, CREATE INDEX).
pub(crate) async fn exec_schema<C, S>(conn: &C, stmt: &S) -> StrataResult<()>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    conn.execute(backend.build(stmt)).await?;
    Ok(())
}

pub(crate) async fn table_exists<C>(conn: &C, table: &str) -> StrataResult<bool>
where
    C: ConnectionTrait,
{
    let tables = list_tables(conn, TableFilter::Exact(table)).await?;
    // MySQL on case-insensitive filesystems may report folded names.
    Ok(tables.iter().any(|name| name.eq_ignore_ascii_case(table)))
}

/// Base tables (never views) matching `filter`, sorted by name.
pub(crate) async fn list_tables<C>(conn: &C, filter: TableFilter<'_>) -> StrataResult<Vec<String>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let op = filter.operator();
    let escape = filter.escape_clause();
    let param = placeholder(backend, 1);
    let sql = match backend {
        DatabaseBackend::MySql => format!(
            "SELECT CAST(TABLE_NAME AS CHAR(64)) AS table_name \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
             AND TABLE_NAME {op} {param}{escape}"
        ),
        DatabaseBackend::Postgres => format!(
            "SELECT table_name::text AS table_name \
             FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             AND table_name {op} {param}{escape}"
        ),
        _ => format!(
            "SELECT name AS table_name FROM sqlite_master \
             WHERE type = 'table' AND name {op} {param}{escape}"
        ),
    };
    let rows = conn
        .query_all(Statement::from_sql_and_values(
            backend,
            sql,
            [SeaValue::from(filter.param())],
        ))
        .await?;
    let mut names = rows
        .iter()
        .map(|row| row.try_get::<String>("", "table_name"))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

/// Columns of every table or view matching `filter`, ordered by table then position.
pub(crate) async fn describe_columns<C>(
    conn: &C,
    filter: TableFilter<'_>,
) -> StrataResult<Vec<CatalogColumn>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let op = filter.operator();
    let escape = filter.escape_clause();
    let param = placeholder(backend, 1);
    let sql = match backend {
        DatabaseBackend::MySql => format!(
            "SELECT CAST(TABLE_NAME AS CHAR(64)) AS table_name, \
             CAST(COLUMN_NAME AS CHAR(64)) AS column_name, \
             CAST(COLUMN_TYPE AS CHAR(255)) AS column_type, \
             CAST(COLUMN_COMMENT AS CHAR(1024)) AS column_comment, \
             CAST(ORDINAL_POSITION AS SIGNED) AS ordinal \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME {op} {param}{escape}"
        ),
        DatabaseBackend::Postgres => format!(
            "SELECT c.table_name::text AS table_name, \
             c.column_name::text AS column_name, \
             c.data_type::text AS column_type, \
             col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, \
             c.ordinal_position::int) AS column_comment, \
             c.ordinal_position::bigint AS ordinal \
             FROM information_schema.columns c \
             WHERE c.table_schema = current_schema() AND c.table_name {op} {param}{escape}"
        ),
        _ => format!(
            "SELECT m.name AS table_name, p.name AS column_name, p.type AS column_type, \
             NULL AS column_comment, p.cid + 1 AS ordinal \
             FROM sqlite_master m JOIN pragma_table_info(m.name) p \
             WHERE m.type IN ('table', 'view') AND m.name {op} {param}{escape}"
        ),
    };
    let rows = conn
        .query_all(Statement::from_sql_and_values(
            backend,
            sql,
            [SeaValue::from(filter.param())],
        ))
        .await?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let comment: Option<String> = row.try_get("", "column_comment")?;
        columns.push(CatalogColumn {
            table: row.try_get("", "table_name")?,
            name: row.try_get("", "column_name")?,
            sql_type: row
                .try_get::<Option<String>>("", "column_type")?
                .unwrap_or_default(),
            comment: comment.filter(|text| !text.is_empty()),
            ordinal: row.try_get("", "ordinal")?,
        });
    }
    columns.sort_by(|a, b| a.table.cmp(&b.table).then(a.ordinal.cmp(&b.ordinal)));
    Ok(columns)
}

/// MySQL duplicate-object error codes with their SQLSTATE, as rendered by sqlx. Shard
/// names carry digits, so a bare code would also match a quoted table name.
const MYSQL_DUPLICATE_OBJECT: [&str; 3] = ["1050 (42s01)", "1060 (42s21)", "1061 (42000)"];

/// Errors meaning a concurrent writer already created the object.
pub(crate) fn is_already_exists(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already exists")
        || lower.contains("duplicate column")
        || lower.contains("duplicate key name")
        || MYSQL_DUPLICATE_OBJECT.iter().any(|code| lower.contains(code))
}
