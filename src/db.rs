use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use rusqlite::{params_from_iter, Connection};

use crate::model::WorkItem;

/// Null marker accepted in delimited input besides the empty field.
const NA: &str = "NA";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are allowed.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        bail!("Invalid SQL identifier: {:?}", name);
    }
    Ok(())
}

// ── Work items ──

pub fn fetch_work_items(conn: &Connection, table: &str, limit: Option<usize>) -> Result<Vec<WorkItem>> {
    validate_identifier(table)?;
    let sql = match limit {
        Some(n) => format!("SELECT pdf_id, pdf_url FROM {} ORDER BY rowid LIMIT {}", table, n),
        None => format!("SELECT pdf_id, pdf_url FROM {} ORDER BY rowid", table),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok(WorkItem::new(row.get(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Loading result files ──

/// Column types in widening order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnType {
    Smallint,
    Int,
    Bigint,
    Float,
    Varchar,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Smallint => "SMALLINT",
            ColumnType::Int => "INT",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Varchar => "VARCHAR",
        })
    }
}

/// Narrowest type that holds `value`.
pub fn infer_type(value: &str) -> ColumnType {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return if (i16::MIN as i64..=i16::MAX as i64).contains(&n) {
            ColumnType::Smallint
        } else if (i32::MIN as i64..=i32::MAX as i64).contains(&n) {
            ColumnType::Int
        } else {
            ColumnType::Bigint
        };
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() => ColumnType::Float,
        _ => ColumnType::Varchar,
    }
}

fn is_null(value: &str) -> bool {
    value.is_empty() || value == NA
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// `None` when the column held no values.
    pub kind: Option<ColumnType>,
    pub longest: usize,
}

impl ColumnSpec {
    fn new(header: &str) -> Self {
        ColumnSpec {
            name: header.trim().to_lowercase().replace('-', "_"),
            kind: None,
            longest: 0,
        }
    }

    fn observe(&mut self, value: &str) {
        self.longest = self.longest.max(value.chars().count());
        if is_null(value) {
            return;
        }
        let seen = infer_type(value);
        self.kind = Some(self.kind.map_or(seen, |k| k.max(seen)));
    }

    fn sql_type(&self) -> String {
        match self.kind {
            Some(ColumnType::Varchar) | None => format!("VARCHAR({})", self.longest.max(1)),
            Some(kind) => kind.to_string(),
        }
    }
}

/// Infer one [`ColumnSpec`] per header from every value in the file.
pub fn infer_columns(path: &Path, delimiter: u8) -> Result<Vec<ColumnSpec>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    let mut columns: Vec<ColumnSpec> = reader.headers()?.iter().map(ColumnSpec::new).collect();
    for column in &columns {
        validate_identifier(&column.name)?;
    }

    for record in reader.records() {
        let record = record?;
        for (column, value) in columns.iter_mut().zip(record.iter()) {
            column.observe(value);
        }
    }
    Ok(columns)
}

pub fn create_ddl(table: &str, columns: &[ColumnSpec]) -> String {
    let body = columns
        .iter()
        .map(|c| format!("    {} {}", c.name, c.sql_type()))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", table, body)
}

/// Replace `table` with the contents of a delimited file. Empty and `NA`
/// fields load as NULL. Returns the number of rows inserted.
pub fn load_delimited(conn: &Connection, path: &Path, table: &str, delimiter: u8) -> Result<usize> {
    validate_identifier(table)?;
    let columns = infer_columns(path, delimiter)?;
    if columns.is_empty() {
        bail!("{:?} has no header", path);
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {};\n{};",
        table,
        create_ddl(table, &columns)
    ))?;

    let mut count = 0;
    {
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table, names, placeholders
        ))?;

        let mut reader = ReaderBuilder::new().delimiter(delimiter).from_path(path)?;
        for record in reader.records() {
            let record = record?;
            let values = (0..columns.len()).map(|i| record.get(i).filter(|v| !is_null(v)));
            count += stmt.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(count)
}
