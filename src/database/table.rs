//! Narrow SQL builder over one table.
//!
//! Values passed in column maps are already-encoded SQL literals (quoted
//! strings, bare numbers); identifiers are wrapped in backticks. Column maps
//! are ordered so generated statements are deterministic.

use std::collections::BTreeMap;

use super::connection::Connection;
use super::handle::RowSet;
use crate::promise::{CompletionFuture, TaskFuture, ValueFuture};

/// Column name → encoded SQL literal
pub type ColumnLiterals = BTreeMap<String, String>;

#[derive(Clone)]
pub struct Table {
    name: String,
    connection: Connection,
}

impl Table {
    pub fn new(name: impl Into<String>, connection: Connection) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// `` `column` = literal ``
    pub fn eq_condition(column: &str, literal: &str) -> String {
        format!("{} = {}", quote_identifier(column), literal)
    }

    /// `SELECT * FROM table [WHERE condition] [LIMIT n]`
    pub fn select_all(&self, condition: Option<&str>, limit: Option<usize>) -> TaskFuture<RowSet> {
        self.connection.query(self.select_sql("*", condition, limit))
    }

    /// `SELECT column FROM table [WHERE condition]`
    pub fn select(&self, column: &str, condition: Option<&str>) -> TaskFuture<RowSet> {
        self.connection
            .query(self.select_sql(&quote_identifier(column), condition, None))
    }

    /// Whether any row matches `condition`
    pub fn has_entry(&self, condition: &str) -> ValueFuture<bool> {
        let rows = self.select_all(Some(condition), Some(1));
        let found = ValueFuture::new();
        let sink = found.clone();
        rows.on_value(move |rows| {
            sink.resolve(!rows.is_empty());
            Ok(())
        });
        let failed = found.clone();
        rows.on_error(move |error| {
            failed.fail(error.clone());
        });
        found
    }

    pub fn insert(&self, values: &ColumnLiterals) -> CompletionFuture {
        let columns = values
            .keys()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let literals = values.values().cloned().collect::<Vec<_>>().join(", ");
        self.connection.update(format!(
            "INSERT INTO {} ({columns}) VALUES ({literals})",
            quote_identifier(&self.name)
        ))
    }

    /// `UPDATE table SET a = x, b = y [WHERE condition]`
    pub fn update_multiple(&self, values: &ColumnLiterals, condition: Option<&str>) -> CompletionFuture {
        let assignments = values
            .iter()
            .map(|(column, literal)| format!("{} = {literal}", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {assignments}", quote_identifier(&self.name));
        if let Some(condition) = condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        self.connection.update(sql)
    }

    /// `DELETE FROM table WHERE condition`
    pub fn remove(&self, condition: &str) -> CompletionFuture {
        self.connection.update(format!(
            "DELETE FROM {} WHERE {condition}",
            quote_identifier(&self.name)
        ))
    }

    /// `ALTER TABLE table ADD definition`, e.g. `` `Age` INTEGER ``
    pub fn add_column(&self, definition: &str) -> CompletionFuture {
        self.connection.update(format!(
            "ALTER TABLE {} ADD {definition}",
            quote_identifier(&self.name)
        ))
    }

    /// `CREATE TABLE IF NOT EXISTS table (columns)`
    pub fn create_if_missing(&self, columns: &str) -> CompletionFuture {
        self.connection.update(format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            quote_identifier(&self.name)
        ))
    }

    /// Delete every row
    pub fn clear(&self) -> CompletionFuture {
        self.connection
            .update(format!("DELETE FROM {}", quote_identifier(&self.name)))
    }

    pub fn drop_table(&self) -> CompletionFuture {
        self.connection
            .update(format!("DROP TABLE {}", quote_identifier(&self.name)))
    }

    fn select_sql(&self, projection: &str, condition: Option<&str>, limit: Option<usize>) -> String {
        let mut sql = format!("SELECT {projection} FROM {}", quote_identifier(&self.name));
        if let Some(condition) = condition {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("connection", &self.connection.id())
            .finish()
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AsyncSqlConfig, SchedulerConfig};
    use crate::database::ConnectionInfo;
    use crate::scheduler::Scheduler;
    use crate::test_helpers::MockConnector;
    use std::sync::Arc;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_identifier("UUID"), "`UUID`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(Table::eq_condition("UUID", "'abc'"), "`UUID` = 'abc'");
    }

    #[test]
    fn test_generated_statements() {
        let scheduler = Scheduler::started(SchedulerConfig::default()).unwrap();
        let mock = MockConnector::new();
        let connection = Connection::connect_with(
            ConnectionInfo::from_url("mock://"),
            &AsyncSqlConfig::for_test(),
            &scheduler,
            Arc::new(mock.clone()),
        )
        .unwrap();
        let table = Table::new("players", connection);

        let mut values = ColumnLiterals::new();
        values.insert("name".into(), "'ann'".into());
        values.insert("score".into(), "7".into());

        table.insert(&values).wait().unwrap();
        table
            .update_multiple(&values, Some("`name` = 'ann'"))
            .wait()
            .unwrap();
        table.select_all(Some("`score` > 1"), Some(1)).wait().unwrap();
        table.remove("`name` = 'ann'").wait().unwrap();

        assert_eq!(
            mock.statements(),
            vec![
                "INSERT INTO `players` (`name`, `score`) VALUES ('ann', 7)".to_string(),
                "UPDATE `players` SET `name` = 'ann', `score` = 7 WHERE `name` = 'ann'".to_string(),
                "SELECT * FROM `players` WHERE `score` > 1 LIMIT 1".to_string(),
                "DELETE FROM `players` WHERE `name` = 'ann'".to_string(),
            ]
        );
        scheduler.stop();
    }
}
