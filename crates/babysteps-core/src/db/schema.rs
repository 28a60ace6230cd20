//! Versioned SQLite schema for the task store.
//!
//! Two shapes exist:
//! - V1: `tasks` without stored completion and with a nullable `sort_order`;
//!   task completion is derived from steps
//! - V2: `tasks.sort_order` is non-null (default 0) and completion is stored in
//!   `is_completed` / `completed_at_us`
//!
//! `steps` is identical in both. A NULL `steps.task_id` marks an orphan.

use rusqlite::Connection;
use std::fmt;

/// Named schema snapshots, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    const ALL: [Self; 2] = [Self::V1, Self::V2];

    /// Every known version in ascending order.
    #[must_use]
    pub const fn schemas() -> &'static [Self] {
        &Self::ALL
    }

    #[must_use]
    pub const fn latest() -> Self {
        Self::V2
    }

    /// Value stored in `PRAGMA user_version`.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Entity shapes valid at this version.
    #[must_use]
    pub const fn entities(self) -> &'static [EntityShape] {
        match self {
            Self::V1 => &V1_ENTITIES,
            Self::V2 => &V2_ENTITIES,
        }
    }

    /// DDL that creates an empty store directly at this version.
    #[must_use]
    pub const fn create_sql(self) -> &'static str {
        match self {
            Self::V1 => CREATE_V1_SQL,
            Self::V2 => CREATE_V2_SQL,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// One persisted field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldShape {
    pub name: &'static str,
    pub column: &'static str,
    pub nullable: bool,
    /// SQL default filled in by a structural copy, if any.
    pub default: Option<&'static str>,
}

/// A persisted record kind and its fields at one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityShape {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldShape],
}

impl EntityShape {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|field| field.name == name)
    }
}

const fn field(
    name: &'static str,
    column: &'static str,
    nullable: bool,
    default: Option<&'static str>,
) -> FieldShape {
    FieldShape {
        name,
        column,
        nullable,
        default,
    }
}

const STEP_FIELDS: [FieldShape; 5] = [
    field("id", "step_id", false, None),
    field("task", "task_id", true, None),
    field("isCompleted", "is_completed", false, Some("0")),
    field("order", "sort_order", false, None),
    field("completedAt", "completed_at_us", true, None),
];

const TASK_V1_FIELDS: [FieldShape; 4] = [
    field("id", "task_id", false, None),
    field("title", "title", false, None),
    field("createdAt", "created_at_us", false, None),
    field("order", "sort_order", true, None),
];

const TASK_V2_FIELDS: [FieldShape; 6] = [
    field("id", "task_id", false, None),
    field("title", "title", false, None),
    field("createdAt", "created_at_us", false, None),
    field("order", "sort_order", false, Some("0")),
    field("isCompleted", "is_completed", false, Some("0")),
    field("completedAt", "completed_at_us", true, None),
];

const V1_ENTITIES: [EntityShape; 2] = [
    EntityShape {
        name: "Task",
        table: "tasks",
        fields: &TASK_V1_FIELDS,
    },
    EntityShape {
        name: "Step",
        table: "steps",
        fields: &STEP_FIELDS,
    },
];

const V2_ENTITIES: [EntityShape; 2] = [
    EntityShape {
        name: "Task",
        table: "tasks",
        fields: &TASK_V2_FIELDS,
    },
    EntityShape {
        name: "Step",
        table: "steps",
        fields: &STEP_FIELDS,
    },
];

/// Metadata row for stores that predate `store_meta`.
pub const ENSURE_META_SQL: &str = r"
CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_migrated_at_us INTEGER,
    last_check_at_us INTEGER
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);
";

/// Create an empty V1 store. Kept so old stores can be reproduced in tests
/// and fixtures.
pub const CREATE_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    sort_order INTEGER
);

CREATE TABLE IF NOT EXISTS steps (
    step_id TEXT PRIMARY KEY,
    task_id TEXT REFERENCES tasks(task_id) ON DELETE CASCADE,
    is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
    sort_order INTEGER NOT NULL,
    completed_at_us INTEGER
);

CREATE INDEX IF NOT EXISTS idx_steps_task_order
    ON steps(task_id, sort_order);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_migrated_at_us INTEGER,
    last_check_at_us INTEGER
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Create an empty store directly at the latest shape.
pub const CREATE_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
    completed_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS steps (
    step_id TEXT PRIMARY KEY,
    task_id TEXT REFERENCES tasks(task_id) ON DELETE CASCADE,
    is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
    sort_order INTEGER NOT NULL,
    completed_at_us INTEGER
);

CREATE INDEX IF NOT EXISTS idx_steps_task_order
    ON steps(task_id, sort_order);

CREATE INDEX IF NOT EXISTS idx_tasks_sort_order
    ON tasks(sort_order, created_at_us);

CREATE INDEX IF NOT EXISTS idx_steps_completed_at
    ON steps(is_completed, completed_at_us);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_migrated_at_us INTEGER,
    last_check_at_us INTEGER
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 2);
";

/// Structural copy for V1 -> V2.
///
/// Rebuilds `tasks` (SQLite cannot change a column from nullable to NOT NULL
/// in place): copy every shared column, fill `sort_order` from the backfilled
/// V1 value or its default, give the completion fields their defaults, then
/// swap the new table in. Runs with foreign keys disabled so dropping the old
/// table does not cascade into `steps`.
pub const COPY_V1_TO_V2_SQL: &str = r"
CREATE TABLE tasks_v2 (
    task_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
    completed_at_us INTEGER
);

INSERT INTO tasks_v2 (task_id, title, created_at_us, sort_order)
SELECT task_id, title, created_at_us, COALESCE(sort_order, 0)
FROM tasks
ORDER BY rowid;

DROP TABLE tasks;

ALTER TABLE tasks_v2 RENAME TO tasks;

CREATE INDEX IF NOT EXISTS idx_tasks_sort_order
    ON tasks(sort_order, created_at_us);

CREATE INDEX IF NOT EXISTS idx_steps_completed_at
    ON steps(is_completed, completed_at_us);
";

/// Indexes expected on a latest-version store.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_steps_task_order",
    "idx_tasks_sort_order",
    "idx_steps_completed_at",
];

/// Column names of `table`, in declaration order.
///
/// # Errors
///
/// Returns an error if SQLite cannot describe the table.
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    stmt.query_map([table], |row| row.get::<_, String>(0))?
        .collect()
}

/// Whether a table with this name exists.
///
/// # Errors
///
/// Returns an error if the schema query fails.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

/// Infer the shape of a store from its tables, ignoring `user_version`.
///
/// Returns `None` for a store without a `tasks` table.
///
/// # Errors
///
/// Returns an error if the schema query fails.
pub fn detect_version(conn: &Connection) -> rusqlite::Result<Option<SchemaVersion>> {
    if !table_exists(conn, "tasks")? {
        return Ok(None);
    }

    let columns = table_columns(conn, "tasks")?;
    let matches = |version: SchemaVersion| {
        version
            .entities()
            .iter()
            .filter(|entity| entity.table == "tasks")
            .flat_map(|entity| entity.fields.iter())
            .all(|field| columns.iter().any(|column| column == field.column))
    };

    Ok(SchemaVersion::schemas()
        .iter()
        .rev()
        .copied()
        .find(|version| matches(*version)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with(sql: &str) -> rusqlite::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(sql)?;
        Ok(conn)
    }

    #[test]
    fn registry_is_ordered_and_ends_at_latest() {
        let schemas = SchemaVersion::schemas();
        assert!(schemas.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(schemas.last().copied(), Some(SchemaVersion::latest()));
        for version in schemas {
            assert_eq!(SchemaVersion::from_number(version.number()), Some(*version));
        }
        assert_eq!(SchemaVersion::from_number(0), None);
        assert_eq!(SchemaVersion::from_number(3), None);
    }

    #[test]
    fn v2_adds_non_null_order_and_completion_fields() {
        let task = |version: SchemaVersion| {
            version
                .entities()
                .iter()
                .find(|entity| entity.name == "Task")
                .copied()
                .expect("task entity")
        };

        let v1 = task(SchemaVersion::V1);
        let v2 = task(SchemaVersion::V2);

        assert!(v1.field("order").expect("order").nullable);
        assert!(v1.field("isCompleted").is_none());
        assert!(v1.field("completedAt").is_none());

        let order = v2.field("order").expect("order");
        assert!(!order.nullable);
        assert_eq!(order.default, Some("0"));
        assert_eq!(v2.field("isCompleted").and_then(|f| f.default), Some("0"));
        assert!(v2.field("completedAt").expect("completedAt").nullable);
    }

    #[test]
    fn create_sql_matches_declared_shapes() -> rusqlite::Result<()> {
        for version in SchemaVersion::schemas() {
            let conn = conn_with(version.create_sql())?;
            for entity in version.entities() {
                let columns = table_columns(&conn, entity.table)?;
                let declared: Vec<&str> = entity.fields.iter().map(|f| f.column).collect();
                assert_eq!(columns.len(), declared.len(), "{version} {}", entity.name);
                for column in declared {
                    assert!(
                        columns.iter().any(|c| c == column),
                        "{version} {} missing {column}",
                        entity.name
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn detect_version_reads_table_shape() -> rusqlite::Result<()> {
        assert_eq!(detect_version(&Connection::open_in_memory()?)?, None);
        assert_eq!(
            detect_version(&conn_with(CREATE_V1_SQL)?)?,
            Some(SchemaVersion::V1)
        );
        assert_eq!(
            detect_version(&conn_with(CREATE_V2_SQL)?)?,
            Some(SchemaVersion::V2)
        );
        Ok(())
    }
}
