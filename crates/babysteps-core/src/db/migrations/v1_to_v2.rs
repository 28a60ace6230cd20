//! V1 -> V2: tasks gain a non-null display order and stored completion.
//!
//! Before the copy every V1 task receives `order = rank by createdAt`, ties
//! broken by insertion order. The structural copy fills the completion fields
//! with their defaults (`false`, no timestamp) whatever the state of the
//! steps. After the copy the order is derived again from the rebuilt table,
//! which reproduces the pre-copy ranking.

use rusqlite::Transaction;

use super::MigrationStage;
use crate::db::query::{self, TASK_COLUMNS};
use crate::db::schema::{COPY_V1_TO_V2_SQL, SchemaVersion};
use crate::model::order::assign_creation_order;
use crate::model::TaskId;

pub const STAGE: MigrationStage = MigrationStage {
    from: SchemaVersion::V1,
    to: SchemaVersion::V2,
    will_migrate: backfill_order,
    structural_sql: COPY_V1_TO_V2_SQL,
    did_migrate: rederive_order,
};

fn backfill_order(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let mut tasks = query::load_tasks_v1(tx)?;
    assign_creation_order(&mut tasks);

    write_orders(
        tx,
        tasks
            .iter()
            .map(|task| (task.id, task.order.unwrap_or_default())),
    )?;
    tracing::debug!(tasks = tasks.len(), "assigned creation order to v1 tasks");
    Ok(())
}

fn rederive_order(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at_us, sort_order, rowid"
    );
    let mut tasks = {
        let mut stmt = tx.prepare(&sql)?;
        stmt.query_map([], query::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?
    };
    assign_creation_order(&mut tasks);

    write_orders(tx, tasks.iter().map(|task| (task.id, task.order)))?;
    tracing::debug!(tasks = tasks.len(), "re-derived task order after copy");
    Ok(())
}

fn write_orders(
    tx: &Transaction<'_>,
    orders: impl Iterator<Item = (TaskId, i64)>,
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare("UPDATE tasks SET sort_order = ?1 WHERE task_id = ?2")?;
    for (id, order) in orders {
        stmt.execute(rusqlite::params![order, id.to_string()])?;
    }
    Ok(())
}
