use crate::{StoreError, StoreResult};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tally_model::{Entity, Kind};
use tally_types::EntityId;
use tracing::debug;

/// Opaque row filter built by the engine's filter collaborator.
pub type Predicate = dyn Fn(&Entity) -> bool + Send + Sync;

/// Milliseconds since the Unix epoch, used for entity timestamps.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind);
";

/// SQLite-backed entity store.
///
/// Row-level locking and transaction isolation come from SQLite itself; the
/// store adds no concurrency control of its own.
pub struct EntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl EntityStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Point lookup by primary key.
    pub fn get(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        get_row(&conn, id)
    }

    /// All instances of a kind, ordered by primary key.
    pub fn list(&self, kind: Kind) -> StoreResult<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        list_kind(&conn, kind)
    }

    /// Batch point lookup; missing ids are simply absent from the result.
    pub fn fetch_ids(&self, ids: &[EntityId]) -> StoreResult<HashMap<EntityId, Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = get_row(&conn, *id)? {
                out.insert(*id, entity);
            }
        }
        Ok(out)
    }

    /// Filtered, ordered, paginated kind scan.
    ///
    /// The filter runs before ordering and slicing; ties in `order_by` are
    /// broken by primary key so the same query always yields the same page.
    pub fn page(
        &self,
        kind: Kind,
        filter: Option<&Predicate>,
        order_by: &[&str],
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut rows = list_kind(&conn, kind)?;
        if let Some(filter) = filter {
            rows.retain(|e| filter(e));
        }
        sort_entities(&mut rows, order_by);
        debug!(kind = %kind, total = rows.len(), offset, limit, "page scan");
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Rows of `source` whose `fk_field` references one of `ids`.
    ///
    /// Used by the aggregation pass: page membership is fixed first, then
    /// this fetch supplies exactly the rows backing those aggregates.
    pub fn referencing(
        &self,
        source: Kind,
        fk_field: &str,
        ids: &HashSet<EntityId>,
    ) -> StoreResult<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let rows = list_kind(&conn, source)?;
        Ok(rows
            .into_iter()
            .filter(|e| e.get_ref(fk_field).is_some_and(|id| ids.contains(&id)))
            .collect())
    }

    /// Looks up a single instance by natural-key field values.
    pub fn find_by_natural_key(
        &self,
        kind: Kind,
        pairs: &[(&str, &Value)],
    ) -> StoreResult<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        find_by_fields(&conn, kind, pairs)
    }

    /// Runs `f` inside a single SQLite transaction.
    ///
    /// Commits only if `f` succeeds; any error rolls back every write, so a
    /// failed mutation leaves no partial state behind.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&StoreTxn<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| E::from(StoreError::from(e)))?;
        let txn = StoreTxn { tx };
        let out = f(&txn)?;
        txn.tx
            .commit()
            .map_err(|e| E::from(StoreError::from(e)))?;
        Ok(out)
    }
}

/// Handle to an open transaction; dropped without commit on any failure.
pub struct StoreTxn<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl StoreTxn<'_> {
    pub fn get(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        get_row(&self.tx, id)
    }

    pub fn list(&self, kind: Kind) -> StoreResult<Vec<Entity>> {
        list_kind(&self.tx, kind)
    }

    pub fn find_by_natural_key(
        &self,
        kind: Kind,
        pairs: &[(&str, &Value)],
    ) -> StoreResult<Option<Entity>> {
        find_by_fields(&self.tx, kind, pairs)
    }

    /// Inserts a new instance and returns it with its assigned primary key.
    pub fn insert(&self, kind: Kind, data: Value) -> StoreResult<Entity> {
        let now = now_millis();
        self.tx
            .execute(
                "INSERT INTO entities (kind, data, created_at, modified_at) VALUES (?1, ?2, ?3, ?4)",
                params![kind.as_str(), data.to_string(), now, now],
            )
            .map_err(db_err)?;
        let id = EntityId::from_raw(self.tx.last_insert_rowid());
        debug!(kind = %kind, %id, "inserted entity");
        Ok(Entity {
            id,
            kind,
            data,
            created_at: now,
            modified_at: now,
        })
    }

    /// Rewrites an instance's payload and bumps its modification time.
    pub fn update(&self, entity: &Entity) -> StoreResult<()> {
        let now = now_millis();
        let n = self
            .tx
            .execute(
                "UPDATE entities SET data = ?1, modified_at = ?2 WHERE id = ?3",
                params![entity.data.to_string(), now, entity.id.as_i64()],
            )
            .map_err(db_err)?;
        if n == 0 {
            return Err(StoreError::InvalidData(format!(
                "update of missing entity {}",
                entity.id
            )));
        }
        Ok(())
    }

    /// Removes an instance; returns whether a row was actually deleted.
    pub fn delete(&self, id: EntityId) -> StoreResult<bool> {
        let n = self
            .tx
            .execute("DELETE FROM entities WHERE id = ?1", params![id.as_i64()])?;
        Ok(n > 0)
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(msg.clone().unwrap_or_else(|| f.to_string()))
        }
        _ => StoreError::Database(e),
    }
}

fn get_row(conn: &Connection, id: EntityId) -> StoreResult<Option<Entity>> {
    let row: Option<(i64, String, String, i64, i64)> = conn
        .query_row(
            "SELECT id, kind, data, created_at, modified_at FROM entities WHERE id = ?1",
            params![id.as_i64()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()?;
    row.map(decode).transpose()
}

fn list_kind(conn: &Connection, kind: Kind) -> StoreResult<Vec<Entity>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, data, created_at, modified_at FROM entities WHERE kind = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![kind.as_str()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode(row?)?);
    }
    Ok(out)
}

fn find_by_fields(
    conn: &Connection,
    kind: Kind,
    pairs: &[(&str, &Value)],
) -> StoreResult<Option<Entity>> {
    let rows = list_kind(conn, kind)?;
    Ok(rows
        .into_iter()
        .find(|e| pairs.iter().all(|(field, value)| e.field(field) == Some(value))))
}

fn decode(row: (i64, String, String, i64, i64)) -> StoreResult<Entity> {
    let (id, kind, data, created_at, modified_at) = row;
    let kind = Kind::parse(&kind)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown kind in row {id}: {kind}")))?;
    Ok(Entity {
        id: EntityId::from_raw(id),
        kind,
        data: serde_json::from_str(&data)?,
        created_at,
        modified_at,
    })
}

/// Stable sort by the given field list, primary key as final tiebreak.
/// A `-` prefix sorts that field descending.
fn sort_entities(rows: &mut [Entity], order_by: &[&str]) {
    rows.sort_by(|a, b| {
        for key in order_by {
            let (field, descending) = match key.strip_prefix('-') {
                Some(f) => (f, true),
                None => (*key, false),
            };
            let ord = cmp_values(a.field(field), b.field(field));
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    });
}

/// Total order over JSON values: null < bool < number < string < array < object.
fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = |v: Option<&Value>| match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    };
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&y.as_f64().unwrap_or(0.0)),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_order_is_total() {
        assert_eq!(cmp_values(None, Some(&Value::Null)), Ordering::Equal);
        assert_eq!(
            cmp_values(Some(&json!(1)), Some(&json!("a"))),
            Ordering::Less
        );
        assert_eq!(
            cmp_values(Some(&json!(2.5)), Some(&json!(2))),
            Ordering::Greater
        );
    }
}
