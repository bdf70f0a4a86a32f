#![forbid(unsafe_code)]

mod error;

pub use error::StoreError;

use cord_core::ids::NodeId;
use cord_core::model::{AskTarget, NodeKind, NodeStatus, Returns};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DB_FILE: &str = "cord.db";

/// One node as stored, with its declared needs attached.
#[derive(Clone, Debug)]
pub struct NodeRow {
    pub id: NodeId,
    pub kind: NodeKind,
    pub parent_id: Option<NodeId>,
    pub ordinal: i64,
    pub goal: String,
    pub prompt: Option<String>,
    pub returns: Returns,
    pub status: NodeStatus,
    pub result: Option<String>,
    pub synthesized: bool,
    pub ask_target: Option<AskTarget>,
    pub created_at: i64,
    pub updated_at: i64,
    pub needs: Vec<NodeId>,
}

/// Nested snapshot for `read_tree` and the status renderer.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub node: NodeRow,
    pub children: Vec<TreeNode>,
}

/// Result of a cascade cancel: everything newly marked `cancelled`, and the
/// subset that was `active` (those still have a live process to signal).
#[derive(Clone, Debug, Default)]
pub struct CancelOutcome {
    pub cancelled: Vec<NodeId>,
    pub signalled: Vec<NodeId>,
}

/// A parent whose children have all reached a terminal status and which has
/// not yet entered its synthesis phase.
#[derive(Clone, Copy, Debug)]
pub struct SynthesisCandidate {
    pub id: NodeId,
    pub any_child_complete: bool,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}

/// SQLite-backed coordination store. Single writer per transaction; WAL keeps
/// concurrent readers (the per-agent tool servers) consistent.
#[derive(Debug)]
pub struct SqliteStore {
    storage_dir: PathBuf,
    conn: Connection,
    last_tick: i64,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;
        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        let mut store = Self {
            storage_dir,
            conn,
            last_tick: 0,
        };
        store.migrate()?;
        store.last_tick = store
            .conn
            .query_row("SELECT COALESCE(MAX(updated_at), 0) FROM nodes", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .unwrap_or(0);
        Ok(store)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE)
    }

    /// Monotonic millisecond tick. Wall-clock when it moves forward, strictly
    /// increasing otherwise.
    fn next_tick(&mut self) -> i64 {
        self.last_tick = now_ms().max(self.last_tick + 1);
        self.last_tick
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nodes (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              kind TEXT NOT NULL CHECK(kind IN ('goal','task','serial','ask')),
              parent_id INTEGER REFERENCES nodes(id),
              ordinal INTEGER NOT NULL,
              goal TEXT NOT NULL,
              prompt TEXT,
              returns TEXT NOT NULL DEFAULT 'text'
                CHECK(returns IN ('text','boolean','list','structured','file','approval')),
              status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending','active','paused','complete','cancelled','failed')),
              result TEXT,
              synthesized INTEGER NOT NULL DEFAULT 0,
              ask_target TEXT CHECK(ask_target IN ('human','parent','children')),
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dependencies (
              node_id INTEGER NOT NULL REFERENCES nodes(id),
              depends_on INTEGER NOT NULL REFERENCES nodes(id),
              PRIMARY KEY (node_id, depends_on)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
            CREATE INDEX IF NOT EXISTS idx_dependencies_node ON dependencies(node_id);
            "#,
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", "v1"],
        )?;
        Ok(())
    }

    /// Inserts the singleton `goal` root as `pending`.
    pub fn create_root(
        &mut self,
        goal: &str,
        prompt: Option<&str>,
        returns: Returns,
    ) -> Result<NodeId, StoreError> {
        if goal.trim().is_empty() {
            return Err(StoreError::InvalidInput("goal must not be empty"));
        }
        let tick = self.next_tick();
        let tx = self.conn.transaction()?;

        let root_exists = tx
            .query_row(
                "SELECT 1 FROM nodes WHERE parent_id IS NULL LIMIT 1",
                [],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if root_exists {
            return Err(StoreError::AlreadyExists { entity: "root" });
        }

        tx.execute(
            r#"
            INSERT INTO nodes(kind, parent_id, ordinal, goal, prompt, returns, status, created_at, updated_at)
            VALUES ('goal', NULL, 0, ?1, ?2, ?3, 'pending', ?4, ?4)
            "#,
            params![goal, prompt, returns.as_str(), tick],
        )?;
        let id = node_id_from_rowid(tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(id)
    }

    /// Inserts a child under `parent` at the next ordinal, with dependency
    /// edges. Every element of `needs` must be a strict descendant of
    /// `parent` (which covers prior siblings) at the moment of insertion;
    /// that ordering makes dependency cycles structurally impossible.
    #[allow(clippy::too_many_arguments)]
    pub fn create_child(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        goal: &str,
        prompt: Option<&str>,
        returns: Returns,
        needs: &[NodeId],
        ask_target: Option<AskTarget>,
    ) -> Result<NodeId, StoreError> {
        if kind == NodeKind::Goal {
            return Err(StoreError::InvalidInput("goal kind is reserved for the root"));
        }
        if goal.trim().is_empty() {
            return Err(StoreError::InvalidInput("goal must not be empty"));
        }
        if ask_target.is_some() && kind != NodeKind::Ask {
            return Err(StoreError::InvalidInput("ask_target is only valid for ask nodes"));
        }

        let tick = self.next_tick();
        let tx = self.conn.transaction()?;

        let parent_kind = tx
            .query_row(
                "SELECT kind FROM nodes WHERE id = ?1",
                params![parent.as_i64()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(parent_kind) = parent_kind else {
            return Err(StoreError::NotFound {
                id: parent.to_string(),
            });
        };

        for dep in needs {
            let dep_exists = tx
                .query_row(
                    "SELECT 1 FROM nodes WHERE id = ?1",
                    params![dep.as_i64()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !dep_exists || !is_strict_descendant_tx(&tx, parent, *dep)? {
                return Err(StoreError::InvalidNeeds {
                    id: dep.to_string(),
                });
            }
        }

        let ordinal: i64 = tx.query_row(
            "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM nodes WHERE parent_id = ?1",
            params![parent.as_i64()],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO nodes(kind, parent_id, ordinal, goal, prompt, returns, status, ask_target, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?8)
            "#,
            params![
                kind.as_str(),
                parent.as_i64(),
                ordinal,
                goal,
                prompt,
                returns.as_str(),
                ask_target.map(AskTarget::as_str),
                tick
            ],
        )?;
        let id = node_id_from_rowid(tx.last_insert_rowid())?;

        for dep in needs {
            tx.execute(
                "INSERT OR IGNORE INTO dependencies(node_id, depends_on) VALUES (?1, ?2)",
                params![id.as_i64(), dep.as_i64()],
            )?;
        }

        // Serial parents gate children in strict ordinal order via an
        // implicit edge to the previous sibling; it stacks with any explicit
        // needs the child declared.
        if parent_kind == NodeKind::Serial.as_str() && ordinal > 0 {
            let previous: Option<i64> = tx
                .query_row(
                    "SELECT id FROM nodes WHERE parent_id = ?1 AND ordinal = ?2",
                    params![parent.as_i64(), ordinal - 1],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(previous) = previous {
                tx.execute(
                    "INSERT OR IGNORE INTO dependencies(node_id, depends_on) VALUES (?1, ?2)",
                    params![id.as_i64(), previous],
                )?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Compare-and-swap status transition. `result` is accepted only for
    /// `active -> complete`; once written it is never touched again by this
    /// method.
    pub fn transition(
        &mut self,
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
        result: Option<&str>,
    ) -> Result<(), StoreError> {
        if !NodeStatus::can_transition(from, to) {
            return Err(StoreError::InvalidStatus {
                id: id.to_string(),
                status: from.as_str(),
            });
        }
        if result.is_some() && !(from == NodeStatus::Active && to == NodeStatus::Complete) {
            return Err(StoreError::InvalidInput(
                "result is only accepted on active -> complete",
            ));
        }

        let tick = self.next_tick();
        let tx = self.conn.transaction()?;

        let current = read_status_tx(&tx, id)?;
        if current != from {
            // A live race is one where a concurrent transition out of `from`
            // just beat this caller and the node is still in motion; the
            // caller can re-read and retry. Everything else (terminal node,
            // already in the target state, or a status the caller merely
            // guessed wrong) means the operation is not permitted.
            if !current.is_terminal()
                && current != to
                && NodeStatus::can_transition(from, current)
            {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected: from.as_str(),
                    actual: current.as_str(),
                });
            }
            return Err(StoreError::InvalidStatus {
                id: id.to_string(),
                status: current.as_str(),
            });
        }

        let changed = match result {
            Some(result) => tx.execute(
                "UPDATE nodes SET status = ?2, result = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?5",
                params![id.as_i64(), to.as_str(), result, tick, from.as_str()],
            )?,
            None => tx.execute(
                "UPDATE nodes SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
                params![id.as_i64(), to.as_str(), tick, from.as_str()],
            )?,
        };
        if changed != 1 {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: from.as_str(),
                actual: "unknown",
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Updates goal and/or prompt; permitted only while `pending` or `paused`.
    pub fn modify(
        &mut self,
        id: NodeId,
        goal: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<(), StoreError> {
        if goal.is_none() && prompt.is_none() {
            return Err(StoreError::InvalidInput(
                "provide at least one of goal or prompt",
            ));
        }
        if let Some(goal) = goal {
            if goal.trim().is_empty() {
                return Err(StoreError::InvalidInput("goal must not be empty"));
            }
        }

        let tick = self.next_tick();
        let tx = self.conn.transaction()?;

        let status = read_status_tx(&tx, id)?;
        if !matches!(status, NodeStatus::Pending | NodeStatus::Paused) {
            return Err(StoreError::InvalidStatus {
                id: id.to_string(),
                status: status.as_str(),
            });
        }

        if let Some(goal) = goal {
            tx.execute(
                "UPDATE nodes SET goal = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_i64(), goal, tick],
            )?;
        }
        if let Some(prompt) = prompt {
            tx.execute(
                "UPDATE nodes SET prompt = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_i64(), prompt, tick],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Pending nodes whose every need is `complete` and whose parent still
    /// supervises its subtree: the goal root always does, an `active` parent
    /// does, and a parent that completed phase one but has not yet entered
    /// synthesis does. Ascending id keeps launch order deterministic.
    pub fn ready_set(&self) -> Result<Vec<NodeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT n.id FROM nodes n
            WHERE n.status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM dependencies d
                  JOIN nodes dep ON dep.id = d.depends_on
                  WHERE d.node_id = n.id AND dep.status != 'complete'
              )
              AND (
                  n.parent_id IS NULL
                  OR EXISTS (
                      SELECT 1 FROM nodes p
                      WHERE p.id = n.parent_id
                        AND (p.kind = 'goal'
                             OR p.status = 'active'
                             OR (p.status = 'complete' AND p.synthesized = 0))
                  )
              )
            ORDER BY n.id
            "#,
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut rows = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = node_id_from_rowid(raw)?;
            if let Some(row) = self.get(id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// The node and all transitive descendants, ascending id.
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        let mut stmt = self.conn.prepare(
            r#"
            WITH RECURSIVE sub(id) AS (
                SELECT ?1
                UNION
                SELECT n.id FROM nodes n JOIN sub s ON n.parent_id = s.id
            )
            SELECT id FROM sub ORDER BY id
            "#,
        )?;
        let ids = stmt
            .query_map(params![id.as_i64()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.into_iter().map(node_id_from_rowid).collect()
    }

    /// True when `a` is a proper ancestor of `b`.
    pub fn is_ancestor(&self, a: NodeId, b: NodeId) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let result = is_strict_descendant_tx(&tx, a, b)?;
        tx.commit()?;
        Ok(result)
    }

    /// Cascade cancel: every non-terminal node in the subtree is marked
    /// `cancelled` in one transaction. A terminal target makes the whole call
    /// a no-op; `stop` is idempotent.
    pub fn cancel_subtree(&mut self, id: NodeId) -> Result<CancelOutcome, StoreError> {
        let tick = self.next_tick();
        let tx = self.conn.transaction()?;

        let target_status = read_status_tx(&tx, id)?;
        if target_status.is_terminal() {
            tx.commit()?;
            return Ok(CancelOutcome::default());
        }

        let mut stmt = tx.prepare(
            r#"
            WITH RECURSIVE sub(id) AS (
                SELECT ?1
                UNION
                SELECT n.id FROM nodes n JOIN sub s ON n.parent_id = s.id
            )
            SELECT n.id, n.status FROM nodes n JOIN sub s ON n.id = s.id
            ORDER BY n.id
            "#,
        )?;
        let members = stmt
            .query_map(params![id.as_i64()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut outcome = CancelOutcome::default();
        for (raw, status) in members {
            let status = NodeStatus::parse(&status)
                .ok_or(StoreError::Corrupted("unknown status in nodes table"))?;
            if status.is_terminal() {
                continue;
            }
            tx.execute(
                "UPDATE nodes SET status = 'cancelled', updated_at = ?2 WHERE id = ?1",
                params![raw, tick],
            )?;
            let member = node_id_from_rowid(raw)?;
            if status == NodeStatus::Active {
                outcome.signalled.push(member);
            }
            outcome.cancelled.push(member);
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Parents eligible for the synthesis decision: children exist, all of
    /// them terminal, the parent completed its first phase and has not been
    /// relaunched yet.
    pub fn synthesis_candidates(&self) -> Result<Vec<SynthesisCandidate>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id,
                   EXISTS (
                       SELECT 1 FROM nodes c
                       WHERE c.parent_id = p.id AND c.status = 'complete'
                   )
            FROM nodes p
            WHERE p.status = 'complete'
              AND p.synthesized = 0
              AND EXISTS (SELECT 1 FROM nodes c WHERE c.parent_id = p.id)
              AND NOT EXISTS (
                  SELECT 1 FROM nodes c
                  WHERE c.parent_id = p.id
                    AND c.status NOT IN ('complete', 'cancelled', 'failed')
              )
            ORDER BY p.id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(raw, any_child_complete)| {
                Ok(SynthesisCandidate {
                    id: node_id_from_rowid(raw)?,
                    any_child_complete,
                })
            })
            .collect()
    }

    /// Scheduler-only reset for the synthesis relaunch: `complete -> pending`
    /// with the phase-one result cleared and the monotonic `synthesized` flag
    /// raised. Guarded inside the transaction so a parent can enter its
    /// synthesis phase at most once.
    pub fn begin_synthesis(&mut self, id: NodeId) -> Result<(), StoreError> {
        let tick = self.next_tick();
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE nodes SET status = 'pending', result = NULL, synthesized = 1, updated_at = ?2
            WHERE id = ?1 AND status = 'complete' AND synthesized = 0
              AND EXISTS (SELECT 1 FROM nodes c WHERE c.parent_id = nodes.id)
              AND NOT EXISTS (
                  SELECT 1 FROM nodes c
                  WHERE c.parent_id = nodes.id
                    AND c.status NOT IN ('complete', 'cancelled', 'failed')
              )
            "#,
            params![id.as_i64(), tick],
        )?;
        if changed != 1 {
            let status = read_status_tx(&tx, id)?;
            return Err(StoreError::InvalidStatus {
                id: id.to_string(),
                status: status.as_str(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// A parent whose children all terminated without a single success has
    /// nothing to synthesize; it fails instead. The `synthesized` flag is
    /// raised so the scheduler never reconsiders it.
    pub fn mark_synthesis_failed(&mut self, id: NodeId) -> Result<(), StoreError> {
        let tick = self.next_tick();
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE nodes SET status = 'failed', synthesized = 1, updated_at = ?2
            WHERE id = ?1 AND status = 'complete' AND synthesized = 0
            "#,
            params![id.as_i64(), tick],
        )?;
        if changed != 1 {
            let status = read_status_tx(&tx, id)?;
            return Err(StoreError::InvalidStatus {
                id: id.to_string(),
                status: status.as_str(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Result<Option<NodeRow>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, kind, parent_id, ordinal, goal, prompt, returns, status, result, synthesized, ask_target, created_at, updated_at FROM nodes WHERE id = ?1",
                params![id.as_i64()],
                raw_node_row,
            )
            .optional()?;
        match raw {
            Some(raw) => {
                let mut row = decode_node_row(raw)?;
                row.needs = self.needs_of(row.id)?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub fn root(&self) -> Result<Option<NodeRow>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, kind, parent_id, ordinal, goal, prompt, returns, status, result, synthesized, ask_target, created_at, updated_at FROM nodes WHERE parent_id IS NULL ORDER BY id LIMIT 1",
                [],
                raw_node_row,
            )
            .optional()?;
        match raw {
            Some(raw) => {
                let mut row = decode_node_row(raw)?;
                row.needs = self.needs_of(row.id)?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Children in ordinal order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, parent_id, ordinal, goal, prompt, returns, status, result, synthesized, ask_target, created_at, updated_at FROM nodes WHERE parent_id = ?1 ORDER BY ordinal, id",
        )?;
        let raws = stmt
            .query_map(params![id.as_i64()], raw_node_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        let mut rows = Vec::with_capacity(raws.len());
        for raw in raws {
            let mut row = decode_node_row(raw)?;
            row.needs = self.needs_of(row.id)?;
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn needs_of(&self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT depends_on FROM dependencies WHERE node_id = ?1 ORDER BY depends_on")?;
        let ids = stmt
            .query_map(params![id.as_i64()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.into_iter().map(node_id_from_rowid).collect()
    }

    /// Ancestor goals from the root down to the node itself.
    pub fn goal_chain(&self, id: NodeId) -> Result<Vec<(NodeId, String)>, StoreError> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let row = self.get(current)?.ok_or_else(|| StoreError::NotFound {
                id: current.to_string(),
            })?;
            chain.push((row.id, row.goal));
            cursor = row.parent_id;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Results of the given nodes, restricted to `complete` ones that carry a
    /// result payload. Order follows the input.
    pub fn completed_results(
        &self,
        ids: &[NodeId],
    ) -> Result<Vec<(NodeId, String, String)>, StoreError> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(row) = self.get(*id)? {
                if row.status == NodeStatus::Complete {
                    if let Some(result) = row.result {
                        out.push((row.id, row.goal, result));
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn all_nodes(&self) -> Result<Vec<NodeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, parent_id, ordinal, goal, prompt, returns, status, result, synthesized, ask_target, created_at, updated_at FROM nodes ORDER BY id",
        )?;
        let raws = stmt
            .query_map([], raw_node_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        let mut rows = Vec::with_capacity(raws.len());
        for raw in raws {
            let mut row = decode_node_row(raw)?;
            row.needs = self.needs_of(row.id)?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// True once every node is terminal.
    pub fn is_tree_complete(&self) -> Result<bool, StoreError> {
        let open: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE status NOT IN ('complete', 'cancelled', 'failed')",
            [],
            |row| row.get(0),
        )?;
        Ok(open == 0)
    }

    /// Consistent nested snapshot rooted at the goal node.
    pub fn tree(&self) -> Result<Option<TreeNode>, StoreError> {
        let rows = self.all_nodes()?;
        let Some(root) = rows.iter().find(|r| r.parent_id.is_none()).cloned() else {
            return Ok(None);
        };
        Ok(Some(assemble_tree(root, &rows)))
    }
}

fn assemble_tree(node: NodeRow, rows: &[NodeRow]) -> TreeNode {
    let mut children: Vec<NodeRow> = rows
        .iter()
        .filter(|r| r.parent_id == Some(node.id))
        .cloned()
        .collect();
    children.sort_by_key(|r| (r.ordinal, r.id));
    TreeNode {
        children: children
            .into_iter()
            .map(|child| assemble_tree(child, rows))
            .collect(),
        node,
    }
}

fn node_id_from_rowid(raw: i64) -> Result<NodeId, StoreError> {
    NodeId::from_raw(raw).map_err(|_| StoreError::Corrupted("non-positive node rowid"))
}

fn read_status_tx(tx: &Transaction<'_>, id: NodeId) -> Result<NodeStatus, StoreError> {
    let status = tx
        .query_row(
            "SELECT status FROM nodes WHERE id = ?1",
            params![id.as_i64()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let Some(status) = status else {
        return Err(StoreError::NotFound {
            id: id.to_string(),
        });
    };
    NodeStatus::parse(&status).ok_or(StoreError::Corrupted("unknown status in nodes table"))
}

/// Walks `b`'s parent chain looking for `a`. Proper descent only: `a == b`
/// never qualifies.
fn is_strict_descendant_tx(
    tx: &Transaction<'_>,
    a: NodeId,
    b: NodeId,
) -> Result<bool, StoreError> {
    let mut cursor = b;
    loop {
        let parent: Option<Option<i64>> = tx
            .query_row(
                "SELECT parent_id FROM nodes WHERE id = ?1",
                params![cursor.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        match parent {
            Some(Some(raw)) => {
                let parent = node_id_from_rowid(raw)?;
                if parent == a {
                    return Ok(true);
                }
                cursor = parent;
            }
            _ => return Ok(false),
        }
    }
}

/// Raw column tuple; decoded into `NodeRow` outside the rusqlite closure so
/// vocabulary violations surface as store errors instead of panics.
type RawNodeRow = (
    i64,
    String,
    Option<i64>,
    i64,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    i64,
    i64,
);

fn raw_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNodeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn decode_node_row(raw: RawNodeRow) -> Result<NodeRow, StoreError> {
    let (
        id,
        kind,
        parent_id,
        ordinal,
        goal,
        prompt,
        returns,
        status,
        result,
        synthesized,
        ask_target,
        created_at,
        updated_at,
    ) = raw;
    Ok(NodeRow {
        id: node_id_from_rowid(id)?,
        kind: NodeKind::parse(&kind)
            .ok_or(StoreError::Corrupted("unknown kind in nodes table"))?,
        parent_id: parent_id.map(node_id_from_rowid).transpose()?,
        ordinal,
        goal,
        prompt,
        returns: Returns::parse(&returns)
            .ok_or(StoreError::Corrupted("unknown returns in nodes table"))?,
        status: NodeStatus::parse(&status)
            .ok_or(StoreError::Corrupted("unknown status in nodes table"))?,
        result,
        synthesized,
        ask_target: match ask_target {
            Some(raw) => Some(
                AskTarget::parse(&raw)
                    .ok_or(StoreError::Corrupted("unknown ask_target in nodes table"))?,
            ),
            None => None,
        },
        created_at,
        updated_at,
        needs: Vec::new(),
    })
}
