use super::MachineStore;
use anyhow::Result;
use async_trait::async_trait;
use sandfleet_common::{AcquireCriteria, Machine, NewMachine};
use sqlx::{Pool, Postgres};

const MACHINE_COLUMNS: &str = "id, name, label, ip, platform, options, tags, interface, snapshot, \
     resultserver_ip, resultserver_port, locked, locked_changed_on, status, status_changed_on";

pub struct PgMachineStore {
    db: Pool<Postgres>,
}

impl PgMachineStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MachineStore for PgMachineStore {
    async fn list_machines(&self) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines ORDER BY id",
            MACHINE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn get_available_machines(&self) -> Result<Vec<Machine>> {
        let rows = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines WHERE locked = FALSE ORDER BY id",
            MACHINE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn count_machines_available(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM machines WHERE locked = FALSE")
            .fetch_one(&self.db)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn add_machine(&self, machine: &NewMachine) -> Result<Machine> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            INSERT INTO machines (
              name, label, ip, platform, options, tags, interface, snapshot,
              resultserver_ip, resultserver_port, locked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
            RETURNING {}
            "#,
            MACHINE_COLUMNS
        ))
        .bind(&machine.name)
        .bind(&machine.label)
        .bind(&machine.ip)
        .bind(&machine.platform)
        .bind(&machine.options)
        .bind(&machine.tags)
        .bind(&machine.interface)
        .bind(&machine.snapshot)
        .bind(&machine.resultserver_ip)
        .bind(machine.resultserver_port)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn upsert_machine(&self, machine: &NewMachine) -> Result<Machine> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            INSERT INTO machines (
              name, label, ip, platform, options, tags, interface, snapshot,
              resultserver_ip, resultserver_port, locked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)
            ON CONFLICT (label) DO UPDATE SET
              name = EXCLUDED.name,
              ip = EXCLUDED.ip,
              platform = EXCLUDED.platform,
              options = EXCLUDED.options,
              tags = EXCLUDED.tags,
              interface = EXCLUDED.interface,
              snapshot = EXCLUDED.snapshot,
              resultserver_ip = EXCLUDED.resultserver_ip,
              resultserver_port = EXCLUDED.resultserver_port
            RETURNING {}
            "#,
            MACHINE_COLUMNS
        ))
        .bind(&machine.name)
        .bind(&machine.label)
        .bind(&machine.ip)
        .bind(&machine.platform)
        .bind(&machine.options)
        .bind(&machine.tags)
        .bind(&machine.interface)
        .bind(&machine.snapshot)
        .bind(&machine.resultserver_ip)
        .bind(machine.resultserver_port)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn view_machine_by_label(&self, label: &str) -> Result<Option<Machine>> {
        let row = sqlx::query_as::<_, Machine>(&format!(
            "SELECT {} FROM machines WHERE label = $1",
            MACHINE_COLUMNS
        ))
        .bind(label)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete_machine(&self, label: &str) -> Result<bool> {
        // Dropping `tx` on an error path rolls the delete back.
        let mut tx = self.db.begin().await?;
        let res = sqlx::query("DELETE FROM machines WHERE label = $1")
            .bind(label)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    async fn lock_machine(&self, criteria: &AcquireCriteria) -> Result<Option<Machine>> {
        // SKIP LOCKED so concurrent schedulers never claim the same row.
        let row = sqlx::query_as::<_, Machine>(&format!(
            r#"
            UPDATE machines
            SET locked = TRUE,
                locked_changed_on = NOW()
            WHERE id = (
              SELECT id
              FROM machines
              WHERE locked = FALSE
                AND ($1::text IS NULL OR name = $1)
                AND ($2::text IS NULL OR platform = $2)
                AND tags @> $3::text[]
              ORDER BY id
              LIMIT 1
              FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            MACHINE_COLUMNS
        ))
        .bind(&criteria.machine_id)
        .bind(&criteria.platform)
        .bind(&criteria.tags)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn unlock_machine(&self, label: &str) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE machines SET locked = FALSE, locked_changed_on = NOW() WHERE label = $1",
        )
        .bind(label)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_machine_status(&self, label: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE machines SET status = $2, status_changed_on = NOW() WHERE label = $1")
            .bind(label)
            .bind(status)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
