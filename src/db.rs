use std::path::Path;

use anyhow::Context;
use sqlx::{PgPool, Row};

use crate::models::{CardioRow, NlpRow, PhysiologicalRow, ProductivityRow};

/// The four metric tables this service reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MetricKind {
    Nlp,
    Physiological,
    Cardio,
    Productivity,
}

impl MetricKind {
    fn table(self) -> &'static str {
        match self {
            MetricKind::Nlp => "nlp_metrics",
            MetricKind::Physiological => "physiological_metrics",
            MetricKind::Cardio => "cardio_metrics",
            MetricKind::Productivity => "productivity_metrics",
        }
    }

    fn value_columns(self) -> &'static [&'static str] {
        match self {
            MetricKind::Nlp => &["alpha", "beta", "theta", "delta", "smr"],
            MetricKind::Physiological => {
                &["relax", "fatigue", "concentration", "stress", "involvement"]
            }
            MetricKind::Cardio => &["heart_rate", "stress_index", "kaplan_index"],
            MetricKind::Productivity => {
                &["gravity", "productivity", "fatigue", "concentration", "relaxation"]
            }
        }
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// SELECT for one metric kind, scoped to a participant and optionally to a
/// single expedition. Results are always ordered by ascending timestamp; the
/// time-series charts rely on that.
fn select_sql(kind: MetricKind, scoped_to_expedition: bool) -> String {
    let mut sql = format!(
        "SELECT individual_number, expedition_id, session, timestamp, {} FROM {} \
         WHERE individual_number = $1",
        kind.value_columns().join(", "),
        kind.table(),
    );
    if scoped_to_expedition {
        sql.push_str(" AND expedition_id = $2");
    }
    sql.push_str(" ORDER BY timestamp ASC");
    sql
}

pub async fn fetch_nlp_metrics(
    pool: &PgPool,
    individual_number: &str,
    expedition_id: Option<i32>,
) -> anyhow::Result<Vec<NlpRow>> {
    let sql = select_sql(MetricKind::Nlp, expedition_id.is_some());
    let mut query = sqlx::query(&sql).bind(individual_number);
    if let Some(id) = expedition_id {
        query = query.bind(id);
    }

    let records = query.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());

    for row in records {
        rows.push(NlpRow {
            individual_number: row.get("individual_number"),
            expedition_id: row.get("expedition_id"),
            session: row.get("session"),
            timestamp: row.get("timestamp"),
            alpha: row.get("alpha"),
            beta: row.get("beta"),
            theta: row.get("theta"),
            delta: row.get("delta"),
            smr: row.get("smr"),
        });
    }

    Ok(rows)
}

pub async fn fetch_physiological_metrics(
    pool: &PgPool,
    individual_number: &str,
    expedition_id: Option<i32>,
) -> anyhow::Result<Vec<PhysiologicalRow>> {
    let sql = select_sql(MetricKind::Physiological, expedition_id.is_some());
    let mut query = sqlx::query(&sql).bind(individual_number);
    if let Some(id) = expedition_id {
        query = query.bind(id);
    }

    let records = query.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());

    for row in records {
        rows.push(PhysiologicalRow {
            individual_number: row.get("individual_number"),
            expedition_id: row.get("expedition_id"),
            session: row.get("session"),
            timestamp: row.get("timestamp"),
            relax: row.get("relax"),
            fatigue: row.get("fatigue"),
            concentration: row.get("concentration"),
            stress: row.get("stress"),
            involvement: row.get("involvement"),
        });
    }

    Ok(rows)
}

pub async fn fetch_cardio_metrics(
    pool: &PgPool,
    individual_number: &str,
    expedition_id: Option<i32>,
) -> anyhow::Result<Vec<CardioRow>> {
    let sql = select_sql(MetricKind::Cardio, expedition_id.is_some());
    let mut query = sqlx::query(&sql).bind(individual_number);
    if let Some(id) = expedition_id {
        query = query.bind(id);
    }

    let records = query.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());

    for row in records {
        rows.push(CardioRow {
            individual_number: row.get("individual_number"),
            expedition_id: row.get("expedition_id"),
            session: row.get("session"),
            timestamp: row.get("timestamp"),
            heart_rate: row.get("heart_rate"),
            stress_index: row.get("stress_index"),
            kaplan_index: row.get("kaplan_index"),
        });
    }

    Ok(rows)
}

pub async fn fetch_productivity_metrics(
    pool: &PgPool,
    individual_number: &str,
    expedition_id: Option<i32>,
) -> anyhow::Result<Vec<ProductivityRow>> {
    let sql = select_sql(MetricKind::Productivity, expedition_id.is_some());
    let mut query = sqlx::query(&sql).bind(individual_number);
    if let Some(id) = expedition_id {
        query = query.bind(id);
    }

    let records = query.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());

    for row in records {
        rows.push(ProductivityRow {
            individual_number: row.get("individual_number"),
            expedition_id: row.get("expedition_id"),
            session: row.get("session"),
            timestamp: row.get("timestamp"),
            gravity: row.get("gravity"),
            productivity: row.get("productivity"),
            fatigue: row.get("fatigue"),
            concentration: row.get("concentration"),
            relaxation: row.get("relaxation"),
        });
    }

    Ok(rows)
}

fn insert_sql(kind: MetricKind) -> String {
    let values = kind.value_columns();
    let placeholders: Vec<String> = (5..5 + values.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} (individual_number, expedition_id, session, timestamp, {}) \
         VALUES ($1, $2, $3, $4, {}) \
         ON CONFLICT (individual_number, expedition_id, session, timestamp) DO NOTHING",
        kind.table(),
        values.join(", "),
        placeholders.join(", "),
    )
}

/// Load sensor rows of one kind from a CSV export. Idempotent: rows that
/// collide on the natural key are skipped.
pub async fn import_csv(
    pool: &PgPool,
    kind: MetricKind,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let sql = insert_sql(kind);
    let mut inserted = 0usize;

    match kind {
        MetricKind::Nlp => {
            for result in reader.deserialize::<NlpRow>() {
                let row = result?;
                let outcome = sqlx::query(&sql)
                    .bind(&row.individual_number)
                    .bind(row.expedition_id)
                    .bind(row.session)
                    .bind(row.timestamp)
                    .bind(row.alpha)
                    .bind(row.beta)
                    .bind(row.theta)
                    .bind(row.delta)
                    .bind(row.smr)
                    .execute(pool)
                    .await?;
                inserted += outcome.rows_affected() as usize;
            }
        }
        MetricKind::Physiological => {
            for result in reader.deserialize::<PhysiologicalRow>() {
                let row = result?;
                let outcome = sqlx::query(&sql)
                    .bind(&row.individual_number)
                    .bind(row.expedition_id)
                    .bind(row.session)
                    .bind(row.timestamp)
                    .bind(row.relax)
                    .bind(row.fatigue)
                    .bind(row.concentration)
                    .bind(row.stress)
                    .bind(row.involvement)
                    .execute(pool)
                    .await?;
                inserted += outcome.rows_affected() as usize;
            }
        }
        MetricKind::Cardio => {
            for result in reader.deserialize::<CardioRow>() {
                let row = result?;
                let outcome = sqlx::query(&sql)
                    .bind(&row.individual_number)
                    .bind(row.expedition_id)
                    .bind(row.session)
                    .bind(row.timestamp)
                    .bind(row.heart_rate)
                    .bind(row.stress_index)
                    .bind(row.kaplan_index)
                    .execute(pool)
                    .await?;
                inserted += outcome.rows_affected() as usize;
            }
        }
        MetricKind::Productivity => {
            for result in reader.deserialize::<ProductivityRow>() {
                let row = result?;
                let outcome = sqlx::query(&sql)
                    .bind(&row.individual_number)
                    .bind(row.expedition_id)
                    .bind(row.session)
                    .bind(row.timestamp)
                    .bind(row.gravity)
                    .bind(row.productivity)
                    .bind(row.fatigue)
                    .bind(row.concentration)
                    .bind(row.relaxation)
                    .execute(pool)
                    .await?;
                inserted += outcome.rows_affected() as usize;
            }
        }
    }

    Ok(inserted)
}

/// Realistic sample data for a single participant across one expedition:
/// three sessions of readings per metric kind.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let participant = "P-001";
    let expedition = 1i32;
    // Four readings per session at five-minute intervals, sessions spread
    // across one day.
    let base_ms = 1_706_770_800_000i64; // 2024-02-01 07:00 UTC
    let session_offsets: [(i16, i64); 3] = [
        (1, 0),                     // morning
        (2, 6 * 3_600_000),         // day
        (3, 12 * 3_600_000),        // evening
    ];
    let step_ms = 5 * 60_000i64;

    for (session, offset) in session_offsets {
        for tick in 0..4i64 {
            let ts = base_ms + offset + tick * step_ms;
            let drift = tick as f64 * 0.1;

            sqlx::query(
                "INSERT INTO nlp_metrics \
                 (individual_number, expedition_id, session, timestamp, alpha, beta, theta, delta, smr) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (individual_number, expedition_id, session, timestamp) DO NOTHING",
            )
            .bind(participant)
            .bind(expedition)
            .bind(session)
            .bind(ts)
            .bind(8.0 + session as f64 + drift)
            .bind(14.0 - session as f64 * 0.5 + drift)
            .bind(5.0 + drift)
            .bind(2.5 + drift * 0.5)
            .bind(11.0 - drift)
            .execute(pool)
            .await?;

            sqlx::query(
                "INSERT INTO physiological_metrics \
                 (individual_number, expedition_id, session, timestamp, relax, fatigue, concentration, stress, involvement) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (individual_number, expedition_id, session, timestamp) DO NOTHING",
            )
            .bind(participant)
            .bind(expedition)
            .bind(session)
            .bind(ts)
            .bind(0.6 - drift * 0.2)
            .bind(0.3 + session as f64 * 0.15 + drift)
            .bind(0.7 - session as f64 * 0.1)
            .bind(0.2 + drift)
            .bind(0.8 - drift * 0.1)
            .execute(pool)
            .await?;

            sqlx::query(
                "INSERT INTO cardio_metrics \
                 (individual_number, expedition_id, session, timestamp, heart_rate, stress_index, kaplan_index) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (individual_number, expedition_id, session, timestamp) DO NOTHING",
            )
            .bind(participant)
            .bind(expedition)
            .bind(session)
            .bind(ts)
            .bind(62.0 + session as f64 * 8.0 + tick as f64 * 2.0)
            .bind(120.0 + drift * 30.0)
            .bind(3.1 + drift)
            .execute(pool)
            .await?;

            sqlx::query(
                "INSERT INTO productivity_metrics \
                 (individual_number, expedition_id, session, timestamp, gravity, productivity, fatigue, concentration, relaxation) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (individual_number, expedition_id, session, timestamp) DO NOTHING",
            )
            .bind(participant)
            .bind(expedition)
            .bind(session)
            .bind(ts)
            .bind(0.9 + drift * 0.3)
            .bind(0.65 - session as f64 * 0.05)
            .bind(0.35 + session as f64 * 0.1 + drift)
            .bind(0.75 - drift * 0.2)
            .bind(0.5 - session as f64 * 0.05)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_sql_orders_by_timestamp() {
        for kind in [
            MetricKind::Nlp,
            MetricKind::Physiological,
            MetricKind::Cardio,
            MetricKind::Productivity,
        ] {
            let sql = select_sql(kind, false);
            assert!(sql.ends_with("ORDER BY timestamp ASC"), "{sql}");
            assert!(!sql.contains("$2"));
        }
    }

    #[test]
    fn select_sql_adds_expedition_filter_when_scoped() {
        let sql = select_sql(MetricKind::Cardio, true);
        assert!(sql.contains("individual_number = $1"));
        assert!(sql.contains("expedition_id = $2"));
        assert!(sql.ends_with("ORDER BY timestamp ASC"));
    }

    #[test]
    fn natural_keys_treat_null_expeditions_as_equal() {
        // Rows without an expedition bind NULL for expedition_id; the unique
        // keys must still fire ON CONFLICT for them or re-running an import
        // duplicates every unscoped row.
        let schema = include_str!("../migrations/0001_create_metric_tables.sql");
        let nullsafe = schema.matches("UNIQUE NULLS NOT DISTINCT").count();
        assert_eq!(nullsafe, 4);
        assert_eq!(schema.matches("UNIQUE").count(), nullsafe);
    }

    #[test]
    fn insert_sql_binds_every_value_column() {
        let sql = insert_sql(MetricKind::Physiological);
        assert!(sql.contains("physiological_metrics"));
        assert!(sql.contains("$9"));
        assert!(!sql.contains("$10"));
        assert!(sql.contains("DO NOTHING"));
    }
}
