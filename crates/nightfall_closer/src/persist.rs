//! Closing records written to the database.

use crate::error::Result;
use crate::report::ClosingReport;
use nightfall_db::{
    upsert_record, DbTimestamp, NightAnalysisRecord, NightSummaryRecord, RecordStore,
};
use nightfall_protocol::{NightContext, NightPaths};
use std::fs;
use tracing::{debug, info, warn};

/// Row ids of the records written by [`persist_closing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedIds {
    /// `None` for a single-sequence close.
    pub analysis: Option<i64>,
    pub summary: i64,
}

/// Upsert the closing records.
///
/// A whole-night close writes the analysis record and marks the night
/// finished in the summary table. A single-sequence close only refreshes the
/// summary end time and leaves `is_finished` false.
pub fn persist_closing(
    store: &dyn RecordStore,
    paths: &NightPaths<'_>,
    ctx: &NightContext,
    report: &ClosingReport,
    reason: Option<&str>,
) -> Result<PersistedIds> {
    let config = paths.config();
    let night = ctx.night.to_iso();
    let whole_night = !ctx.is_partial_close();

    let analysis = if whole_night {
        let record = NightAnalysisRecord {
            telescope: ctx.telescope.clone(),
            night: night.clone(),
            sequences: report.sequences as i64,
            concept_counts: report.counts_map(),
            comments: comments(paths, reason),
            is_closed: true,
        };
        let id = upsert_record(store, &config.database.analysis_table, &record)?;
        debug!(id, table = %config.database.analysis_table, "Analysis record upserted");
        Some(id)
    } else {
        None
    };

    let summary = NightSummaryRecord {
        telescope: ctx.telescope.clone(),
        night,
        activity: config.database.activity.clone(),
        is_finished: whole_night,
        end_time: DbTimestamp::from(report.end),
    };
    let summary_id = upsert_record(store, &config.database.summary_table, &summary)?;
    info!(
        telescope = %ctx.telescope,
        night = %ctx.night,
        is_finished = whole_night,
        "Closing records persisted"
    );

    Ok(PersistedIds {
        analysis,
        summary: summary_id,
    })
}

/// The operator's reason wins over the incidences file.
fn comments(paths: &NightPaths<'_>, reason: Option<&str>) -> Option<String> {
    if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
        return Some(reason.to_string());
    }
    let incidences = paths.incidences_file();
    match fs::read_to_string(&incidences) {
        Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %incidences.display(), "Cannot read incidences: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nightfall_db::{DbConnection, DuckDbRecordStore, TableNames};
    use nightfall_protocol::{NightDate, NightfallConfig};

    fn store(config: &NightfallConfig) -> DuckDbRecordStore {
        let tables = TableNames {
            analysis: config.database.analysis_table.clone(),
            summary: config.database.summary_table.clone(),
            files: config.database.files_table.clone(),
        };
        DuckDbRecordStore::new(DbConnection::open_duckdb_memory().unwrap(), &tables).unwrap()
    }

    fn report() -> ClosingReport {
        ClosingReport {
            telescope: "LST1".into(),
            night: "2020_01_17".into(),
            sequences: 1,
            files_raw: 5,
            raw_gb: 0,
            end: Utc::now(),
            concept_counts: vec![("DL2".into(), 3)],
        }
    }

    #[test]
    fn rerun_updates_the_same_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = NightfallConfig::default();
        config.paths.analysis_dir = tmp.path().to_path_buf();
        let ctx = NightContext::new("LST1", NightDate::parse("2020_01_17").unwrap());
        let paths = NightPaths::new(&config, &ctx);
        let store = store(&config);

        let first = persist_closing(&store, &paths, &ctx, &report(), None).unwrap();
        let second = persist_closing(&store, &paths, &ctx, &report(), None).unwrap();

        assert_eq!(first, second);
        assert!(first.analysis.is_some());
        let rows: i64 = store
            .connection()
            .query_scalar("SELECT COUNT(*) FROM night_summary", &[])
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn single_sequence_close_skips_analysis_record() {
        let config = NightfallConfig::default();
        let mut ctx = NightContext::new("LST1", NightDate::parse("2020_01_17").unwrap());
        ctx.sequence_to_close = Some("1805".into());
        let paths = NightPaths::new(&config, &ctx);
        let store = store(&config);

        let ids = persist_closing(&store, &paths, &ctx, &report(), None).unwrap();

        assert_eq!(ids.analysis, None);
        let finished: bool = store
            .connection()
            .query_scalar("SELECT is_finished FROM night_summary", &[])
            .unwrap();
        assert!(!finished);
    }

    #[test]
    fn reason_beats_incidences() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = NightfallConfig::default();
        config.paths.analysis_dir = tmp.path().to_path_buf();
        let ctx = NightContext::new("LST1", NightDate::parse("2020_01_17").unwrap());
        let paths = NightPaths::new(&config, &ctx);

        assert_eq!(comments(&paths, None), None);
        fs::create_dir_all(paths.analysis_dir()).unwrap();
        fs::write(paths.incidences_file(), "  dome stuck\n").unwrap();
        assert_eq!(comments(&paths, None).as_deref(), Some("dome stuck"));
        assert_eq!(comments(&paths, Some("bad weather")).as_deref(), Some("bad weather"));
    }
}
