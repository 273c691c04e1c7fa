use crate::config::AppConfig;
use crate::db::{self, SchemaSource};
use crate::document::{DocumentWriter, output_path};
use crate::error::SpecResult;
use crate::project::project;
use crate::reflect::{ReflectionReport, TableFilter, reflect_schema};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Reflects the source and closes it, whatever the reflection outcome.
pub async fn extract(
    mut source: Box<dyn SchemaSource>,
    filter: &TableFilter,
) -> SpecResult<ReflectionReport> {
    let outcome = reflect_schema(source.as_mut(), filter).await;

    if let Err(e) = source.close().await {
        warn!("Failed to close {} connection: {}", source.kind(), e);
    }

    Ok(ReflectionReport::from_outcomes(outcome?))
}

/// Connects, reflects, projects and writes the document. Returns the path
/// of the written file.
pub async fn run(config: &AppConfig, generated_at: NaiveDateTime) -> SpecResult<PathBuf> {
    let filter = TableFilter::from_config(&config.database);
    let source = db::connect(&config.database).await?;

    let kind = source.kind();
    if !kind.supports_comments() {
        info!("{} comments are not read; comment columns will be empty", kind);
    }

    let report = extract(source, &filter).await?;
    report.log_summary();

    for table in &report.tables {
        if let Ok(json) = serde_json::to_string(table) {
            debug!("{}", json);
        }
    }

    let rows = project(&report.tables);
    let path = output_path(&config.output, generated_at);
    DocumentWriter::from_config(&config.output).write(&rows, generated_at, &path)?;

    Ok(path)
}
