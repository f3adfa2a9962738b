//! CLI command implementations
//!
//! Both commands run against an in-memory fixture collection; nothing is
//! sent over the network.

use std::path::Path;

use serde_json::json;

use crate::execution::{
    ExecutionContext, Fixture, PipelineConfig, PipelineShape, QueryClient,
};
use crate::plan::SqlQuerySpec;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_page, write_value};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run {
            config,
            fixture,
            query,
            max_item_count,
            max_degree_of_parallelism,
        } => run_query(
            config.as_deref(),
            &fixture,
            query.as_deref(),
            max_item_count,
            max_degree_of_parallelism,
        ),
        Command::Plan {
            config,
            fixture,
            query,
        } => plan(config.as_deref(), &fixture, query.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_logging()?;
    Ok(config)
}

fn load_fixture(path: &Path) -> CliResult<Fixture> {
    Fixture::load(path).map_err(|e| CliError::fixture_error(e.to_string()))
}

fn query_text(fixture: &Fixture, query: Option<&str>) -> CliResult<SqlQuerySpec> {
    query
        .or(fixture.query.as_deref())
        .map(SqlQuerySpec::new)
        .ok_or_else(|| CliError::fixture_error("no query given and the fixture has none"))
}

/// Execute a query against a fixture, printing every page
pub fn run_query(
    config_path: Option<&Path>,
    fixture_path: &Path,
    query: Option<&str>,
    max_item_count: Option<usize>,
    max_degree_of_parallelism: Option<usize>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let fixture = load_fixture(fixture_path)?;
    let query = query_text(&fixture, query)?;

    let collection = fixture
        .build()
        .map_err(|e| CliError::fixture_error(e.to_string()))?;
    let client: QueryClient = collection.client().with_config(config);

    let mut options = fixture.options.clone();
    if max_item_count.is_some() {
        options.max_item_count = max_item_count;
    }
    if max_degree_of_parallelism.is_some() {
        options.max_degree_of_parallelism = max_degree_of_parallelism;
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::io_error(format!("Failed to create tokio runtime: {}", e)))?;

    let result: CliResult<()> = rt.block_on(async {
        let mut context = client.query(query, options);
        let mut index = 0;
        while let Some(page) = context.next_page().await? {
            write_page(index, &page)?;
            index += 1;
        }
        Ok(())
    });

    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }

    let metrics: serde_json::Value = serde_json::from_str(&client.metrics().to_json())?;
    write_value(&json!({ "metrics": metrics }))?;
    result
}

/// Print the pipeline shape of the fixture's plan
pub fn plan(config_path: Option<&Path>, fixture_path: &Path, query: Option<&str>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let fixture = load_fixture(fixture_path)?;
    let query = query_text(&fixture, query)?;

    let Some(plan) = fixture.plan()? else {
        return write_value(&json!({
            "partitioned": false,
            "query": query.query,
        }));
    };

    let shape = PipelineShape::new(&plan, &query, &fixture.options, config.default_page_size)?;
    write_value(&json!({
        "partitioned": true,
        "stages": shape.stages(),
        "shape": shape,
        "queryRanges": plan.target_spans(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_run_over_fixture() {
        let fixture = fixture_file(
            r#"{
                "ranges": [
                    {"id": "0", "minInclusive": "", "maxExclusive": "80"},
                    {"id": "1", "minInclusive": "80", "maxExclusive": "FF"}
                ],
                "documents": [{"id": "a", "pk": 1, "k": 2}, {"id": "b", "pk": 2, "k": 1}],
                "plan": {"queryInfo": {"orderBy": ["Ascending"], "orderByExpressions": ["c.k"]}},
                "query": "SELECT * FROM c ORDER BY c.k",
                "options": {"enableCrossPartitionQuery": true}
            }"#,
        );
        run_query(None, fixture.path(), None, Some(1), None).unwrap();
    }

    #[test]
    fn test_missing_query_is_fixture_error() {
        let fixture = fixture_file(r#"{"documents": []}"#);
        let err = run_query(None, fixture.path(), None, None, None).unwrap_err();
        assert_eq!(err.code_str(), "SHARDFLOW_CLI_FIXTURE_ERROR");
    }

    #[test]
    fn test_plan_command() {
        let fixture = fixture_file(
            r#"{"plan": {"queryInfo": {"top": 3}}, "query": "SELECT TOP 3 * FROM c"}"#,
        );
        plan(None, fixture.path(), None).unwrap();
    }
}
