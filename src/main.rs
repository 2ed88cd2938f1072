//! Worker entry point: one binary, one subcommand per stage kind. Each
//! subcommand reads its configuration from the environment, initializes
//! logging, constructs the stage, and calls `run` (spec §6). Exit code 0 on
//! graceful stop, non-zero on a fatal startup or transport error.

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relay_pipeline::broker::{BrokerAdapter, InProcessBroker};
use relay_pipeline::config::{load_required_env, BatchMaxSize, CommonConfig, FilterThresholds, JoinerBarriers};
use relay_pipeline::protocol::constants;
use relay_pipeline::stage::fanout::{FanoutPolicy, ProducerGroup};
use relay_pipeline::stage::StageRuntime;
use relay_pipeline::stages::joiner::numeric_key_normalizer;
use relay_pipeline::stages::{
    Cleaner, Filter, FilterPredicate, Joiner, JoinerConfig, Mapper, MapperFunction, OutputBuilder,
    OutputBuilderConfig, ReduceFn, Reducer, ReducerConfig, Sorter, SorterConfig,
};
use relay_pipeline::router::SessionRouter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(author = "Keith Bugeja <keith.bugeja@um.edu.mt>")]
#[command(version = "0.1.0")]
#[command(about = "Worker process for the retail-analytics stream pipeline")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Accepts client connections and routes batches into the pipeline.
    Router,
    /// Projects a record down to a declared column subset.
    Cleaner,
    /// Drops records failing a configured predicate.
    Filter,
    /// Augments records with a derived column.
    Mapper,
    /// Per-session hash aggregation keyed on a column tuple.
    Reducer,
    /// Per-session, per-group bounded top-K.
    Sorter,
    /// Two-input base/stream join.
    Joiner,
    /// Projects to a query's published columns and tags the result kind.
    OutputBuilder,
}

fn env_list(values: &HashMap<String, String>, name: &str) -> Vec<String> {
    values
        .get(name)
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

fn producer_groups_from_env(values: &HashMap<String, String>) -> anyhow::Result<Vec<ProducerGroup>> {
    let endpoints = env_list(values, "PRODUCER_ENDPOINTS");
    if endpoints.is_empty() {
        anyhow::bail!("PRODUCER_ENDPOINTS must name at least one downstream endpoint");
    }
    let policy = match values.get("FANOUT_POLICY").map(String::as_str) {
        Some("broadcast") => FanoutPolicy::Broadcast,
        Some("key_sharded") => {
            let column = values
                .get("SHARD_COLUMN")
                .ok_or_else(|| anyhow::anyhow!("key_sharded fanout requires SHARD_COLUMN"))?;
            FanoutPolicy::KeySharded {
                column: column.clone(),
            }
        }
        _ => FanoutPolicy::RoundRobin,
    };
    Ok(vec![ProducerGroup::new(endpoints, policy)])
}

fn output_kind_from_env(values: &HashMap<String, String>) -> anyhow::Result<String> {
    values
        .get("OUTPUT_KIND")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("OUTPUT_KIND is required"))
}

fn required(values: &HashMap<String, String>, name: &str) -> anyhow::Result<String> {
    values
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{name} is required"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = run(cli.role).await {
        tracing::error!(error = %err, "worker exited with error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(role: Role) -> anyhow::Result<()> {
    match role {
        Role::Router => run_router().await,
        Role::Cleaner => run_cleaner().await,
        Role::Filter => run_filter().await,
        Role::Mapper => run_mapper().await,
        Role::Reducer => run_reducer().await,
        Role::Sorter => run_sorter().await,
        Role::Joiner => run_joiner().await,
        Role::OutputBuilder => run_output_builder().await,
    }
}

async fn run_router() -> anyhow::Result<()> {
    let values = load_required_env(&["LOGGING_LEVEL", "BIND_ADDR"])?;
    relay_pipeline::logging::init_logging(&values["LOGGING_LEVEL"]);

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));

    let mut cleaner_groups: HashMap<&'static str, ProducerGroup> = HashMap::new();
    for &kind in constants::CLIENT_RECORD_KIND_ORDER.iter() {
        let endpoints = env_list(&values, &format!("CLEANER_ENDPOINTS_{kind}"));
        if !endpoints.is_empty() {
            cleaner_groups.insert(kind, ProducerGroup::new(endpoints, FanoutPolicy::RoundRobin));
        }
    }

    let mut query_result_workers_amount: HashMap<&'static str, usize> = HashMap::new();
    for &tag in constants::QUERY_RESULT_KINDS.iter() {
        let amount = values
            .get(&format!("QUERY_RESULT_WORKERS_{tag}"))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1);
        query_result_workers_amount.insert(tag, amount);
    }

    let router = Arc::new(SessionRouter::new(broker, cleaner_groups, query_result_workers_amount));
    router.serve(&values["BIND_ADDR"]).await?;
    Ok(())
}

async fn run_cleaner() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);

    let columns = env_list(&values, "CLEANER_COLUMNS");
    if columns.is_empty() {
        anyhow::bail!("CLEANER_COLUMNS must name at least one column");
    }
    let output_kind = output_kind_from_env(&values)?;
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let logic = Arc::new(Cleaner::new(output_kind, columns));
    let runtime = StageRuntime::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        producer_groups,
        logic,
    );
    runtime.run().await?;
    Ok(())
}

async fn run_filter() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);

    let thresholds = FilterThresholds::from_env(&values)?;
    let column = required(&values, "FILTER_COLUMN")?;
    let predicate = match values.get("FILTER_PREDICATE").map(String::as_str) {
        Some("hour_range") => FilterPredicate::HourRange {
            column,
            min_hour: thresholds
                .min_hour
                .ok_or_else(|| anyhow::anyhow!("hour_range predicate requires MIN_HOUR"))?,
            max_hour: thresholds
                .max_hour
                .ok_or_else(|| anyhow::anyhow!("hour_range predicate requires MAX_HOUR"))?,
        },
        Some("min_final_amount") => FilterPredicate::MinFinalAmount {
            column,
            min_amount: thresholds.min_final_amount.ok_or_else(|| {
                anyhow::anyhow!("min_final_amount predicate requires MIN_FINAL_AMOUNT")
            })?,
        },
        Some("year_membership") | None => FilterPredicate::YearMembership {
            column,
            years: thresholds
                .years_to_keep
                .ok_or_else(|| anyhow::anyhow!("year_membership predicate requires YEARS_TO_KEEP"))?
                .into_iter()
                .collect(),
        },
        Some(other) => anyhow::bail!("unknown FILTER_PREDICATE: {other}"),
    };

    let output_kind = output_kind_from_env(&values)?;
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let logic = Arc::new(Filter::new(output_kind, predicate));
    let runtime = StageRuntime::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        producer_groups,
        logic,
    );
    runtime.run().await?;
    Ok(())
}

async fn run_mapper() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);

    let source = required(&values, "MAPPER_SOURCE_COLUMN")?;
    let target = required(&values, "MAPPER_TARGET_COLUMN")?;
    let function = match values.get("MAPPER_FUNCTION").map(String::as_str) {
        Some("year_month_of") => MapperFunction::YearMonthOf { source, target },
        Some("year_half_of") | None => MapperFunction::YearHalfOf { source, target },
        Some(other) => anyhow::bail!("unknown MAPPER_FUNCTION: {other}"),
    };

    let output_kind = output_kind_from_env(&values)?;
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let logic = Arc::new(Mapper::new(output_kind, function));
    let runtime = StageRuntime::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        producer_groups,
        logic,
    );
    runtime.run().await?;
    Ok(())
}

fn reduce_fn_from_env(values: &HashMap<String, String>, accumulator_column: &str) -> anyhow::Result<ReduceFn> {
    let accumulator_column = accumulator_column.to_string();
    match values.get("REDUCER_REDUCE_FN").map(String::as_str) {
        Some("count") => Ok(Box::new(|current, _record: &relay_pipeline::protocol::Record| current + 1.0)),
        Some("sum") | None => Ok(Box::new(move |current, record: &relay_pipeline::protocol::Record| {
            record
                .get(&accumulator_column)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| current + v)
                .unwrap_or(current)
        })),
        Some(other) => anyhow::bail!("unknown REDUCER_REDUCE_FN: {other}"),
    }
}

async fn run_reducer() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);
    let batch_max_size = BatchMaxSize::from_env(&values)?;

    let grouping_columns = env_list(&values, "REDUCER_GROUPING_COLUMNS");
    if grouping_columns.is_empty() {
        anyhow::bail!("REDUCER_GROUPING_COLUMNS must name at least one column");
    }
    let accumulator_column = required(&values, "REDUCER_ACCUMULATOR_COLUMN")?;
    let reduce = reduce_fn_from_env(&values, &accumulator_column)?;

    let output_kind = output_kind_from_env(&values)?;
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let logic = Arc::new(Reducer::new(
        output_kind,
        ReducerConfig {
            grouping_columns,
            accumulator_column,
            batch_max_size: batch_max_size.0,
            reduce,
        },
    ));
    let runtime = StageRuntime::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        producer_groups,
        logic,
    );
    runtime.run().await?;
    Ok(())
}

async fn run_sorter() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);
    let batch_max_size = BatchMaxSize::from_env(&values)?;

    let grouping_column = required(&values, "SORTER_GROUPING_COLUMN")?;
    let primary_key = required(&values, "SORTER_PRIMARY_KEY")?;
    let secondary_key = values
        .get("SORTER_SECONDARY_KEY")
        .cloned()
        .unwrap_or_else(|| primary_key.clone());
    let amount_per_group = values
        .get("SORTER_AMOUNT_PER_GROUP")
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("SORTER_AMOUNT_PER_GROUP is required"))?;

    let output_kind = output_kind_from_env(&values)?;
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let logic = Arc::new(Sorter::new(
        output_kind,
        SorterConfig {
            grouping_column,
            primary_key,
            secondary_key,
            amount_per_group,
            batch_max_size: batch_max_size.0,
        },
    ));
    let runtime = StageRuntime::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        producer_groups,
        logic,
    );
    runtime.run().await?;
    Ok(())
}

async fn run_joiner() -> anyhow::Result<()> {
    let mut names: Vec<&str> = vec!["LOGGING_LEVEL", "CONTROLLER_ID", "RABBITMQ_HOST", "NEXT_CONTROLLERS_AMOUNT"];
    names.extend_from_slice(&JoinerBarriers::NAMES);
    let values = load_required_env(&names)?;
    relay_pipeline::logging::init_logging(&values["LOGGING_LEVEL"]);
    let barriers = JoinerBarriers::from_env(&values)?;
    let controller_id: u32 = values["CONTROLLER_ID"]
        .parse()
        .map_err(|_| anyhow::anyhow!("CONTROLLER_ID must be an integer"))?;

    let join_key = required(&values, "JOIN_KEY")?;
    let base_consumer_endpoint = required(&values, "BASE_CONSUMER_ENDPOINT")?;
    let stream_consumer_endpoint = required(&values, "STREAM_CONSUMER_ENDPOINT")?;
    let output_kind = output_kind_from_env(&values)?;
    let producer_groups = producer_groups_from_env(&values)?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let joiner = Arc::new(Joiner::new(
        controller_id,
        broker,
        base_consumer_endpoint,
        stream_consumer_endpoint,
        producer_groups,
        JoinerConfig {
            output_kind,
            join_key,
            normalize: numeric_key_normalizer(),
            base_prev_controllers_amount: barriers.base_data_prev_controllers_amount,
            stream_prev_controllers_amount: barriers.stream_data_prev_controllers_amount,
        },
    ));
    joiner.run().await?;
    Ok(())
}

async fn run_output_builder() -> anyhow::Result<()> {
    let values = load_required_env(&CommonConfig::NAMES)?;
    let common = CommonConfig::from_env(&values)?;
    relay_pipeline::logging::init_logging(&common.logging_level);

    let result_kind = required(&values, "RESULT_KIND")?;
    let columns = env_list(&values, "OUTPUT_COLUMNS");
    if columns.is_empty() {
        anyhow::bail!("OUTPUT_COLUMNS must name at least one column");
    }
    let consumer_endpoint = required(&values, "CONSUMER_ENDPOINT")?;

    let broker: Arc<dyn BrokerAdapter> = Arc::new(InProcessBroker::new(256));
    let builder = Arc::new(OutputBuilder::new(
        common.controller_id,
        broker,
        consumer_endpoint,
        common.prev_controllers_amount,
        OutputBuilderConfig {
            result_kind,
            columns,
        },
    ));
    builder.run().await?;
    Ok(())
}
