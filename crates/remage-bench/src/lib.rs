pub mod collect;
pub mod config;
pub mod extract;
pub mod invoke;
pub mod pool;
pub mod report;
pub mod runner;
pub mod stats;
pub mod store;
pub mod submit;
pub mod template;
pub mod trial;

pub use collect::{collect_results, CollectOutcome};
pub use config::{ClusterConfig, Config, ExecutionMode, SimulationConfig, TestConfig};
pub use extract::{extract_event_rate, extract_runtime};
pub use invoke::{build_trial_command, CommandSpec, Invoker, ProcessInvoker, ScriptedInvoker};
pub use report::{build_report, load_results, print_table, save_json, ScalingReport, ScalingRow};
pub use runner::{OverallResultSet, SimulationRunner};
pub use stats::{OptionalSummary, Summary};
pub use store::{AggregateResult, RawSamples, Resumption};
pub use submit::{JobSubmitter, SubmitOutcome, SubmittedJob};
pub use template::{expand_template, load_template, MacroValues};
pub use trial::{TrialContext, TrialRecord};
