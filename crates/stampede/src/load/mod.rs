//! HTTP load generation
//!
//! ```text
//!  LoadTestRunner ── ramp tick ──► VirtualUserSimulator × N
//!                                        │ (own ExecutionContext)
//!                                        ▼
//!                                  StepExecutor ──► Transport
//!                                        │
//!                                        ▼
//!                                  ResultRecorder ──► TestResults
//! ```
//!
//! Virtual users share nothing but the scenario (read-only), the transport
//! and the recorder. Transport failures and failed validations are recorded
//! as unsuccessful results and never abort a run.

mod analyzer;
mod context;
mod executor;
mod recorder;
mod runner;
mod scenario;
mod simulator;
mod transport;

pub use analyzer::{StepStats, TestResults, TestSummary, UNKNOWN_ERROR, VALIDATION_FAILED};
pub use context::{json_path, render_value, ExecutionContext};
pub use executor::{StepExecutor, ERROR_METRIC, REQUEST_METRIC};
pub use recorder::{
    ProgressCallback, RequestResult, ResultRecorder, TestRunMetrics, ValidationDetail,
    ValidationOutcome,
};
pub use runner::{LoadTestError, LoadTestRunner, LoadTestSuite, RampSchedule};
pub use scenario::{
    Expectation, ExtractRule, ExtractSource, HttpMethod, LoadScenario, Step, StepBody,
    ValidationRule, Validator,
};
pub use simulator::VirtualUserSimulator;
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
