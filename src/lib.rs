//! Sandboxed execution of model-generated analysis programs.
//!
//! A candidate program is validated against a [`CapabilityPolicy`] before
//! anything runs. Accepted programs run on the built-in interpreter, on their
//! own thread, under a wall-clock watchdog, with only the dataset and the
//! policy's helpers in scope. The captured result is classified into a
//! size-bounded payload.
//!
//! ```rust,no_run
//! use querysandbox::{create_default_sandbox, SandboxReply, Table};
//! use std::sync::Arc;
//!
//! # async fn demo() -> querysandbox::Result<()> {
//! let sandbox = create_default_sandbox()?;
//! let data = Arc::new(Table::from_json_str(r#"[{"sales": 1.5}, {"sales": 2.5}]"#)?);
//! let reply = sandbox.ask("result = df['sales'].sum()", data).await;
//! if let SandboxReply::Answer(_) = &reply {
//!     println!("{}", reply.user_message());
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
mod builtins;
pub mod chart;
pub mod classifier;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod fault;
mod format;
pub mod interpreter;
mod methods;
pub mod native;
mod ops;
pub mod policy;
pub mod sandbox;
pub mod sandbox_builder;
pub mod syntax;
pub mod table;
pub mod value;

pub use analyzer::{validate, ValidationVerdict, Validator, Violation};
pub use chart::{ChartKind, ChartSpec};
pub use classifier::{classify, ClassifiedResult, ResultPayload};
pub use config::{ResourceLimits, SandboxConfig, SecurityProfile};
pub use context::ExecutionContext;
pub use engine::{EngineCapabilities, ExecutionOptions, SandboxEngine};
pub use errors::{Result, SandboxError};
pub use executor::{CapturedValue, ExecutionOutcome, RESULT_VARIABLES};
pub use extract::{analysis_prompt, extract_program, prompt_for_table};
pub use fault::FaultKind;
pub use native::NativeEngine;
pub use policy::{CapabilityPolicy, CapabilityPolicyBuilder, NodeKind, PolicyManager};
pub use sandbox::{QuerySandbox, SandboxReply};
pub use sandbox_builder::{
    create_default_sandbox, create_sandbox_from_env, create_sandbox_with_options, SandboxOptions,
};
pub use table::{Column, DType, Scalar, Table, TableError};
