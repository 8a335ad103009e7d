//! Security module for codeagent: workspace confinement, redaction, tool
//! policy, and audit logging.
//!
//! Provides:
//! - **Path confinement**: every sandbox path resolves under the workspace root
//! - **Redaction**: credential-looking values are masked before the model sees them
//! - **Tool policy**: allow/deny lists and the RUN_COMMAND switch
//! - **Audit logging**: structured record of tool runs and change decisions

pub mod allowlist;
pub mod audit;
pub mod path;
pub mod redact;

pub use allowlist::{ToolCheckResult, ToolPolicy};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use path::{PathError, normalize_lexically, normalize_rel_path, relative_unix, resolve_under_workspace};
pub use redact::redact_sensitive;
