pub mod action_executor;
pub mod cdp;
pub mod channel;
pub mod context_resolver;
pub mod diagnostics;
pub mod dispatcher;
pub mod event_listener;
pub mod models;
pub mod recording;
pub mod runtime;
pub mod session_manager;
pub mod session_store;

pub use action_executor::{ActionExecutor, ActionOutcome, ActionState, TypedAction};
pub use cdp::CdpChannel;
pub use channel::{CommandChannel, EventSink, ProtocolCommand, ProtocolEvent};
pub use context_resolver::ContextResolver;
pub use diagnostics::{Diagnostics, DiagnosticsSink, LogLevel};
pub use dispatcher::CommandDispatcher;
pub use models::{
    ActionEvent, CommandResult, ContextInfo, PageMap, Resolution, SessionStatus, TabId, TabInfo,
};
pub use recording::{Recorder, RecorderState, Segment, SkillDraft, assign_segments};
pub use runtime::TabRuntime;
pub use session_manager::{SessionManager, TaskGuard};
pub use session_store::{Session, SessionStore};
