mod diagnostics;
mod engine;
mod error;
mod interact;
mod navigate;
mod observer;
mod runner;
mod session;
mod surface;

pub use diagnostics::{sanitize_channel_name, DiagnosticCapturer};
pub use engine::{
    ChannelPhase, DiscoveryEngine, DiscoveryPolicy, DiscoveryResult, DiscoveryStatus,
};
pub use error::{BrowserError, BrowserResult};
pub use interact::{build_steps, InteractionSequencer, InteractionStep, StepOutcome};
pub use navigate::WaitPolicy;
pub use observer::{
    ConfirmationPolicy, ConfirmationTracker, Direction, DirectionFilter, ManifestMatcher,
    ResourceKind, TrafficEvent, TrafficObserver,
};
pub use runner::{DiscoveryRunner, RegionReport};
pub use session::{
    CdpSession, CdpSessionFactory, DiscoverySession, SessionFactory, SessionLauncher,
};
pub use surface::{CdpSurface, DiscoverySurface, ObservationSpec};
