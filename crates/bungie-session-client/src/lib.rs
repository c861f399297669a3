//! Client side of a cookie-backed Bungie.net session
//!
//! [`SessionMachine`] is the pure transition table: it starts pending, applies
//! server answers and transport failures, guards against overlapping calls and
//! says when the next refresh is due. [`SessionController`] runs it on tokio
//! against a [`SessionTransport`], owns the refresh timer and publishes state
//! changes to subscribers.

pub mod clock;
pub mod controller;
pub mod error;
pub mod machine;
pub mod settings;
pub mod state;
pub mod transport;

pub use clock::{Clock, SystemClock, TokioClock};
pub use controller::{SessionController, Subscription};
pub use error::{Error, Result};
pub use machine::{Command, SessionEvent, SessionMachine};
pub use settings::ClientSettings;
pub use state::{ClientError, ClientSessionState, ClientStatus};
pub use transport::{HttpTransport, SessionTransport};
