//! # EVCS Link
//!
//! Line-protocol engine between an EV charging station controller and a
//! supervising process over a half-duplex serial link.
//!
//! ## Architecture
//!
//! ```text
//!   Charger controller
//!         │ bytes, "\r\n" terminated
//!         ▼
//! ┌──────────────────┐  inbound lines   ┌──────────────────┐
//! │  LineTransport   │ ───────────────► │  ProtocolEngine  │──► SessionRegistry
//! │  (read / write)  │ ◄─────────────── │  (grammar + FSM) │        │
//! └──────────────────┘ outbound commands └──────────────────┘   RegistryView
//!                                                               (monitoring)
//! ```
//!
//! The transport and the engine run as separate tasks and only share the two
//! queues and a cancellation token. The engine is the only writer of the
//! registry.
//!
//! ## Controller Exchanges
//!
//! | Lines | Effect |
//! |-------|--------|
//! | `LADER 1 lebt` | Liveness logged |
//! | `Abrechnung auf`, `Tag ID = 04 A1 B2`, `Verstanden` | Session opened, `OK_Lader1!` sent |
//! | `Tag ID = 04 A1 B2`, `total FERTIG` | Session closed |
//!
//! ## Usage
//!
//! ```no_run
//! use evcs_link::{ChargerLink, LinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = ChargerLink::spawn(LinkConfig::default(), tokio::io::stdin(), tokio::io::stdout())?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     println!("{} open session(s)", link.sessions().len());
//!     link.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod grammar;
pub mod link;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use channel::{link_channels, Command, EngineEnds, TransportEnds};
pub use config::LinkConfig;
pub use engine::{EngineState, LogSink, ProtocolEngine, SessionSink};
pub use error::{FrameError, LinkError, ProtocolError, RegistryError, SessionError};
pub use frame::{Frame, FrameAction, FrameDecoder, FrameOutcome, FrameRequest, MeteringDecoder};
pub use grammar::{Grammar, LineKind, LineMatch};
pub use link::{ChargerLink, LinkBuilder};
pub use registry::{RegistryView, SessionRegistry};
pub use session::Session;
pub use transport::{LineBuffer, LineTransport};
pub use types::{SessionId, StationId, Tag};
