// Purpose: voice admission, partial allocation and per-channel note handling
// This layer sits above the synthesis units and decides which notes get them

pub mod channel;
pub mod driver;
pub mod engine;
pub mod error;
pub mod list;
pub mod message;
pub mod pool;
pub mod voice;

pub use channel::{Channel, ChannelKind, Controllers};
pub use driver::{ReportHandler, UnitDriver, UnitStart};
pub use engine::{Engine, NoteOn};
pub use error::NoteDropped;
pub use message::{MessageReceiver, SynthMessage};
pub use pool::{ResourcePool, UnitId, UnitState, VoiceId};
pub use voice::{Voice, VoiceState};
