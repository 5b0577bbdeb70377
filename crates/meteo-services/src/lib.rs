pub mod app;
pub mod broadcast;
pub mod error;
pub mod event;
pub mod model;
pub mod reading_store;
pub mod relay;
pub mod scheduler;
pub mod store;

pub use app::App;
pub use broadcast::{Broadcaster, LocalBroadcaster};
pub use error::ServiceError;
pub use event::{Event, EventMeta, ExternalReading};
pub use model::{Reading, ReadingDraft};
pub use reading_store::SqliteReadingStore;
pub use relay::{BusTransport, ConnectionState, InboundStream, NatsTransport, Relay, RelayError};
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerState};
pub use store::{ReadingStore, StoreError, StoreResult};
