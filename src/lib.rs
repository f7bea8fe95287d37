pub mod codec;
pub mod config;
pub mod error;
pub mod flush;
pub mod host;
pub mod keeper;
pub mod publisher;
pub mod record;
pub mod transport;

pub use config::Config;
pub use error::{Error, PublishError, Result};
pub use flush::{FlushReport, FlushStatus};
pub use host::OutputPlugin;
pub use keeper::{Keeper, KeeperOptions};
pub use record::{Record, Value};
