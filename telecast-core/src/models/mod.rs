//! Data model: channel catalog records, queue entries, and slot naming.

mod channel;
mod id;
mod movie;
mod slot;

pub use channel::{ChannelRecord, ChannelStatus, QueueEntry, ScheduleRow};
pub use id::{generate_id, ChannelId};
pub use movie::{EnqueueMovieRequest, Movie};
pub use slot::{Slot, PUBLIC_MASTER, PUBLIC_STREAM};
