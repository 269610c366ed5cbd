mod packet;
mod snapshot_id;

pub use packet::{MAX_SNAPSHOTS_PER_PACKET, PACKET_HEADER_LEN, PacketError, PacketReader, Snapshots};
pub use snapshot_id::{IdRejected, LocalIdGenerator, RemoteIdReceptor};
