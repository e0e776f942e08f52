//! Frame stream: packet parsing, reassembly and sample reordering

pub mod assembler;
pub mod listener;
pub mod packet;
pub mod reorder;

pub use assembler::{AssemblerStats, FrameAssembler};
pub use listener::FrameListener;
pub use packet::{FRAME_PACKET_HEADER_SIZE, FRAME_PACKET_SIGNATURE, FramePacketHeader, encode_packet};
pub use reorder::{CHANNEL_MAP, reorder, restore_acquisition_order};
