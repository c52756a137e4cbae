pub mod codec;
pub mod dmx;
pub mod node;

pub use codec::{decode, ArtNetOpCode, DecodedPacket};
pub use dmx::DMXData;
pub use node::{ArtNetNode, NodeRegistry};
