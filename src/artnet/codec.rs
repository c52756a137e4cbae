//! Art-Net wire codec. Ported from the reference implementation in
//! `network/artnet.rs`, restricted to the opcodes `spec.md` §1 scopes in
//! (DMX, Poll, PollReply) plus an `Other` fallback for everything else, and
//! made fallible so the Bridge Loop can log a reason on decode failure.

use std::net::{Ipv4Addr, SocketAddr};

use crate::artnet::dmx::DMXData;
use crate::error::DecodeError;

pub const ARTNET_HEADER: &[u8] = b"Art-Net\0";
pub const ARTNET_PORT: u16 = 6454;
pub const PROTOCOL_VERSION: u16 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtNetOpCode {
    OpPoll,
    OpPollReply,
    OpDmx,
    Other(u16),
}

impl From<u16> for ArtNetOpCode {
    fn from(value: u16) -> Self {
        match value {
            0x2000 => ArtNetOpCode::OpPoll,
            0x2100 => ArtNetOpCode::OpPollReply,
            0x5000 => ArtNetOpCode::OpDmx,
            other => ArtNetOpCode::Other(other),
        }
    }
}

/// Parsed ArtPollReply, carrying the subset of fields this bridge re-exposes
/// via the Node Registry (`spec.md` §3 `ArtNetNode`) plus the raw fields
/// needed to construct our own reply in `handle_poll`.
#[derive(Debug, Clone)]
pub struct ArtPollReply {
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub short_name: String,
    pub long_name: String,
    pub node_report: String,
    pub mac_address: [u8; 6],
}

#[derive(Debug, Clone)]
pub enum DecodedPacket {
    Dmx(DMXData),
    Poll,
    PollReply(ArtPollReply),
    Other(u16),
}

/// Decode a raw UDP payload into a typed Art-Net packet.
pub fn decode(data: &[u8], source: SocketAddr) -> Result<DecodedPacket, DecodeError> {
    if data.len() < 10 {
        return Err(DecodeError::TooShort { len: data.len() });
    }
    if &data[0..8] != ARTNET_HEADER {
        return Err(DecodeError::BadHeader);
    }

    let opcode = ArtNetOpCode::from(u16::from_le_bytes([data[8], data[9]]));

    match opcode {
        ArtNetOpCode::OpPoll => Ok(DecodedPacket::Poll),
        ArtNetOpCode::OpPollReply => decode_poll_reply(data),
        ArtNetOpCode::OpDmx => decode_dmx(data, source),
        ArtNetOpCode::Other(code) => Ok(DecodedPacket::Other(code)),
    }
}

const POLL_REPLY_MIN_LEN: usize = 207;

fn decode_poll_reply(data: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if data.len() < POLL_REPLY_MIN_LEN {
        return Err(DecodeError::TruncatedPollReply {
            len: data.len(),
            needed: POLL_REPLY_MIN_LEN,
        });
    }

    let ip_address = Ipv4Addr::new(data[10], data[11], data[12], data[13]);
    let port = u16::from_le_bytes([data[14], data[15]]);
    let short_name = extract_string(&data[26..44]);
    let long_name = extract_string(&data[44..108]);
    let node_report = extract_string(&data[108..172]);

    let mut mac_address = [0u8; 6];
    if data.len() >= 207 {
        mac_address.copy_from_slice(&data[201..207]);
    }

    Ok(DecodedPacket::PollReply(ArtPollReply {
        ip_address,
        port,
        short_name,
        long_name,
        node_report,
        mac_address,
    }))
}

const DMX_HEADER_LEN: usize = 18;

fn decode_dmx(data: &[u8], source: SocketAddr) -> Result<DecodedPacket, DecodeError> {
    if data.len() < DMX_HEADER_LEN {
        return Err(DecodeError::TruncatedDmx {
            len: data.len(),
            needed: DMX_HEADER_LEN,
        });
    }

    let sequence = data[12];
    let physical = data[13];
    let sub_uni = data[14];
    let net = data[15];
    let length = u16::from_be_bytes([data[16], data[17]]).min(512);

    let body_end = DMX_HEADER_LEN + length as usize;
    if data.len() < body_end {
        return Err(DecodeError::TruncatedDmx {
            len: data.len(),
            needed: body_end,
        });
    }

    let channels = data[DMX_HEADER_LEN..body_end].to_vec();

    let dmx = DMXData::new(
        sequence,
        physical,
        sub_uni,
        net,
        length,
        channels,
        source.ip(),
        source.port(),
    )?;

    Ok(DecodedPacket::Dmx(dmx))
}

fn extract_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Build an ArtPoll broadcast frame.
pub fn encode_poll() -> Vec<u8> {
    let mut packet = Vec::with_capacity(14);
    packet.extend_from_slice(ARTNET_HEADER);
    packet.extend_from_slice(&0x2000u16.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet.push(0x02); // TalkToMe: send ArtPollReply when conditions change
    packet.push(0x10); // DiagPriority: low
    packet
}

/// Parameters for building this node's ArtPollReply, sourced from `Config`.
pub struct PollReplyParams<'a> {
    pub local_ip: Ipv4Addr,
    pub short_name: &'a str,
    pub long_name: &'a str,
}

const ESTA_MANUFACTURER: [u8; 2] = [b'D', b'V'];
const NODE_REPORT: &str = "DMX Viewer Ready";

/// Build this node's ArtPollReply frame, per `spec.md` §4.G "Poll handler".
pub fn encode_poll_reply(params: &PollReplyParams<'_>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(239);
    packet.extend_from_slice(ARTNET_HEADER);
    packet.extend_from_slice(&0x2100u16.to_le_bytes());
    packet.extend_from_slice(&params.local_ip.octets());
    packet.extend_from_slice(&ARTNET_PORT.to_le_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes()); // VersInfo
    packet.push(0); // NetSwitch
    packet.push(0); // SubSwitch
    packet.extend_from_slice(&0u16.to_be_bytes()); // Oem
    packet.push(0); // UbeaVersion
    packet.push(0); // Status1
    packet.extend_from_slice(&ESTA_MANUFACTURER);
    push_padded(&mut packet, params.short_name, 18);
    push_padded(&mut packet, params.long_name, 64);
    push_padded(&mut packet, NODE_REPORT, 64);
    packet.extend_from_slice(&0u16.to_be_bytes()); // NumPorts
    packet.extend_from_slice(&[0u8; 4]); // PortTypes
    packet.extend_from_slice(&[0u8; 4]); // GoodInput
    packet.extend_from_slice(&[0u8; 4]); // GoodOutput
    packet.extend_from_slice(&[0u8; 4]); // SwIn
    packet.extend_from_slice(&[0u8; 4]); // SwOut
    packet.extend_from_slice(&[0u8; 7]); // Spare0-2, Style (node), filler
    packet.extend_from_slice(&[0u8; 6]); // MacAddress (unknown, left zeroed)
    packet
}

fn push_padded(buf: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let take = bytes.len().min(width.saturating_sub(1));
    buf.extend_from_slice(&bytes[..take]);
    buf.resize(buf.len() + (width - take), 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn src() -> SocketAddr {
        "192.0.2.7:6454".parse().unwrap()
    }

    #[test]
    fn rejects_frames_without_header() {
        let err = decode(b"not-art-net-at-all", src()).unwrap_err();
        assert!(matches!(err, DecodeError::BadHeader));
    }

    #[test]
    fn decodes_dmx_frame() {
        let mut frame = Vec::new();
        frame.extend_from_slice(ARTNET_HEADER);
        frame.extend_from_slice(&0x5000u16.to_le_bytes());
        frame.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        frame.push(1); // sequence
        frame.push(0); // physical
        frame.push(5); // sub-uni
        frame.push(2); // net
        frame.extend_from_slice(&3u16.to_be_bytes()); // length
        frame.extend_from_slice(&[255, 128, 64]);

        let decoded = decode(&frame, src()).unwrap();
        let DecodedPacket::Dmx(dmx) = decoded else {
            panic!("expected Dmx variant");
        };
        assert_eq!(dmx.sequence, 1);
        assert_eq!(dmx.net, 2);
        assert_eq!(dmx.sub_uni, 5);
        assert_eq!(dmx.length, 3);
        assert_eq!(&dmx.data[..3], &[255, 128, 64]);
        assert!(dmx.data[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn decodes_poll_frame() {
        let frame = encode_poll();
        assert!(matches!(decode(&frame, src()).unwrap(), DecodedPacket::Poll));
    }

    #[test]
    fn unknown_opcode_is_other_not_error() {
        let mut frame = Vec::new();
        frame.extend_from_slice(ARTNET_HEADER);
        frame.extend_from_slice(&0x9999u16.to_le_bytes());
        assert!(matches!(
            decode(&frame, src()).unwrap(),
            DecodedPacket::Other(0x9999)
        ));
    }

    #[test]
    fn poll_reply_round_trips_short_name_and_port() {
        let params = PollReplyParams {
            local_ip: Ipv4Addr::new(192, 0, 2, 1),
            short_name: "DMX Viewer",
            long_name: "DMX Viewer Application",
        };
        let frame = encode_poll_reply(&params);
        let decoded = decode(&frame, src()).unwrap();
        let DecodedPacket::PollReply(reply) = decoded else {
            panic!("expected PollReply variant");
        };
        assert_eq!(reply.short_name, "DMX Viewer");
        assert_eq!(reply.port, ARTNET_PORT);
        assert_eq!(reply.ip_address, Ipv4Addr::new(192, 0, 2, 1));
    }
}
