//! Packet catalog
//!
//! Every packet type carries a fixed 32-bit id. Direction is a compile-time
//! property: client-to-server types implement [`ClientPacket`] (decode only),
//! server-to-client types implement [`ServerPacket`] (encode only). A type
//! used in the wrong direction simply does not have the method.

pub mod auth;
pub mod battle;
pub mod lobby;

use bytes::Bytes;

use super::codec::{BufferReader, BufferWriter, CodecError};

/// A packet the server decodes from a client frame
pub trait ClientPacket: Sized + Send + 'static {
    const ID: i32;
    const NAME: &'static str;

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError>;
}

/// A packet the server encodes for sending to a client
pub trait ServerPacket {
    const ID: i32;
    const NAME: &'static str;

    fn write(&self, w: &mut BufferWriter);
}

/// Encode a packet into a complete frame: 4-byte big-endian id + payload.
pub fn encode<P: ServerPacket>(packet: &P) -> Bytes {
    let mut w = BufferWriter::with_capacity(64);
    w.write_i32(P::ID);
    packet.write(&mut w);
    w.freeze()
}

/// Split an inbound frame into (packet id, payload). Frames shorter than the
/// id header are malformed.
pub fn split_frame(frame: &[u8]) -> Result<(i32, &[u8]), CodecError> {
    let mut r = BufferReader::new(frame);
    let id = r.read_i32()?;
    Ok((id, &frame[4..]))
}

#[cfg(test)]
pub fn encode_frame_for_test(id: i32, payload: &[u8]) -> Vec<u8> {
    let mut w = BufferWriter::with_capacity(4 + payload.len());
    w.write_i32(id);
    w.write_bytes(payload);
    w.freeze().to_vec()
}

#[cfg(test)]
mod tests {
    use super::battle::{MoveCommand, MovePacket, RailgunShotCommand};
    use super::*;
    use crate::protocol::Vector3;

    #[test]
    fn encode_prefixes_the_id() {
        let packet = MovePacket {
            nickname: Some("alpha".into()),
            position: Some(Vector3::new(1.0, 2.0, 3.0)),
            orientation: None,
            linear_velocity: None,
            angular_velocity: None,
            control: 4,
        };
        let frame = encode(&packet);
        let (id, payload) = split_frame(&frame).unwrap();
        assert_eq!(id, MovePacket::ID);
        assert!(!payload.is_empty());
    }

    #[test]
    fn short_frame_is_a_framing_error() {
        assert!(split_frame(&[0, 1]).is_err());
    }

    #[test]
    fn command_decode_round_trip_via_relay_fields() {
        // A client move command and the relayed move packet share their
        // field encoding apart from the nickname prefix.
        let mut w = BufferWriter::new();
        w.write_i32(555);
        w.write_optional_vector3(Some(Vector3::new(10.0, 20.0, 30.0)));
        w.write_optional_vector3(Some(Vector3::new(0.0, 0.0, 1.0)));
        w.write_optional_vector3(None);
        w.write_optional_vector3(None);
        w.write_i8(-2);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        let cmd = MoveCommand::read(&mut r).unwrap();
        assert_eq!(cmd.client_time, 555);
        assert_eq!(cmd.position, Some(Vector3::new(10.0, 20.0, 30.0)));
        assert_eq!(cmd.angular_velocity, None);
        assert_eq!(cmd.control, -2);
        assert!(!r.has_remaining());
    }

    #[test]
    fn railgun_command_zips_parallel_target_arrays() {
        let mut w = BufferWriter::new();
        w.write_i32(900);
        w.write_optional_vector3(Some(Vector3::new(5.0, 6.0, 7.0)));
        w.write_string_array(&["bravo".into(), "delta".into()]);
        w.write_vector3_array(&[Some(Vector3::new(1.0, 1.0, 1.0)), None]);
        // Shorter than the nickname list on purpose.
        w.write_i16_array(&[4]);
        w.write_vector3_array(&[None, None]);
        w.write_vector3_array(&[]);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        let cmd = RailgunShotCommand::read(&mut r).unwrap();
        assert_eq!(cmd.client_time, 900);
        assert_eq!(cmd.position, Some(Vector3::new(5.0, 6.0, 7.0)));
        assert_eq!(cmd.targets.len(), 2);
        assert_eq!(cmd.targets[0].nickname, "bravo");
        assert_eq!(cmd.targets[0].position, Some(Vector3::new(1.0, 1.0, 1.0)));
        assert_eq!(cmd.targets[0].incarnation, 4);
        assert_eq!(cmd.targets[1].nickname, "delta");
        assert_eq!(cmd.targets[1].incarnation, 0);
        assert_eq!(cmd.targets[1].orientation, None);
        assert!(!r.has_remaining());
    }
}
