//! The Xacto wire protocol.
//!
//! A full-duplex TCP connection carries "packets" between a client and the
//! server. Each packet is a fixed 14-byte header with multi-byte fields in
//! network byte order, optionally followed by a payload whose length the
//! header specifies:
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 1    | `type`           |
//! | 1      | 1    | `status`         |
//! | 2      | 1    | `null`           |
//! | 3      | 4    | `size`           |
//! | 7      | 4    | `timestamp_sec`  |
//! | 11     | 4    | `timestamp_nsec` |
//!
//! A PUT request is followed by two DATA packets (key, then value), a GET
//! request by one DATA packet (key), and a COMMIT by nothing. The server
//! answers with a REPLY packet carrying a status; a REPLY to a successful
//! GET is immediately followed by one DATA packet with the value, where
//! `null = 1` marks the null blob.

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::data::Blob;
use crate::error::{CResult, Error};
use crate::transaction::Status;

/// Length of the fixed packet header.
pub const HEADER_LEN: usize = 14;

/// Largest payload a single DATA packet may carry.
pub const MAX_PAYLOAD: u32 = i32::MAX as u32;

/// Packet types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Put = 1,
    Get = 2,
    Data = 3,
    Commit = 4,
    Reply = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        match code {
            1 => Ok(PacketType::Put),
            2 => Ok(PacketType::Get),
            3 => Ok(PacketType::Data),
            4 => Ok(PacketType::Commit),
            5 => Ok(PacketType::Reply),
            other => Err(Error::InvalidData(format!("unknown packet type {}", other))),
        }
    }
}

/// One protocol packet: the fixed header plus, for DATA packets, the
/// payload. The `size` field on the wire is always `payload.len()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub ptype: PacketType,
    pub status: Status,
    pub null: bool,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
    pub payload: Bytes,
}

impl Packet {
    fn stamped(ptype: PacketType, status: Status, null: bool, payload: Bytes) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Packet {
            ptype,
            status,
            null,
            timestamp_sec: now.as_secs() as u32,
            timestamp_nsec: now.subsec_nanos(),
            payload,
        }
    }

    /// A request header packet: PUT, GET or COMMIT.
    pub fn request(ptype: PacketType) -> Self {
        Packet::stamped(ptype, Status::Pending, false, Bytes::new())
    }

    /// A reply packet with the given status and no payload.
    pub fn reply(status: Status) -> Self {
        Packet::stamped(PacketType::Reply, status, false, Bytes::new())
    }

    /// A DATA packet carrying the given blob; the null blob becomes a
    /// `null = 1` packet without content bytes.
    pub fn data(blob: &Blob) -> Self {
        Packet::stamped(PacketType::Data, Status::Pending, blob.is_null(), blob.bytes())
    }

    /// Encodes the header and payload into a single buffer, multi-byte
    /// fields in network byte order.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.ptype as u8);
        buf.put_u8(self.status as u8);
        buf.put_u8(self.null as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(self.timestamp_sec);
        buf.put_u32(self.timestamp_nsec);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a fixed header; the payload, if any, is read separately.
    /// Returns the packet (payload still empty) and the payload size.
    fn decode_header(header: &[u8; HEADER_LEN]) -> CResult<(Packet, u32)> {
        let mut cursor = Cursor::new(&header[..]);
        let ptype = PacketType::try_from(ReadBytesExt::read_u8(&mut cursor)?)?;
        let status = Status::try_from(ReadBytesExt::read_u8(&mut cursor)?)?;
        let null = ReadBytesExt::read_u8(&mut cursor)? != 0;
        let size = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)?;
        if size > MAX_PAYLOAD {
            return Err(Error::InvalidData(format!("payload size {} out of range", size)));
        }
        let timestamp_sec = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)?;
        let timestamp_nsec = ReadBytesExt::read_u32::<BigEndian>(&mut cursor)?;
        let packet =
            Packet { ptype, status, null, timestamp_sec, timestamp_nsec, payload: Bytes::new() };
        Ok((packet, size))
    }
}

/// Send a packet, followed by its payload, if any. Short writes are
/// retried until the packet is out.
pub async fn send_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> CResult<()> {
    trace!("send {:?} ({} payload byte(s))", packet.ptype, packet.payload.len());
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive one packet, blocking until it is complete. Short reads are
/// retried; EOF before or inside a packet surfaces as `Error::Io`.
pub async fn recv_packet<R: AsyncRead + Unpin>(reader: &mut R) -> CResult<Packet> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (mut packet, size) = Packet::decode_header(&header)?;
    if size > 0 {
        let mut payload = vec![0u8; size as usize];
        reader.read_exact(&mut payload).await?;
        packet.payload = Bytes::from(payload);
    }
    trace!("recv {:?} ({} payload byte(s))", packet.ptype, packet.payload.len());
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{Rng, RngCore};

    async fn roundtrip(packet: &Packet) -> Packet {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        send_packet(&mut client, packet).await.unwrap();
        recv_packet(&mut server).await.unwrap()
    }

    #[tokio::test]
    async fn request_roundtrip() {
        for ptype in [PacketType::Put, PacketType::Get, PacketType::Commit] {
            let packet = Packet::request(ptype);
            let received = roundtrip(&packet).await;
            assert_eq!(received, packet);
            assert!(received.payload.is_empty());
        }
    }

    #[tokio::test]
    async fn reply_roundtrip() {
        for status in [Status::Pending, Status::Committed, Status::Aborted] {
            let received = roundtrip(&Packet::reply(status)).await;
            assert_eq!(received.ptype, PacketType::Reply);
            assert_eq!(received.status, status);
        }
    }

    #[tokio::test]
    async fn data_roundtrip_preserves_payload() {
        let mut content = vec![0u8; rand::thread_rng().gen_range(1..4096)];
        rand::thread_rng().fill_bytes(&mut content);
        let packet = Packet::data(&Blob::new(&content));
        let received = roundtrip(&packet).await;
        assert_eq!(received.ptype, PacketType::Data);
        assert!(!received.null);
        assert_eq!(received.payload.len(), content.len());
        assert_eq!(&received.payload[..], &content[..]);
    }

    #[tokio::test]
    async fn null_data_has_no_content() {
        let received = roundtrip(&Packet::data(&Blob::null())).await;
        assert_eq!(received.ptype, PacketType::Data);
        assert!(received.null);
        assert!(received.payload.is_empty());
    }

    #[tokio::test]
    async fn eof_mid_header_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[1u8, 0, 0]).await.unwrap();
        drop(client);
        assert!(matches!(recv_packet(&mut server).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn eof_mid_payload_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buf = Packet::data(&Blob::new(b"truncated")).encode();
        buf.truncate(HEADER_LEN + 3);
        client.write_all(&buf).await.unwrap();
        drop(client);
        assert!(matches!(recv_packet(&mut server).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buf = Packet::request(PacketType::Commit).encode();
        buf[0] = 9;
        client.write_all(&buf).await.unwrap();
        assert!(matches!(recv_packet(&mut server).await, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn unknown_status_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buf = Packet::reply(Status::Committed).encode();
        buf[1] = 7;
        client.write_all(&buf).await.unwrap();
        assert!(matches!(recv_packet(&mut server).await, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut buf = Packet::request(PacketType::Put).encode();
        buf[3..7].copy_from_slice(&u32::MAX.to_be_bytes());
        client.write_all(&buf).await.unwrap();
        assert!(matches!(recv_packet(&mut server).await, Err(Error::InvalidData(_))));
    }

    #[test]
    fn header_layout_is_fixed() {
        let packet = Packet::data(&Blob::new(b"abc"));
        let buf = packet.encode();
        assert_eq!(buf.len(), HEADER_LEN + 3);
        assert_eq!(buf[0], PacketType::Data as u8);
        assert_eq!(buf[1], Status::Pending as u8);
        assert_eq!(buf[2], 0);
        assert_eq!(&buf[3..7], &3u32.to_be_bytes());
        assert_eq!(&buf[HEADER_LEN..], b"abc");
    }
}
