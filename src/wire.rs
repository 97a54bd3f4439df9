//! Fixed-width message framing over stream sockets
//!
//! Every dialog is a bare sequence of fixed-width fields with no length
//! header: a one-byte role discriminator, an optional request byte, then
//! 256-byte zero-padded filenames, native-endian 32/64-bit integers, a
//! 4096-byte zero-padded comma-separated id list, and file payloads preceded
//! by a 16-byte ASCII decimal size. A short read or write on any field
//! terminates the dialog; recovery happens at the dialog boundary, never by
//! partial retry.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{MeshError, MeshResult};

/// Loopback host every overlay link dials; the topology assumes all members
/// run on one machine.
pub const HOST: &str = "127.0.0.1";

/// Dial a member's listen port on the loopback host.
pub async fn connect(port: i32) -> MeshResult<TcpStream> {
    TcpStream::connect((HOST, port as u16))
        .await
        .map_err(|source| MeshError::Connect { port, source })
}

/// Zero-padded filename buffer width. Longer names are truncated to 255 bytes
/// so the buffer always carries a terminating NUL.
pub const FILENAME_LEN: usize = 256;

/// Zero-padded comma-separated id list width; an empty list means "not found".
pub const ID_LIST_LEN: usize = 4096;

/// ASCII decimal file-size field width.
pub const SIZE_FIELD_LEN: usize = 16;

/// File payloads move in chunks of at most this many bytes.
pub const CHUNK_LEN: usize = 4096;

/// Version sentinel: "no version" on a transfer, "cached copy dropped" on a
/// deregister.
pub const NO_VERSION: i64 = -1;

/// Size-field sentinel for a file the serving node does not have.
pub const SIZE_NOT_FOUND: i64 = -1;

/// Size-field sentinel for a file that opened but could not be stat'ed.
pub const SIZE_STAT_FAILED: i64 = -2;

/// Role discriminator opening a peer-to-peer dialog.
pub const ROLE_PEER: u8 = b'0';

/// Role discriminator opening a leaf-to-super or leaf-to-leaf dialog.
pub const ROLE_LEAF: u8 = b'1';

/// Requests carried on a peer-to-peer dialog. Peer dialogs are one-shot
/// transactions: one request, at most one reply, then the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequest {
    Query,
    Invalidate,
    Compare,
}

impl PeerRequest {
    pub fn tag(self) -> u8 {
        match self {
            PeerRequest::Query => b'1',
            PeerRequest::Invalidate => b'2',
            PeerRequest::Compare => b'3',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'1' => Some(PeerRequest::Query),
            b'2' => Some(PeerRequest::Invalidate),
            b'3' => Some(PeerRequest::Compare),
            _ => None,
        }
    }
}

/// Requests carried on a leaf's long-lived session with its super-peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    Disconnect,
    Register,
    Deregister,
    Search,
    DumpIndex,
    DumpMessageIds,
    DumpPending,
}

impl SessionRequest {
    pub fn tag(self) -> u8 {
        match self {
            SessionRequest::Disconnect => b'0',
            SessionRequest::Register => b'1',
            SessionRequest::Deregister => b'2',
            SessionRequest::Search => b'3',
            SessionRequest::DumpIndex => b'4',
            SessionRequest::DumpMessageIds => b'5',
            SessionRequest::DumpPending => b'6',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'0' => Some(SessionRequest::Disconnect),
            b'1' => Some(SessionRequest::Register),
            b'2' => Some(SessionRequest::Deregister),
            b'3' => Some(SessionRequest::Search),
            b'4' => Some(SessionRequest::DumpIndex),
            b'5' => Some(SessionRequest::DumpMessageIds),
            b'6' => Some(SessionRequest::DumpPending),
            _ => None,
        }
    }
}

/// Requests on a leaf-to-leaf dialog, selected after the leaf role byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRequest {
    Obtain,
    Poll,
}

impl TransferRequest {
    pub fn tag(self) -> u8 {
        match self {
            TransferRequest::Obtain => b'1',
            TransferRequest::Poll => b'2',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'1' => Some(TransferRequest::Obtain),
            b'2' => Some(TransferRequest::Poll),
            _ => None,
        }
    }
}

/// One action on the registration stream.
///
/// The wire keeps the original two request bytes plus the version sentinel;
/// in process the three meanings are separate variants so nothing downstream
/// dispatches on `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationAction {
    /// The leaf advertises `filename` (an unchanged local file or a valid
    /// cached copy).
    Register { filename: String },
    /// The leaf dropped its cached copy of `filename`; pure index
    /// maintenance. Wire form: deregister with version `-1`.
    DropCache { filename: String },
    /// The origin reports its own `filename` changed to `version`; this is
    /// the signal the consistency engine consumes. Wire form: deregister
    /// with the new version.
    ModifyOrigin { filename: String, version: i64 },
}

impl RegistrationAction {
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> MeshResult<()> {
        match self {
            RegistrationAction::Register { filename } => {
                write_tag(w, SessionRequest::Register.tag()).await?;
                write_filename(w, filename).await?;
            }
            RegistrationAction::DropCache { filename } => {
                write_tag(w, SessionRequest::Deregister.tag()).await?;
                write_filename(w, filename).await?;
                write_i64(w, NO_VERSION).await?;
            }
            RegistrationAction::ModifyOrigin { filename, version } => {
                write_tag(w, SessionRequest::Deregister.tag()).await?;
                write_filename(w, filename).await?;
                write_i64(w, *version).await?;
            }
        }
        Ok(())
    }

    /// Read the body of a register/deregister whose request byte has already
    /// been consumed by the session loop.
    pub async fn read_remaining<R: AsyncRead + Unpin>(
        r: &mut R,
        request: SessionRequest,
    ) -> MeshResult<Self> {
        let filename = read_filename(r).await?;
        match request {
            SessionRequest::Register => Ok(RegistrationAction::Register { filename }),
            SessionRequest::Deregister => {
                let version = read_i64(r).await?;
                if version == NO_VERSION {
                    Ok(RegistrationAction::DropCache { filename })
                } else {
                    Ok(RegistrationAction::ModifyOrigin { filename, version })
                }
            }
            other => Err(MeshError::UnexpectedRequest { byte: other.tag() }),
        }
    }
}

/// Common header of every flooded message: `(ttl, origin, seq, filename)`.
/// Invalidate and compare append a version field after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodHeader {
    pub ttl: i32,
    pub origin: i32,
    pub seq: i32,
    pub filename: String,
}

impl FloodHeader {
    pub fn message_id(&self) -> (i32, i32) {
        (self.origin, self.seq)
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> MeshResult<()> {
        write_i32(w, self.ttl).await?;
        write_i32(w, self.origin).await?;
        write_i32(w, self.seq).await?;
        write_filename(w, &self.filename).await
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<Self> {
        let ttl = read_i32(r).await?;
        let origin = read_i32(r).await?;
        let seq = read_i32(r).await?;
        let filename = read_filename(r).await?;
        Ok(FloodHeader {
            ttl,
            origin,
            seq,
            filename,
        })
    }
}

pub async fn write_tag<W: AsyncWrite + Unpin>(w: &mut W, tag: u8) -> MeshResult<()> {
    w.write_all(&[tag]).await?;
    Ok(())
}

pub async fn read_tag<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).await?;
    Ok(buf[0])
}

pub async fn write_i32<W: AsyncWrite + Unpin>(w: &mut W, value: i32) -> MeshResult<()> {
    w.write_all(&value.to_ne_bytes()).await?;
    Ok(())
}

pub async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(i32::from_ne_bytes(buf))
}

pub async fn write_i64<W: AsyncWrite + Unpin>(w: &mut W, value: i64) -> MeshResult<()> {
    w.write_all(&value.to_ne_bytes()).await?;
    Ok(())
}

pub async fn read_i64<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await?;
    Ok(i64::from_ne_bytes(buf))
}

pub async fn write_filename<W: AsyncWrite + Unpin>(w: &mut W, name: &str) -> MeshResult<()> {
    w.write_all(&pack_padded(name, FILENAME_LEN)).await?;
    Ok(())
}

pub async fn read_filename<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<String> {
    let mut buf = [0u8; FILENAME_LEN];
    r.read_exact(&mut buf).await?;
    Ok(parse_padded(&buf))
}

pub async fn write_id_list<W: AsyncWrite + Unpin>(w: &mut W, ids: &[i32]) -> MeshResult<()> {
    w.write_all(&pack_padded(&format_id_list(ids), ID_LIST_LEN))
        .await?;
    Ok(())
}

pub async fn read_id_list<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<Vec<i32>> {
    let mut buf = vec![0u8; ID_LIST_LEN];
    r.read_exact(&mut buf).await?;
    Ok(parse_id_list(&parse_padded(&buf)))
}

pub async fn write_size<W: AsyncWrite + Unpin>(w: &mut W, size: i64) -> MeshResult<()> {
    w.write_all(&pack_padded(&size.to_string(), SIZE_FIELD_LEN))
        .await?;
    Ok(())
}

pub async fn read_size<R: AsyncRead + Unpin>(r: &mut R) -> MeshResult<i64> {
    let mut buf = [0u8; SIZE_FIELD_LEN];
    r.read_exact(&mut buf).await?;
    let text = parse_padded(&buf);
    text.trim()
        .parse::<i64>()
        .map_err(|e| MeshError::MalformedField {
            field: "size",
            reason: format!("{text:?}: {e}"),
        })
}

/// Copy a string into a zero-padded buffer of `len` bytes, truncating to
/// `len - 1` so the result is always NUL-terminated.
fn pack_padded(s: &str, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let bytes = s.as_bytes();
    let n = bytes.len().min(len - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Read a zero-padded buffer back to a string, stopping at the first NUL.
fn parse_padded(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn format_id_list(ids: &[i32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-separated id list; tokens that fail to parse are skipped.
fn parse_id_list(text: &str) -> Vec<i32> {
    text.split(',')
        .filter_map(|tok| tok.trim().parse::<i32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn filename_truncated_to_buffer_capacity() {
        let long = "x".repeat(FILENAME_LEN + 40);
        let packed = pack_padded(&long, FILENAME_LEN);
        assert_eq!(packed.len(), FILENAME_LEN);
        assert_eq!(packed[FILENAME_LEN - 1], 0);
        assert_eq!(parse_padded(&packed), "x".repeat(FILENAME_LEN - 1));
    }

    #[test]
    fn max_length_filename_round_trips() {
        let name = "y".repeat(FILENAME_LEN - 1);
        assert_eq!(parse_padded(&pack_padded(&name, FILENAME_LEN)), name);
    }

    #[test]
    fn empty_id_list_means_not_found() {
        assert!(parse_id_list("").is_empty());
        assert_eq!(format_id_list(&[]), "");
    }

    #[test]
    fn id_list_tolerates_garbage_tokens() {
        assert_eq!(parse_id_list("8100,,oops,8101"), vec![8100, 8101]);
    }

    #[tokio::test]
    async fn registration_actions_round_trip() {
        let actions = vec![
            RegistrationAction::Register {
                filename: "a.txt".into(),
            },
            RegistrationAction::DropCache {
                filename: "b.txt".into(),
            },
            RegistrationAction::ModifyOrigin {
                filename: "c.txt".into(),
                version: 1_700_000_000,
            },
        ];

        for action in actions {
            let mut buf = std::io::Cursor::new(Vec::new());
            action.write_to(&mut buf).await.unwrap();

            let bytes = buf.into_inner();
            let mut r = &bytes[..];
            let request = SessionRequest::from_tag(read_tag(&mut r).await.unwrap()).unwrap();
            let decoded = RegistrationAction::read_remaining(&mut r, request)
                .await
                .unwrap();
            assert_eq!(decoded, action);
        }
    }

    #[tokio::test]
    async fn flood_header_round_trips() {
        let header = FloodHeader {
            ttl: 3,
            origin: 8100,
            seq: 17,
            filename: "doc.pdf".into(),
        };
        let mut buf = std::io::Cursor::new(Vec::new());
        header.write_to(&mut buf).await.unwrap();

        let bytes = buf.into_inner();
        let decoded = FloodHeader::read_from(&mut &bytes[..]).await.unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.message_id(), (8100, 17));
    }

    #[tokio::test]
    async fn size_field_carries_sentinels() {
        for value in [SIZE_NOT_FOUND, SIZE_STAT_FAILED, 0, 123_456_789] {
            let mut buf = std::io::Cursor::new(Vec::new());
            write_size(&mut buf, value).await.unwrap();
            let bytes = buf.into_inner();
            assert_eq!(bytes.len(), SIZE_FIELD_LEN);
            assert_eq!(read_size(&mut &bytes[..]).await.unwrap(), value);
        }
    }

    proptest! {
        #[test]
        fn any_short_filename_round_trips(name in "[a-zA-Z0-9._-]{1,255}") {
            prop_assert_eq!(parse_padded(&pack_padded(&name, FILENAME_LEN)), name);
        }

        #[test]
        fn id_lists_round_trip(ids in proptest::collection::vec(1i32..=65535, 0..64)) {
            prop_assert_eq!(parse_id_list(&format_id_list(&ids)), ids);
        }
    }
}
