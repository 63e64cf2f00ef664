//! D-Bus 1.0 binary framing, little-endian only.
//!
//! Alignment is tracked as an absolute position from the start of the
//! message; the header is padded to an 8-byte boundary, so body encoders can
//! run with a fresh position of zero.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::decode::{decode_variant_value, WireReader};
use crate::error::{DbusError, WireError};
use crate::types::ObjectPath;

pub(crate) const MSG_METHOD_CALL: u8 = 1;
pub(crate) const MSG_METHOD_RETURN: u8 = 2;
pub(crate) const MSG_ERROR: u8 = 3;
pub(crate) const MSG_SIGNAL: u8 = 4;

const BYTE_ORDER_LITTLE: u8 = b'l';
const PROTO_VERSION: u8 = 1;

const FIELD_PATH: u8 = 1;
const FIELD_INTERFACE: u8 = 2;
const FIELD_MEMBER: u8 = 3;
const FIELD_ERROR_NAME: u8 = 4;
const FIELD_REPLY_SERIAL: u8 = 5;
const FIELD_DESTINATION: u8 = 6;
const FIELD_SIGNATURE: u8 = 8;

/// Append-only message writer with running alignment.
#[derive(Debug, Default)]
pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn align(&mut self, n: usize) {
        while self.buf.len() % n != 0 {
            self.buf.push(0);
        }
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_string(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    pub(crate) fn put_signature(&mut self, sig: &str) {
        self.buf.push(sig.len() as u8);
        self.buf.extend_from_slice(sig.as_bytes());
        self.buf.push(0);
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// A variant value accepted inside an `a{sv}` call body.
#[derive(Debug, Clone)]
pub enum Arg {
    Str(String),
    StrArray(Vec<String>),
}

/// Method-call body, limited to the signatures the BlueZ client needs.
#[derive(Debug, Clone)]
pub enum CallBody {
    Empty,
    /// `s`
    Str(String),
    /// `ss`
    TwoStrings(String, String),
    /// `a{sv}`
    Dict(Vec<(String, Arg)>),
    /// `aya{sv}`
    BytesWithDict(Vec<u8>, Vec<(String, Arg)>),
}

impl CallBody {
    fn signature(&self) -> &'static str {
        match self {
            CallBody::Empty => "",
            CallBody::Str(_) => "s",
            CallBody::TwoStrings(..) => "ss",
            CallBody::Dict(_) => "a{sv}",
            CallBody::BytesWithDict(..) => "aya{sv}",
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::default();
        match self {
            CallBody::Empty => {}
            CallBody::Str(s) => w.put_string(s),
            CallBody::TwoStrings(a, b) => {
                w.put_string(a);
                w.put_string(b);
            }
            CallBody::Dict(entries) => put_dict_sv(&mut w, entries),
            CallBody::BytesWithDict(data, entries) => {
                w.put_u32(data.len() as u32);
                w.buf.extend_from_slice(data);
                put_dict_sv(&mut w, entries);
            }
        }
        w.into_bytes()
    }
}

/// `a{sv}`: array length excludes the padding between the length word and
/// the first 8-aligned dict entry.
fn put_dict_sv(w: &mut WireWriter, entries: &[(String, Arg)]) {
    w.align(4);
    let len_at = w.len();
    w.put_u32(0);
    w.align(8);
    let data_start = w.len();
    for (key, value) in entries {
        w.align(8);
        w.put_string(key);
        match value {
            Arg::Str(s) => {
                w.put_signature("s");
                w.put_string(s);
            }
            Arg::StrArray(items) => {
                w.put_signature("as");
                w.align(4);
                let arr_len_at = w.len();
                w.put_u32(0);
                let arr_start = w.len();
                for item in items {
                    w.put_string(item);
                }
                w.patch_u32(arr_len_at, (w.len() - arr_start) as u32);
            }
        }
    }
    w.patch_u32(len_at, (w.len() - data_start) as u32);
}

fn put_header_field(w: &mut WireWriter, code: u8, sig: &str, value: impl FnOnce(&mut WireWriter)) {
    // Each header field is a (byte, variant) struct, 8-aligned.
    w.align(8);
    w.put_u8(code);
    w.put_signature(sig);
    value(w);
}

/// Builds a complete METHOD_CALL message.
pub fn build_method_call(
    serial: u32,
    path: &str,
    iface: &str,
    member: &str,
    dest: &str,
    body: &CallBody,
) -> Vec<u8> {
    let body_bytes = body.encode();

    let mut w = WireWriter::default();
    w.put_u8(BYTE_ORDER_LITTLE);
    w.put_u8(MSG_METHOD_CALL);
    w.put_u8(0);
    w.put_u8(PROTO_VERSION);
    w.put_u32(body_bytes.len() as u32);
    w.put_u32(serial);

    let fields_len_at = w.len();
    w.put_u32(0);
    w.align(8);
    let fields_start = w.len();
    put_header_field(&mut w, FIELD_PATH, "o", |w| w.put_string(path));
    put_header_field(&mut w, FIELD_INTERFACE, "s", |w| w.put_string(iface));
    put_header_field(&mut w, FIELD_MEMBER, "s", |w| w.put_string(member));
    put_header_field(&mut w, FIELD_DESTINATION, "s", |w| w.put_string(dest));
    if !body_bytes.is_empty() {
        put_header_field(&mut w, FIELD_SIGNATURE, "g", |w| {
            w.put_signature(body.signature())
        });
    }
    w.patch_u32(fields_len_at, (w.len() - fields_start) as u32);

    w.align(8);
    let mut out = w.into_bytes();
    out.extend_from_slice(&body_bytes);
    out
}

/// One message off the wire, header fields picked apart, body left raw.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub msg_type: u8,
    pub serial: u32,
    pub reply_serial: Option<u32>,
    pub path: Option<ObjectPath>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub body: Vec<u8>,
}

/// Reads one complete message: fixed 16-byte prelude, header field array,
/// padding to 8, then exactly `body_len` body bytes.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<RawMessage, DbusError> {
    let mut prelude = [0u8; 16];
    r.read_exact(&mut prelude).await?;
    if prelude[0] != BYTE_ORDER_LITTLE {
        return Err(WireError::ByteOrder(prelude[0]).into());
    }

    let body_len = u32::from_le_bytes([prelude[4], prelude[5], prelude[6], prelude[7]]) as usize;
    let serial = u32::from_le_bytes([prelude[8], prelude[9], prelude[10], prelude[11]]);
    let fields_len =
        u32::from_le_bytes([prelude[12], prelude[13], prelude[14], prelude[15]]) as usize;

    let mut fields = vec![0u8; fields_len];
    r.read_exact(&mut fields).await?;

    let mut msg = RawMessage {
        msg_type: prelude[1],
        serial,
        reply_serial: None,
        path: None,
        interface: None,
        member: None,
        error_name: None,
        body: Vec::new(),
    };
    parse_header_fields(&fields, &mut msg);

    // The header (prelude + field array) is padded to the next 8-byte
    // boundary before the body starts.
    let padding = (8 - (16 + fields_len) % 8) % 8;
    if padding > 0 {
        let mut pad = [0u8; 8];
        r.read_exact(&mut pad[..padding]).await?;
    }

    if body_len > 0 {
        msg.body = vec![0u8; body_len];
        r.read_exact(&mut msg.body).await?;
    }
    Ok(msg)
}

fn parse_header_fields(fields: &[u8], msg: &mut RawMessage) {
    // The field array begins at absolute offset 16, so relative offsets keep
    // the same 8-byte phase.
    let mut r = WireReader::new(fields);
    while r.remaining() > 0 {
        r.align(8);
        let Ok(code) = r.u8() else { break };
        let Ok(sig) = r.signature() else { break };
        let Ok(value) = decode_variant_value(&mut r, &sig) else {
            break;
        };
        match code {
            FIELD_PATH => {
                if let crate::types::Value::Path(p) = value {
                    msg.path = Some(p);
                }
            }
            FIELD_INTERFACE => msg.interface = value.as_str().map(str::to_owned),
            FIELD_MEMBER => msg.member = value.as_str().map(str::to_owned),
            FIELD_ERROR_NAME => msg.error_name = value.as_str().map(str::to_owned),
            FIELD_REPLY_SERIAL => {
                if let crate::types::Value::U32(v) = value {
                    msg.reply_serial = Some(v);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn method_call_round_trips_through_the_reader() {
        let bytes = build_method_call(
            7,
            "/org/bluez/hci0",
            "org.bluez.Adapter1",
            "StartDiscovery",
            "org.bluez",
            &CallBody::Empty,
        );
        assert_eq!(bytes[0], b'l');
        assert_eq!(bytes[1], MSG_METHOD_CALL);
        assert_eq!(bytes.len() % 8, 0);

        let msg = read_message(&mut bytes.as_slice()).await.expect("parse");
        assert_eq!(msg.msg_type, MSG_METHOD_CALL);
        assert_eq!(msg.serial, 7);
        assert_eq!(msg.path.unwrap().as_str(), "/org/bluez/hci0");
        assert_eq!(msg.interface.as_deref(), Some("org.bluez.Adapter1"));
        assert_eq!(msg.member.as_deref(), Some("StartDiscovery"));
        assert!(msg.body.is_empty());
    }

    #[tokio::test]
    async fn string_body_survives_the_round_trip() {
        let bytes = build_method_call(
            1,
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "AddMatch",
            "org.freedesktop.DBus",
            &CallBody::Str("type='signal'".into()),
        );
        let msg = read_message(&mut bytes.as_slice()).await.expect("parse");
        let mut r = WireReader::new(&msg.body);
        assert_eq!(r.string().expect("body string"), "type='signal'");
    }

    #[tokio::test]
    async fn foreign_byte_order_is_rejected() {
        let mut bytes = build_method_call(
            1,
            "/",
            "org.freedesktop.DBus.ObjectManager",
            "GetManagedObjects",
            "org.bluez",
            &CallBody::Empty,
        );
        bytes[0] = b'B';
        let err = read_message(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            DbusError::Wire(WireError::ByteOrder(b'B'))
        ));
    }

    #[tokio::test]
    async fn truncated_prelude_is_an_io_error() {
        let bytes = [b'l', 1, 0, 1];
        let err = read_message(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(err, DbusError::Io(_)));
    }

    #[test]
    fn dict_length_excludes_leading_entry_padding() {
        let body = CallBody::Dict(vec![("Transport".into(), Arg::Str("le".into()))]).encode();
        // Array length word, then 4 bytes of padding to the 8-aligned entry.
        let len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        assert_eq!(body.len(), 8 + len);
    }
}
