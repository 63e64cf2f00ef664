//! Bounds-checked readers for the reply and signal bodies the BlueZ client
//! consumes. Unknown signatures are skipped by their declared length; nothing
//! in here panics on truncated input.

use std::collections::HashMap;

use crate::error::WireError;
use crate::types::{InterfaceMap, ObjectPath, PropMap, Value};

/// Cursor over a message body with running alignment.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn align(&mut self, n: usize) {
        self.pos = self.pos.next_multiple_of(n);
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, WireError> {
        self.align(2);
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, WireError> {
        self.align(4);
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn string(&mut self) -> Result<String, WireError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        self.skip(1)?; // trailing nul
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub(crate) fn signature(&mut self) -> Result<String, WireError> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        self.skip(1)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Decodes one variant value of signature `sig` at the cursor.
///
/// Supports the signatures BlueZ sends for the properties we read; anything
/// else is consumed by its declared size and reported as `Unsupported`.
pub fn decode_variant_value(r: &mut WireReader<'_>, sig: &str) -> Result<Value, WireError> {
    let Some(first) = sig.bytes().next() else {
        return Ok(Value::Unsupported);
    };
    match first {
        b's' => Ok(Value::Str(r.string()?)),
        b'o' => Ok(Value::Path(ObjectPath::from(r.string()?))),
        b'g' => Ok(Value::Str(r.signature()?)),
        b'b' => Ok(Value::Bool(r.u32()? == 1)),
        b'y' => Ok(Value::Byte(r.u8()?)),
        b'q' => Ok(Value::U16(r.u16()?)),
        b'n' => Ok(Value::I16(r.u16()? as i16)),
        b'u' => Ok(Value::U32(r.u32()?)),
        b'i' => Ok(Value::I32(r.u32()? as i32)),
        b'a' => decode_array(r, &sig[1..]),
        // Fixed 8-byte scalars we never interpret.
        b't' | b'x' | b'd' => {
            r.align(8);
            r.skip(8)?;
            Ok(Value::Unsupported)
        }
        _ => Ok(Value::Unsupported),
    }
}

fn decode_array(r: &mut WireReader<'_>, elem_sig: &str) -> Result<Value, WireError> {
    match elem_sig.as_bytes().first() {
        Some(b'y') => {
            let len = r.u32()? as usize;
            let bytes = r.take(len)?;
            Ok(Value::Bytes(bytes.to_vec()))
        }
        Some(b's') => {
            let len = r.u32()? as usize;
            let end = r.pos + len;
            let mut out = Vec::new();
            while r.pos < end && r.remaining() > 0 {
                out.push(r.string()?);
            }
            r.pos = end.min(r.buf.len());
            Ok(Value::StrArray(out))
        }
        Some(b'{') if elem_sig.starts_with("{sv}") => Ok(Value::Dict(decode_prop_map(r)?)),
        _ => {
            // Unknown element type: skip the whole array body.
            let len = r.u32()? as usize;
            if elem_sig.starts_with('{') {
                r.align(8);
            }
            r.skip(len)?;
            Ok(Value::Unsupported)
        }
    }
}

/// `a{sv}` at the cursor.
pub fn decode_prop_map(r: &mut WireReader<'_>) -> Result<PropMap, WireError> {
    let len = r.u32()? as usize;
    r.align(8);
    let end = r.pos + len;
    let mut out = HashMap::new();
    while r.pos < end && r.remaining() > 0 {
        r.align(8);
        if r.pos >= end {
            break;
        }
        let key = r.string()?;
        let sig = r.signature()?;
        let value = decode_variant_value(r, &sig)?;
        out.insert(key, value);
    }
    r.pos = end.min(r.buf.len());
    Ok(out)
}

/// `a{sa{sv}}` at the cursor.
fn decode_interface_map(r: &mut WireReader<'_>) -> Result<InterfaceMap, WireError> {
    let len = r.u32()? as usize;
    r.align(8);
    let end = r.pos + len;
    let mut out = HashMap::new();
    while r.pos < end && r.remaining() > 0 {
        r.align(8);
        if r.pos >= end {
            break;
        }
        let iface = r.string()?;
        let props = decode_prop_map(r)?;
        out.insert(iface, props);
    }
    r.pos = end.min(r.buf.len());
    Ok(out)
}

/// `GetManagedObjects` reply body: `a{oa{sa{sv}}}`.
pub fn decode_managed_objects(
    body: &[u8],
) -> Result<HashMap<ObjectPath, InterfaceMap>, WireError> {
    let mut out = HashMap::new();
    if body.is_empty() {
        return Ok(out);
    }
    let mut r = WireReader::new(body);
    let len = r.u32()? as usize;
    r.align(8);
    let end = r.pos + len;
    while r.pos < end && r.remaining() > 0 {
        r.align(8);
        if r.pos >= end {
            break;
        }
        let path = ObjectPath::from(r.string()?);
        let interfaces = decode_interface_map(&mut r)?;
        out.insert(path, interfaces);
    }
    Ok(out)
}

/// `InterfacesAdded` signal body: `(o, a{sa{sv}})`.
pub fn decode_interfaces_added(body: &[u8]) -> Result<(ObjectPath, InterfaceMap), WireError> {
    let mut r = WireReader::new(body);
    let path = ObjectPath::from(r.string()?);
    let interfaces = decode_interface_map(&mut r)?;
    Ok((path, interfaces))
}

/// `PropertiesChanged` signal body: `(s, a{sv}, as)`. The invalidated-
/// properties list is not consumed.
pub fn decode_properties_changed(body: &[u8]) -> Result<(String, PropMap), WireError> {
    let mut r = WireReader::new(body);
    let interface = r.string()?;
    let changed = decode_prop_map(&mut r)?;
    Ok((interface, changed))
}

/// A reply body that is a single variant, as `Properties.Get` returns.
pub fn decode_body_variant(body: &[u8]) -> Result<Value, WireError> {
    let mut r = WireReader::new(body);
    let sig = r.signature()?;
    decode_variant_value(&mut r, &sig)
}

/// A reply body that is a single string, as `Hello` returns.
pub fn decode_body_string(body: &[u8]) -> Result<String, WireError> {
    WireReader::new(body).string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Arg, CallBody};

    fn encode_dict(entries: Vec<(String, Arg)>) -> Vec<u8> {
        body_bytes(&CallBody::Dict(entries))
    }

    fn body_bytes(body: &CallBody) -> Vec<u8> {
        // Reuse the production writer so encode and decode stay in lockstep.
        let msg = crate::wire::build_method_call(1, "/", "i.f", "M", "d.e", body);
        let body_len = u32::from_le_bytes([msg[4], msg[5], msg[6], msg[7]]) as usize;
        msg[msg.len() - body_len..].to_vec()
    }

    #[test]
    fn prop_map_round_trips_strings_and_arrays() {
        let body = encode_dict(vec![
            ("Transport".into(), Arg::Str("le".into())),
            (
                "UUIDs".into(),
                Arg::StrArray(vec![
                    "a1b2c3d4-e5f6-1111-2222-333344445555".into(),
                    "0000180f-0000-1000-8000-00805f9b34fb".into(),
                ]),
            ),
        ]);
        let mut r = WireReader::new(&body);
        let map = decode_prop_map(&mut r).expect("decode");
        assert_eq!(map["Transport"].as_str(), Some("le"));
        assert_eq!(
            map["UUIDs"].as_str_array().map(<[String]>::len),
            Some(2)
        );
    }

    #[test]
    fn empty_dict_decodes_empty() {
        let body = encode_dict(Vec::new());
        let mut r = WireReader::new(&body);
        let map = decode_prop_map(&mut r).expect("decode");
        assert!(map.is_empty());
    }

    #[test]
    fn two_string_body_decodes_in_order() {
        let body = body_bytes(&CallBody::TwoStrings(
            "org.bluez.Device1".into(),
            "ServicesResolved".into(),
        ));
        let mut r = WireReader::new(&body);
        assert_eq!(r.string().unwrap(), "org.bluez.Device1");
        assert_eq!(r.string().unwrap(), "ServicesResolved");
    }

    #[test]
    fn byte_array_with_options_round_trips() {
        let body = body_bytes(&CallBody::BytesWithDict(
            vec![0x01, 0x05, 0x01, 0x00, b'h', b'i'],
            vec![("type".into(), Arg::Str("command".into()))],
        ));
        let mut r = WireReader::new(&body);
        let len = r.u32().unwrap() as usize;
        assert_eq!(len, 6);
        let mut r2 = WireReader::new(&body);
        let value = decode_variant_value(&mut r2, "ay").unwrap();
        assert_eq!(value.as_bytes(), Some(&body[4..10]));
        let opts = decode_prop_map(&mut r2).expect("options dict");
        assert_eq!(opts["type"].as_str(), Some("command"));
    }

    #[test]
    fn managed_objects_tree_decodes() {
        use crate::wire::WireWriter;

        // a{oa{sa{sv}}} with one device carrying Device1 props, hand-built
        // with the production writer.
        let mut w = WireWriter::default();
        let outer_len_at = w.len();
        w.put_u32(0);
        w.align(8);
        let outer_start = w.len();

        w.align(8);
        w.put_string("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
        let ifaces_len_at = {
            w.align(4);
            let at = w.len();
            w.put_u32(0);
            at
        };
        w.align(8);
        let ifaces_start = w.len();
        w.align(8);
        w.put_string("org.bluez.Device1");
        let props_len_at = {
            w.align(4);
            let at = w.len();
            w.put_u32(0);
            at
        };
        w.align(8);
        let props_start = w.len();
        w.align(8);
        w.put_string("Alias");
        w.put_signature("s");
        w.put_string("BlueTalk");
        w.align(8);
        w.put_string("Connected");
        w.put_signature("b");
        w.put_u32(1);
        let props_end = w.len();
        w.patch_u32(props_len_at, (props_end - props_start) as u32);
        w.patch_u32(ifaces_len_at, (props_end - ifaces_start) as u32);
        w.patch_u32(outer_len_at, (props_end - outer_start) as u32);

        let body = w.into_bytes();
        let objects = decode_managed_objects(&body).expect("decode");
        let ifaces = &objects[&ObjectPath::from("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF")];
        let dev = &ifaces["org.bluez.Device1"];
        assert_eq!(dev["Alias"].as_str(), Some("BlueTalk"));
        assert_eq!(dev["Connected"].as_bool(), Some(true));
    }

    #[test]
    fn properties_changed_body_decodes_value_bytes() {
        use crate::wire::WireWriter;

        // (s, a{sv}, as) with a Value: ay change, as BlueZ notifies.
        let mut w = WireWriter::default();
        w.put_string("org.bluez.GattCharacteristic1");
        let dict_len_at = {
            w.align(4);
            let at = w.len();
            w.put_u32(0);
            at
        };
        w.align(8);
        let dict_start = w.len();
        w.align(8);
        w.put_string("Value");
        w.put_signature("ay");
        w.put_u32(3);
        for b in [0x02u8, 0x01, 0x01] {
            w.put_u8(b);
        }
        let dict_end = w.len();
        w.patch_u32(dict_len_at, (dict_end - dict_start) as u32);
        w.align(4);
        w.put_u32(0); // empty invalidated list

        let body = w.into_bytes();
        let (iface, changed) = decode_properties_changed(&body).expect("decode");
        assert_eq!(iface, "org.bluez.GattCharacteristic1");
        assert_eq!(changed["Value"].as_bytes(), Some(&[0x02u8, 0x01, 0x01][..]));
    }

    #[test]
    fn truncated_string_is_an_error_not_a_panic() {
        let body = [5u8, 0, 0, 0, b'a', b'b'];
        let mut r = WireReader::new(&body);
        assert!(matches!(r.string(), Err(WireError::Truncated)));
    }

    #[test]
    fn unknown_variant_signature_is_skipped() {
        // A variant holding t (u64) followed by a string; the u64 must be
        // consumed so the string decodes cleanly.
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u64.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(b"ok\0");
        let mut r = WireReader::new(&buf);
        assert_eq!(
            decode_variant_value(&mut r, "t").unwrap(),
            Value::Unsupported
        );
        assert_eq!(r.string().unwrap(), "ok");
    }
}
